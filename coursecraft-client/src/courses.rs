//! Course-related API endpoints

use crate::OrchestratorClient;
use crate::error::Result;
use coursecraft_core::domain::course::Course;
use coursecraft_core::domain::export::ExportFormat;
use coursecraft_core::domain::task::GenerationTask;
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_TYPE, HeaderMap};
use uuid::Uuid;

/// A downloaded export package
#[derive(Debug, Clone)]
pub struct ExportDownload {
    /// File name suggested by the orchestrator
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl OrchestratorClient {
    /// Get a course, including chapters already persisted by a run in progress
    pub async fn get_course(&self, course_id: Uuid) -> Result<Course> {
        let response = self
            .client
            .get(self.url(&format!("/api/courses/{}", course_id)))
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// List every generation and regeneration task of a course
    pub async fn list_course_tasks(&self, course_id: Uuid) -> Result<Vec<GenerationTask>> {
        let response = self
            .client
            .get(self.url(&format!("/api/courses/{}/tasks", course_id)))
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Download a ready course as an export package
    pub async fn export_course(&self, course_id: Uuid, format: ExportFormat) -> Result<ExportDownload> {
        let url = self.url(&format!("/api/courses/{}/export/{}", course_id, format));
        let response = self.client.get(&url).send().await?;
        let response = self.check_status(response).await?;

        let headers = response.headers();
        let file_name = attachment_file_name(headers);
        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response.bytes().await?.to_vec();

        Ok(ExportDownload {
            file_name,
            content_type,
            bytes,
        })
    }
}

fn attachment_file_name(headers: &HeaderMap) -> Option<String> {
    let disposition = headers.get(CONTENT_DISPOSITION)?.to_str().ok()?;
    disposition
        .split(';')
        .map(str::trim)
        .find_map(|part| part.strip_prefix("filename="))
        .map(|name| name.trim_matches('"').to_string())
        .filter(|name| !name.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_attachment_file_name() {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_DISPOSITION,
            HeaderValue::from_static("attachment; filename=\"intro-to-rust.html\""),
        );
        assert_eq!(
            attachment_file_name(&headers).as_deref(),
            Some("intro-to-rust.html")
        );
    }

    #[test]
    fn test_attachment_file_name_missing() {
        let mut headers = HeaderMap::new();
        assert_eq!(attachment_file_name(&headers), None);

        headers.insert(CONTENT_DISPOSITION, HeaderValue::from_static("inline"));
        assert_eq!(attachment_file_name(&headers), None);
    }
}
