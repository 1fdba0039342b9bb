//! Generation API endpoints

use crate::OrchestratorClient;
use crate::error::Result;
use coursecraft_core::domain::task::GenerationTask;
use coursecraft_core::dto::generation::{
    GenerationAccepted, RegenerateChapter, RegenerationAccepted, StartGeneration,
};
use uuid::Uuid;

impl OrchestratorClient {
    // =============================================================================
    // Course Generation
    // =============================================================================

    /// Submit a course generation request
    ///
    /// The orchestrator answers as soon as the draft course and its task exist;
    /// poll [`get_task`](Self::get_task) for progress.
    pub async fn start_generation(&self, req: StartGeneration) -> Result<GenerationAccepted> {
        let response = self
            .client
            .post(self.url("/api/courses/generate"))
            .json(&req)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Get a generation task by ID
    pub async fn get_task(&self, task_id: Uuid) -> Result<GenerationTask> {
        let response = self
            .client
            .get(self.url(&format!("/api/tasks/{}", task_id)))
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Request cancellation of a running task
    ///
    /// # Returns
    /// The task as of the request; a live run reaches CANCELLED at its next checkpoint
    pub async fn cancel_task(&self, task_id: Uuid) -> Result<GenerationTask> {
        let response = self
            .client
            .post(self.url(&format!("/api/tasks/{}/cancel", task_id)))
            .send()
            .await?;

        self.handle_response(response).await
    }

    // =============================================================================
    // Chapter Regeneration
    // =============================================================================

    /// Regenerate one chapter of an existing course
    ///
    /// # Arguments
    /// * `course_id` - The course owning the chapter
    /// * `chapter_id` - The chapter to regenerate
    /// * `reason` - Feedback passed to the content prompt
    pub async fn regenerate_chapter(
        &self,
        course_id: Uuid,
        chapter_id: Uuid,
        reason: impl Into<String>,
    ) -> Result<RegenerationAccepted> {
        let url = self.url(&format!(
            "/api/courses/{}/chapters/{}/regenerate",
            course_id, chapter_id
        ));
        let response = self
            .client
            .post(&url)
            .json(&RegenerateChapter {
                reason: reason.into(),
            })
            .send()
            .await?;

        self.handle_response(response).await
    }
}
