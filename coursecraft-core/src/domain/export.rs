//! Export format types

use serde::{Deserialize, Serialize};

/// Package format a ready course can be exported to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Scorm12,
    Scorm2004,
    Xapi,
    Qti,
    Pdf,
    Html,
    Json,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Scorm12 => "scorm12",
            ExportFormat::Scorm2004 => "scorm2004",
            ExportFormat::Xapi => "xapi",
            ExportFormat::Qti => "qti",
            ExportFormat::Pdf => "pdf",
            ExportFormat::Html => "html",
            ExportFormat::Json => "json",
        }
    }

    /// File extension of the produced package
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Scorm12 | ExportFormat::Scorm2004 | ExportFormat::Xapi => "zip",
            ExportFormat::Qti => "xml",
            ExportFormat::Pdf => "pdf",
            ExportFormat::Html => "html",
            ExportFormat::Json => "json",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Scorm12 | ExportFormat::Scorm2004 | ExportFormat::Xapi => {
                "application/zip"
            }
            ExportFormat::Qti => "application/xml",
            ExportFormat::Pdf => "application/pdf",
            ExportFormat::Html => "text/html; charset=utf-8",
            ExportFormat::Json => "application/json",
        }
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "scorm12" | "scorm1.2" => Ok(ExportFormat::Scorm12),
            "scorm2004" => Ok(ExportFormat::Scorm2004),
            "xapi" => Ok(ExportFormat::Xapi),
            "qti" => Ok(ExportFormat::Qti),
            "pdf" => Ok(ExportFormat::Pdf),
            "html" => Ok(ExportFormat::Html),
            "json" => Ok(ExportFormat::Json),
            other => Err(format!("unknown export format '{}'", other)),
        }
    }
}
