use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::runner::RunReport;

/// Body of `POST /run`. The CLI `run` command builds the same request.
#[derive(Debug, Clone, Deserialize)]
pub struct RunRequest {
    pub script_path: PathBuf,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub fixture_path: Option<PathBuf>,
    /// Dry runs only: skip every wait.
    #[serde(default)]
    pub fast: bool,
    #[serde(default)]
    pub policy_path: Option<PathBuf>,
    /// Also write every run event to this file as JSON lines.
    #[serde(default)]
    pub events_path: Option<PathBuf>,
}

impl RunRequest {
    pub fn new(script_path: impl Into<PathBuf>) -> Self {
        Self {
            script_path: script_path.into(),
            dry_run: false,
            fixture_path: None,
            fast: false,
            policy_path: None,
            events_path: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    /// The run completed every step.
    Success,
    /// The run stopped early (failed step or abort); see the report.
    Failed,
    /// The run could not start or a collaborator broke before a report existed.
    Error,
}

/// Body of `GET /job/:id`.
#[derive(Debug, Clone, Serialize)]
pub struct JobView {
    pub job_id: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<RunReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct Accepted {
    pub job_id: String,
}
