use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::generation::{GenerationOutput, GenerationProgress, QuizSection};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

/// What a poller sees for one quiz build job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizJobView {
    pub id: Uuid,
    pub status: JobStatus,
    pub sections: Vec<QuizSection>,
    pub progress: GenerationProgress,
    pub result: Option<GenerationOutput>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}
