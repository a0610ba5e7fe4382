//! The job model and its read projection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use typed_builder::TypedBuilder;

use crate::kernel::logsink::{LogEntry, LogRing};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobType {
    #[serde(rename = "massPost")]
    MassPost,
    #[serde(rename = "engagement")]
    Engagement,
    #[serde(rename = "chat")]
    Chat,
}

impl JobType {
    pub const ALL: [JobType; 3] = [JobType::MassPost, JobType::Engagement, JobType::Chat];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::MassPost => "massPost",
            JobType::Engagement => "engagement",
            JobType::Chat => "chat",
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "massPost" => Ok(JobType::MassPost),
            "engagement" => Ok(JobType::Engagement),
            "chat" => Ok(JobType::Chat),
            other => Err(format!("unknown job type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    #[default]
    Waiting,
    Active,
    Completed,
    Failed,
    Stalled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

/// One job as the backend stores it.
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct Job {
    pub id: String,
    pub tenant_id: String,
    pub job_type: JobType,
    #[builder(default)]
    pub parent_id: Option<String>,

    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default)]
    pub processed_at: Option<DateTime<Utc>>,
    #[builder(default)]
    pub finished_at: Option<DateTime<Utc>>,

    #[builder(default = 0u32)]
    pub attempts: u32,
    #[builder(default = 5u32)]
    pub max_attempts: u32,
    #[builder(default = 0u32)]
    pub stalled_count: u32,

    #[builder(default)]
    pub state: JobState,
    #[builder(default = 0u8)]
    pub progress: u8,
    #[builder(default = 0i32)]
    pub priority: i32,

    pub payload: Value,
    #[builder(default)]
    pub logs: LogRing,
    #[builder(default)]
    pub result: Option<Value>,
    #[builder(default)]
    pub error: Option<String>,
}

impl Job {
    /// Progress is monotonic non-decreasing within an active span.
    pub fn record_progress(&mut self, progress: u8) {
        self.progress = self.progress.max(progress.min(100));
    }

    pub fn append_log(&mut self, entry: LogEntry) {
        // Logs freeze once the job is terminal.
        if !self.state.is_terminal() {
            self.logs.push(entry);
        }
    }

    pub fn projection(&self) -> JobProjection {
        JobProjection {
            id: self.id.clone(),
            tenant_id: self.tenant_id.clone(),
            job_type: self.job_type,
            parent_id: self.parent_id.clone(),
            state: self.state,
            progress: self.progress,
            created_at: self.created_at,
            processed_at: self.processed_at,
            finished_at: self.finished_at,
            attempts: self.attempts,
            max_attempts: self.max_attempts,
            result: self.result.clone(),
            error: self.error.clone(),
            logs: self.logs.to_vec(),
        }
    }
}

/// Read model served by the intake API.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProjection {
    pub id: String,
    pub tenant_id: String,
    pub job_type: JobType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub state: JobState,
    pub progress: u8,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub attempts: u32,
    pub max_attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub logs: Vec<LogEntry>,
}
