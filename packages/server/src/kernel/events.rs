//! Job lifecycle events.
//!
//! These are facts about jobs, not commands. Every event carries the tenant
//! tag; job/parent/type tags ride along where they apply. The serialized
//! shape is the wire shape subscribers see.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use super::jobs::job::JobType;
use super::logsink::{JobLogMeta, LogEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum JobEventKind {
    #[serde(rename = "job:added")]
    Added,
    #[serde(rename = "job:started")]
    Started,
    #[serde(rename = "job:progress")]
    Progress,
    #[serde(rename = "job:completed")]
    Completed,
    #[serde(rename = "job:failed")]
    Failed,
    #[serde(rename = "job:stalled")]
    Stalled,
    #[serde(rename = "job:log")]
    Log,
    #[serde(rename = "worker:error")]
    WorkerError,
}

impl JobEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobEventKind::Added => "job:added",
            JobEventKind::Started => "job:started",
            JobEventKind::Progress => "job:progress",
            JobEventKind::Completed => "job:completed",
            JobEventKind::Failed => "job:failed",
            JobEventKind::Stalled => "job:stalled",
            JobEventKind::Log => "job:log",
            JobEventKind::WorkerError => "worker:error",
        }
    }
}

impl std::fmt::Display for JobEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEvent {
    #[serde(rename = "event")]
    pub kind: JobEventKind,
    pub tenant_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_type: Option<JobType>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub will_retry: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log: Option<LogEntry>,
}

impl JobEvent {
    fn base(
        kind: JobEventKind,
        tenant_id: &str,
        job_id: Option<&str>,
        parent_id: Option<&str>,
        job_type: Option<JobType>,
    ) -> Self {
        Self {
            kind,
            tenant_id: tenant_id.to_string(),
            job_id: job_id.map(String::from),
            parent_id: parent_id.map(String::from),
            job_type,
            timestamp: Utc::now(),
            progress: None,
            result: None,
            error: None,
            will_retry: None,
            log: None,
        }
    }

    pub fn added(
        tenant_id: &str,
        job_id: &str,
        parent_id: Option<&str>,
        job_type: JobType,
    ) -> Self {
        Self::base(
            JobEventKind::Added,
            tenant_id,
            Some(job_id),
            parent_id,
            Some(job_type),
        )
    }

    pub fn started(
        tenant_id: &str,
        job_id: &str,
        parent_id: Option<&str>,
        job_type: JobType,
    ) -> Self {
        Self::base(
            JobEventKind::Started,
            tenant_id,
            Some(job_id),
            parent_id,
            Some(job_type),
        )
    }

    pub fn progress(
        tenant_id: &str,
        job_id: &str,
        parent_id: Option<&str>,
        job_type: Option<JobType>,
        progress: u8,
    ) -> Self {
        let mut event = Self::base(
            JobEventKind::Progress,
            tenant_id,
            Some(job_id),
            parent_id,
            job_type,
        );
        event.progress = Some(progress);
        event
    }

    pub fn completed(
        tenant_id: &str,
        job_id: &str,
        parent_id: Option<&str>,
        job_type: Option<JobType>,
        result: Value,
    ) -> Self {
        let mut event = Self::base(
            JobEventKind::Completed,
            tenant_id,
            Some(job_id),
            parent_id,
            job_type,
        );
        event.progress = Some(100);
        event.result = Some(result);
        event
    }

    pub fn failed(
        tenant_id: &str,
        job_id: &str,
        parent_id: Option<&str>,
        job_type: Option<JobType>,
        error: &str,
        will_retry: bool,
    ) -> Self {
        let mut event = Self::base(
            JobEventKind::Failed,
            tenant_id,
            Some(job_id),
            parent_id,
            job_type,
        );
        event.error = Some(error.to_string());
        event.will_retry = Some(will_retry);
        event
    }

    pub fn stalled(
        tenant_id: &str,
        job_id: &str,
        parent_id: Option<&str>,
        job_type: Option<JobType>,
    ) -> Self {
        Self::base(
            JobEventKind::Stalled,
            tenant_id,
            Some(job_id),
            parent_id,
            job_type,
        )
    }

    pub fn log(meta: &JobLogMeta, entry: LogEntry) -> Self {
        let mut event = Self::base(
            JobEventKind::Log,
            &meta.tenant_id,
            Some(&meta.job_id),
            meta.parent_id.as_deref(),
            Some(meta.job_type),
        );
        event.log = Some(entry);
        event
    }

    pub fn worker_error(tenant_id: &str, error: &str) -> Self {
        let mut event = Self::base(JobEventKind::WorkerError, tenant_id, None, None, None);
        event.error = Some(error.to_string());
        event
    }

    /// Whether the event is addressed to the tenant's user room. Progress and
    /// log telemetry only reach subscribers that watch the job or its group.
    pub fn is_lifecycle(&self) -> bool {
        !matches!(self.kind, JobEventKind::Progress | JobEventKind::Log)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_wire_names() {
        let event = JobEvent::progress("tenant-a", "job-1", None, Some(JobType::Engagement), 40);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "job:progress");
        assert_eq!(json["tenantId"], "tenant-a");
        assert_eq!(json["jobId"], "job-1");
        assert_eq!(json["jobType"], "engagement");
        assert_eq!(json["progress"], 40);
        assert!(json.get("result").is_none());
    }

    #[test]
    fn completed_carries_result_and_full_progress() {
        let event = JobEvent::completed(
            "t",
            "j",
            Some("p"),
            Some(JobType::MassPost),
            serde_json::json!({ "ok": true }),
        );
        assert_eq!(event.progress, Some(100));
        assert_eq!(event.parent_id.as_deref(), Some("p"));
        assert_eq!(event.result.unwrap()["ok"], true);
    }

    #[test]
    fn telemetry_is_not_lifecycle() {
        assert!(!JobEvent::progress("t", "j", None, None, 1).is_lifecycle());
        assert!(JobEvent::started("t", "j", None, JobType::Chat).is_lifecycle());
        assert!(JobEvent::failed("t", "j", None, None, "boom", false).is_lifecycle());
        assert!(JobEvent::worker_error("t", "boom").is_lifecycle());
    }
}
