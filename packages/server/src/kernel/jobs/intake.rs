//! Command surface: enqueue single jobs, bulk jobs and bulk-per-category
//! jobs; query job state. Transport-agnostic — the axum routes are a thin
//! shell over this.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::common::errors::JobError;
use crate::common::id;
use crate::common::types::{ChatPayload, EngagementPayload, MassPostPayload};
use crate::kernel::accounts::AccountStore;
use crate::kernel::event_bus::EventBus;
use crate::kernel::events::JobEvent;

use super::backend::{EnqueueOptions, NewJob, QueueBackend};
use super::job::{JobProjection, JobType};
use super::registry::{queue_name, QueueRegistry};

/// Client-facing enqueue options; everything else stays at policy defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IntakeOptions {
    pub priority: Option<i32>,
    pub delay_seconds: Option<u64>,
    pub attempts: Option<u32>,
}

impl IntakeOptions {
    fn to_enqueue_options(&self) -> EnqueueOptions {
        let mut opts = EnqueueOptions::default();
        if let Some(priority) = self.priority {
            opts.priority = priority;
        }
        if let Some(delay) = self.delay_seconds {
            opts.delay_until = Some(Utc::now() + chrono::Duration::seconds(delay as i64));
        }
        if let Some(attempts) = self.attempts {
            opts.attempts = attempts.max(1);
        }
        opts
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkReceipt {
    pub parent_id: String,
    pub job_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryReceipt {
    pub parent_id: String,
    pub job_ids: Vec<String>,
    pub account_count: usize,
}

pub struct JobIntake {
    backend: Arc<dyn QueueBackend>,
    registry: Arc<QueueRegistry>,
    accounts: Arc<dyn AccountStore>,
    bus: EventBus,
}

impl JobIntake {
    pub fn new(
        backend: Arc<dyn QueueBackend>,
        registry: Arc<QueueRegistry>,
        accounts: Arc<dyn AccountStore>,
        bus: EventBus,
    ) -> Self {
        Self {
            backend,
            registry,
            accounts,
            bus,
        }
    }

    pub async fn enqueue(
        &self,
        tenant_id: &str,
        job_type: JobType,
        payload: Value,
        opts: IntakeOptions,
    ) -> Result<String, JobError> {
        validate_payload(job_type, &payload)?;
        let queue = self.registry.get_or_create(tenant_id, job_type);
        let job_id = id::job_id();
        self.backend
            .enqueue(
                &queue,
                NewJob {
                    id: job_id.clone(),
                    tenant_id: tenant_id.to_string(),
                    job_type,
                    parent_id: None,
                    payload,
                },
                opts.to_enqueue_options(),
            )
            .await?;
        self.bus
            .publish(JobEvent::added(tenant_id, &job_id, None, job_type));
        Ok(job_id)
    }

    pub async fn enqueue_bulk(
        &self,
        tenant_id: &str,
        job_type: JobType,
        payloads: Vec<Value>,
        opts: IntakeOptions,
    ) -> Result<BulkReceipt, JobError> {
        if payloads.is_empty() {
            return Err(JobError::BadRequest("empty bulk payload list".into()));
        }
        for payload in &payloads {
            validate_payload(job_type, payload)?;
        }

        let queue = self.registry.get_or_create(tenant_id, job_type);
        let parent_id = id::group_id();
        let enqueue_opts = opts.to_enqueue_options();

        let items: Vec<(NewJob, EnqueueOptions)> = payloads
            .into_iter()
            .map(|payload| {
                (
                    NewJob {
                        id: id::child_job_id(&parent_id),
                        tenant_id: tenant_id.to_string(),
                        job_type,
                        parent_id: Some(parent_id.clone()),
                        payload,
                    },
                    enqueue_opts.clone(),
                )
            })
            .collect();
        let job_ids: Vec<String> = items.iter().map(|(job, _)| job.id.clone()).collect();

        self.backend.enqueue_batch(&queue, items).await?;
        for job_id in &job_ids {
            self.bus
                .publish(JobEvent::added(tenant_id, job_id, Some(&parent_id), job_type));
        }
        Ok(BulkReceipt { parent_id, job_ids })
    }

    /// Expand one job per account in the category. The shared payload
    /// supplies everything except `sessionData`/`accountMetadata`, which are
    /// materialized from the store per account.
    pub async fn enqueue_by_category(
        &self,
        tenant_id: &str,
        job_type: JobType,
        category_id: &str,
        shared_payload: Value,
        opts: IntakeOptions,
    ) -> Result<CategoryReceipt, JobError> {
        let mut base = match shared_payload {
            Value::Object(map) => map,
            Value::Null => serde_json::Map::new(),
            _ => {
                return Err(JobError::BadRequest(
                    "shared payload must be a JSON object".into(),
                ))
            }
        };
        // Per-account fields are filled in below; a caller-supplied session
        // would be overwritten anyway.
        base.remove("sessionData");
        base.remove("accountMetadata");

        let accounts = self
            .accounts
            .accounts_in_category(category_id)
            .await
            .map_err(|e| JobError::Internal(format!("account store: {e}")))?;
        if accounts.is_empty() {
            return Err(JobError::NotFound(format!(
                "no accounts in category {category_id}"
            )));
        }

        let mut payloads = Vec::with_capacity(accounts.len());
        for account in &accounts {
            let mut payload = base.clone();
            payload.insert(
                "sessionData".to_string(),
                serde_json::to_value(account.session_data())
                    .map_err(|e| JobError::Internal(e.to_string()))?,
            );
            payload.insert(
                "accountMetadata".to_string(),
                serde_json::to_value(account.metadata())
                    .map_err(|e| JobError::Internal(e.to_string()))?,
            );
            payloads.push(Value::Object(payload));
        }

        let receipt = self
            .enqueue_bulk(tenant_id, job_type, payloads, opts)
            .await?;
        Ok(CategoryReceipt {
            parent_id: receipt.parent_id,
            job_ids: receipt.job_ids,
            account_count: accounts.len(),
        })
    }

    pub async fn get_job(
        &self,
        tenant_id: &str,
        job_type: JobType,
        job_id: &str,
    ) -> Result<JobProjection, JobError> {
        let queue = queue_name(tenant_id, job_type);
        self.backend
            .get_job(&queue, job_id)
            .await?
            .map(|job| job.projection())
            .ok_or_else(|| JobError::NotFound(format!("job {job_id}")))
    }

    pub async fn list_by_parent(
        &self,
        tenant_id: &str,
        job_type: JobType,
        parent_id: &str,
    ) -> Result<Vec<JobProjection>, JobError> {
        let queue = queue_name(tenant_id, job_type);
        let jobs = self.backend.list_by_parent(&queue, parent_id).await?;
        Ok(jobs.iter().map(|job| job.projection()).collect())
    }
}

/// Deserialize against the typed payload for the job type; any mismatch is a
/// bad request before anything is enqueued.
fn validate_payload(job_type: JobType, payload: &Value) -> Result<(), JobError> {
    let bad = |e: serde_json::Error| JobError::BadRequest(format!("{job_type} payload: {e}"));
    match job_type {
        JobType::Engagement => {
            let parsed: EngagementPayload =
                serde_json::from_value(payload.clone()).map_err(bad)?;
            let opts = &parsed.engagement_options;
            if opts.like_percentage > 100 {
                return Err(JobError::BadRequest("likePercentage must be 0..=100".into()));
            }
            if opts.delay_range[0] > opts.delay_range[1] {
                return Err(JobError::BadRequest("delayRange must be [min, max]".into()));
            }
            if opts.skip_range[0] > opts.skip_range[1] {
                return Err(JobError::BadRequest("skipRange must be [min, max]".into()));
            }
            if opts.number_of_actions == 0 {
                return Err(JobError::BadRequest(
                    "numberOfActions must be at least 1".into(),
                ));
            }
        }
        JobType::MassPost => {
            let parsed: MassPostPayload = serde_json::from_value(payload.clone()).map_err(bad)?;
            if parsed.post_options.posts.is_empty() {
                return Err(JobError::BadRequest("posts must not be empty".into()));
            }
            let range = parsed.post_options.delay_range;
            if range[0] > range[1] {
                return Err(JobError::BadRequest("delayRange must be [min, max]".into()));
            }
        }
        JobType::Chat => {
            let parsed: ChatPayload = serde_json::from_value(payload.clone()).map_err(bad)?;
            if parsed.recipients.is_empty() {
                return Err(JobError::BadRequest("recipients must not be empty".into()));
            }
            if parsed.messages.is_empty() {
                return Err(JobError::BadRequest("messages must not be empty".into()));
            }
        }
    }
    Ok(())
}
