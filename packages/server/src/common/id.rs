//! Id minting for jobs and job groups.
//!
//! Bulk children encode their group as `<parentId>:<random>` so the grouping
//! key survives any transport that only carries the job id.

use uuid::Uuid;

pub fn job_id() -> String {
    Uuid::new_v4().to_string()
}

pub fn group_id() -> String {
    Uuid::new_v4().to_string()
}

/// Child id for a bulk enqueue: `<parentId>:<random8>`.
pub fn child_job_id(parent_id: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{parent_id}:{}", &suffix[..8])
}

/// Recover the group key from a child id, if it has one.
pub fn parent_of(job_id: &str) -> Option<&str> {
    job_id.split_once(':').map(|(parent, _)| parent)
}
