//! The queueing fleet.
//!
//! One logical queue per `(tenant, jobType)`, one worker pool per queue.
//! The durable backend is reached through the [`backend::QueueBackend`]
//! contract; [`memory::MemoryQueueBackend`] is the bundled implementation.
//!
//! ```text
//! intake.enqueue(...)
//!     └─► QueueRegistry.get_or_create ─► QueueBackend
//! WorkerPool (per queue)
//!     ├─► claim → lease + job:started
//!     ├─► Dispatcher → executor (auth + logger threaded through)
//!     └─► complete / fail → backend signals → EventBus → FanoutHub
//! ```

pub mod backend;
pub mod dispatcher;
pub mod intake;
pub mod job;
pub mod memory;
pub mod registry;
pub mod worker;

pub use backend::{ClaimedJob, EnqueueOptions, NewJob, QueueBackend, QueueSignal};
pub use dispatcher::{Dispatcher, ExecutorDeps, JobContext, ProgressReporter};
pub use intake::JobIntake;
pub use job::{Job, JobProjection, JobState, JobType};
pub use memory::MemoryQueueBackend;
pub use registry::{queue_name, QueueRegistry};
pub use worker::{WorkerPool, WorkerPoolConfig};
