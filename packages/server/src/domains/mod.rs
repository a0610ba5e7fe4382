//! Business executors. Each is a plain async function registered with the
//! dispatcher; capabilities arrive through the [`JobContext`].
//!
//! [`JobContext`]: crate::kernel::jobs::dispatcher::JobContext

pub mod chat;
pub mod engagement;
pub mod posting;

use crate::common::types::{ChatPayload, EngagementPayload, MassPostPayload};
use crate::kernel::jobs::dispatcher::Dispatcher;
use crate::kernel::jobs::job::JobType;

/// The production dispatcher: one executor per job type.
pub fn build_dispatcher() -> Dispatcher {
    let mut dispatcher = Dispatcher::new();
    dispatcher.register::<EngagementPayload, _, _>(JobType::Engagement, engagement::run);
    dispatcher.register::<MassPostPayload, _, _>(JobType::MassPost, posting::run);
    dispatcher.register::<ChatPayload, _, _>(JobType::Chat, chat::run);
    dispatcher
}
