//! Pacing planner: turns engagement options into a deterministic, seeded
//! sequence of actions with inter-action delays and post skips.
//!
//! Two strategies:
//! - `uniform` draws every delay and skip straight from the configured
//!   ranges.
//! - `human-like` clusters activity into sessions of roughly five actions:
//!   short in-session delays, a long pause between sessions, and a bias
//!   toward engaging with the freshest post at the start of each session.

use serde::{Deserialize, Serialize};

use crate::common::types::{EngagementOptions, StrategyType};
use crate::kernel::clock::Rand;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    Like,
    Repost,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedAction {
    #[serde(rename = "type")]
    pub action: ActionType,
    pub delay_s: u64,
    pub skip: usize,
    pub index: usize,
    pub executed: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngagementPlan {
    pub actions: Vec<PlannedAction>,
    pub like_count: usize,
    pub repost_count: usize,
    /// Sum of all delays, in seconds.
    pub total_time: u64,
}

pub fn build_plan(options: &EngagementOptions, strategy: StrategyType, rand: &Rand) -> EngagementPlan {
    match strategy {
        StrategyType::Uniform => uniform_plan(options, rand),
        StrategyType::HumanLike => human_like_plan(options, rand),
    }
}

/// Likes come first in iteration order; exactly `floor(N·P/100)` of them.
fn like_target(n: usize, like_percentage: u8) -> usize {
    n * like_percentage as usize / 100
}

fn uniform_plan(options: &EngagementOptions, rand: &Rand) -> EngagementPlan {
    let n = options.number_of_actions;
    let likes = like_target(n, options.like_percentage);
    let [delay_min, delay_max] = options.delay_range;
    let [skip_min, skip_max] = options.skip_range;

    let mut actions = Vec::with_capacity(n);
    let mut total_time = 0u64;
    for index in 0..n {
        let delay_s = rand.u64_in(delay_min..=delay_max);
        total_time += delay_s;
        actions.push(PlannedAction {
            action: if index < likes {
                ActionType::Like
            } else {
                ActionType::Repost
            },
            delay_s,
            skip: rand.usize_in(skip_min..=skip_max),
            index,
            executed: false,
        });
    }

    EngagementPlan {
        actions,
        like_count: likes,
        repost_count: n - likes,
        total_time,
    }
}

fn human_like_plan(options: &EngagementOptions, rand: &Rand) -> EngagementPlan {
    let n = options.number_of_actions;
    let [delay_min, delay_max] = options.delay_range;
    let [skip_min, skip_max] = options.skip_range;

    // Sessions of ~5 actions; the remainder lands on the final session.
    let sessions = (n / 5).max(1);
    let mut sizes = vec![n / sessions; sessions];
    sizes[sessions - 1] += n % sessions;

    // In-session delays come from a compressed range.
    let short_min = (delay_min / 2).max(1);
    let short_max = (delay_max / 3).max(2).max(short_min);

    let mut actions = Vec::with_capacity(n);
    let mut total_time = 0u64;
    let mut index = 0usize;
    let mut done = 0usize;
    let mut likes_so_far = 0usize;

    for (session, &size) in sizes.iter().enumerate() {
        // Cumulative-integer distribution keeps the global like count exact.
        let quota = like_target(done + size, options.like_percentage) - likes_so_far;

        for position in 0..size {
            let delay_s = if session > 0 && position == 0 {
                // Long inter-session pause.
                rand.u64_in(delay_max..=delay_max * 3)
            } else {
                rand.u64_in(short_min..=short_max)
            };
            total_time += delay_s;

            let mut skip = rand.usize_in(skip_min..=skip_max);
            if position == 0 {
                // Bias toward what is freshest at the top of a session.
                skip /= 2;
            }

            actions.push(PlannedAction {
                action: if position < quota {
                    ActionType::Like
                } else {
                    ActionType::Repost
                },
                delay_s,
                skip,
                index,
                executed: false,
            });
            index += 1;
        }
        likes_so_far += quota;
        done += size;
    }

    EngagementPlan {
        actions,
        like_count: likes_so_far,
        repost_count: n - likes_so_far,
        total_time,
    }
}
