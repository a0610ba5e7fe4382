//! Shared payload DTOs.
//!
//! These are the wire shapes clients submit and workers deserialize. Field
//! names follow the public API (camelCase); everything optional carries a
//! `#[serde(default)]` so partial payloads stay accepted.

use serde::{Deserialize, Serialize};

/// Per-job authentication snapshot. Mutated in place by the auth coordinator
/// during a job; only rotated tokens are pushed back to the account store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionData {
    #[serde(default)]
    pub did: Option<String>,
    pub handle: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
}

/// Account-level metadata carried alongside the session on each job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountMetadata {
    #[serde(default)]
    pub account_id: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub proxy: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
}

// ---------------------------------------------------------------------------
// Engagement
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrategyType {
    #[default]
    #[serde(rename = "uniform")]
    Uniform,
    #[serde(rename = "human-like")]
    HumanLike,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngagementOptions {
    pub number_of_actions: usize,
    /// `[min, max]` seconds between actions.
    pub delay_range: [u64; 2],
    /// `[min, max]` posts skipped before each action.
    pub skip_range: [usize; 2],
    /// Percentage of actions that are likes, 0..=100.
    pub like_percentage: u8,
    /// Optional feed-generator URI; when absent the timeline is used.
    pub feed_uri: Option<String>,
    /// Log intended actions without performing them.
    pub dry_run: bool,
    /// Abort the walk on the first failed action.
    pub stop_on_error: bool,
}

impl Default for EngagementOptions {
    fn default() -> Self {
        Self {
            number_of_actions: 10,
            delay_range: [5, 30],
            skip_range: [0, 4],
            like_percentage: 70,
            feed_uri: None,
            dry_run: false,
            stop_on_error: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngagementPayload {
    pub session_data: SessionData,
    #[serde(default)]
    pub engagement_options: EngagementOptions,
    #[serde(default)]
    pub strategy_type: StrategyType,
    #[serde(default)]
    pub account_metadata: AccountMetadata,
}

// ---------------------------------------------------------------------------
// Mass post
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostItem {
    pub text: String,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub pin: bool,
    #[serde(default)]
    pub alt: Option<String>,
    #[serde(default)]
    pub include_timestamp: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostOptions {
    pub posts: Vec<PostItem>,
    #[serde(default = "default_post_delay")]
    pub delay_range: [u64; 2],
    #[serde(default)]
    pub reverse_order: bool,
}

fn default_post_delay() -> [u64; 2] {
    [5, 30]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MassPostPayload {
    pub session_data: SessionData,
    pub post_options: PostOptions,
    #[serde(default)]
    pub account_metadata: AccountMetadata,
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

/// One message or a rotation of messages, paired with recipients
/// round-robin.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Messages {
    One(String),
    Many(Vec<String>),
}

impl Messages {
    pub fn as_vec(&self) -> Vec<&str> {
        match self {
            Messages::One(m) => vec![m.as_str()],
            Messages::Many(ms) => ms.iter().map(String::as_str).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Messages::One(m) => m.is_empty(),
            Messages::Many(ms) => ms.is_empty() || ms.iter().all(String::is_empty),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPayload {
    pub session_data: SessionData,
    pub messages: Messages,
    pub recipients: Vec<String>,
    #[serde(default)]
    pub account_metadata: AccountMetadata,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engagement_payload_fills_defaults() {
        let payload: EngagementPayload = serde_json::from_value(serde_json::json!({
            "sessionData": { "handle": "bot.bsky.social" }
        }))
        .unwrap();

        assert_eq!(payload.engagement_options.number_of_actions, 10);
        assert_eq!(payload.engagement_options.delay_range, [5, 30]);
        assert_eq!(payload.engagement_options.skip_range, [0, 4]);
        assert_eq!(payload.engagement_options.like_percentage, 70);
        assert_eq!(payload.strategy_type, StrategyType::Uniform);
        assert!(payload.session_data.refresh_token.is_empty());
    }

    #[test]
    fn strategy_type_uses_wire_names() {
        let human: StrategyType = serde_json::from_str("\"human-like\"").unwrap();
        assert_eq!(human, StrategyType::HumanLike);
        let uniform: StrategyType = serde_json::from_str("\"uniform\"").unwrap();
        assert_eq!(uniform, StrategyType::Uniform);
    }

    #[test]
    fn messages_accept_string_or_array() {
        let one: Messages = serde_json::from_str("\"hello\"").unwrap();
        assert_eq!(one.as_vec(), vec!["hello"]);

        let many: Messages = serde_json::from_str("[\"a\", \"b\"]").unwrap();
        assert_eq!(many.as_vec(), vec!["a", "b"]);

        let empty: Messages = serde_json::from_str("[]").unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn post_item_defaults_are_off() {
        let item: PostItem =
            serde_json::from_value(serde_json::json!({ "text": "hello" })).unwrap();
        assert!(!item.pin);
        assert!(!item.include_timestamp);
        assert!(item.image_url.is_none());
    }
}
