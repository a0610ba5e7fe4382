//! The social-network capability.
//!
//! The core never speaks the protocol itself; it sees this trait only. The
//! production implementation wraps [`bsky::BskyClient`]; tests use the
//! scripted mock in [`crate::kernel::testing`].

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::common::types::{AccountMetadata, SessionData};

#[derive(Debug, thiserror::Error)]
pub enum SocialError {
    #[error("rate limited")]
    RateLimited { retry_after: Option<u64> },

    #[error("authentication rejected: {0}")]
    Auth(String),

    #[error("upstream error: {0}")]
    Upstream(String),
}

impl From<bsky::BskyError> for SocialError {
    fn from(e: bsky::BskyError) -> Self {
        match e {
            bsky::BskyError::RateLimited { retry_after } => SocialError::RateLimited { retry_after },
            bsky::BskyError::Auth(msg) => SocialError::Auth(msg),
            bsky::BskyError::NoSession => SocialError::Auth("no active session".into()),
            other => SocialError::Upstream(other.to_string()),
        }
    }
}

/// The upstream's view of an authenticated session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSession {
    pub did: String,
    pub handle: String,
    pub email: Option<String>,
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostRef {
    pub uri: String,
    pub cid: String,
}

impl From<bsky::RecordRef> for PostRef {
    fn from(r: bsky::RecordRef) -> Self {
        Self {
            uri: r.uri,
            cid: r.cid,
        }
    }
}

/// One feed slot. `post` is `None` when the upstream returned an entry
/// without a usable post reference.
#[derive(Debug, Clone, Default)]
pub struct FeedEntry {
    pub post: Option<FeedPost>,
}

#[derive(Debug, Clone)]
pub struct FeedPost {
    pub uri: String,
    pub cid: String,
    pub author_handle: String,
    pub record: Value,
}

impl FeedPost {
    /// The post's record text when it is a string, otherwise a JSON rendering
    /// of the record.
    pub fn text(&self) -> String {
        match self.record.get("text").and_then(Value::as_str) {
            Some(text) => text.to_string(),
            None => self.record.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImageEmbed {
    pub blob: Value,
    pub alt: String,
}

/// Operations the orchestrator needs from the social network. Nothing else.
#[async_trait]
pub trait SocialClient: Send + Sync {
    async fn login(&self, identifier: &str, password: &str) -> Result<AuthSession, SocialError>;
    async fn refresh_session(&self, refresh_token: &str) -> Result<AuthSession, SocialError>;
    async fn resume_session(&self, session: &SessionData) -> Result<AuthSession, SocialError>;
    fn has_session(&self) -> bool;

    async fn create_post(
        &self,
        text: &str,
        image: Option<ImageEmbed>,
    ) -> Result<PostRef, SocialError>;
    async fn like(&self, uri: &str, cid: &str) -> Result<(), SocialError>;
    async fn repost(&self, uri: &str, cid: &str) -> Result<(), SocialError>;
    async fn follow(&self, did: &str) -> Result<(), SocialError>;
    async fn reply(&self, parent: &PostRef, text: &str) -> Result<PostRef, SocialError>;

    async fn get_timeline(&self, limit: u32) -> Result<Vec<FeedEntry>, SocialError>;
    async fn get_feed(&self, feed_uri: &str, limit: u32) -> Result<Vec<FeedEntry>, SocialError>;

    async fn upload_blob(&self, bytes: Vec<u8>, mime: &str) -> Result<Value, SocialError>;
    async fn set_pinned_post(&self, post: &PostRef) -> Result<(), SocialError>;

    async fn start_conversation(&self, handle: &str) -> Result<String, SocialError>;
    async fn send_dm(&self, convo_id: &str, text: &str) -> Result<(), SocialError>;
    async fn list_conversations(&self) -> Result<Vec<String>, SocialError>;
}

/// Builds a client bound to one account's endpoint, proxy and user agent.
pub trait SocialClientFactory: Send + Sync {
    fn client_for(&self, meta: &AccountMetadata) -> Result<Arc<dyn SocialClient>, SocialError>;
}

// ---------------------------------------------------------------------------
// Production implementation over bsky-rs
// ---------------------------------------------------------------------------

pub struct BskyClientFactory {
    default_service: String,
}

impl BskyClientFactory {
    pub fn new(default_service: String) -> Self {
        Self { default_service }
    }
}

impl SocialClientFactory for BskyClientFactory {
    fn client_for(&self, meta: &AccountMetadata) -> Result<Arc<dyn SocialClient>, SocialError> {
        let client = bsky::BskyClient::new(bsky::BskyOptions {
            service: Some(
                meta.endpoint
                    .clone()
                    .unwrap_or_else(|| self.default_service.clone()),
            ),
            proxy: meta.proxy.clone(),
            user_agent: meta.user_agent.clone(),
        })
        .map_err(SocialError::from)?;
        Ok(Arc::new(client))
    }
}

fn feed_entries(items: Vec<bsky::FeedItem>) -> Vec<FeedEntry> {
    items
        .into_iter()
        .map(|item| FeedEntry {
            post: item.post.map(|p| FeedPost {
                uri: p.uri,
                cid: p.cid,
                author_handle: p.author.handle,
                record: p.record,
            }),
        })
        .collect()
}

fn auth_session(s: bsky::Session) -> AuthSession {
    AuthSession {
        did: s.did,
        handle: s.handle,
        email: s.email,
        access_token: s.access_jwt,
        refresh_token: s.refresh_jwt,
    }
}

#[async_trait]
impl SocialClient for bsky::BskyClient {
    async fn login(&self, identifier: &str, password: &str) -> Result<AuthSession, SocialError> {
        Ok(auth_session(self.create_session(identifier, password).await?))
    }

    async fn refresh_session(&self, refresh_token: &str) -> Result<AuthSession, SocialError> {
        Ok(auth_session(
            bsky::BskyClient::refresh_session(self, refresh_token).await?,
        ))
    }

    async fn resume_session(&self, session: &SessionData) -> Result<AuthSession, SocialError> {
        let did = session
            .did
            .clone()
            .filter(|d| !d.is_empty())
            .ok_or_else(|| SocialError::Auth("DID missing".into()))?;
        Ok(auth_session(
            bsky::BskyClient::resume_session(
                self,
                bsky::Session {
                    did,
                    handle: session.handle.clone(),
                    email: session.email.clone(),
                    access_jwt: session.access_token.clone(),
                    refresh_jwt: session.refresh_token.clone(),
                },
            )
            .await?,
        ))
    }

    fn has_session(&self) -> bool {
        bsky::BskyClient::has_session(self)
    }

    async fn create_post(
        &self,
        text: &str,
        image: Option<ImageEmbed>,
    ) -> Result<PostRef, SocialError> {
        let image = image.map(|embed| (embed.blob, embed.alt));
        Ok(bsky::BskyClient::create_post(self, text, image).await?.into())
    }

    async fn like(&self, uri: &str, cid: &str) -> Result<(), SocialError> {
        bsky::BskyClient::like(self, uri, cid).await?;
        Ok(())
    }

    async fn repost(&self, uri: &str, cid: &str) -> Result<(), SocialError> {
        bsky::BskyClient::repost(self, uri, cid).await?;
        Ok(())
    }

    async fn follow(&self, did: &str) -> Result<(), SocialError> {
        bsky::BskyClient::follow(self, did).await?;
        Ok(())
    }

    async fn reply(&self, parent: &PostRef, text: &str) -> Result<PostRef, SocialError> {
        let parent = bsky::RecordRef {
            uri: parent.uri.clone(),
            cid: parent.cid.clone(),
        };
        Ok(bsky::BskyClient::reply(self, &parent, None, text)
            .await?
            .into())
    }

    async fn get_timeline(&self, limit: u32) -> Result<Vec<FeedEntry>, SocialError> {
        Ok(feed_entries(bsky::BskyClient::get_timeline(self, limit).await?))
    }

    async fn get_feed(&self, feed_uri: &str, limit: u32) -> Result<Vec<FeedEntry>, SocialError> {
        Ok(feed_entries(
            bsky::BskyClient::get_feed(self, feed_uri, limit).await?,
        ))
    }

    async fn upload_blob(&self, bytes: Vec<u8>, mime: &str) -> Result<Value, SocialError> {
        Ok(bsky::BskyClient::upload_blob(self, bytes, mime).await?)
    }

    async fn set_pinned_post(&self, post: &PostRef) -> Result<(), SocialError> {
        let record = bsky::RecordRef {
            uri: post.uri.clone(),
            cid: post.cid.clone(),
        };
        Ok(bsky::BskyClient::set_pinned_post(self, &record).await?)
    }

    async fn start_conversation(&self, handle: &str) -> Result<String, SocialError> {
        let did = self.resolve_handle(handle).await?;
        Ok(self.get_convo_for_member(&did).await?.id)
    }

    async fn send_dm(&self, convo_id: &str, text: &str) -> Result<(), SocialError> {
        Ok(self.send_message(convo_id, text).await?)
    }

    async fn list_conversations(&self) -> Result<Vec<String>, SocialError> {
        Ok(self
            .list_convos()
            .await?
            .into_iter()
            .map(|c| c.id)
            .collect())
    }
}
