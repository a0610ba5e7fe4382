//! Thin AT Protocol (Bluesky) XRPC client.
//!
//! Covers only the operations the orchestrator needs: session management,
//! record creation (posts, likes, reposts, follows), blob upload, feed reads,
//! profile pinning and chat. Anything else belongs in a real atproto SDK.

use std::sync::RwLock;

use reqwest::header;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

pub mod models;

pub use models::{Convo, FeedItem, PostView, RecordRef, Session};

use models::{
    ConvoResponse, FeedResponse, ListConvosResponse, ResolveHandleResponse, UploadBlobResponse,
    XrpcErrorBody,
};

/// Default PDS endpoint.
pub const DEFAULT_SERVICE: &str = "https://bsky.social";

/// Service proxy header value for the chat appview.
const CHAT_PROXY: &str = "did:web:api.bsky.chat#bsky_chat";

#[derive(Debug, thiserror::Error)]
pub enum BskyError {
    /// Upstream returned 429 or an explicit rate-limit error.
    #[error("rate limited by upstream{}", retry_after.map(|s| format!(" (retry after {s}s)")).unwrap_or_default())]
    RateLimited { retry_after: Option<u64> },

    /// Credentials or tokens were rejected.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Any other non-success XRPC response.
    #[error("xrpc error {status}: {message}")]
    Xrpc { status: u16, message: String },

    /// Transport-level failure.
    #[error("request failed: {0}")]
    Network(String),

    /// The response body did not match the expected shape.
    #[error("unexpected response: {0}")]
    Parse(String),

    /// An authenticated call was made without a session.
    #[error("no active session")]
    NoSession,
}

impl From<reqwest::Error> for BskyError {
    fn from(e: reqwest::Error) -> Self {
        BskyError::Network(e.to_string())
    }
}

#[derive(Debug, Clone, Default)]
pub struct BskyOptions {
    /// PDS base URL; defaults to [`DEFAULT_SERVICE`].
    pub service: Option<String>,
    /// Outbound proxy URL, if any.
    pub proxy: Option<String>,
    /// User-Agent override.
    pub user_agent: Option<String>,
}

/// An XRPC client bound to one account's session.
pub struct BskyClient {
    http: reqwest::Client,
    service: String,
    session: RwLock<Option<Session>>,
}

impl BskyClient {
    pub fn new(options: BskyOptions) -> Result<Self, BskyError> {
        let mut builder = reqwest::Client::builder();
        if let Some(proxy) = &options.proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy).map_err(BskyError::from)?);
        }
        if let Some(ua) = &options.user_agent {
            builder = builder.user_agent(ua.clone());
        }
        Ok(Self {
            http: builder.build()?,
            service: options
                .service
                .unwrap_or_else(|| DEFAULT_SERVICE.to_string()),
            session: RwLock::new(None),
        })
    }

    /// The DID of the current session, if any.
    pub fn did(&self) -> Option<String> {
        self.session.read().unwrap().as_ref().map(|s| s.did.clone())
    }

    pub fn has_session(&self) -> bool {
        self.session.read().unwrap().is_some()
    }

    fn set_session(&self, session: Session) {
        *self.session.write().unwrap() = Some(session);
    }

    fn access_jwt(&self) -> Result<String, BskyError> {
        self.session
            .read()
            .unwrap()
            .as_ref()
            .map(|s| s.access_jwt.clone())
            .ok_or(BskyError::NoSession)
    }

    fn session_did(&self) -> Result<String, BskyError> {
        self.did().ok_or(BskyError::NoSession)
    }

    // ------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------

    /// `com.atproto.server.createSession` — full password login.
    pub async fn create_session(
        &self,
        identifier: &str,
        password: &str,
    ) -> Result<Session, BskyError> {
        let session: Session = self
            .xrpc_post(
                "com.atproto.server.createSession",
                &json!({ "identifier": identifier, "password": password }),
                None,
            )
            .await?;
        self.set_session(session.clone());
        Ok(session)
    }

    /// `com.atproto.server.refreshSession` — rotate tokens with a refresh JWT.
    pub async fn refresh_session(&self, refresh_jwt: &str) -> Result<Session, BskyError> {
        let session: Session = self
            .xrpc_post(
                "com.atproto.server.refreshSession",
                &json!({}),
                Some(refresh_jwt),
            )
            .await?;
        self.set_session(session.clone());
        Ok(session)
    }

    /// Adopt an existing session and validate it with
    /// `com.atproto.server.getSession`.
    pub async fn resume_session(&self, session: Session) -> Result<Session, BskyError> {
        self.set_session(session.clone());
        // A rejected token surfaces here as an Auth error.
        let _: Value = self.xrpc_get("com.atproto.server.getSession", &[]).await?;
        Ok(session)
    }

    // ------------------------------------------------------------------
    // Records
    // ------------------------------------------------------------------

    async fn create_record(&self, collection: &str, record: Value) -> Result<RecordRef, BskyError> {
        let repo = self.session_did()?;
        self.xrpc_post(
            "com.atproto.repo.createRecord",
            &json!({ "repo": repo, "collection": collection, "record": record }),
            Some(&self.access_jwt()?),
        )
        .await
    }

    /// Create an `app.bsky.feed.post` record, optionally with an image embed.
    pub async fn create_post(
        &self,
        text: &str,
        image: Option<(Value, String)>,
    ) -> Result<RecordRef, BskyError> {
        let mut record = json!({
            "$type": "app.bsky.feed.post",
            "text": text,
            "createdAt": now_iso(),
        });
        if let Some((blob, alt)) = image {
            record["embed"] = json!({
                "$type": "app.bsky.embed.images",
                "images": [{ "image": blob, "alt": alt }],
            });
        }
        self.create_record("app.bsky.feed.post", record).await
    }

    pub async fn like(&self, uri: &str, cid: &str) -> Result<RecordRef, BskyError> {
        self.create_record(
            "app.bsky.feed.like",
            json!({
                "$type": "app.bsky.feed.like",
                "subject": { "uri": uri, "cid": cid },
                "createdAt": now_iso(),
            }),
        )
        .await
    }

    pub async fn repost(&self, uri: &str, cid: &str) -> Result<RecordRef, BskyError> {
        self.create_record(
            "app.bsky.feed.repost",
            json!({
                "$type": "app.bsky.feed.repost",
                "subject": { "uri": uri, "cid": cid },
                "createdAt": now_iso(),
            }),
        )
        .await
    }

    pub async fn follow(&self, did: &str) -> Result<RecordRef, BskyError> {
        self.create_record(
            "app.bsky.graph.follow",
            json!({
                "$type": "app.bsky.graph.follow",
                "subject": did,
                "createdAt": now_iso(),
            }),
        )
        .await
    }

    /// Reply to an existing post. `root` falls back to the parent for
    /// top-level replies.
    pub async fn reply(
        &self,
        parent: &RecordRef,
        root: Option<&RecordRef>,
        text: &str,
    ) -> Result<RecordRef, BskyError> {
        let root = root.unwrap_or(parent);
        self.create_record(
            "app.bsky.feed.post",
            json!({
                "$type": "app.bsky.feed.post",
                "text": text,
                "createdAt": now_iso(),
                "reply": {
                    "root": { "uri": root.uri, "cid": root.cid },
                    "parent": { "uri": parent.uri, "cid": parent.cid },
                },
            }),
        )
        .await
    }

    // ------------------------------------------------------------------
    // Blobs & profile
    // ------------------------------------------------------------------

    /// `com.atproto.repo.uploadBlob` — returns the opaque blob reference to
    /// embed in a record.
    pub async fn upload_blob(&self, bytes: Vec<u8>, mime: &str) -> Result<Value, BskyError> {
        let url = format!("{}/xrpc/com.atproto.repo.uploadBlob", self.service);
        let response = self
            .http
            .post(url)
            .bearer_auth(self.access_jwt()?)
            .header(header::CONTENT_TYPE, mime)
            .body(bytes)
            .send()
            .await?;
        let parsed: UploadBlobResponse = Self::decode(response).await?;
        Ok(parsed.blob)
    }

    /// Point the profile's `pinnedPost` at the given record, preserving the
    /// rest of the profile record.
    pub async fn set_pinned_post(&self, post: &RecordRef) -> Result<(), BskyError> {
        let repo = self.session_did()?;
        let existing: Value = self
            .xrpc_get(
                "com.atproto.repo.getRecord",
                &[
                    ("repo", repo.as_str()),
                    ("collection", "app.bsky.actor.profile"),
                    ("rkey", "self"),
                ],
            )
            .await
            .unwrap_or_else(|_| json!({ "value": { "$type": "app.bsky.actor.profile" } }));

        let mut record = existing
            .get("value")
            .cloned()
            .unwrap_or_else(|| json!({ "$type": "app.bsky.actor.profile" }));
        record["pinnedPost"] = json!({ "uri": post.uri, "cid": post.cid });

        let _: Value = self
            .xrpc_post(
                "com.atproto.repo.putRecord",
                &json!({
                    "repo": repo,
                    "collection": "app.bsky.actor.profile",
                    "rkey": "self",
                    "record": record,
                }),
                Some(&self.access_jwt()?),
            )
            .await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Feeds
    // ------------------------------------------------------------------

    /// `app.bsky.feed.getTimeline` for the session account.
    pub async fn get_timeline(&self, limit: u32) -> Result<Vec<FeedItem>, BskyError> {
        let limit = limit.min(100).to_string();
        let parsed: FeedResponse = self
            .xrpc_get("app.bsky.feed.getTimeline", &[("limit", limit.as_str())])
            .await?;
        Ok(parsed.feed)
    }

    /// `app.bsky.feed.getFeed` against a feed generator URI.
    pub async fn get_feed(&self, feed_uri: &str, limit: u32) -> Result<Vec<FeedItem>, BskyError> {
        let limit = limit.min(100).to_string();
        let parsed: FeedResponse = self
            .xrpc_get(
                "app.bsky.feed.getFeed",
                &[("feed", feed_uri), ("limit", limit.as_str())],
            )
            .await?;
        Ok(parsed.feed)
    }

    // ------------------------------------------------------------------
    // Chat
    // ------------------------------------------------------------------

    /// `com.atproto.identity.resolveHandle`.
    pub async fn resolve_handle(&self, handle: &str) -> Result<String, BskyError> {
        let parsed: ResolveHandleResponse = self
            .xrpc_get("com.atproto.identity.resolveHandle", &[("handle", handle)])
            .await?;
        Ok(parsed.did)
    }

    /// `chat.bsky.convo.getConvoForMembers` — opens (or finds) the 1:1
    /// conversation with the given DID.
    pub async fn get_convo_for_member(&self, did: &str) -> Result<Convo, BskyError> {
        let url = format!(
            "{}/xrpc/chat.bsky.convo.getConvoForMembers?members={}",
            self.service, did
        );
        let response = self
            .http
            .get(url)
            .bearer_auth(self.access_jwt()?)
            .header("atproto-proxy", CHAT_PROXY)
            .send()
            .await?;
        let parsed: ConvoResponse = Self::decode(response).await?;
        Ok(parsed.convo)
    }

    /// `chat.bsky.convo.sendMessage`.
    pub async fn send_message(&self, convo_id: &str, text: &str) -> Result<(), BskyError> {
        let url = format!("{}/xrpc/chat.bsky.convo.sendMessage", self.service);
        let response = self
            .http
            .post(url)
            .bearer_auth(self.access_jwt()?)
            .header("atproto-proxy", CHAT_PROXY)
            .json(&json!({ "convoId": convo_id, "message": { "text": text } }))
            .send()
            .await?;
        let _: Value = Self::decode(response).await?;
        Ok(())
    }

    /// `chat.bsky.convo.listConvos`.
    pub async fn list_convos(&self) -> Result<Vec<Convo>, BskyError> {
        let url = format!("{}/xrpc/chat.bsky.convo.listConvos", self.service);
        let response = self
            .http
            .get(url)
            .bearer_auth(self.access_jwt()?)
            .header("atproto-proxy", CHAT_PROXY)
            .send()
            .await?;
        let parsed: ListConvosResponse = Self::decode(response).await?;
        Ok(parsed.convos)
    }

    // ------------------------------------------------------------------
    // XRPC plumbing
    // ------------------------------------------------------------------

    async fn xrpc_post<T: DeserializeOwned>(
        &self,
        nsid: &str,
        body: &Value,
        bearer: Option<&str>,
    ) -> Result<T, BskyError> {
        let url = format!("{}/xrpc/{}", self.service, nsid);
        let mut request = self.http.post(url).json(body);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }
        Self::decode(request.send().await?).await
    }

    async fn xrpc_get<T: DeserializeOwned>(
        &self,
        nsid: &str,
        query: &[(&str, &str)],
    ) -> Result<T, BskyError> {
        let url = format!("{}/xrpc/{}", self.service, nsid);
        let response = self
            .http
            .get(url)
            .query(query)
            .bearer_auth(self.access_jwt()?)
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, BskyError> {
        let status = response.status();
        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|e| BskyError::Parse(e.to_string()));
        }

        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());
        let body: XrpcErrorBody = response.json().await.unwrap_or(XrpcErrorBody {
            error: None,
            message: None,
        });
        let code = body.error.unwrap_or_default();
        let message = body.message.unwrap_or_else(|| code.clone());
        tracing::debug!(status = status.as_u16(), error = %code, "xrpc request failed");

        if status.as_u16() == 429 || code == "RateLimitExceeded" {
            return Err(BskyError::RateLimited { retry_after });
        }
        if matches!(
            code.as_str(),
            "AuthenticationRequired" | "ExpiredToken" | "InvalidToken" | "AccountTakedown"
        ) || status.as_u16() == 401
        {
            return Err(BskyError::Auth(message));
        }
        Err(BskyError::Xrpc {
            status: status.as_u16(),
            message,
        })
    }
}

fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_default_to_public_service() {
        let client = BskyClient::new(BskyOptions::default()).unwrap();
        assert_eq!(client.service, DEFAULT_SERVICE);
        assert!(!client.has_session());
    }

    #[test]
    fn session_accessors_reflect_state() {
        let client = BskyClient::new(BskyOptions::default()).unwrap();
        assert!(client.did().is_none());
        assert!(matches!(client.access_jwt(), Err(BskyError::NoSession)));

        client.set_session(Session {
            did: "did:plc:abc".into(),
            handle: "user.bsky.social".into(),
            email: None,
            access_jwt: "A".into(),
            refresh_jwt: "R".into(),
        });
        assert_eq!(client.did().as_deref(), Some("did:plc:abc"));
        assert_eq!(client.access_jwt().unwrap(), "A");
    }

    #[test]
    fn iso_timestamp_is_rfc3339_shaped() {
        let ts = now_iso();
        assert!(ts.ends_with('Z'));
        assert_eq!(ts.len(), "2023-11-14T22:13:20.000Z".len());
    }

    #[test]
    fn rate_limit_error_formats_retry_hint() {
        let err = BskyError::RateLimited {
            retry_after: Some(30),
        };
        assert!(err.to_string().contains("retry after 30s"));
    }
}
