//! Wire types for the subset of the AT Protocol XRPC surface the client uses.

use serde::{Deserialize, Serialize};

/// An authenticated session as returned by `createSession` / `refreshSession`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub did: String,
    pub handle: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub access_jwt: String,
    pub refresh_jwt: String,
}

/// Reference to a created record (post, like, repost, follow).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordRef {
    pub uri: String,
    pub cid: String,
}

/// Response from `com.atproto.repo.uploadBlob`.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadBlobResponse {
    pub blob: serde_json::Value,
}

/// One entry of a feed or timeline response.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedItem {
    #[serde(default)]
    pub post: Option<PostView>,
}

/// A hydrated post view. `record` stays opaque; callers pick out the text.
#[derive(Debug, Clone, Deserialize)]
pub struct PostView {
    pub uri: String,
    pub cid: String,
    pub author: AuthorView,
    #[serde(default)]
    pub record: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthorView {
    pub did: String,
    pub handle: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedResponse {
    pub feed: Vec<FeedItem>,
    #[serde(default)]
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResolveHandleResponse {
    pub did: String,
}

/// A chat conversation as returned by `chat.bsky.convo.*`.
#[derive(Debug, Clone, Deserialize)]
pub struct Convo {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConvoResponse {
    pub convo: Convo,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListConvosResponse {
    pub convos: Vec<Convo>,
    #[serde(default)]
    pub cursor: Option<String>,
}

/// Shape of an XRPC error body.
#[derive(Debug, Clone, Deserialize)]
pub struct XrpcErrorBody {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}
