//! Scripted fakes for the external capabilities.
//!
//! [`MockSocialClient`] defaults to succeeding so executor tests stay short;
//! individual operations are scripted to fail per-call or per-target. Every
//! mutation is recorded for assertions.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::common::types::{AccountMetadata, SessionData};

use super::social::{
    AuthSession, FeedEntry, FeedPost, ImageEmbed, PostRef, SocialClient, SocialClientFactory,
    SocialError,
};

/// A feed of `n` well-formed posts.
pub fn feed_of(n: usize) -> Vec<FeedEntry> {
    (0..n)
        .map(|i| FeedEntry {
            post: Some(FeedPost {
                uri: format!("at://did:plc:feed/app.bsky.feed.post/{i}"),
                cid: format!("cid-{i}"),
                author_handle: format!("author{i}.bsky.social"),
                record: json!({ "text": format!("post {i}") }),
            }),
        })
        .collect()
}

/// Like [`feed_of`], but with malformed entries (no post) at the given
/// indices.
pub fn feed_with_gaps(n: usize, gaps: &[usize]) -> Vec<FeedEntry> {
    let mut feed = feed_of(n);
    for &i in gaps {
        if let Some(slot) = feed.get_mut(i) {
            slot.post = None;
        }
    }
    feed
}

#[derive(Debug, Clone)]
pub struct CreatedPost {
    pub text: String,
    pub has_image: bool,
    pub alt: Option<String>,
}

type Scripted = Mutex<VecDeque<Result<AuthSession, SocialError>>>;

#[derive(Default)]
pub struct MockSocialClient {
    refresh_script: Scripted,
    resume_script: Scripted,
    login_script: Scripted,
    refresh_count: AtomicUsize,
    resume_count: AtomicUsize,
    login_count: AtomicUsize,

    feed: Mutex<Vec<FeedEntry>>,
    session_active: AtomicBool,
    post_seq: AtomicUsize,

    likes: Mutex<Vec<(String, String)>>,
    reposts: Mutex<Vec<(String, String)>>,
    posts: Mutex<Vec<CreatedPost>>,
    uploads: Mutex<Vec<(usize, String)>>,
    pins: Mutex<Vec<PostRef>>,
    convos_started: Mutex<Vec<String>>,
    dms: Mutex<Vec<(String, String)>>,

    failing_uris: Mutex<HashSet<String>>,
    failing_post_markers: Mutex<Vec<String>>,
    failing_recipients: Mutex<HashSet<String>>,
}

impl MockSocialClient {
    pub fn new() -> Self {
        let mock = Self::default();
        mock.session_active.store(true, Ordering::SeqCst);
        mock
    }

    fn default_session(handle: &str) -> AuthSession {
        AuthSession {
            did: "did:plc:mock".into(),
            handle: handle.to_string(),
            email: None,
            access_token: "access".into(),
            refresh_token: "refresh".into(),
        }
    }

    // -- scripting ---------------------------------------------------------

    pub fn script_refresh(&self, result: Result<AuthSession, SocialError>) {
        self.refresh_script.lock().unwrap().push_back(result);
    }

    pub fn script_resume(&self, result: Result<AuthSession, SocialError>) {
        self.resume_script.lock().unwrap().push_back(result);
    }

    pub fn script_login(&self, result: Result<AuthSession, SocialError>) {
        self.login_script.lock().unwrap().push_back(result);
    }

    pub fn set_feed(&self, feed: Vec<FeedEntry>) {
        *self.feed.lock().unwrap() = feed;
    }

    pub fn set_session_active(&self, active: bool) {
        self.session_active.store(active, Ordering::SeqCst);
    }

    /// Make `like`/`repost` fail for one post.
    pub fn fail_actions_on(&self, uri: &str) {
        self.failing_uris.lock().unwrap().insert(uri.to_string());
    }

    /// Make `create_post` fail when the text contains the marker.
    pub fn fail_posts_containing(&self, marker: &str) {
        self.failing_post_markers
            .lock()
            .unwrap()
            .push(marker.to_string());
    }

    pub fn fail_conversations_with(&self, handle: &str) {
        self.failing_recipients
            .lock()
            .unwrap()
            .insert(handle.to_string());
    }

    // -- recordings --------------------------------------------------------

    pub fn refresh_calls(&self) -> usize {
        self.refresh_count.load(Ordering::SeqCst)
    }

    pub fn resume_calls(&self) -> usize {
        self.resume_count.load(Ordering::SeqCst)
    }

    pub fn login_calls(&self) -> usize {
        self.login_count.load(Ordering::SeqCst)
    }

    pub fn likes(&self) -> Vec<(String, String)> {
        self.likes.lock().unwrap().clone()
    }

    pub fn reposts(&self) -> Vec<(String, String)> {
        self.reposts.lock().unwrap().clone()
    }

    pub fn created_posts(&self) -> Vec<CreatedPost> {
        self.posts.lock().unwrap().clone()
    }

    pub fn uploads(&self) -> Vec<(usize, String)> {
        self.uploads.lock().unwrap().clone()
    }

    pub fn pins(&self) -> Vec<PostRef> {
        self.pins.lock().unwrap().clone()
    }

    pub fn conversations_started(&self) -> Vec<String> {
        self.convos_started.lock().unwrap().clone()
    }

    pub fn dms(&self) -> Vec<(String, String)> {
        self.dms.lock().unwrap().clone()
    }

    fn pop(script: &Scripted, fallback: Result<AuthSession, SocialError>) -> Result<AuthSession, SocialError> {
        script.lock().unwrap().pop_front().unwrap_or(fallback)
    }
}

#[async_trait]
impl SocialClient for MockSocialClient {
    async fn login(&self, identifier: &str, _password: &str) -> Result<AuthSession, SocialError> {
        self.login_count.fetch_add(1, Ordering::SeqCst);
        let result = Self::pop(
            &self.login_script,
            Ok(Self::default_session(identifier)),
        );
        if result.is_ok() {
            self.session_active.store(true, Ordering::SeqCst);
        }
        result
    }

    async fn refresh_session(&self, _refresh_token: &str) -> Result<AuthSession, SocialError> {
        self.refresh_count.fetch_add(1, Ordering::SeqCst);
        let result = Self::pop(
            &self.refresh_script,
            Ok(Self::default_session("mock.bsky.social")),
        );
        if result.is_ok() {
            self.session_active.store(true, Ordering::SeqCst);
        }
        result
    }

    async fn resume_session(&self, session: &SessionData) -> Result<AuthSession, SocialError> {
        self.resume_count.fetch_add(1, Ordering::SeqCst);
        let fallback = Ok(AuthSession {
            did: session.did.clone().unwrap_or_else(|| "did:plc:mock".into()),
            handle: session.handle.clone(),
            email: session.email.clone(),
            access_token: session.access_token.clone(),
            refresh_token: session.refresh_token.clone(),
        });
        let result = Self::pop(&self.resume_script, fallback);
        if result.is_ok() {
            self.session_active.store(true, Ordering::SeqCst);
        }
        result
    }

    fn has_session(&self) -> bool {
        self.session_active.load(Ordering::SeqCst)
    }

    async fn create_post(
        &self,
        text: &str,
        image: Option<ImageEmbed>,
    ) -> Result<PostRef, SocialError> {
        for marker in self.failing_post_markers.lock().unwrap().iter() {
            if text.contains(marker.as_str()) {
                return Err(SocialError::Upstream("scripted post failure".into()));
            }
        }
        let alt = image.as_ref().map(|i| i.alt.clone());
        self.posts.lock().unwrap().push(CreatedPost {
            text: text.to_string(),
            has_image: image.is_some(),
            alt,
        });
        let n = self.post_seq.fetch_add(1, Ordering::SeqCst);
        Ok(PostRef {
            uri: format!("at://did:plc:mock/app.bsky.feed.post/{n}"),
            cid: format!("postcid-{n}"),
        })
    }

    async fn like(&self, uri: &str, cid: &str) -> Result<(), SocialError> {
        if self.failing_uris.lock().unwrap().contains(uri) {
            return Err(SocialError::Upstream("scripted like failure".into()));
        }
        self.likes
            .lock()
            .unwrap()
            .push((uri.to_string(), cid.to_string()));
        Ok(())
    }

    async fn repost(&self, uri: &str, cid: &str) -> Result<(), SocialError> {
        if self.failing_uris.lock().unwrap().contains(uri) {
            return Err(SocialError::Upstream("scripted repost failure".into()));
        }
        self.reposts
            .lock()
            .unwrap()
            .push((uri.to_string(), cid.to_string()));
        Ok(())
    }

    async fn follow(&self, _did: &str) -> Result<(), SocialError> {
        Ok(())
    }

    async fn reply(&self, _parent: &PostRef, text: &str) -> Result<PostRef, SocialError> {
        self.create_post(text, None).await
    }

    async fn get_timeline(&self, _limit: u32) -> Result<Vec<FeedEntry>, SocialError> {
        Ok(self.feed.lock().unwrap().clone())
    }

    async fn get_feed(&self, _feed_uri: &str, _limit: u32) -> Result<Vec<FeedEntry>, SocialError> {
        Ok(self.feed.lock().unwrap().clone())
    }

    async fn upload_blob(&self, bytes: Vec<u8>, mime: &str) -> Result<Value, SocialError> {
        self.uploads
            .lock()
            .unwrap()
            .push((bytes.len(), mime.to_string()));
        Ok(json!({
            "$type": "blob",
            "ref": { "$link": "bafymockblob" },
            "mimeType": mime,
            "size": bytes.len(),
        }))
    }

    async fn set_pinned_post(&self, post: &PostRef) -> Result<(), SocialError> {
        self.pins.lock().unwrap().push(post.clone());
        Ok(())
    }

    async fn start_conversation(&self, handle: &str) -> Result<String, SocialError> {
        if self.failing_recipients.lock().unwrap().contains(handle) {
            return Err(SocialError::Upstream("scripted convo failure".into()));
        }
        self.convos_started.lock().unwrap().push(handle.to_string());
        Ok(format!("convo-{handle}"))
    }

    async fn send_dm(&self, convo_id: &str, text: &str) -> Result<(), SocialError> {
        self.dms
            .lock()
            .unwrap()
            .push((convo_id.to_string(), text.to_string()));
        Ok(())
    }

    async fn list_conversations(&self) -> Result<Vec<String>, SocialError> {
        Ok(self
            .convos_started
            .lock()
            .unwrap()
            .iter()
            .map(|h| format!("convo-{h}"))
            .collect())
    }
}

/// Factory handing out the same mock to every job.
pub struct MockClientFactory {
    client: Arc<MockSocialClient>,
}

impl MockClientFactory {
    pub fn new(client: Arc<MockSocialClient>) -> Self {
        Self { client }
    }
}

impl SocialClientFactory for MockClientFactory {
    fn client_for(&self, _meta: &AccountMetadata) -> Result<Arc<dyn SocialClient>, SocialError> {
        Ok(self.client.clone())
    }
}
