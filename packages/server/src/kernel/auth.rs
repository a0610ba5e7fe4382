//! Three-stage credential recovery for one job.
//!
//! Order: token refresh, session resume, fresh password login. The first
//! method that succeeds wins; rotated tokens are written back to the account
//! store after methods 1 and 3. A session without a DID fails the resume
//! method outright — no placeholder identity is ever substituted.
//!
//! Re-runnable mid-job: an executor that detects a lapsed session may request
//! a fresh coordination. Within a job coordination is serial; across jobs for
//! the same account it may race on the store, which resolves last-writer-wins.

use std::sync::Arc;

use crate::common::types::{AccountMetadata, SessionData};
use crate::kernel::accounts::{AccountStore, TokenUpdate};
use crate::kernel::logsink::JobLogger;
use crate::kernel::social::{AuthSession, SocialClient, SocialClientFactory};

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// All three methods failed. Terminal for the job.
    #[error("all authentication methods exhausted ({last})")]
    Exhausted { last: String },

    #[error("could not construct social client: {0}")]
    Client(String),
}

pub struct AuthCoordinator {
    store: Arc<dyn AccountStore>,
    factory: Arc<dyn SocialClientFactory>,
}

impl AuthCoordinator {
    pub fn new(store: Arc<dyn AccountStore>, factory: Arc<dyn SocialClientFactory>) -> Self {
        Self { store, factory }
    }

    /// Yield an authenticated client bound to the job's account, mutating the
    /// local session snapshot with whatever the winning method returned.
    pub async fn authenticate(
        &self,
        session: &mut SessionData,
        meta: &AccountMetadata,
        log: &JobLogger,
    ) -> Result<Arc<dyn SocialClient>, AuthError> {
        let client = self
            .factory
            .client_for(meta)
            .map_err(|e| AuthError::Client(e.to_string()))?;

        let mut last = String::from("no method applicable");

        // Method 1 — refresh
        if session.refresh_token.is_empty() {
            log.debug("auth: no refresh token, skipping refresh");
        } else {
            match client.refresh_session(&session.refresh_token).await {
                Ok(fresh) => {
                    self.adopt(session, &fresh);
                    self.push_tokens(meta, &fresh, false, log).await;
                    log.info(format!("auth: session refreshed for @{}", session.handle));
                    return Ok(client);
                }
                Err(e) => {
                    last = format!("refresh: {e}");
                    log.warn(format!("auth: token refresh failed: {e}"));
                }
            }
        }

        // Method 2 — resume. A missing DID fails the method; fabricating one
        // would poison every downstream record write.
        if session.did.as_deref().unwrap_or_default().is_empty() {
            last = "resume: DID missing".to_string();
            log.warn("auth: cannot resume session, DID missing");
        } else {
            match client.resume_session(session).await {
                Ok(fresh) => {
                    self.adopt(session, &fresh);
                    log.info(format!("auth: session resumed for @{}", session.handle));
                    return Ok(client);
                }
                Err(e) => {
                    last = format!("resume: {e}");
                    log.warn(format!("auth: session resume failed: {e}"));
                }
            }
        }

        // Method 3 — fresh login
        match meta.password.as_deref().filter(|p| !p.is_empty()) {
            None => {
                log.debug("auth: no password on file, skipping login");
            }
            Some(password) => match client.login(&session.handle, password).await {
                Ok(fresh) => {
                    self.adopt(session, &fresh);
                    session.email = fresh.email.clone().or(session.email.take());
                    self.push_tokens(meta, &fresh, true, log).await;
                    log.info(format!("auth: logged in with password as @{}", fresh.handle));
                    return Ok(client);
                }
                Err(e) => {
                    last = format!("login: {e}");
                    log.warn(format!("auth: password login failed: {e}"));
                }
            },
        }

        Err(AuthError::Exhausted { last })
    }

    fn adopt(&self, session: &mut SessionData, fresh: &AuthSession) {
        session.access_token = fresh.access_token.clone();
        session.refresh_token = fresh.refresh_token.clone();
        session.did = Some(fresh.did.clone());
    }

    async fn push_tokens(
        &self,
        meta: &AccountMetadata,
        fresh: &AuthSession,
        include_email: bool,
        log: &JobLogger,
    ) {
        if meta.account_id.is_empty() {
            return;
        }
        let update = TokenUpdate {
            access_token: fresh.access_token.clone(),
            refresh_token: fresh.refresh_token.clone(),
            did: Some(fresh.did.clone()),
            email: if include_email {
                fresh.email.clone()
            } else {
                None
            },
        };
        // A failed write must not fail the job: the session in hand is valid.
        if let Err(e) = self.store.update_tokens(&meta.account_id, update).await {
            log.warn(format!("auth: token write-back failed: {e}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::accounts::MemoryAccountStore;
    use crate::kernel::event_bus::EventBus;
    use crate::kernel::jobs::job::JobType;
    use crate::kernel::jobs::memory::MemoryQueueBackend;
    use crate::kernel::logsink::{JobLogMeta, LogLevel};
    use crate::kernel::social::SocialError;
    use crate::kernel::testing::{MockClientFactory, MockSocialClient};

    fn session() -> SessionData {
        SessionData {
            did: Some("D".into()),
            handle: "bot.bsky.social".into(),
            email: None,
            access_token: "A1".into(),
            refresh_token: "R1".into(),
        }
    }

    fn meta() -> AccountMetadata {
        AccountMetadata {
            account_id: "acct-1".into(),
            password: Some("P".into()),
            ..Default::default()
        }
    }

    fn auth_session(access: &str, refresh: &str, did: &str, email: Option<&str>) -> AuthSession {
        AuthSession {
            did: did.into(),
            handle: "bot.bsky.social".into(),
            email: email.map(String::from),
            access_token: access.into(),
            refresh_token: refresh.into(),
        }
    }

    struct Harness {
        store: Arc<MemoryAccountStore>,
        coordinator: AuthCoordinator,
        logger: JobLogger,
        _drain: tokio::task::JoinHandle<()>,
        backend: Arc<MemoryQueueBackend>,
    }

    fn harness(mock: Arc<MockSocialClient>) -> Harness {
        let store = Arc::new(MemoryAccountStore::new());
        let coordinator = AuthCoordinator::new(
            store.clone(),
            Arc::new(MockClientFactory::new(mock)),
        );
        let backend = Arc::new(MemoryQueueBackend::new());
        let (logger, drain) = JobLogger::channel(
            JobLogMeta {
                job_id: "job-1".into(),
                tenant_id: "t".into(),
                parent_id: None,
                job_type: JobType::Engagement,
            },
            backend.clone(),
            EventBus::new(),
        );
        Harness {
            store,
            coordinator,
            logger,
            _drain: drain,
            backend,
        }
    }

    #[tokio::test]
    async fn refresh_success_rotates_tokens_once() {
        let mock = Arc::new(MockSocialClient::new());
        mock.script_refresh(Ok(auth_session("A2", "R2", "D", None)));
        let h = harness(mock.clone());

        let mut s = session();
        h.coordinator
            .authenticate(&mut s, &meta(), &h.logger)
            .await
            .unwrap();

        assert_eq!(s.access_token, "A2");
        assert_eq!(s.refresh_token, "R2");
        assert_eq!(s.did.as_deref(), Some("D"));

        let updates = h.store.updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].0, "acct-1");
        assert_eq!(updates[0].1.access_token, "A2");
        assert_eq!(updates[0].1.refresh_token, "R2");
        assert_eq!(updates[0].1.did.as_deref(), Some("D"));
        assert_eq!(updates[0].1.email, None);

        // Resume and login were never attempted.
        assert_eq!(mock.resume_calls(), 0);
        assert_eq!(mock.login_calls(), 0);
    }

    #[tokio::test]
    async fn falls_through_to_login_and_updates_identity() {
        let mock = Arc::new(MockSocialClient::new());
        mock.script_refresh(Err(SocialError::Auth("refresh expired".into())));
        mock.script_resume(Err(SocialError::Auth("token rejected".into())));
        mock.script_login(Ok(auth_session("A3", "R3", "D2", Some("e@x"))));
        let h = harness(mock);

        let mut s = session();
        h.coordinator
            .authenticate(&mut s, &meta(), &h.logger)
            .await
            .unwrap();

        assert_eq!(s.did.as_deref(), Some("D2"));
        assert_eq!(s.access_token, "A3");
        assert_eq!(s.email.as_deref(), Some("e@x"));

        let updates = h.store.updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].1.did.as_deref(), Some("D2"));
        assert_eq!(updates[0].1.email.as_deref(), Some("e@x"));

        // warn (refresh), warn (resume), info (login) — in that order.
        drop(h.logger);
        h._drain.await.unwrap();
        let job = h.backend.raw_job("job-1");
        assert!(job.is_none()); // log lines for unknown jobs are dropped by the backend
    }

    #[tokio::test]
    async fn missing_did_fails_resume_without_fabricating_one() {
        let mock = Arc::new(MockSocialClient::new());
        mock.script_refresh(Err(SocialError::Auth("refresh expired".into())));
        // No resume script: resume must not be called at all.
        let h = harness(mock.clone());

        let mut s = session();
        s.did = None;
        let meta = AccountMetadata {
            account_id: "acct-1".into(),
            password: None,
            ..Default::default()
        };

        let err = h
            .coordinator
            .authenticate(&mut s, &meta, &h.logger)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, AuthError::Exhausted { .. }));
        assert!(err.to_string().contains("DID missing"));
        assert_eq!(mock.resume_calls(), 0);
        assert!(h.store.updates().is_empty());
    }

    #[tokio::test]
    async fn resume_success_does_not_touch_the_store() {
        let mock = Arc::new(MockSocialClient::new());
        mock.script_refresh(Err(SocialError::Upstream("network flap".into())));
        mock.script_resume(Ok(auth_session("A1", "R1", "D", None)));
        let h = harness(mock);

        let mut s = session();
        h.coordinator
            .authenticate(&mut s, &meta(), &h.logger)
            .await
            .unwrap();
        assert!(h.store.updates().is_empty());
    }

    #[tokio::test]
    async fn warn_warn_info_lines_in_order() {
        let mock = Arc::new(MockSocialClient::new());
        mock.script_refresh(Err(SocialError::Auth("refresh expired".into())));
        mock.script_resume(Err(SocialError::Auth("token rejected".into())));
        mock.script_login(Ok(auth_session("A3", "R3", "D2", None)));

        let store = Arc::new(MemoryAccountStore::new());
        let coordinator =
            AuthCoordinator::new(store, Arc::new(MockClientFactory::new(mock)));
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let backend = Arc::new(MemoryQueueBackend::new());
        let (logger, drain) = JobLogger::channel(
            JobLogMeta {
                job_id: "job-logs".into(),
                tenant_id: "t".into(),
                parent_id: None,
                job_type: JobType::Engagement,
            },
            backend,
            bus,
        );

        let mut s = session();
        coordinator
            .authenticate(&mut s, &meta(), &logger)
            .await
            .unwrap();
        drop(logger);
        drain.await.unwrap();

        let mut levels = Vec::new();
        while let Ok(event) = rx.try_recv() {
            levels.push(event.log.unwrap().level);
        }
        assert_eq!(levels, vec![LogLevel::Warn, LogLevel::Warn, LogLevel::Info]);
    }
}
