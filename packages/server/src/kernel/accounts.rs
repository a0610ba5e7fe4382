//! The account/credential store capability.
//!
//! The credential database itself is external; the core only reads accounts
//! by category and writes rotated tokens back. [`MemoryAccountStore`] backs
//! development wiring and doubles as the test spy.

use std::sync::Mutex;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::common::types::{AccountMetadata, SessionData};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountRecord {
    pub account_id: String,
    pub handle: String,
    #[serde(default)]
    pub did: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
    #[serde(default)]
    pub category_id: Option<String>,
    #[serde(default)]
    pub proxy: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
}

impl AccountRecord {
    pub fn session_data(&self) -> SessionData {
        SessionData {
            did: self.did.clone(),
            handle: self.handle.clone(),
            email: self.email.clone(),
            access_token: self.access_token.clone(),
            refresh_token: self.refresh_token.clone(),
        }
    }

    pub fn metadata(&self) -> AccountMetadata {
        AccountMetadata {
            account_id: self.account_id.clone(),
            password: self.password.clone(),
            proxy: self.proxy.clone(),
            user_agent: self.user_agent.clone(),
            endpoint: self.endpoint.clone(),
        }
    }
}

/// Tokens (and optionally identity fields) rotated by a successful auth.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenUpdate {
    pub access_token: String,
    pub refresh_token: String,
    pub did: Option<String>,
    pub email: Option<String>,
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn accounts_in_category(&self, category_id: &str) -> anyhow::Result<Vec<AccountRecord>>;

    /// Last-writer-wins; concurrent jobs for the same account may race here
    /// and that is acceptable (refresh tokens are idempotent upstream).
    async fn update_tokens(&self, account_id: &str, update: TokenUpdate) -> anyhow::Result<()>;
}

/// In-memory store. Also records every token update so tests can assert the
/// rotation property.
#[derive(Default)]
pub struct MemoryAccountStore {
    accounts: DashMap<String, AccountRecord>,
    updates: Mutex<Vec<(String, TokenUpdate)>>,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: AccountRecord) {
        self.accounts.insert(record.account_id.clone(), record);
    }

    pub fn get(&self, account_id: &str) -> Option<AccountRecord> {
        self.accounts.get(account_id).map(|r| r.clone())
    }

    /// Every `update_tokens` call in order, for assertions.
    pub fn updates(&self) -> Vec<(String, TokenUpdate)> {
        self.updates.lock().unwrap().clone()
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn accounts_in_category(&self, category_id: &str) -> anyhow::Result<Vec<AccountRecord>> {
        Ok(self
            .accounts
            .iter()
            .filter(|r| r.category_id.as_deref() == Some(category_id))
            .map(|r| r.clone())
            .collect())
    }

    async fn update_tokens(&self, account_id: &str, update: TokenUpdate) -> anyhow::Result<()> {
        if let Some(mut record) = self.accounts.get_mut(account_id) {
            record.access_token = update.access_token.clone();
            record.refresh_token = update.refresh_token.clone();
            if let Some(did) = &update.did {
                record.did = Some(did.clone());
            }
            if let Some(email) = &update.email {
                record.email = Some(email.clone());
            }
        }
        self.updates
            .lock()
            .unwrap()
            .push((account_id.to_string(), update));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, category: Option<&str>) -> AccountRecord {
        AccountRecord {
            account_id: id.into(),
            handle: format!("{id}.bsky.social"),
            did: Some(format!("did:plc:{id}")),
            email: None,
            password: Some("hunter2".into()),
            access_token: "A1".into(),
            refresh_token: "R1".into(),
            category_id: category.map(String::from),
            proxy: None,
            user_agent: None,
            endpoint: None,
        }
    }

    #[tokio::test]
    async fn category_lookup_filters() {
        let store = MemoryAccountStore::new();
        store.insert(record("a", Some("growth")));
        store.insert(record("b", Some("growth")));
        store.insert(record("c", Some("other")));

        let mut found = store.accounts_in_category("growth").await.unwrap();
        found.sort_by(|x, y| x.account_id.cmp(&y.account_id));
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].account_id, "a");
    }

    #[tokio::test]
    async fn token_updates_apply_and_are_recorded() {
        let store = MemoryAccountStore::new();
        store.insert(record("a", None));

        store
            .update_tokens(
                "a",
                TokenUpdate {
                    access_token: "A2".into(),
                    refresh_token: "R2".into(),
                    did: None,
                    email: None,
                },
            )
            .await
            .unwrap();

        let record = store.get("a").unwrap();
        assert_eq!(record.access_token, "A2");
        assert_eq!(record.refresh_token, "R2");
        // DID untouched when the update carries none
        assert_eq!(record.did.as_deref(), Some("did:plc:a"));
        assert_eq!(store.updates().len(), 1);
    }

    #[test]
    fn record_projects_session_and_metadata() {
        let r = record("a", None);
        let session = r.session_data();
        assert_eq!(session.handle, "a.bsky.social");
        assert_eq!(session.refresh_token, "R1");
        let meta = r.metadata();
        assert_eq!(meta.account_id, "a");
        assert_eq!(meta.password.as_deref(), Some("hunter2"));
    }
}
