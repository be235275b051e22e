//! Account Selector: session-sticky, LRU-with-load-tiebreak account pick.
//!
//! The credential store is the single source of truth for account state;
//! the selector only adds a short-lived session → account binding on top of
//! it. Selection never mutates health state directly — that's the
//! Orchestrator's job via `mark_cooldown`/`mark_unhealthy` on the store.

use std::collections::HashMap;
use std::sync::Arc;

use kiro_auth::{Account, CredentialStore};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// A session binding is valid for this long before it's eligible to be
/// replaced by ordinary LRU selection.
const SESSION_BINDING_TTL_MS: u64 = 60_000;
/// Grace window within which an all-cooldown pool still reports
/// `NoneAvailable` rather than a harder failure — informational only, the
/// caller decides whether to wait.
const COOLDOWN_GRACE_MS: u64 = 1_000;

#[derive(Debug, Clone)]
struct SessionBinding {
    account_id: String,
    bound_at_ms: u64,
}

pub struct Selector {
    store: Arc<CredentialStore>,
    bindings: RwLock<HashMap<String, SessionBinding>>,
}

impl Selector {
    pub fn new(store: Arc<CredentialStore>) -> Self {
        Self {
            store,
            bindings: RwLock::new(HashMap::new()),
        }
    }

    /// Pick an account for this request, in the order: live session
    /// binding, then least-recently-used with load tiebreak among
    /// selectable accounts not in `excluded_ids`.
    pub async fn select(&self, session_id: Option<&str>, excluded_ids: &[String]) -> Result<Account> {
        self.store.clear_expired_cooldowns().await;

        if let Some(session_id) = session_id {
            if let Some(account) = self.try_session_binding(session_id, excluded_ids).await {
                self.store.record_selected(&account.id).await;
                metrics::counter!("gateway_account_selections_total", "outcome" => "sticky").increment(1);
                return Ok(account);
            }
        }

        let accounts = self.store.list().await;
        let now = kiro_auth::account::now_ms();
        let candidate = accounts
            .into_iter()
            .filter(|a| a.is_selectable(now) && !excluded_ids.contains(&a.id))
            .min_by_key(|a| (a.last_used_at_ms, a.in_flight_count));

        let Some(account) = candidate else {
            metrics::counter!("gateway_account_selections_total", "outcome" => "none_available").increment(1);
            return Err(self.none_available_error(excluded_ids).await);
        };
        metrics::counter!("gateway_account_selections_total", "outcome" => "lru").increment(1);

        if let Some(session_id) = session_id {
            self.bindings.write().await.insert(
                session_id.to_string(),
                SessionBinding { account_id: account.id.clone(), bound_at_ms: now },
            );
        }

        self.store.record_selected(&account.id).await;
        debug!(account_id = %account.id, session_id, "selected account");
        Ok(account)
    }

    async fn try_session_binding(&self, session_id: &str, excluded_ids: &[String]) -> Option<Account> {
        let now = kiro_auth::account::now_ms();
        let account_id = {
            let bindings = self.bindings.read().await;
            let binding = bindings.get(session_id)?;
            if now.saturating_sub(binding.bound_at_ms) >= SESSION_BINDING_TTL_MS {
                return None;
            }
            binding.account_id.clone()
        };
        if excluded_ids.contains(&account_id) {
            return None;
        }
        let account = self.store.get(&account_id).await?;
        if !account.is_selectable(now) {
            return None;
        }
        info!(account_id, session_id, "reused sticky session binding");
        Some(account)
    }

    async fn none_available_error(&self, excluded_ids: &[String]) -> Error {
        let accounts = self.store.list().await;
        let now = kiro_auth::account::now_ms();
        let total = accounts.len();
        let available = accounts
            .iter()
            .filter(|a| a.is_selectable(now) && !excluded_ids.contains(&a.id))
            .count();
        let cooling = accounts
            .iter()
            .filter(|a| matches!(a.health, kiro_auth::HealthState::Cooldown { .. }))
            .count();
        Error::NoneAvailable(
            serde_json::json!({
                "accounts_total": total,
                "accounts_available": available,
                "accounts_cooling_down": cooling,
                "excluded": excluded_ids,
            })
            .to_string(),
        )
    }

    /// Drop session bindings older than their TTL — called by the
    /// gateway's periodic session-pruner task.
    pub async fn prune_stale_bindings(&self) {
        let now = kiro_auth::account::now_ms();
        let mut bindings = self.bindings.write().await;
        bindings.retain(|_, b| now.saturating_sub(b.bound_at_ms) < SESSION_BINDING_TTL_MS);
    }

    /// Pool health summary for the `/health` endpoint.
    pub async fn health(&self) -> serde_json::Value {
        let accounts = self.store.list().await;
        let now = kiro_auth::account::now_ms();
        let total = accounts.len();
        let available = accounts.iter().filter(|a| a.is_selectable(now)).count();
        let cooling = accounts
            .iter()
            .filter(|a| matches!(a.health, kiro_auth::HealthState::Cooldown { .. }))
            .count();
        let disabled = accounts
            .iter()
            .filter(|a| matches!(a.health, kiro_auth::HealthState::Disabled | kiro_auth::HealthState::Unhealthy { .. }))
            .count();
        let status = if total == 0 {
            "unhealthy"
        } else if available == total {
            "healthy"
        } else if available > 0 {
            "degraded"
        } else {
            "unhealthy"
        };
        serde_json::json!({
            "status": status,
            "accounts_total": total,
            "accounts_available": available,
            "accounts_cooling_down": cooling,
            "accounts_disabled": disabled,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiro_auth::account::{AuthKind, CredentialEnvelope};
    use kiro_auth::credentials::AccountRecord;

    fn envelope() -> CredentialEnvelope {
        CredentialEnvelope {
            access_token: "at".into(),
            refresh_token: Some("rt".into()),
            expires_at: 4_102_444_800_000,
            auth_kind: AuthKind::AwsDeviceCode,
            region: "us-east-1".into(),
            profile_arn: None,
            client_id: None,
            client_secret: None,
        }
    }

    async fn selector_with(dir: &tempfile::TempDir, ids: &[&str]) -> Selector {
        let records = ids
            .iter()
            .map(|id| AccountRecord {
                id: id.to_string(),
                label: id.to_string(),
                credential: envelope(),
                enabled: true,
            })
            .collect();
        let store = Arc::new(CredentialStore::from_records(dir.path().join("accounts.json"), records));
        Selector::new(store)
    }

    #[tokio::test]
    async fn picks_least_recently_used_account() {
        let dir = tempfile::tempdir().unwrap();
        let selector = selector_with(&dir, &["a", "b"]).await;

        let first = selector.select(None, &[]).await.unwrap();
        let second = selector.select(None, &[]).await.unwrap();
        assert_ne!(first.id, second.id, "second call should favor the less-recently-used account");
    }

    #[tokio::test]
    async fn excluded_ids_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let selector = selector_with(&dir, &["a", "b"]).await;

        let picked = selector.select(None, &["a".to_string()]).await.unwrap();
        assert_eq!(picked.id, "b");
    }

    #[tokio::test]
    async fn session_binding_sticks_to_same_account() {
        let dir = tempfile::tempdir().unwrap();
        let selector = selector_with(&dir, &["a", "b"]).await;

        let first = selector.select(Some("session-1"), &[]).await.unwrap();
        let second = selector.select(Some("session-1"), &[]).await.unwrap();
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn empty_pool_returns_none_available() {
        let dir = tempfile::tempdir().unwrap();
        let selector = selector_with(&dir, &[]).await;
        let err = selector.select(None, &[]).await.unwrap_err();
        assert!(matches!(err, Error::NoneAvailable(_)));
    }

    #[tokio::test]
    async fn all_disabled_returns_none_available() {
        let dir = tempfile::tempdir().unwrap();
        let selector = selector_with(&dir, &["a"]).await;
        selector.store.set_enabled("a", false).await.unwrap();
        let err = selector.select(None, &[]).await.unwrap_err();
        assert!(matches!(err, Error::NoneAvailable(_)));
    }

    #[tokio::test]
    async fn prune_stale_bindings_removes_expired_entries() {
        let dir = tempfile::tempdir().unwrap();
        let selector = selector_with(&dir, &["a"]).await;
        selector.select(Some("session-1"), &[]).await.unwrap();
        assert_eq!(selector.bindings.read().await.len(), 1);

        // Force the binding to look old, then prune.
        selector.bindings.write().await.get_mut("session-1").unwrap().bound_at_ms = 0;
        selector.prune_stale_bindings().await;
        assert!(selector.bindings.read().await.is_empty());
    }
}
