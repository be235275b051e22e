//! Token Refresher: proactive background refresh plus on-demand triggers.
//!
//! Runs a periodic sweep that inspects every account's `expires_at` and
//! refreshes anything inside [`crate::constants::TOKEN_REFRESH_THRESHOLD_SECS`]
//! of expiring. Request-time code paths (the Account Selector, an admin
//! "refresh now" call) can also trigger a refresh directly through
//! [`refresh_account`] — concurrent triggers for the same account coalesce
//! on the store's per-account mutex rather than firing duplicate upstream
//! calls.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::account::{AuthKind, now_ms};
use crate::constants::{EXPIRY_SAFETY_MARGIN_SECS, TOKEN_REFRESH_THRESHOLD_SECS};
use crate::credentials::CredentialStore;
use crate::error::{Error, Result};
use crate::strategies::{RefreshStrategy, TokenUpdate, default_strategies, strategy_for};

pub struct Refresher {
    store: Arc<CredentialStore>,
    http: reqwest::Client,
    strategies: Vec<Box<dyn RefreshStrategy>>,
}

impl Refresher {
    pub fn new(store: Arc<CredentialStore>, http: reqwest::Client) -> Self {
        Self {
            store,
            http,
            strategies: default_strategies(),
        }
    }

    /// Spawn the periodic sweep. Per §9c there is no ordering guarantee
    /// between this sweep and an on-demand `refresh_all` — both serialize
    /// through the same per-account mutex, so neither corrupts the other.
    pub fn spawn(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // accounts were just loaded, skip the immediate tick
            loop {
                ticker.tick().await;
                self.sweep().await;
            }
        })
    }

    /// One sweep: refresh every selectable account within the threshold.
    pub async fn sweep(&self) {
        let accounts = self.store.list().await;
        let now = now_ms();
        let threshold_ms = TOKEN_REFRESH_THRESHOLD_SECS * 1000;

        for account in accounts {
            if account.credential.expires_at > now + threshold_ms {
                continue;
            }
            debug!(account_id = %account.id, "token expiring within threshold, refreshing");
            if let Err(e) = self.refresh_account(&account.id).await {
                warn!(account_id = %account.id, error = %e, "background refresh failed");
            }
        }
    }

    /// Refresh every account immediately, regardless of expiry, used by the
    /// admin "refresh all" endpoint.
    pub async fn refresh_all(&self) -> Vec<(String, Result<()>)> {
        let accounts = self.store.list().await;
        let mut results = Vec::with_capacity(accounts.len());
        for account in accounts {
            let result = self.refresh_account(&account.id).await;
            results.push((account.id, result));
        }
        results
    }

    /// Refresh a single account. Concurrent calls for the same `id`
    /// coalesce: the second caller waits for the first's result instead of
    /// issuing a second upstream refresh.
    pub async fn refresh_account(&self, id: &str) -> Result<()> {
        let lock = self.store.refresh_lock(id).await;
        let _guard = lock.lock().await;

        // Re-read after acquiring the lock: a coalesced waiter should see the
        // token the first caller just installed and skip redundant work.
        let account = self
            .store
            .get(id)
            .await
            .ok_or_else(|| Error::NotFound(format!("account {id} not in credential store")))?;

        let now = now_ms();
        if account.credential.expires_at > now + EXPIRY_SAFETY_MARGIN_SECS * 1000 {
            return Ok(());
        }

        let strategy = strategy_for(&self.strategies, account.provenance).ok_or_else(|| {
            Error::NoStrategy(format!("{:?}", account.provenance))
        })?;

        match strategy.refresh(&account, &self.http).await {
            Ok(update) => {
                self.apply_update(id, update).await?;
                info!(account_id = %id, "token refresh succeeded");
                Ok(())
            }
            Err(Error::InvalidCredentials(reason)) => {
                warn!(account_id = %id, %reason, "refresh token rejected, disabling account");
                self.store.mark_unhealthy(id, reason).await?;
                self.store.set_enabled(id, false).await
            }
            Err(e) => Err(e),
        }
    }

    async fn apply_update(&self, id: &str, update: TokenUpdate) -> Result<()> {
        let account = self
            .store
            .get(id)
            .await
            .ok_or_else(|| Error::NotFound(format!("account {id} not in credential store")))?;
        let mut envelope = account.credential;
        envelope.access_token = update.access_token;
        if let Some(rt) = update.refresh_token {
            envelope.refresh_token = Some(rt);
        }
        envelope.expires_at = update.expires_at_ms;
        if update.profile_arn.is_some() {
            envelope.profile_arn = update.profile_arn;
        }
        self.store.update_credentials(id, envelope).await?;
        self.store.mark_active(id).await
    }
}

/// Device-code and scanned-cache accounts without a refresh token can never
/// be refreshed; the Selector routes around them once their access token
/// expires rather than calling into the refresher.
pub fn can_refresh(auth_kind: AuthKind, has_refresh_token: bool) -> bool {
    has_refresh_token || !auth_kind.requires_refresh_token()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{AuthKind, CredentialEnvelope};
    use crate::credentials::AccountRecord;

    fn envelope(expires_at: u64) -> CredentialEnvelope {
        CredentialEnvelope {
            access_token: "at".into(),
            refresh_token: Some("rt".into()),
            expires_at,
            auth_kind: AuthKind::AwsDeviceCode,
            region: "us-east-1".into(),
            profile_arn: None,
            client_id: None,
            client_secret: None,
        }
    }

    async fn test_store(dir: &tempfile::TempDir, accounts: &[(&str, u64)]) -> Arc<CredentialStore> {
        let path = dir.path().join("accounts.json");
        let records = accounts
            .iter()
            .map(|(id, expires)| AccountRecord {
                id: id.to_string(),
                label: id.to_string(),
                credential: envelope(*expires),
                enabled: true,
            })
            .collect();
        Arc::new(CredentialStore::from_records(path, records))
    }

    #[tokio::test]
    async fn sweep_skips_tokens_far_from_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir, &[("a", now_ms() + 4_102_444_800_000)]).await;
        let refresher = Refresher::new(store.clone(), reqwest::Client::new());
        refresher.sweep().await;
        let account = store.get("a").await.unwrap();
        assert_eq!(account.credential.access_token, "at");
    }

    #[test]
    fn can_refresh_requires_token_for_social_only() {
        assert!(can_refresh(AuthKind::AwsDeviceCode, false));
        assert!(!can_refresh(AuthKind::SocialGoogle, false));
        assert!(can_refresh(AuthKind::SocialGoogle, true));
    }
}
