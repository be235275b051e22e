//! Credential Store: owns every [`Account`], persisted through an atomic
//! write-temp-then-rename flush to the on-disk config document.
//!
//! Mutations are atomic with respect to concurrent selection: the store
//! holds its accounts behind a single `RwLock`, and every mutating method
//! takes the write half for the duration of the change. A flush failure
//! does not roll back the in-memory change; it is recorded in
//! `last_persist_error` instead, matching §4.1's guarantee.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::account::{Account, CredentialEnvelope, HealthState, now_ms};
use crate::error::{Error, Result};

/// A snapshot of one account's persisted fields — the volatile fields
/// named in §6 (`in_flight_count`, health, `last_used_at`) are excluded.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AccountRecord {
    pub id: String,
    pub label: String,
    pub credential: CredentialEnvelope,
    pub enabled: bool,
}

pub struct CredentialStore {
    path: PathBuf,
    state: RwLock<HashMap<String, Account>>,
    /// Coalesces concurrent refresh triggers for the same account (§4.2, §9c).
    refresh_locks: RwLock<HashMap<String, Arc<Mutex<()>>>>,
    last_persist_error: RwLock<Option<String>>,
}

impl CredentialStore {
    /// Build a store from records already loaded from the config document
    /// (see `kiro-gateway`'s config loader) plus the path to flush back to.
    pub fn from_records(path: PathBuf, records: Vec<AccountRecord>) -> Self {
        let state = records
            .into_iter()
            .map(|r| {
                let account = Account::new(r.id.clone(), r.label, r.credential);
                let mut account = account;
                account.enabled = r.enabled;
                (r.id, account)
            })
            .collect();
        Self {
            path,
            state: RwLock::new(state),
            refresh_locks: RwLock::new(HashMap::new()),
            last_persist_error: RwLock::new(None),
        }
    }

    pub async fn list(&self) -> Vec<Account> {
        self.state.read().await.values().cloned().collect()
    }

    pub async fn get(&self, id: &str) -> Option<Account> {
        self.state.read().await.get(id).cloned()
    }

    /// Add a new account, or merge into the existing one if `id` already
    /// exists (duplicate-add never duplicates a logical identity).
    pub async fn add(&self, id: String, label: String, credential: CredentialEnvelope) -> Result<()> {
        {
            let mut state = self.state.write().await;
            match state.get_mut(&id) {
                Some(existing) => {
                    existing.credential = credential;
                    existing.label = label;
                    debug!(account_id = %id, "merged into existing account");
                }
                None => {
                    state.insert(id.clone(), Account::new(id.clone(), label, credential));
                    debug!(account_id = %id, "added account");
                }
            }
        }
        self.flush().await
    }

    pub async fn remove(&self, id: &str) -> Result<Option<Account>> {
        let removed = self.state.write().await.remove(id);
        if removed.is_some() {
            self.flush().await?;
        }
        Ok(removed)
    }

    pub async fn update_credentials(&self, id: &str, new_envelope: CredentialEnvelope) -> Result<()> {
        {
            let mut state = self.state.write().await;
            let account = state
                .get_mut(id)
                .ok_or_else(|| Error::NotFound(format!("account {id} not in credential store")))?;
            if new_envelope.expires_at < account.credential.expires_at {
                warn!(account_id = %id, "refresh yielded an earlier expiry than the prior one");
            }
            account.credential = new_envelope;
        }
        self.flush().await
    }

    pub async fn set_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        {
            let mut state = self.state.write().await;
            let account = state
                .get_mut(id)
                .ok_or_else(|| Error::NotFound(format!("account {id} not in credential store")))?;
            account.enabled = enabled;
            if enabled && account.health == HealthState::Disabled {
                account.health = HealthState::Active;
            } else if !enabled {
                account.health = HealthState::Disabled;
            }
        }
        self.flush().await
    }

    pub async fn mark_cooldown(&self, id: &str, duration_ms: u64) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(account) = state.get_mut(id) {
            account.health = HealthState::Cooldown { until_ms: now_ms() + duration_ms };
        }
        Ok(())
    }

    pub async fn mark_unhealthy(&self, id: &str, reason: String) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(account) = state.get_mut(id) {
            account.health = HealthState::Unhealthy { reason };
        }
        Ok(())
    }

    pub async fn mark_active(&self, id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(account) = state.get_mut(id) {
            if account.enabled {
                account.health = HealthState::Active;
            }
        }
        Ok(())
    }

    /// Atomically transition any account whose cooldown has expired back to
    /// `active`. Called by the Selector before scanning for a candidate.
    pub async fn clear_expired_cooldowns(&self) {
        let now = now_ms();
        let mut state = self.state.write().await;
        for account in state.values_mut() {
            if account.cooldown_expired(now) {
                account.health = HealthState::Active;
            }
        }
    }

    /// Update `last_used_at`/`in_flight_count` bookkeeping atomically with
    /// selection — called by the Account Selector from within its own
    /// critical section, never standalone.
    pub async fn record_selected(&self, id: &str) {
        let mut state = self.state.write().await;
        if let Some(account) = state.get_mut(id) {
            account.last_used_at_ms = now_ms();
            account.in_flight_count += 1;
            account.request_count += 1;
        }
    }

    pub async fn record_call_finished(&self, id: &str, errored: bool) {
        let mut state = self.state.write().await;
        if let Some(account) = state.get_mut(id) {
            account.in_flight_count = account.in_flight_count.saturating_sub(1);
            if errored {
                account.error_count += 1;
            }
        }
    }

    pub async fn export_snapshot(&self) -> Vec<AccountRecord> {
        self.state
            .read()
            .await
            .values()
            .map(|a| AccountRecord {
                id: a.id.clone(),
                label: a.label.clone(),
                credential: a.credential.clone(),
                enabled: a.enabled,
            })
            .collect()
    }

    pub async fn import_snapshot(&self, records: Vec<AccountRecord>) -> Result<()> {
        {
            let mut state = self.state.write().await;
            state.clear();
            for r in records {
                state.insert(r.id.clone(), Account::new(r.id.clone(), r.label, r.credential));
            }
        }
        self.flush().await
    }

    /// The per-account mutex guarding in-flight refreshes, created lazily.
    pub async fn refresh_lock(&self, id: &str) -> Arc<Mutex<()>> {
        if let Some(lock) = self.refresh_locks.read().await.get(id) {
            return lock.clone();
        }
        let mut locks = self.refresh_locks.write().await;
        locks.entry(id.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    pub async fn last_persist_error(&self) -> Option<String> {
        self.last_persist_error.read().await.clone()
    }

    async fn flush(&self) -> Result<()> {
        let snapshot = self.export_snapshot().await;
        match write_atomic(&self.path, &snapshot).await {
            Ok(()) => {
                *self.last_persist_error.write().await = None;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "credential flush failed, in-memory state retained");
                *self.last_persist_error.write().await = Some(e.to_string());
                // A failed flush does not revert the in-memory change.
                Ok(())
            }
        }
    }
}

async fn write_atomic(path: &Path, records: &[AccountRecord]) -> Result<()> {
    let json = serde_json::to_string_pretty(records)
        .map_err(|e| Error::CredentialParse(format!("serializing accounts: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("credential path has no parent directory".into()))?;
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| Error::Io(format!("creating config directory: {e}")))?;

    let tmp_path = dir.join(format!(".accounts.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp account file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting account file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp account file: {e}")))?;

    info!(path = %path.display(), accounts = records.len(), "persisted accounts");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::AuthKind;

    fn envelope(suffix: &str) -> CredentialEnvelope {
        CredentialEnvelope {
            access_token: format!("at_{suffix}"),
            refresh_token: Some(format!("rt_{suffix}")),
            expires_at: 1_735_500_000_000,
            auth_kind: AuthKind::AwsDeviceCode,
            region: "us-east-1".into(),
            profile_arn: None,
            client_id: None,
            client_secret: None,
        }
    }

    fn empty_store(dir: &tempfile::TempDir) -> CredentialStore {
        CredentialStore::from_records(dir.path().join("accounts.json"), vec![])
    }

    #[tokio::test]
    async fn add_persists_and_merges_duplicate_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = empty_store(&dir);

        store.add("acct-1".into(), "A".into(), envelope("1")).await.unwrap();
        assert_eq!(store.list().await.len(), 1);

        // Adding the same id again merges rather than duplicating.
        store.add("acct-1".into(), "A renamed".into(), envelope("2")).await.unwrap();
        let accounts = store.list().await;
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].credential.access_token, "at_2");
        assert_eq!(accounts[0].label, "A renamed");
    }

    #[tokio::test]
    async fn remove_and_get_reflect_store_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = empty_store(&dir);
        store.add("acct-1".into(), "A".into(), envelope("1")).await.unwrap();

        assert!(store.get("acct-1").await.is_some());
        let removed = store.remove("acct-1").await.unwrap();
        assert!(removed.is_some());
        assert!(store.get("acct-1").await.is_none());
        assert!(store.remove("acct-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_credentials_requires_existing_account() {
        let dir = tempfile::tempdir().unwrap();
        let store = empty_store(&dir);
        let result = store.update_credentials("missing", envelope("1")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn set_enabled_false_forces_disabled_health() {
        let dir = tempfile::tempdir().unwrap();
        let store = empty_store(&dir);
        store.add("acct-1".into(), "A".into(), envelope("1")).await.unwrap();

        store.set_enabled("acct-1", false).await.unwrap();
        let account = store.get("acct-1").await.unwrap();
        assert!(!account.enabled);
        assert_eq!(account.health, HealthState::Disabled);

        store.set_enabled("acct-1", true).await.unwrap();
        let account = store.get("acct-1").await.unwrap();
        assert_eq!(account.health, HealthState::Active);
    }

    #[tokio::test]
    async fn mark_cooldown_then_clear_expired_cooldowns() {
        let dir = tempfile::tempdir().unwrap();
        let store = empty_store(&dir);
        store.add("acct-1".into(), "A".into(), envelope("1")).await.unwrap();

        store.mark_cooldown("acct-1", 0).await.unwrap();
        assert!(matches!(
            store.get("acct-1").await.unwrap().health,
            HealthState::Cooldown { .. }
        ));

        store.clear_expired_cooldowns().await;
        assert_eq!(store.get("acct-1").await.unwrap().health, HealthState::Active);
    }

    #[tokio::test]
    async fn export_then_import_snapshot_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = empty_store(&dir);
        store.add("acct-1".into(), "A".into(), envelope("1")).await.unwrap();
        store.add("acct-2".into(), "B".into(), envelope("2")).await.unwrap();

        let snapshot = store.export_snapshot().await;
        assert_eq!(snapshot.len(), 2);

        let other = empty_store(&dir);
        other.import_snapshot(snapshot).await.unwrap();
        assert_eq!(other.list().await.len(), 2);
    }

    #[tokio::test]
    async fn record_selected_and_finished_update_counters() {
        let dir = tempfile::tempdir().unwrap();
        let store = empty_store(&dir);
        store.add("acct-1".into(), "A".into(), envelope("1")).await.unwrap();

        store.record_selected("acct-1").await;
        let account = store.get("acct-1").await.unwrap();
        assert_eq!(account.in_flight_count, 1);
        assert_eq!(account.request_count, 1);

        store.record_call_finished("acct-1", true).await;
        let account = store.get("acct-1").await.unwrap();
        assert_eq!(account.in_flight_count, 0);
        assert_eq!(account.error_count, 1);
    }

    #[tokio::test]
    async fn refresh_lock_is_shared_across_calls_for_same_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = empty_store(&dir);
        let a = store.refresh_lock("acct-1").await;
        let b = store.refresh_lock("acct-1").await;
        assert!(std::sync::Arc::ptr_eq(&a, &b));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn persisted_file_is_0600() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accounts.json");
        let store = CredentialStore::from_records(path.clone(), vec![]);
        store.add("acct-1".into(), "A".into(), envelope("1")).await.unwrap();

        let metadata = tokio::fs::metadata(&path).await.unwrap();
        let mode = metadata.permissions().mode() & 0o777;
        assert_eq!(mode, 0o600, "account file must be 0600, got {mode:o}");
    }

    #[tokio::test]
    async fn concurrent_adds_all_persist() {
        let dir = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(empty_store(&dir));

        let mut handles = vec![];
        for i in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .add(format!("acct-{i}"), format!("A{i}"), envelope(&i.to_string()))
                    .await
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(store.list().await.len(), 10);
        assert!(store.last_persist_error().await.is_none());
    }
}
