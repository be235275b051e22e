//! Account Selector for the Kiro account pool.
//!
//! Picks an account per request using session stickiness first, then
//! least-recently-used with a load tiebreak among `active` + enabled
//! accounts. Health transitions (cooldown, unhealthy, disabled) are the
//! Orchestrator's responsibility, applied directly on `kiro_auth::CredentialStore`.
//!
//! Lifecycle:
//! 1. Admin imports an account → stored via `kiro_auth::CredentialStore::add`.
//! 2. Orchestrator calls `Selector::select` per request.
//! 3. Upstream 429 → Orchestrator calls `store.mark_cooldown`.
//! 4. Upstream 401/403 → Orchestrator calls `store.mark_unhealthy` and triggers a refresh.
//! 5. Cooldown expires → `store.clear_expired_cooldowns` runs at the top of the next `select`.

pub mod error;
pub mod pool;

pub use error::{Error, Result};
pub use pool::Selector;
