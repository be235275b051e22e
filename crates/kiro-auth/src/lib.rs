//! Kiro account authentication library: Credential Store + Token Refresher.
//!
//! Accounts arrive already authenticated — device-code, social, or scanned
//! from a local cache — so this crate never drives an authorize-code/PKCE
//! exchange itself. Its job starts after that: hold each account's
//! [`account::CredentialEnvelope`] and [`account::HealthState`], persist
//! mutations atomically, and keep access tokens refreshed ahead of expiry
//! via the strategy matching the account's [`account::AuthKind`].
//!
//! Flow:
//! 1. An envelope is imported through `credentials::CredentialStore::add()`
//!    (from the management API or the on-disk config document).
//! 2. The Token Refresher inspects every account's `expires_at` on a timer
//!    and dispatches `strategies::strategy_for()` when inside the refresh
//!    window.
//! 3. A refreshed [`strategies::TokenUpdate`] is written back via
//!    `credentials::CredentialStore::update_credentials()`.
//! 4. The Account Selector (in `kiro-pool`) reads accounts through
//!    `credentials::CredentialStore::list()`/`get()` and reports outcomes
//!    back through `record_selected()`/`record_call_finished()`/
//!    `mark_cooldown()`/`mark_unhealthy()`.

pub mod account;
pub mod constants;
pub mod credentials;
pub mod error;
pub mod refresher;
pub mod strategies;

pub use account::{Account, AuthKind, CredentialEnvelope, HealthState};
pub use constants::*;
pub use credentials::{AccountRecord, CredentialStore};
pub use error::{Error, Result};
pub use refresher::Refresher;
pub use strategies::{RefreshStrategy, TokenUpdate, default_strategies, strategy_for};
