//! The `Account` aggregate: one upstream credential plus derived health state.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::constants::DEFAULT_REGION;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthKind {
    AwsDeviceCode,
    SocialGoogle,
    SocialGithub,
    ScannedLocalCache,
}

impl AuthKind {
    /// Social providers require a refresh token; device-code/scanned-cache
    /// accounts carry one too in practice, but only social is invariant-checked.
    pub fn requires_refresh_token(self) -> bool {
        matches!(self, AuthKind::SocialGoogle | AuthKind::SocialGithub)
    }

    pub fn uses_aws_sso_oidc_refresh(self) -> bool {
        matches!(
            self,
            AuthKind::SocialGoogle | AuthKind::SocialGithub | AuthKind::ScannedLocalCache
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialEnvelope {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Absolute unix-epoch milliseconds.
    pub expires_at: u64,
    pub auth_kind: AuthKind,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub profile_arn: Option<String>,
    /// Present for social auth kinds: the OIDC client pair needed to hit
    /// the AWS SSO OIDC refresh endpoint.
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
}

fn default_region() -> String {
    DEFAULT_REGION.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum HealthState {
    Active,
    Cooldown { until_ms: u64 },
    Unhealthy { reason: String },
    Disabled,
}

impl HealthState {
    pub fn is_selectable(&self, now_ms: u64) -> bool {
        match self {
            HealthState::Active => true,
            HealthState::Cooldown { until_ms } => now_ms >= *until_ms,
            HealthState::Unhealthy { .. } | HealthState::Disabled => false,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            HealthState::Active => "active",
            HealthState::Cooldown { .. } => "cooldown",
            HealthState::Unhealthy { .. } => "unhealthy",
            HealthState::Disabled => "disabled",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub label: String,
    pub provenance: AuthKind,
    pub credential: CredentialEnvelope,
    pub enabled: bool,
    pub health: HealthState,
    pub last_used_at_ms: u64,
    #[serde(default)]
    pub in_flight_count: u32,
    #[serde(default)]
    pub request_count: u64,
    #[serde(default)]
    pub error_count: u64,
}

impl Account {
    pub fn new(id: String, label: String, credential: CredentialEnvelope) -> Self {
        let provenance = credential.auth_kind;
        Self {
            id,
            label,
            provenance,
            credential,
            enabled: true,
            health: HealthState::Active,
            last_used_at_ms: 0,
            in_flight_count: 0,
            request_count: 0,
            error_count: 0,
        }
    }

    pub fn is_selectable(&self, now_ms: u64) -> bool {
        self.enabled && self.health.is_selectable(now_ms)
    }

    /// True once cooldown/unhealthy state would auto-clear to `active` right
    /// now — used by callers that want to transition before selecting.
    pub fn cooldown_expired(&self, now_ms: u64) -> bool {
        matches!(self.health, HealthState::Cooldown { until_ms } if now_ms >= until_ms)
    }
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope() -> CredentialEnvelope {
        CredentialEnvelope {
            access_token: "at".into(),
            refresh_token: Some("rt".into()),
            expires_at: 0,
            auth_kind: AuthKind::AwsDeviceCode,
            region: "us-east-1".into(),
            profile_arn: None,
            client_id: None,
            client_secret: None,
        }
    }

    #[test]
    fn active_is_always_selectable() {
        assert!(HealthState::Active.is_selectable(0));
    }

    #[test]
    fn cooldown_selectable_only_after_deadline() {
        let state = HealthState::Cooldown { until_ms: 1000 };
        assert!(!state.is_selectable(500));
        assert!(state.is_selectable(1000));
        assert!(state.is_selectable(1500));
    }

    #[test]
    fn unhealthy_and_disabled_never_selectable() {
        assert!(!HealthState::Unhealthy { reason: "x".into() }.is_selectable(u64::MAX));
        assert!(!HealthState::Disabled.is_selectable(u64::MAX));
    }

    #[test]
    fn account_requires_enabled_and_selectable_health() {
        let mut acc = Account::new("a1".into(), "A".into(), envelope());
        assert!(acc.is_selectable(0));
        acc.enabled = false;
        assert!(!acc.is_selectable(0));
        acc.enabled = true;
        acc.health = HealthState::Disabled;
        assert!(!acc.is_selectable(0));
    }
}
