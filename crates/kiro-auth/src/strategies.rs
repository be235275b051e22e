//! One refresh strategy per [`AuthKind`] family.
//!
//! The Token Refresher dispatches to the strategy matching an account's
//! `auth_kind` rather than branching inline — Kiro desktop device-code
//! accounts refresh against Kiro's own endpoint, while social and
//! scanned-cache accounts go through AWS SSO OIDC.

use serde::Deserialize;
use std::future::Future;
use std::pin::Pin;

use crate::account::{Account, AuthKind, now_ms};
use crate::constants::{aws_sso_oidc_url, kiro_refresh_url};
use crate::error::{Error, Result};

/// The fields a successful refresh updates on the account's credential envelope.
pub struct TokenUpdate {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at_ms: u64,
    pub profile_arn: Option<String>,
}

pub trait RefreshStrategy: Send + Sync {
    fn can_handle(&self, auth_kind: AuthKind) -> bool;

    fn refresh<'a>(
        &'a self,
        account: &'a Account,
        http: &'a reqwest::Client,
    ) -> Pin<Box<dyn Future<Output = Result<TokenUpdate>> + Send + 'a>>;
}

/// Refreshes `aws-device-code` accounts via Kiro's own desktop refresh endpoint.
pub struct KiroDesktopStrategy;

#[derive(Debug, Deserialize)]
struct KiroDesktopRefreshResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
    #[serde(default)]
    profile_arn: Option<String>,
}

fn default_expires_in() -> u64 {
    3600
}

impl RefreshStrategy for KiroDesktopStrategy {
    fn can_handle(&self, auth_kind: AuthKind) -> bool {
        auth_kind == AuthKind::AwsDeviceCode
    }

    fn refresh<'a>(
        &'a self,
        account: &'a Account,
        http: &'a reqwest::Client,
    ) -> Pin<Box<dyn Future<Output = Result<TokenUpdate>> + Send + 'a>> {
        Box::pin(async move {
            let refresh_token = account
                .credential
                .refresh_token
                .as_deref()
                .ok_or_else(|| Error::InvalidCredentials("missing refresh token".into()))?;

            let url = kiro_refresh_url(&account.credential.region);
            let resp = http
                .post(&url)
                .json(&serde_json::json!({ "refreshToken": refresh_token }))
                .send()
                .await
                .map_err(|e| Error::Http(format!("kiro refresh request failed: {e}")))?;

            let status = resp.status();
            if status.as_u16() == 401 || status.as_u16() == 403 {
                let body = resp.text().await.unwrap_or_default();
                return Err(Error::InvalidCredentials(format!(
                    "kiro refresh rejected ({status}): {body}"
                )));
            }
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(Error::TokenExchange(format!(
                    "kiro refresh returned {status}: {body}"
                )));
            }

            let parsed: KiroDesktopRefreshResponse = resp
                .json()
                .await
                .map_err(|e| Error::TokenExchange(format!("invalid kiro refresh response: {e}")))?;

            Ok(TokenUpdate {
                access_token: parsed.access_token,
                refresh_token: parsed.refresh_token,
                expires_at_ms: expires_at_from_now(parsed.expires_in),
                profile_arn: parsed.profile_arn,
            })
        })
    }
}

/// Refreshes `social-google`/`social-github`/`scanned-local-cache` accounts
/// via the AWS SSO OIDC token endpoint.
pub struct AwsSsoOidcStrategy;

#[derive(Debug, Deserialize)]
struct AwsSsoOidcRefreshResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

impl RefreshStrategy for AwsSsoOidcStrategy {
    fn can_handle(&self, auth_kind: AuthKind) -> bool {
        auth_kind.uses_aws_sso_oidc_refresh()
    }

    fn refresh<'a>(
        &'a self,
        account: &'a Account,
        http: &'a reqwest::Client,
    ) -> Pin<Box<dyn Future<Output = Result<TokenUpdate>> + Send + 'a>> {
        Box::pin(async move {
            let refresh_token = account
                .credential
                .refresh_token
                .as_deref()
                .ok_or_else(|| Error::InvalidCredentials("missing refresh token".into()))?;
            let client_id = account
                .credential
                .client_id
                .as_deref()
                .ok_or_else(|| Error::InvalidCredentials("missing client_id".into()))?;
            let client_secret = account
                .credential
                .client_secret
                .as_deref()
                .ok_or_else(|| Error::InvalidCredentials("missing client_secret".into()))?;

            let url = aws_sso_oidc_url(&account.credential.region);
            let resp = http
                .post(&url)
                .json(&serde_json::json!({
                    "grantType": "refresh_token",
                    "clientId": client_id,
                    "clientSecret": client_secret,
                    "refreshToken": refresh_token,
                }))
                .send()
                .await
                .map_err(|e| Error::Http(format!("aws sso oidc refresh request failed: {e}")))?;

            let status = resp.status();
            if status.as_u16() == 401 || status.as_u16() == 403 {
                let body = resp.text().await.unwrap_or_default();
                return Err(Error::InvalidCredentials(format!(
                    "aws sso oidc refresh rejected ({status}): {body}"
                )));
            }
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(Error::TokenExchange(format!(
                    "aws sso oidc refresh returned {status}: {body}"
                )));
            }

            let parsed: AwsSsoOidcRefreshResponse = resp
                .json()
                .await
                .map_err(|e| Error::TokenExchange(format!("invalid aws sso oidc response: {e}")))?;

            Ok(TokenUpdate {
                access_token: parsed.access_token,
                refresh_token: parsed.refresh_token,
                expires_at_ms: expires_at_from_now(parsed.expires_in),
                profile_arn: None,
            })
        })
    }
}

fn expires_at_from_now(expires_in_secs: u64) -> u64 {
    now_ms() + expires_in_secs.saturating_mul(1000)
}

/// The registered strategies, tried in order for a given `auth_kind`.
pub fn default_strategies() -> Vec<Box<dyn RefreshStrategy>> {
    vec![Box::new(KiroDesktopStrategy), Box::new(AwsSsoOidcStrategy)]
}

pub fn strategy_for(
    strategies: &[Box<dyn RefreshStrategy>],
    auth_kind: AuthKind,
) -> Option<&dyn RefreshStrategy> {
    strategies
        .iter()
        .find(|s| s.can_handle(auth_kind))
        .map(|s| s.as_ref())
}
