//! Kiro endpoint templates and client identity constants.
//!
//! Kiro is regional: both the refresh endpoint and the inference endpoint
//! are parameterized by an AWS region string pulled from the account's
//! credential envelope.

/// Kiro desktop device-code refresh endpoint, `{region}` substituted at call time.
pub const KIRO_REFRESH_URL_TEMPLATE: &str =
    "https://prod.{region}.auth.desktop.kiro.dev/refreshToken";

/// AWS SSO OIDC refresh endpoint used for social and scanned-cache accounts.
pub const AWS_SSO_OIDC_URL_TEMPLATE: &str = "https://oidc.{region}.amazonaws.com/token";

/// Kiro inference API host, `{region}` substituted at call time.
pub const KIRO_API_HOST_TEMPLATE: &str = "https://q.{region}.amazonaws.com";

/// Default AWS region used when an account's envelope omits one.
pub const DEFAULT_REGION: &str = "us-east-1";

/// `origin` query parameter Kiro expects on `generateAssistantResponse` calls.
pub const API_ORIGIN: &str = "AI_EDITOR";

/// Kiro IDE version embedded in the User-Agent string this gateway presents.
pub const KIRO_IDE_VERSION: &str = "0.7.45";

/// Refresh a token once its remaining lifetime drops below this many seconds.
/// Matches the Token Refresher's 15-minute inspection window.
pub const TOKEN_REFRESH_THRESHOLD_SECS: u64 = 900;

/// Safety margin subtracted from a fresh token's reported expiry, so the
/// refresher acts slightly before the upstream would actually reject it.
pub const EXPIRY_SAFETY_MARGIN_SECS: u64 = 60;

pub fn kiro_refresh_url(region: &str) -> String {
    KIRO_REFRESH_URL_TEMPLATE.replace("{region}", region)
}

pub fn aws_sso_oidc_url(region: &str) -> String {
    AWS_SSO_OIDC_URL_TEMPLATE.replace("{region}", region)
}

/// AWS SSO OIDC client registration endpoint, used once per gateway install
/// to obtain the `client_id`/`client_secret` pair the device-code and social
/// login flows register tokens under.
pub fn aws_sso_oidc_register_client_url(region: &str) -> String {
    format!("https://oidc.{region}.amazonaws.com/client/register")
}

/// AWS SSO OIDC device authorization endpoint: exchanges a registered
/// client for a `device_code`/`user_code`/`verification_uri` pair.
pub fn aws_sso_oidc_device_authorization_url(region: &str) -> String {
    format!("https://oidc.{region}.amazonaws.com/device_authorization")
}

pub fn kiro_api_host(region: &str) -> String {
    KIRO_API_HOST_TEMPLATE.replace("{region}", region)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn templates_substitute_region() {
        assert_eq!(
            kiro_refresh_url("us-east-1"),
            "https://prod.us-east-1.auth.desktop.kiro.dev/refreshToken"
        );
        assert_eq!(kiro_api_host("eu-west-1"), "https://q.eu-west-1.amazonaws.com");
        assert_eq!(
            aws_sso_oidc_url("us-east-1"),
            "https://oidc.us-east-1.amazonaws.com/token"
        );
    }
}
