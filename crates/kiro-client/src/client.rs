//! The Upstream Client: the single boundary between this gateway and the
//! real Kiro `generateAssistantResponse` endpoint.
//!
//! Non-streaming calls collect the full SSE body and assemble it into one
//! response; streaming calls forward each parsed event as it arrives so the
//! Governor/Translator pipeline can react to it incrementally.

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use kiro_auth::Account;
use kiro_protocol::{StopReason, Usage};
use serde::Deserialize;
use std::pin::Pin;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{Error, ErrorCategory, Result};
use crate::fingerprint::machine_fingerprint;

const KIRO_API_HOST_TEMPLATE: &str = "https://q.{region}.amazonaws.com";
const API_ORIGIN: &str = "AI_EDITOR";
const KIRO_IDE_VERSION: &str = "0.7.45";
const SDK_VERSION: &str = "1.0.27";
const LENGTH_EXCEEDED_CODE: &str = "CONTENT_LENGTH_EXCEEDS_THRESHOLD";

fn kiro_api_host(region: &str) -> String {
    KIRO_API_HOST_TEMPLATE.replace("{region}", region)
}

fn generate_assistant_response_url(region: &str, profile_arn: Option<&str>) -> String {
    let host = kiro_api_host(region);
    match profile_arn {
        Some(arn) => format!(
            "{host}/generateAssistantResponse?origin={API_ORIGIN}&profileArn={}",
            urlencoding_encode(arn)
        ),
        None => format!("{host}/generateAssistantResponse?origin={API_ORIGIN}"),
    }
}

/// Minimal RFC 3986 percent-encoding, enough for the one query value we send.
fn urlencoding_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

fn kiro_headers(access_token: &str) -> reqwest::header::HeaderMap {
    use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

    let fingerprint = machine_fingerprint();
    let mut headers = HeaderMap::new();
    headers.insert(
        reqwest::header::AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {access_token}")).expect("token is ASCII"),
    );
    headers.insert(
        reqwest::header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );

    let ua = format!(
        "aws-sdk-js/{SDK_VERSION} ua/2.1 os/linux lang/js md/nodejs#22.21.1 \
         api/codewhispererstreaming#{SDK_VERSION} m/E KiroIDE-{KIRO_IDE_VERSION}-{fingerprint}"
    );
    headers.insert(
        reqwest::header::USER_AGENT,
        HeaderValue::from_str(&ua).expect("user-agent is ASCII"),
    );
    headers.insert(
        HeaderName::from_static("x-amz-user-agent"),
        HeaderValue::from_str(&format!("aws-sdk-js/{SDK_VERSION} KiroIDE-{KIRO_IDE_VERSION}-{fingerprint}"))
            .expect("header is ASCII"),
    );
    headers.insert(
        HeaderName::from_static("x-amzn-codewhisperer-optout"),
        HeaderValue::from_static("true"),
    );
    headers.insert(
        HeaderName::from_static("x-amzn-kiro-agent-mode"),
        HeaderValue::from_static("vibe"),
    );
    headers.insert(
        HeaderName::from_static("amz-sdk-invocation-id"),
        HeaderValue::from_str(&Uuid::new_v4().to_string()).expect("uuid is ASCII"),
    );
    headers.insert(
        HeaderName::from_static("amz-sdk-request"),
        HeaderValue::from_static("attempt=1; max=3"),
    );
    headers
}

/// One decoded event from the Kiro assistant-response stream.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum KiroEvent {
    Text { content: String },
    ToolUse { id: String, name: String, input: serde_json::Value },
    Stop { reason: String },
    Usage { input_tokens: u64, output_tokens: u64 },
    Error { code: String, message: String },
}

/// One fully assembled non-streaming response.
#[derive(Debug, Clone, Default)]
pub struct AssembledResponse {
    pub text: String,
    pub tool_calls: Vec<kiro_protocol::ToolCall>,
    pub stop_reason: StopReason,
    pub usage: Usage,
}

pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<kiro_protocol::UpstreamDelta>> + Send>>;

pub struct UpstreamClient {
    http: reqwest::Client,
}

impl UpstreamClient {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// Call `generateAssistantResponse` and assemble the full response.
    /// Records in-flight/last-used bookkeeping is the caller's job (the
    /// Account Selector wraps this call).
    pub async fn call(&self, account: &Account, body: &serde_json::Value) -> Result<AssembledResponse> {
        let events = self.request_events(account, body, false).await?;
        let mut assembled = AssembledResponse::default();
        for event in events {
            apply_event(&mut assembled, event)?;
        }
        Ok(assembled)
    }

    /// Call `generateAssistantResponse` in streaming mode, yielding each
    /// delta as it is parsed off the wire.
    pub async fn call_streaming(&self, account: &Account, body: &serde_json::Value) -> Result<DeltaStream> {
        let url = generate_assistant_response_url(&account.credential.region, account.credential.profile_arn.as_deref());
        let mut headers = kiro_headers(&account.credential.access_token);
        headers.insert(reqwest::header::CONNECTION, "close".parse().unwrap());

        let resp = self
            .http
            .post(&url)
            .headers(headers)
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;

        let resp = check_status(resp).await?;
        let byte_stream = resp.bytes_stream();
        let event_stream = sse_events(byte_stream).map(|line| {
            let event: KiroEvent = serde_json::from_str(&line)
                .map_err(|e| Error::Parse(format!("invalid kiro event: {e}")))?;
            event_to_delta(event)
        });
        Ok(Box::pin(event_stream))
    }

    async fn request_events(
        &self,
        account: &Account,
        body: &serde_json::Value,
        streaming: bool,
    ) -> Result<Vec<KiroEvent>> {
        let url = generate_assistant_response_url(&account.credential.region, account.credential.profile_arn.as_deref());
        let mut headers = kiro_headers(&account.credential.access_token);
        if streaming {
            headers.insert(reqwest::header::CONNECTION, "close".parse().unwrap());
        }

        let resp = self
            .http
            .post(&url)
            .headers(headers)
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;

        let resp = check_status(resp).await?;
        let full = resp.text().await.map_err(transport_error)?;

        full.lines()
            .filter_map(|line| line.trim().strip_prefix("data: "))
            .filter(|data| *data != "[DONE]")
            .map(|data| {
                serde_json::from_str(data).map_err(|e| Error::Parse(format!("invalid kiro event: {e}")))
            })
            .collect()
    }
}

fn sse_events(
    byte_stream: impl Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
) -> impl Stream<Item = String> + Send {
    byte_stream
        .filter_map(|chunk| async move { chunk.ok() })
        .flat_map(|bytes| {
            let text = String::from_utf8_lossy(&bytes).into_owned();
            let lines: Vec<String> = text
                .lines()
                .filter_map(|line| line.trim().strip_prefix("data: "))
                .filter(|data| *data != "[DONE]")
                .map(str::to_string)
                .collect();
            futures_util::stream::iter(lines)
        })
}

fn event_to_delta(event: KiroEvent) -> Result<kiro_protocol::UpstreamDelta> {
    match event {
        KiroEvent::Text { content } => Ok(kiro_protocol::UpstreamDelta {
            text: content,
            tool_call: None,
            stop_reason: None,
            usage: None,
        }),
        KiroEvent::ToolUse { id, name, input } => Ok(kiro_protocol::UpstreamDelta {
            text: String::new(),
            tool_call: Some(kiro_protocol::ToolCall { id, name, arguments: input }),
            stop_reason: None,
            usage: None,
        }),
        KiroEvent::Stop { reason } => Ok(kiro_protocol::UpstreamDelta {
            text: String::new(),
            tool_call: None,
            stop_reason: Some(parse_stop_reason(&reason)),
            usage: None,
        }),
        KiroEvent::Usage { input_tokens, output_tokens } => Ok(kiro_protocol::UpstreamDelta {
            text: String::new(),
            tool_call: None,
            stop_reason: None,
            usage: Some(Usage { input_tokens, output_tokens }),
        }),
        KiroEvent::Error { code, message } => {
            if code == LENGTH_EXCEEDED_CODE {
                Err(Error::Upstream { category: ErrorCategory::LengthExceeded, message })
            } else {
                Err(Error::Upstream {
                    category: ErrorCategory::ClientError { status: 400 },
                    message,
                })
            }
        }
    }
}

fn apply_event(assembled: &mut AssembledResponse, event: KiroEvent) -> Result<()> {
    match event {
        KiroEvent::Text { content } => assembled.text.push_str(&content),
        KiroEvent::ToolUse { id, name, input } => {
            assembled.tool_calls.push(kiro_protocol::ToolCall { id, name, arguments: input })
        }
        KiroEvent::Stop { reason } => assembled.stop_reason = parse_stop_reason(&reason),
        KiroEvent::Usage { input_tokens, output_tokens } => {
            assembled.usage = Usage { input_tokens, output_tokens }
        }
        KiroEvent::Error { code, message } => {
            return if code == LENGTH_EXCEEDED_CODE {
                Err(Error::Upstream { category: ErrorCategory::LengthExceeded, message })
            } else {
                Err(Error::Upstream { category: ErrorCategory::ClientError { status: 400 }, message })
            };
        }
    }
    Ok(())
}

fn parse_stop_reason(reason: &str) -> StopReason {
    match reason {
        "tool_use" => StopReason::ToolUse,
        "max_tokens" => StopReason::MaxTokens,
        "stop_sequence" => StopReason::StopSequence,
        _ => StopReason::EndTurn,
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let retry_after = resp
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());

    let category = match status.as_u16() {
        429 => ErrorCategory::RateLimited { retry_after_secs: retry_after },
        401 | 403 => ErrorCategory::AuthFailed,
        500..=599 => ErrorCategory::ServerError,
        other => ErrorCategory::ClientError { status: other },
    };

    let body = resp.text().await.unwrap_or_default();
    if body.contains(LENGTH_EXCEEDED_CODE) {
        return Err(Error::Upstream { category: ErrorCategory::LengthExceeded, message: body });
    }

    debug!(status = status.as_u16(), ?category, "kiro call returned non-success status");
    Err(Error::Upstream { category, message: body })
}

fn transport_error(e: reqwest::Error) -> Error {
    warn!(error = %e, "kiro transport error");
    Error::Upstream {
        category: ErrorCategory::TransportError,
        message: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_includes_profile_arn_when_present() {
        let url = generate_assistant_response_url("us-east-1", Some("arn:aws:iam::1:role/x"));
        assert!(url.starts_with("https://q.us-east-1.amazonaws.com/generateAssistantResponse"));
        assert!(url.contains("origin=AI_EDITOR"));
        assert!(url.contains("profileArn="));
    }

    #[test]
    fn url_omits_profile_arn_when_absent() {
        let url = generate_assistant_response_url("us-east-1", None);
        assert!(!url.contains("profileArn"));
    }

    #[test]
    fn parse_stop_reason_maps_known_values() {
        assert_eq!(parse_stop_reason("tool_use"), StopReason::ToolUse);
        assert_eq!(parse_stop_reason("max_tokens"), StopReason::MaxTokens);
        assert_eq!(parse_stop_reason("anything_else"), StopReason::EndTurn);
    }

    #[test]
    fn apply_event_accumulates_text_and_tool_calls() {
        let mut assembled = AssembledResponse::default();
        apply_event(&mut assembled, KiroEvent::Text { content: "hi ".into() }).unwrap();
        apply_event(&mut assembled, KiroEvent::Text { content: "there".into() }).unwrap();
        apply_event(
            &mut assembled,
            KiroEvent::ToolUse { id: "t1".into(), name: "search".into(), input: serde_json::json!({}) },
        )
        .unwrap();
        assert_eq!(assembled.text, "hi there");
        assert_eq!(assembled.tool_calls.len(), 1);
    }

    #[test]
    fn apply_event_length_exceeded_error_is_categorized() {
        let mut assembled = AssembledResponse::default();
        let err = apply_event(
            &mut assembled,
            KiroEvent::Error {
                code: LENGTH_EXCEEDED_CODE.into(),
                message: "too long".into(),
            },
        )
        .unwrap_err();
        assert_eq!(err.category(), Some(&ErrorCategory::LengthExceeded));
    }
}
