//! Client-facing protocol surface: `/v1/chat/completions` (OpenAI),
//! `/v1/messages` + `/v1/messages/count_tokens` (Anthropic), `/v1/models`,
//! and `/v1/models/{model}:generateContent` (Gemini).
//!
//! Each handler decodes into its protocol's request type, normalizes,
//! drives the Orchestrator, and re-encodes the result in the caller's own
//! protocol — callers never see Kiro's wire format.

use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::StreamExt;
use kiro_protocol::{anthropic, gemini, normalize, openai};
use uuid::Uuid;

use crate::error::Error;
use crate::flow::{FlowLog, FlowRecord};
use crate::orchestrator::{DriveResult, Orchestrator};

#[derive(Clone)]
pub struct HttpState {
    pub orchestrator: Arc<Orchestrator>,
    pub flow_log: Arc<FlowLog>,
}

fn error_body(protocol: &str, err: &Error) -> serde_json::Value {
    match protocol {
        "anthropic" => serde_json::json!({
            "type": "error",
            "error": { "type": err.kind(), "message": err.to_string() },
        }),
        "gemini" => serde_json::json!({
            "error": { "code": err.status().as_u16(), "status": err.kind(), "message": err.to_string() },
        }),
        _ => serde_json::json!({
            "error": { "type": err.kind(), "message": err.to_string(), "code": err.kind() },
        }),
    }
}

fn error_response(protocol: &str, err: Error) -> Response {
    let status = err.status();
    let body = error_body(protocol, &err);
    (status, Json(body)).into_response()
}

fn session_id_of(headers: &axum::http::HeaderMap) -> Option<String> {
    headers
        .get("x-session-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

pub async fn chat_completions(
    State(state): State<HttpState>,
    headers: axum::http::HeaderMap,
    Json(req): Json<openai::ChatCompletionRequest>,
) -> Response {
    let started = Instant::now();
    let session_id = session_id_of(&headers);
    let stream = req.stream;
    let requested_model = req.model.clone();
    let translated = openai::translate_in(req);
    let mut messages = normalize::normalize(translated.messages);
    if let Some(note) = &translated.system_prefix_note {
        messages.insert(0, kiro_protocol::Message::user_text(note.clone()));
    }

    if stream {
        return stream_openai(state, session_id, messages, translated.tools, translated.upstream_model, requested_model, started).await;
    }

    match state
        .orchestrator
        .drive(session_id.as_deref(), messages, &translated.tools, &translated.upstream_model)
        .await
    {
        DriveResult::Ok(assembled, account_id) => {
            let body = openai::translate_out(&requested_model, &assembled.text, Some(assembled.stop_reason), Some(assembled.usage));
            record(&state, "openai", 200, started, Some(account_id), &translated.upstream_model, None);
            (StatusCode::OK, Json(body)).into_response()
        }
        DriveResult::Error(e) => {
            let kind = e.kind();
            record(&state, "openai", e.status().as_u16(), started, None, &translated.upstream_model, Some(kind));
            error_response("openai", e)
        }
    }
}

async fn stream_openai(
    state: HttpState,
    session_id: Option<String>,
    messages: Vec<kiro_protocol::Message>,
    tools: Vec<kiro_protocol::ToolDefinition>,
    upstream_model: String,
    requested_model: String,
    started: Instant,
) -> Response {
    let chunk_id = format!("chatcmpl-{}", Uuid::new_v4().simple());
    match state
        .orchestrator
        .drive_streaming(session_id.as_deref(), messages, &tools, &upstream_model)
        .await
    {
        Ok((deltas, account_id)) => {
            record(&state, "openai", 200, started, Some(account_id.clone()), &upstream_model, None);
            let store = state.orchestrator.store.clone();
            let body_stream = deltas.map(move |item| {
                let frame = match item {
                    Ok(delta) => openai::stream_chunk(&requested_model, &delta, &chunk_id),
                    Err(_) => openai::stream_done().to_string(),
                };
                Ok::<_, std::io::Error>(axum::body::Bytes::from(frame))
            })
            .chain(futures_util::stream::once({
                let store = store.clone();
                let account_id = account_id.clone();
                async move {
                    store.record_call_finished(&account_id, false).await;
                    Ok(axum::body::Bytes::from(openai::stream_done()))
                }
            }));
            Response::builder()
                .status(StatusCode::OK)
                .header("content-type", "text/event-stream")
                .body(Body::from_stream(body_stream))
                .unwrap()
        }
        Err(e) => {
            let kind = e.kind();
            record(&state, "openai", e.status().as_u16(), started, None, &upstream_model, Some(kind));
            error_response("openai", e)
        }
    }
}

pub async fn list_models() -> Response {
    let models = [
        "claude-sonnet-4", "claude-sonnet-4.5", "claude-haiku-4.5", "claude-opus-4.5", "auto",
    ];
    let body = serde_json::json!({
        "object": "list",
        "data": models.iter().map(|m| serde_json::json!({
            "id": m, "object": "model", "owned_by": "kiro",
        })).collect::<Vec<_>>(),
    });
    (StatusCode::OK, Json(body)).into_response()
}

pub async fn messages(
    State(state): State<HttpState>,
    headers: axum::http::HeaderMap,
    Json(req): Json<anthropic::MessagesRequest>,
) -> Response {
    let started = Instant::now();
    let session_id = session_id_of(&headers);
    let stream = req.stream;
    let requested_model = req.model.clone();
    let translated = anthropic::translate_in(req);
    let mut messages = normalize::normalize(translated.messages);
    if let Some(note) = &translated.system_prefix_note {
        messages.insert(0, kiro_protocol::Message::user_text(note.clone()));
    }

    if stream {
        return stream_anthropic(state, session_id, messages, translated.tools, translated.upstream_model, requested_model, started).await;
    }

    match state
        .orchestrator
        .drive(session_id.as_deref(), messages, &translated.tools, &translated.upstream_model)
        .await
    {
        DriveResult::Ok(assembled, account_id) => {
            let body = anthropic::translate_out(&requested_model, &assembled.text, Some(assembled.stop_reason), Some(assembled.usage));
            record(&state, "anthropic", 200, started, Some(account_id), &translated.upstream_model, None);
            (StatusCode::OK, Json(body)).into_response()
        }
        DriveResult::Error(e) => {
            let kind = e.kind();
            record(&state, "anthropic", e.status().as_u16(), started, None, &translated.upstream_model, Some(kind));
            error_response("anthropic", e)
        }
    }
}

async fn stream_anthropic(
    state: HttpState,
    session_id: Option<String>,
    messages: Vec<kiro_protocol::Message>,
    tools: Vec<kiro_protocol::ToolDefinition>,
    upstream_model: String,
    requested_model: String,
    started: Instant,
) -> Response {
    let message_id = format!("msg_{}", Uuid::new_v4().simple());
    match state
        .orchestrator
        .drive_streaming(session_id.as_deref(), messages, &tools, &upstream_model)
        .await
    {
        Ok((mut deltas, account_id)) => {
            record(&state, "anthropic", 200, started, Some(account_id.clone()), &upstream_model, None);
            let store = state.orchestrator.store.clone();
            let mut first = true;
            let body_stream = async_stream::stream! {
                while let Some(item) = deltas.next().await {
                    match item {
                        Ok(delta) => {
                            for event in anthropic::stream_events(&requested_model, &delta, first, &message_id) {
                                first = false;
                                yield Ok::<_, std::io::Error>(axum::body::Bytes::from(event));
                            }
                        }
                        Err(_) => break,
                    }
                }
                store.record_call_finished(&account_id, false).await;
            };
            Response::builder()
                .status(StatusCode::OK)
                .header("content-type", "text/event-stream")
                .body(Body::from_stream(body_stream))
                .unwrap()
        }
        Err(e) => {
            let kind = e.kind();
            record(&state, "anthropic", e.status().as_u16(), started, None, &upstream_model, Some(kind));
            error_response("anthropic", e)
        }
    }
}

/// `/v1/messages/count_tokens`: applies the same approximation the Governor
/// uses internally, not a real upstream tokenizer call.
pub async fn count_tokens(Json(req): Json<anthropic::MessagesRequest>) -> Response {
    let translated = anthropic::translate_in(req);
    let messages = normalize::normalize(translated.messages);
    let tokens = kiro_governor::approx_tokens(&messages);
    (StatusCode::OK, Json(serde_json::json!({ "input_tokens": tokens }))).into_response()
}

pub async fn generate_content(
    State(state): State<HttpState>,
    Path(model_and_method): Path<String>,
    headers: axum::http::HeaderMap,
    Json(mut req): Json<gemini::GenerateContentRequest>,
) -> Response {
    let started = Instant::now();
    let session_id = session_id_of(&headers);
    let (model, method) = split_model_method(&model_and_method);
    req.model = model.clone();
    let stream = method == "streamGenerateContent";

    let translated = gemini::translate_in(req);
    let messages = normalize::normalize(translated.messages);

    if stream {
        return stream_gemini(state, session_id, messages, translated.tools, translated.upstream_model, started).await;
    }

    match state
        .orchestrator
        .drive(session_id.as_deref(), messages, &translated.tools, &translated.upstream_model)
        .await
    {
        DriveResult::Ok(assembled, account_id) => {
            let body = gemini::translate_out(&assembled.text, Some(assembled.stop_reason), Some(assembled.usage));
            record(&state, "gemini", 200, started, Some(account_id), &translated.upstream_model, None);
            (StatusCode::OK, Json(body)).into_response()
        }
        DriveResult::Error(e) => {
            let kind = e.kind();
            record(&state, "gemini", e.status().as_u16(), started, None, &translated.upstream_model, Some(kind));
            error_response("gemini", e)
        }
    }
}

async fn stream_gemini(
    state: HttpState,
    session_id: Option<String>,
    messages: Vec<kiro_protocol::Message>,
    tools: Vec<kiro_protocol::ToolDefinition>,
    upstream_model: String,
    started: Instant,
) -> Response {
    match state
        .orchestrator
        .drive_streaming(session_id.as_deref(), messages, &tools, &upstream_model)
        .await
    {
        Ok((mut deltas, account_id)) => {
            record(&state, "gemini", 200, started, Some(account_id.clone()), &upstream_model, None);
            let store = state.orchestrator.store.clone();
            let body_stream = async_stream::stream! {
                yield Ok::<_, std::io::Error>(axum::body::Bytes::from_static(b"["));
                let mut wrote_any = false;
                while let Some(item) = deltas.next().await {
                    let Ok(delta) = item else { break };
                    if wrote_any {
                        yield Ok(axum::body::Bytes::from_static(b","));
                    }
                    wrote_any = true;
                    yield Ok(axum::body::Bytes::from(gemini::stream_partial(&delta).to_string()));
                }
                yield Ok(axum::body::Bytes::from_static(b"]"));
                store.record_call_finished(&account_id, false).await;
            };
            Response::builder()
                .status(StatusCode::OK)
                .header("content-type", "application/json")
                .body(Body::from_stream(body_stream))
                .unwrap()
        }
        Err(e) => {
            let kind = e.kind();
            record(&state, "gemini", e.status().as_u16(), started, None, &upstream_model, Some(kind));
            error_response("gemini", e)
        }
    }
}

/// Split `{model}:generateContent` / `{model}:streamGenerateContent`.
fn split_model_method(segment: &str) -> (String, String) {
    match segment.split_once(':') {
        Some((model, method)) => (model.to_string(), method.to_string()),
        None => (segment.to_string(), "generateContent".to_string()),
    }
}

fn record(
    state: &HttpState,
    protocol: &str,
    status: u16,
    started: Instant,
    account_id: Option<String>,
    upstream_model: &str,
    error_kind: Option<&str>,
) {
    crate::metrics::record_request(protocol, status, started.elapsed().as_secs_f64());
    let flow_log = state.flow_log.clone();
    let record = FlowRecord {
        id: Uuid::new_v4().to_string(),
        protocol: protocol.to_string(),
        account_id,
        upstream_model: upstream_model.to_string(),
        status,
        error_kind: error_kind.map(|k| k.to_string()),
        duration_ms: started.elapsed().as_millis() as u64,
        recorded_at_ms: kiro_auth::account::now_ms(),
    };
    tokio::spawn(async move { flow_log.push(record).await });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_model_method_defaults_to_generate_content() {
        assert_eq!(split_model_method("claude-sonnet-4"), ("claude-sonnet-4".to_string(), "generateContent".to_string()));
    }

    #[test]
    fn split_model_method_parses_stream_variant() {
        assert_eq!(
            split_model_method("claude-sonnet-4:streamGenerateContent"),
            ("claude-sonnet-4".to_string(), "streamGenerateContent".to_string())
        );
    }

    #[test]
    fn error_body_shapes_differ_per_protocol() {
        let err = Error::RateLimitedAllAccounts;
        let openai_body = error_body("openai", &err);
        let anthropic_body = error_body("anthropic", &err);
        let gemini_body = error_body("gemini", &err);
        assert!(openai_body["error"]["type"].is_string());
        assert_eq!(anthropic_body["type"], "error");
        assert!(gemini_body["error"]["code"].is_number());
    }
}
