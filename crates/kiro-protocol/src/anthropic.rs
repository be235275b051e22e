//! Anthropic-style `messages` request/response translation.

use serde::Deserialize;
use serde_json::json;

use crate::message::{Content, Message, Role, ToolCall, ToolDefinition, ToolResult, sanitize_tools};
use crate::model_map::map_model;
use crate::{StopReason, UpstreamDelta, Usage};

#[derive(Debug, Clone, Deserialize)]
pub struct MessagesRequest {
    pub model: String,
    pub messages: Vec<AnthropicMessage>,
    #[serde(default)]
    pub system: Option<serde_json::Value>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub tools: Option<Vec<AnthropicTool>>,
    #[serde(default)]
    pub tool_choice: Option<serde_json::Value>,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnthropicMessage {
    pub role: String,
    pub content: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnthropicTool {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "input_schema")]
    pub input_schema: serde_json::Value,
}

pub struct Translated {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub upstream_model: String,
    pub unknown_model_alias: bool,
    pub system_prefix_note: Option<String>,
    pub stream: bool,
}

pub fn translate_in(req: MessagesRequest) -> Translated {
    let mapped = map_model(&req.model);

    let mut messages: Vec<Message> = Vec::with_capacity(req.messages.len() + 1);
    if let Some(system) = &req.system {
        if let Some(text) = system_text(system) {
            messages.push(Message {
                role: Role::System,
                content: vec![Content::Text(text)],
                tool_call_id: None,
            });
        }
    }
    messages.extend(req.messages.into_iter().map(from_anthropic_message));

    let mut tools = sanitize_tools(
        req.tools
            .unwrap_or_default()
            .into_iter()
            .map(|t| ToolDefinition {
                name: t.name,
                description: t.description,
                input_schema: t.input_schema,
            })
            .collect(),
    );
    tools.retain(|t| t.name != "web_search");

    let system_prefix_note = match req.tool_choice.as_ref().and_then(|v| v.get("type")).and_then(|t| t.as_str()) {
        Some("any") => Some("You must call one of the available tools to respond.".to_string()),
        _ => None,
    };

    Translated {
        messages,
        tools,
        upstream_model: mapped.upstream_model,
        unknown_model_alias: mapped.unknown_alias,
        system_prefix_note,
        stream: req.stream,
    }
}

fn system_text(v: &serde_json::Value) -> Option<String> {
    if let Some(s) = v.as_str() {
        return Some(s.to_string());
    }
    v.as_array().map(|blocks| {
        blocks
            .iter()
            .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
            .collect::<Vec<_>>()
            .join("\n")
    })
}

fn from_anthropic_message(m: AnthropicMessage) -> Message {
    let role = if m.role == "assistant" {
        Role::Assistant
    } else {
        Role::User
    };

    let mut content = Vec::new();
    let mut tool_call_id = None;

    if let Some(text) = m.content.as_str() {
        content.push(Content::Text(text.to_string()));
    } else if let Some(blocks) = m.content.as_array() {
        for block in blocks {
            match block.get("type").and_then(|t| t.as_str()) {
                Some("text") => {
                    if let Some(t) = block.get("text").and_then(|t| t.as_str()) {
                        content.push(Content::Text(t.to_string()));
                    }
                }
                Some("tool_use") => {
                    content.push(Content::ToolUse(ToolCall {
                        id: block.get("id").and_then(|i| i.as_str()).unwrap_or_default().to_string(),
                        name: block.get("name").and_then(|n| n.as_str()).unwrap_or_default().to_string(),
                        arguments: block.get("input").cloned().unwrap_or(serde_json::Value::Null),
                    }));
                }
                Some("tool_result") => {
                    let id = block
                        .get("tool_use_id")
                        .and_then(|i| i.as_str())
                        .unwrap_or_default()
                        .to_string();
                    let text = match block.get("content") {
                        Some(v) if v.is_string() => v.as_str().unwrap().to_string(),
                        Some(v) => v.to_string(),
                        None => String::new(),
                    };
                    tool_call_id = Some(id.clone());
                    content.push(Content::ToolResult(ToolResult {
                        tool_call_id: id,
                        content: text,
                        is_error: block
                            .get("is_error")
                            .and_then(|e| e.as_bool())
                            .unwrap_or(false),
                    }));
                }
                Some("image") => {
                    if let Some(src) = block.get("source").and_then(|s| s.get("data")).and_then(|d| d.as_str()) {
                        content.push(Content::ImageRef(src.to_string()));
                    }
                }
                _ => {}
            }
        }
    }

    Message {
        role,
        content,
        tool_call_id,
    }
}

/// Build a non-streaming Anthropic `Message` response.
pub fn translate_out(
    model_requested: &str,
    text: &str,
    stop_reason: Option<StopReason>,
    usage: Option<Usage>,
) -> serde_json::Value {
    json!({
        "id": format!("msg_{}", uuid::Uuid::new_v4().simple()),
        "type": "message",
        "role": "assistant",
        "model": model_requested,
        "content": [{ "type": "text", "text": text }],
        "stop_reason": anthropic_stop_reason(stop_reason),
        "usage": usage.map(anthropic_usage).unwrap_or(json!({"input_tokens": 0, "output_tokens": 0})),
    })
}

fn anthropic_stop_reason(stop: Option<StopReason>) -> &'static str {
    match stop {
        Some(StopReason::ToolUse) => "tool_use",
        Some(StopReason::MaxTokens) => "max_tokens",
        Some(StopReason::StopSequence) => "stop_sequence",
        _ => "end_turn",
    }
}

fn anthropic_usage(u: Usage) -> serde_json::Value {
    json!({ "input_tokens": u.input_tokens, "output_tokens": u.output_tokens })
}

/// Emit the typed Anthropic SSE event sequence for one upstream delta.
/// `index` tracks whether this is the first delta (emits `message_start` +
/// `content_block_start`) or a continuation (`content_block_delta`).
pub fn stream_events(model_requested: &str, delta: &UpstreamDelta, is_first: bool, message_id: &str) -> Vec<String> {
    let mut events = Vec::new();

    if is_first {
        events.push(sse_event(
            "message_start",
            &json!({
                "type": "message_start",
                "message": {
                    "id": message_id,
                    "type": "message",
                    "role": "assistant",
                    "model": model_requested,
                    "content": [],
                }
            }),
        ));
        events.push(sse_event(
            "content_block_start",
            &json!({ "type": "content_block_start", "index": 0, "content_block": { "type": "text", "text": "" } }),
        ));
    }

    if !delta.text.is_empty() {
        events.push(sse_event(
            "content_block_delta",
            &json!({ "type": "content_block_delta", "index": 0, "delta": { "type": "text_delta", "text": delta.text } }),
        ));
    }

    if let Some(stop) = delta.stop_reason {
        events.push(sse_event(
            "content_block_stop",
            &json!({ "type": "content_block_stop", "index": 0 }),
        ));
        events.push(sse_event(
            "message_delta",
            &json!({ "type": "message_delta", "delta": { "stop_reason": anthropic_stop_reason(Some(stop)) } }),
        ));
        events.push(sse_event("message_stop", &json!({ "type": "message_stop" })));
    }

    events
}

fn sse_event(event: &str, data: &serde_json::Value) -> String {
    format!("event: {event}\ndata: {data}\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_result_content_block_maps_to_tool_call_id() {
        let req = MessagesRequest {
            model: "claude-sonnet-4".to_string(),
            messages: vec![AnthropicMessage {
                role: "user".to_string(),
                content: json!([{ "type": "tool_result", "tool_use_id": "abc", "content": "42" }]),
            }],
            system: None,
            stream: false,
            tools: None,
            tool_choice: None,
            max_tokens: 256,
        };
        let t = translate_in(req);
        assert_eq!(t.messages[0].tool_call_id.as_deref(), Some("abc"));
    }

    #[test]
    fn stream_events_first_delta_opens_message_and_block() {
        let delta = UpstreamDelta { text: "hi".to_string(), ..Default::default() };
        let events = stream_events("claude-sonnet-4", &delta, true, "msg_1");
        assert!(events[0].contains("message_start"));
        assert!(events[1].contains("content_block_start"));
        assert!(events[2].contains("content_block_delta"));
    }

    #[test]
    fn stream_events_terminal_delta_closes_stream() {
        let delta = UpstreamDelta {
            text: String::new(),
            stop_reason: Some(StopReason::EndTurn),
            ..Default::default()
        };
        let events = stream_events("claude-sonnet-4", &delta, false, "msg_1");
        assert!(events.iter().any(|e| e.contains("message_stop")));
    }
}
