//! OpenAI-style `chat/completions` request/response translation.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::message::{Content, Message, Role, ToolCall, ToolDefinition, ToolResult, sanitize_tools};
use crate::model_map::map_model;
use crate::{StopReason, UpstreamDelta, Usage};

#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<OpenAiMessage>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub tools: Option<Vec<OpenAiTool>>,
    #[serde(default)]
    pub tool_choice: Option<serde_json::Value>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<serde_json::Value>,
    #[serde(default)]
    pub tool_calls: Option<Vec<OpenAiToolCall>>,
    #[serde(default)]
    pub tool_call_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OpenAiToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub function: OpenAiFunctionCall,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OpenAiFunctionCall {
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiTool {
    #[serde(rename = "type")]
    pub kind: String,
    pub function: OpenAiFunctionDef,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiFunctionDef {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "parameters")]
    pub parameters: serde_json::Value,
}

/// Decoded request, ready for the Normalizer: canonical messages, sanitized
/// tools, the upstream model name, and a flag noting an unmapped alias.
pub struct Translated {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub upstream_model: String,
    pub unknown_model_alias: bool,
    pub system_prefix_note: Option<String>,
    pub stream: bool,
}

pub fn translate_in(req: ChatCompletionRequest) -> Translated {
    let mapped = map_model(&req.model);
    let messages = req.messages.into_iter().map(from_openai_message).collect();

    let mut tools = sanitize_tools(
        req.tools
            .unwrap_or_default()
            .into_iter()
            .map(|t| ToolDefinition {
                name: t.function.name,
                description: t.function.description,
                input_schema: t.function.parameters,
            })
            .collect(),
    );
    // `web_search` is upstream-native; don't collapse it into a user-defined tool.
    tools.retain(|t| t.name != "web_search");

    let system_prefix_note = tool_choice_note(req.tool_choice.as_ref());

    Translated {
        messages,
        tools,
        upstream_model: mapped.upstream_model,
        unknown_model_alias: mapped.unknown_alias,
        system_prefix_note,
        stream: req.stream,
    }
}

fn tool_choice_note(tool_choice: Option<&serde_json::Value>) -> Option<String> {
    match tool_choice.and_then(|v| v.as_str()) {
        Some("required") | Some("any") => {
            Some("You must call one of the available tools to respond.".to_string())
        }
        _ => None,
    }
}

fn from_openai_message(m: OpenAiMessage) -> Message {
    let role = match m.role.as_str() {
        "system" => Role::System,
        "assistant" => Role::Assistant,
        "tool" => Role::Tool,
        _ => Role::User,
    };

    let mut content = Vec::new();
    if let Some(v) = &m.content {
        if let Some(s) = v.as_str() {
            if !s.is_empty() {
                content.push(Content::Text(s.to_string()));
            }
        } else if let Some(parts) = v.as_array() {
            for part in parts {
                if part.get("type").and_then(|t| t.as_str()) == Some("image_url") {
                    if let Some(url) = part.pointer("/image_url/url").and_then(|u| u.as_str()) {
                        content.push(Content::ImageRef(url.to_string()));
                    }
                } else if let Some(text) = part.get("text").and_then(|t| t.as_str()) {
                    content.push(Content::Text(text.to_string()));
                }
            }
        }
    }

    if role == Role::Tool {
        content.push(Content::ToolResult(ToolResult {
            tool_call_id: m.tool_call_id.clone().unwrap_or_default(),
            content: content_to_text(&content),
            is_error: false,
        }));
    }

    if let Some(calls) = m.tool_calls {
        for c in calls {
            let arguments = serde_json::from_str(&c.function.arguments)
                .unwrap_or(serde_json::Value::Null);
            content.push(Content::ToolUse(ToolCall {
                id: c.id,
                name: c.function.name,
                arguments,
            }));
        }
    }

    Message {
        role,
        content,
        tool_call_id: m.tool_call_id,
    }
}

fn content_to_text(content: &[Content]) -> String {
    content
        .iter()
        .filter_map(|c| match c {
            Content::Text(t) => Some(t.clone()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("")
}

/// Build a non-streaming `chat.completion` response from the final
/// assembled upstream text.
pub fn translate_out(
    model_requested: &str,
    text: &str,
    stop_reason: Option<StopReason>,
    usage: Option<Usage>,
) -> serde_json::Value {
    json!({
        "id": format!("chatcmpl-{}", uuid::Uuid::new_v4().simple()),
        "object": "chat.completion",
        "model": model_requested,
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": text },
            "finish_reason": finish_reason(stop_reason),
        }],
        "usage": usage.map(openai_usage).unwrap_or(json!({})),
    })
}

fn finish_reason(stop: Option<StopReason>) -> &'static str {
    match stop {
        Some(StopReason::ToolUse) => "tool_calls",
        Some(StopReason::MaxTokens) => "length",
        Some(StopReason::StopSequence) => "stop",
        _ => "stop",
    }
}

fn openai_usage(u: Usage) -> serde_json::Value {
    json!({
        "prompt_tokens": u.input_tokens,
        "completion_tokens": u.output_tokens,
        "total_tokens": u.input_tokens + u.output_tokens,
    })
}

/// One `data: {chat.completion.chunk}\n\n` SSE frame for a single upstream delta.
pub fn stream_chunk(model_requested: &str, delta: &UpstreamDelta, chunk_id: &str) -> String {
    let body = json!({
        "id": chunk_id,
        "object": "chat.completion.chunk",
        "model": model_requested,
        "choices": [{
            "index": 0,
            "delta": { "content": delta.text },
            "finish_reason": delta.stop_reason.map(finish_reason),
        }],
    });
    format!("data: {body}\n\n")
}

/// Terminal frame closing an OpenAI SSE stream.
pub fn stream_done() -> &'static str {
    "data: [DONE]\n\n"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_model_and_flags_unknown() {
        let req = ChatCompletionRequest {
            model: "not-real".to_string(),
            messages: vec![],
            stream: false,
            tools: None,
            tool_choice: None,
            max_tokens: None,
            temperature: None,
        };
        let t = translate_in(req);
        assert!(t.unknown_model_alias);
        assert_eq!(t.upstream_model, crate::model_map::DEFAULT_MODEL);
    }

    #[test]
    fn tool_choice_required_with_zero_tools_still_injects_note() {
        let req = ChatCompletionRequest {
            model: "gpt-4o".to_string(),
            messages: vec![],
            stream: false,
            tools: None,
            tool_choice: Some(serde_json::json!("required")),
            max_tokens: None,
            temperature: None,
        };
        let t = translate_in(req);
        assert!(t.tools.is_empty());
        assert!(t.system_prefix_note.is_some());
    }

    #[test]
    fn web_search_tool_is_not_collapsed_as_user_defined() {
        let req = ChatCompletionRequest {
            model: "gpt-4o".to_string(),
            messages: vec![],
            stream: false,
            tools: Some(vec![OpenAiTool {
                kind: "function".to_string(),
                function: OpenAiFunctionDef {
                    name: "web_search".to_string(),
                    description: "search the web".to_string(),
                    parameters: serde_json::json!({}),
                },
            }]),
            tool_choice: None,
            max_tokens: None,
            temperature: None,
        };
        let t = translate_in(req);
        assert!(t.tools.is_empty());
    }

    #[test]
    fn translate_out_roundtrips_text_and_model() {
        let out = translate_out("gpt-4o", "hello back", Some(StopReason::EndTurn), None);
        assert_eq!(out["model"], "gpt-4o");
        assert_eq!(out["choices"][0]["message"]["content"], "hello back");
        assert_eq!(out["choices"][0]["finish_reason"], "stop");
    }
}
