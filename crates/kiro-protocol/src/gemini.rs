//! Gemini-style `generateContent` request/response translation.

use serde::Deserialize;
use serde_json::json;

use crate::message::{Content, Message, Role, ToolDefinition, sanitize_tools};
use crate::model_map::map_model;
use crate::{StopReason, UpstreamDelta, Usage};

#[derive(Debug, Clone, Deserialize)]
pub struct GenerateContentRequest {
    /// Model is taken from the `{model}:generateContent` path segment, not the body.
    #[serde(skip)]
    pub model: String,
    pub contents: Vec<GeminiContent>,
    #[serde(default)]
    pub system_instruction: Option<GeminiContent>,
    #[serde(default)]
    pub tools: Option<Vec<GeminiToolGroup>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeminiContent {
    #[serde(default)]
    pub role: String,
    pub parts: Vec<GeminiPart>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum GeminiPart {
    Text { text: String },
    FunctionCall { #[serde(rename = "functionCall")] function_call: GeminiFunctionCall },
    FunctionResponse { #[serde(rename = "functionResponse")] function_response: GeminiFunctionResponse },
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeminiFunctionCall {
    pub name: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeminiFunctionResponse {
    pub name: String,
    #[serde(default)]
    pub response: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeminiToolGroup {
    #[serde(default, rename = "functionDeclarations")]
    pub function_declarations: Vec<GeminiFunctionDecl>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeminiFunctionDecl {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
}

pub struct Translated {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub upstream_model: String,
    pub unknown_model_alias: bool,
}

pub fn translate_in(req: GenerateContentRequest) -> Translated {
    let mapped = map_model(&req.model);

    let mut messages = Vec::with_capacity(req.contents.len() + 1);
    if let Some(sys) = &req.system_instruction {
        let text = gemini_content_text(sys);
        if !text.is_empty() {
            messages.push(Message {
                role: Role::System,
                content: vec![Content::Text(text)],
                tool_call_id: None,
            });
        }
    }
    messages.extend(req.contents.into_iter().map(from_gemini_content));

    let mut tools = sanitize_tools(
        req.tools
            .unwrap_or_default()
            .into_iter()
            .flat_map(|g| g.function_declarations)
            .map(|f| ToolDefinition {
                name: f.name,
                description: f.description,
                input_schema: f.parameters,
            })
            .collect(),
    );
    tools.retain(|t| t.name != "web_search");

    Translated {
        messages,
        tools,
        upstream_model: mapped.upstream_model,
        unknown_model_alias: mapped.unknown_alias,
    }
}

fn gemini_content_text(c: &GeminiContent) -> String {
    c.parts
        .iter()
        .filter_map(|p| match p {
            GeminiPart::Text { text } => Some(text.clone()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn from_gemini_content(c: GeminiContent) -> Message {
    let role = if c.role == "model" { Role::Assistant } else { Role::User };
    let mut content = Vec::new();
    for part in c.parts {
        match part {
            GeminiPart::Text { text } => content.push(Content::Text(text)),
            GeminiPart::FunctionCall { function_call } => {
                content.push(Content::ToolUse(crate::message::ToolCall {
                    id: function_call.name.clone(),
                    name: function_call.name,
                    arguments: function_call.args,
                }));
            }
            GeminiPart::FunctionResponse { function_response } => {
                content.push(Content::ToolResult(crate::message::ToolResult {
                    tool_call_id: function_response.name,
                    content: function_response.response.to_string(),
                    is_error: false,
                }));
            }
        }
    }
    Message { role, content, tool_call_id: None }
}

/// Build a non-streaming `generateContent` response.
pub fn translate_out(text: &str, stop_reason: Option<StopReason>, usage: Option<Usage>) -> serde_json::Value {
    json!({
        "candidates": [{
            "content": { "role": "model", "parts": [{ "text": text }] },
            "finishReason": gemini_finish_reason(stop_reason),
            "index": 0,
        }],
        "usageMetadata": usage.map(gemini_usage).unwrap_or(json!({})),
    })
}

fn gemini_finish_reason(stop: Option<StopReason>) -> &'static str {
    match stop {
        Some(StopReason::MaxTokens) => "MAX_TOKENS",
        Some(StopReason::ToolUse) => "STOP",
        _ => "STOP",
    }
}

fn gemini_usage(u: Usage) -> serde_json::Value {
    json!({
        "promptTokenCount": u.input_tokens,
        "candidatesTokenCount": u.output_tokens,
        "totalTokenCount": u.input_tokens + u.output_tokens,
    })
}

/// One `generateContent` streamed partial, emitted as a JSON-array element.
/// The caller wraps the sequence in `[` ... `]` with comma separators — the
/// Gemini streaming wire format is a single streamed JSON array, not SSE.
pub fn stream_partial(delta: &UpstreamDelta) -> serde_json::Value {
    json!({
        "candidates": [{
            "content": { "role": "model", "parts": [{ "text": delta.text }] },
            "finishReason": delta.stop_reason.map(gemini_finish_reason),
            "index": 0,
        }]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_role_maps_to_assistant() {
        let req = GenerateContentRequest {
            model: "gemini-1.5-pro".to_string(),
            contents: vec![GeminiContent { role: "model".to_string(), parts: vec![GeminiPart::Text { text: "hi".to_string() }] }],
            system_instruction: None,
            tools: None,
        };
        let t = translate_in(req);
        assert_eq!(t.messages[0].role, Role::Assistant);
        assert_eq!(t.upstream_model, "claude-sonnet-4.5");
    }

    #[test]
    fn function_call_and_response_roundtrip_name() {
        let req = GenerateContentRequest {
            model: "auto".to_string(),
            contents: vec![
                GeminiContent {
                    role: "model".to_string(),
                    parts: vec![GeminiPart::FunctionCall {
                        function_call: GeminiFunctionCall { name: "lookup".to_string(), args: json!({"q": "x"}) },
                    }],
                },
                GeminiContent {
                    role: "user".to_string(),
                    parts: vec![GeminiPart::FunctionResponse {
                        function_response: GeminiFunctionResponse { name: "lookup".to_string(), response: json!({"r": 1}) },
                    }],
                },
            ],
            system_instruction: None,
            tools: None,
        };
        let t = translate_in(req);
        assert!(matches!(&t.messages[0].content[0], Content::ToolUse(c) if c.name == "lookup"));
        assert!(matches!(&t.messages[1].content[0], Content::ToolResult(r) if r.tool_call_id == "lookup"));
    }
}
