//! Builds the Kiro `generateAssistantResponse` request body from the
//! canonical conversation shape. The three protocol translators each
//! produce `(messages, tools, upstream_model)`; this is the one place that
//! turns that triple into what `kiro-client` actually posts.

use serde_json::json;

use crate::message::{Content, Message, Role, ToolDefinition};

pub fn build_body(upstream_model: &str, messages: &[Message], tools: &[ToolDefinition], stream: bool) -> serde_json::Value {
    json!({
        "model": upstream_model,
        "stream": stream,
        "messages": messages.iter().map(wire_message).collect::<Vec<_>>(),
        "tools": tools.iter().map(wire_tool).collect::<Vec<_>>(),
    })
}

fn wire_message(m: &Message) -> serde_json::Value {
    json!({
        "role": wire_role(m.role),
        "content": m.content.iter().map(wire_content).collect::<Vec<_>>(),
    })
}

fn wire_role(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn wire_content(c: &Content) -> serde_json::Value {
    match c {
        Content::Text(t) => json!({ "type": "text", "text": t }),
        Content::ImageRef(url) => json!({ "type": "image_ref", "url": url }),
        Content::ToolUse(call) => json!({
            "type": "tool_use",
            "id": call.id,
            "name": call.name,
            "input": call.arguments,
        }),
        Content::ToolResult(result) => json!({
            "type": "tool_result",
            "tool_call_id": result.tool_call_id,
            "content": result.content,
            "is_error": result.is_error,
        }),
    }
}

fn wire_tool(t: &ToolDefinition) -> serde_json::Value {
    json!({
        "name": t.name,
        "description": t.description,
        "input_schema": t.input_schema,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_role_and_text_content() {
        let messages = vec![Message::user_text("hi")];
        let body = build_body("claude-sonnet-4", &messages, &[], false);
        assert_eq!(body["model"], "claude-sonnet-4");
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"][0]["text"], "hi");
    }

    #[test]
    fn carries_stream_flag() {
        let body = build_body("auto", &[], &[], true);
        assert_eq!(body["stream"], true);
    }

    #[test]
    fn includes_tool_definitions() {
        let tools = vec![ToolDefinition {
            name: "lookup".into(),
            description: "look things up".into(),
            input_schema: json!({"type": "object"}),
        }];
        let body = build_body("auto", &[], &tools, false);
        assert_eq!(body["tools"][0]["name"], "lookup");
    }
}
