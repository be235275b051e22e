//! The canonical conversation shape every protocol translator converts
//! to and from. This is the gateway's internal representation, not any
//! one client protocol's wire format.

use serde::{Deserialize, Serialize};

/// Maximum tool definitions accepted per request; the rest are truncated.
pub const MAX_TOOLS: usize = 50;
/// Maximum tool description length before truncation.
pub const MAX_TOOL_DESCRIPTION_LEN: usize = 500;
/// Marker appended to a truncated tool description.
pub const TRUNCATION_MARKER: &str = "…";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone)]
pub struct Message {
    pub role: Role,
    pub content: Vec<Content>,
    /// Present on `tool` role messages: the id of the tool call this is a result for.
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![Content::Text(text.into())],
            tool_call_id: None,
        }
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: vec![Content::Text(text.into())],
            tool_call_id: None,
        }
    }

    /// Concatenation of all text parts, ignoring non-text content.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| match c {
                Content::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

#[derive(Debug, Clone)]
pub enum Content {
    Text(String),
    /// An opaque reference to image bytes/URL; passed through where the
    /// upstream supports it, dropped with a flow-record note otherwise.
    ImageRef(String),
    ToolUse(ToolCall),
    ToolResult(ToolResult),
}

#[derive(Debug, Clone)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub content: String,
    pub is_error: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

impl ToolDefinition {
    /// Truncate the description in place if it exceeds [`MAX_TOOL_DESCRIPTION_LEN`].
    pub fn truncate_description(&mut self) {
        if self.description.chars().count() > MAX_TOOL_DESCRIPTION_LEN {
            let truncated: String = self
                .description
                .chars()
                .take(MAX_TOOL_DESCRIPTION_LEN)
                .collect();
            self.description = format!("{truncated}{TRUNCATION_MARKER}");
        }
    }
}

/// Apply the §3/§4.5 tool-list invariants: truncate to [`MAX_TOOLS`] entries,
/// truncate each description to [`MAX_TOOL_DESCRIPTION_LEN`] characters.
pub fn sanitize_tools(mut tools: Vec<ToolDefinition>) -> Vec<ToolDefinition> {
    tools.truncate(MAX_TOOLS);
    for tool in &mut tools {
        tool.truncate_description();
    }
    tools
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(name: &str, desc_len: usize) -> ToolDefinition {
        ToolDefinition {
            name: name.to_string(),
            description: "x".repeat(desc_len),
            input_schema: serde_json::json!({}),
        }
    }

    #[test]
    fn tool_list_of_50_is_untouched() {
        let tools: Vec<_> = (0..50).map(|i| tool(&format!("t{i}"), 10)).collect();
        let sanitized = sanitize_tools(tools);
        assert_eq!(sanitized.len(), 50);
    }

    #[test]
    fn tool_list_of_51_is_truncated_to_50() {
        let tools: Vec<_> = (0..51).map(|i| tool(&format!("t{i}"), 10)).collect();
        let sanitized = sanitize_tools(tools);
        assert_eq!(sanitized.len(), 50);
    }

    #[test]
    fn description_of_exactly_500_is_untouched() {
        let mut t = tool("t", 500);
        t.truncate_description();
        assert_eq!(t.description.chars().count(), 500);
        assert!(!t.description.ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn description_of_501_is_truncated_with_marker() {
        let mut t = tool("t", 501);
        t.truncate_description();
        assert_eq!(t.description.chars().count(), 500 + 1);
        assert!(t.description.ends_with(TRUNCATION_MARKER));
    }
}
