//! Enforces the upstream's strict role-alternation and tool-pairing rules
//! on a decoded client conversation.
//!
//! [`normalize`] is a pure function: same input always produces the same
//! output, and normalizing an already-normalized sequence is a no-op.

use crate::message::{Content, Message, Role, ToolResult};

const USER_PLACEHOLDER: &str = " ";
const ASSISTANT_PLACEHOLDER: &str = "…";

/// Repair `messages` to satisfy the alternation invariant described in §3:
/// strict `user, assistant, user, assistant, …` after any leading `system`
/// content has been folded into the first `user` message, every `tool`
/// message folded into a `tool_result` content part, and placeholders
/// inserted wherever alternation would otherwise break.
pub fn normalize(messages: Vec<Message>) -> Vec<Message> {
    let (system_prefix, rest) = extract_system_prefix(messages);
    let folded = fold_tool_messages(rest);
    let mut repaired = restore_alternation(folded);

    if let Some(prefix) = system_prefix {
        attach_system_prefix(&mut repaired, prefix);
    }

    if repaired.first().map(|m| m.role) != Some(Role::User) {
        repaired.insert(0, Message::user_text(USER_PLACEHOLDER));
    }

    if repaired.last().map(|m| m.role) == Some(Role::Assistant) {
        repaired.push(Message::user_text(USER_PLACEHOLDER));
    }

    repaired
}

/// Pull all leading `system` messages off the front, concatenating their
/// text. Returns `(system_text, remaining_messages)`.
fn extract_system_prefix(messages: Vec<Message>) -> (Option<String>, Vec<Message>) {
    let mut iter = messages.into_iter().peekable();
    let mut system_parts = Vec::new();
    while let Some(m) = iter.peek() {
        if m.role != Role::System {
            break;
        }
        system_parts.push(iter.next().unwrap().text());
    }
    let rest: Vec<Message> = iter.collect();
    if system_parts.is_empty() {
        (None, rest)
    } else {
        (Some(system_parts.join("\n")), rest)
    }
}

fn attach_system_prefix(messages: &mut [Message], prefix: String) {
    if let Some(first_user) = messages.iter_mut().find(|m| m.role == Role::User) {
        first_user
            .content
            .insert(0, Content::Text(format!("{prefix}\n")));
    }
}

/// Fold every `tool` role message into the preceding/next `user` message as
/// a `ToolResult` content part. Consecutive tool results belonging to the
/// same assistant turn merge under one user message, deduplicated by
/// `tool_call_id` (last occurrence wins).
fn fold_tool_messages(messages: Vec<Message>) -> Vec<Message> {
    let mut out: Vec<Message> = Vec::with_capacity(messages.len());

    for m in messages {
        if m.role != Role::Tool {
            out.push(m);
            continue;
        }

        let tool_call_id = m.tool_call_id.clone().unwrap_or_default();
        let result = ToolResult {
            tool_call_id: tool_call_id.clone(),
            content: m.text(),
            is_error: false,
        };

        match out.last_mut() {
            Some(prev) if prev.role == Role::User => {
                dedupe_insert(&mut prev.content, result);
            }
            _ => {
                out.push(Message {
                    role: Role::User,
                    content: vec![Content::ToolResult(result)],
                    tool_call_id: None,
                });
            }
        }
    }

    out
}

fn dedupe_insert(content: &mut Vec<Content>, result: ToolResult) {
    content.retain(|c| match c {
        Content::ToolResult(r) => r.tool_call_id != result.tool_call_id,
        _ => true,
    });
    content.push(Content::ToolResult(result));
}

/// Insert minimal placeholders wherever two adjacent messages share a role.
fn restore_alternation(messages: Vec<Message>) -> Vec<Message> {
    let mut out: Vec<Message> = Vec::with_capacity(messages.len());
    for m in messages {
        if let Some(prev) = out.last() {
            if prev.role == m.role {
                out.push(placeholder_for(other_role(m.role)));
            }
        }
        out.push(m);
    }
    out
}

fn other_role(role: Role) -> Role {
    match role {
        Role::User => Role::Assistant,
        _ => Role::User,
    }
}

fn placeholder_for(role: Role) -> Message {
    match role {
        Role::Assistant => Message::assistant_text(ASSISTANT_PLACEHOLDER),
        _ => Message::user_text(USER_PLACEHOLDER),
    }
}

/// True iff `messages` already satisfies the alternation invariant of §3.
pub fn is_normalized(messages: &[Message]) -> bool {
    if messages.is_empty() {
        return true;
    }
    if messages.first().map(|m| m.role) != Some(Role::User) {
        return false;
    }
    if messages.last().map(|m| m.role) == Some(Role::Assistant) {
        return false;
    }
    messages.windows(2).all(|w| w[0].role != w[1].role)
        && messages.iter().all(|m| m.role == Role::User || m.role == Role::Assistant)
}
