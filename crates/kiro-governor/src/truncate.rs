//! Whole-turn-pair truncation: drop the oldest `(user, assistant)` pair at a
//! time until the sequence fits under a token threshold. The first message
//! (which may carry a folded-in system prefix) and the last message (which
//! must remain intact for the upstream to accept the turn) are never
//! touched, and pairs are always removed together so role alternation is
//! preserved.

use kiro_protocol::Message;

use crate::estimate::approx_tokens;

/// Returns `(dropped, kept)`. `dropped` is empty if nothing could be removed
/// without touching the first or last message.
pub fn truncate_to_threshold(messages: Vec<Message>, threshold_tokens: u64) -> (Vec<Message>, Vec<Message>) {
    let mut kept = messages;
    let mut dropped = Vec::new();

    while approx_tokens(&kept) > threshold_tokens && kept.len() > 3 {
        let pair: Vec<Message> = kept.drain(1..3).collect();
        dropped.extend(pair);
    }

    (dropped, kept)
}

/// Replace the dropped prefix with a single system-prefix summary note,
/// inserted right after the first (system-carrying) message.
pub fn prepend_summary(mut kept: Vec<Message>, summary: String) -> Vec<Message> {
    let note = Message::user_text(format!("[earlier conversation summarized]\n{summary}"));
    let insert_at = if kept.is_empty() { 0 } else { 1 };
    kept.insert(insert_at, note);
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiro_protocol::{Content, Role};

    fn msg(role: Role, chars: usize) -> Message {
        Message { role, content: vec![Content::Text("x".repeat(chars))], tool_call_id: None }
    }

    #[test]
    fn drops_oldest_pair_first() {
        let messages = vec![
            msg(Role::User, 40),     // first, never dropped
            msg(Role::User, 4000),  // oldest pair
            msg(Role::Assistant, 4000),
            msg(Role::User, 40),
            msg(Role::Assistant, 40),
            msg(Role::User, 40),    // last, never dropped
        ];
        let (dropped, kept) = truncate_to_threshold(messages, 100);
        assert_eq!(dropped.len(), 2);
        assert_eq!(kept.len(), 4);
    }

    #[test]
    fn never_drops_below_first_and_last() {
        let messages = vec![msg(Role::User, 10_000), msg(Role::User, 10_000)];
        let (dropped, kept) = truncate_to_threshold(messages.clone(), 1);
        assert!(dropped.is_empty());
        assert_eq!(kept.len(), messages.len());
    }

    #[test]
    fn prepend_summary_inserts_after_first_message() {
        let kept = vec![msg(Role::User, 10), msg(Role::User, 10)];
        let result = prepend_summary(kept, "gist of it".into());
        assert_eq!(result.len(), 3);
        assert!(result[1].text().contains("gist of it"));
    }
}
