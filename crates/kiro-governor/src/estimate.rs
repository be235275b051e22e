//! Token estimation: a cheap heuristic, not an exact tokenizer count.

use kiro_protocol::Message;

const CHARS_PER_TOKEN: u64 = 4;

/// Approximate token count across a message sequence, using the common
/// `1 token ~ 4 characters` heuristic. Good enough to decide whether to
/// truncate; not meant to match the upstream's own counting exactly.
pub fn approx_tokens(messages: &[Message]) -> u64 {
    let total_chars: u64 = messages.iter().map(|m| m.text().len() as u64).sum();
    total_chars / CHARS_PER_TOKEN
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiro_protocol::{Content, Role};

    #[test]
    fn estimates_using_four_chars_per_token() {
        let messages = vec![Message {
            role: Role::User,
            content: vec![Content::Text("x".repeat(400))],
            tool_call_id: None,
        }];
        assert_eq!(approx_tokens(&messages), 100);
    }

    #[test]
    fn empty_history_estimates_zero() {
        assert_eq!(approx_tokens(&[]), 0);
    }
}
