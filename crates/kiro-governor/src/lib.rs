//! Long-Context Governor: mitigates upstream context-length limits before
//! and after a call, composed from four independently toggleable strategies
//! applied in a fixed order: auto-truncate, pre-estimate, smart-summary
//! (all pre-call), then error-retry (post-call, on `length_exceeded`).

pub mod config;
pub mod estimate;
pub mod summarize;
pub mod truncate;

pub use config::GovernorConfig;
pub use estimate::approx_tokens;
pub use summarize::Summarizer;

use kiro_protocol::Message;
use tracing::{debug, info};

pub struct Governor {
    config: GovernorConfig,
}

impl Governor {
    pub fn new(config: GovernorConfig) -> Self {
        Self { config }
    }

    /// Pre-call mitigation: auto-truncate, then pre-estimate, then
    /// smart-summary, each only if enabled. Always keeps the last user
    /// message intact and never touches a leading system-prefix message.
    pub async fn govern_pre(
        &self,
        messages: Vec<Message>,
        summarizer: Option<&dyn Summarizer>,
    ) -> Vec<Message> {
        let mut messages = messages;

        if self.config.auto_truncate {
            messages = self.apply_truncate(messages, self.config.truncate_threshold_tokens, summarizer).await;
        }

        if self.config.pre_estimate {
            messages = self.apply_truncate(messages, self.config.pre_estimate_threshold_tokens, summarizer).await;
        }

        messages
    }

    /// Post-call mitigation on a `length_exceeded` response: truncate once
    /// more with a stricter threshold. The Orchestrator retries the call
    /// exactly once with the result; a second `length_exceeded` surfaces to
    /// the caller as a terminal error.
    pub async fn govern_post_length_exceeded(
        &self,
        messages: Vec<Message>,
        summarizer: Option<&dyn Summarizer>,
    ) -> Vec<Message> {
        if !self.config.error_retry {
            return messages;
        }
        info!("length exceeded, retrying with a stricter truncation threshold");
        self.apply_truncate(messages, self.config.error_retry_threshold_tokens, summarizer).await
    }

    async fn apply_truncate(
        &self,
        messages: Vec<Message>,
        threshold_tokens: u64,
        summarizer: Option<&dyn Summarizer>,
    ) -> Vec<Message> {
        if approx_tokens(&messages) <= threshold_tokens {
            return messages;
        }

        let (dropped, kept) = truncate::truncate_to_threshold(messages, threshold_tokens);
        if dropped.is_empty() {
            return kept;
        }

        debug!(dropped = dropped.len(), "dropped oldest turn pairs to fit context threshold");

        if self.config.smart_summary {
            if let Some(summarizer) = summarizer {
                let dropped_text: String = dropped.iter().map(|m| m.text()).collect::<Vec<_>>().join("\n");
                let summary = summarizer.summarize(&dropped_text).await;
                if summary.is_empty() {
                    return kept;
                }
                return truncate::prepend_summary(kept, summary);
            }
        }

        kept
    }
}
