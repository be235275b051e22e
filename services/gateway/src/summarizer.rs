//! Backs the Governor's smart-summary strategy: when the Governor drops a
//! prefix of old turns, this asks a cheap upstream model to condense them
//! into one system-prefix note instead of discarding them outright.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use kiro_auth::CredentialStore;
use kiro_client::UpstreamClient;
use kiro_governor::Summarizer;
use kiro_pool::Selector;
use kiro_protocol::Message;
use tracing::warn;

/// Cheapest model in the mapping table (§4.5); summarization is a
/// best-effort side call and shouldn't compete with the user's own request
/// for a more capable account.
const SUMMARY_MODEL: &str = "claude-haiku-4.5";

pub struct GatewaySummarizer {
    pub store: Arc<CredentialStore>,
    pub selector: Arc<Selector>,
    pub client: Arc<UpstreamClient>,
}

impl Summarizer for GatewaySummarizer {
    fn summarize<'a>(&'a self, dropped_text: &'a str) -> Pin<Box<dyn Future<Output = String> + Send + 'a>> {
        Box::pin(async move {
            let prompt = Message::user_text(format!(
                "Summarize the following conversation history in 2-3 sentences, \
                 preserving facts and decisions a later assistant turn would need:\n\n{dropped_text}"
            ));
            let body = kiro_protocol::request::build_body(SUMMARY_MODEL, &[prompt], &[], false);

            let account = match self.selector.select(None, &[]).await {
                Ok(account) => account,
                Err(e) => {
                    warn!(error = %e, "smart-summary: no account available, dropping prefix without a summary");
                    return String::new();
                }
            };

            let result = self.client.call(&account, &body).await;
            self.store.record_call_finished(&account.id, result.is_err()).await;

            match result {
                Ok(assembled) => assembled.text,
                Err(e) => {
                    warn!(error = %e, "smart-summary call failed, dropping prefix without a summary");
                    String::new()
                }
            }
        })
    }
}
