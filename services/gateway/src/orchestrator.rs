//! Request Orchestrator: a pure `(state, event) -> (state, action)` function
//! exercised by table tests, plus an async driver that executes the actions
//! it emits against the Account Selector, the Upstream Client, and the
//! Long-Context Governor.
//!
//! Per request: `RECV -> TRANSLATE_IN -> NORMALIZE -> GOVERN_PRE -> SELECT
//! -> CALL -> { ok -> TRANSLATE_OUT -> DONE; rate_limited -> mark_cooldown,
//! exclude, SELECT (bounded); auth_failed -> mark_unhealthy, trigger
//! refresh, exclude, SELECT; length_exceeded -> GOVERN_POST -> CALL (once);
//! server/transport -> exclude, SELECT (bounded); client_error ->
//! TRANSLATE_OUT(error) -> DONE }`.

use std::sync::Arc;
use std::time::Duration;

use kiro_auth::{Account, CredentialStore, Refresher};
use kiro_client::{ErrorCategory, UpstreamClient};
use kiro_governor::{Governor, Summarizer};
use kiro_pool::Selector;
use kiro_protocol::Message;

use crate::error::{Error, Result};

/// Account cooldown applied on a 429 response, per §4.8.
const RATE_LIMIT_COOLDOWN_MS: u64 = 5 * 60 * 1000;
/// Overall per-request deadline, per §4.8.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(120);

/// States of the per-request state machine. `Recv`/`TranslateIn` never
/// appear as machine states in practice (the handler performs that
/// decoding before entering the loop) but are named here because SELECT and
/// CALL outcomes fold back to earlier conceptual steps.
#[derive(Debug, Clone, PartialEq)]
pub enum OrchestratorState {
    Normalize { attempt: u32 },
    Select { attempt: u32 },
    Call { account_id: String, attempt: u32 },
    GovernPost { account_id: String },
    Done { outcome: Outcome },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Ok,
    ClientError,
    ExhaustedRetries,
}

/// Events driving transitions. `Called*` variants carry only the
/// classification the Orchestrator needs to decide the next transition —
/// the actual response/delta payload travels alongside in the driver, not
/// through the pure function.
#[derive(Debug, Clone, PartialEq)]
pub enum OrchestratorEvent {
    Normalized,
    Selected { account_id: String },
    SelectFailed,
    CallOk,
    CallRateLimited,
    CallAuthFailed,
    CallLengthExceeded,
    CallServerOrTransportError,
    CallClientError,
    GovernedPost,
}

/// Actions the driver executes in response to a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum OrchestratorAction {
    GovernPre,
    Select,
    Call { account_id: String },
    MarkCooldown { account_id: String },
    MarkUnhealthyAndRefresh { account_id: String },
    GovernPost { account_id: String },
    TranslateOut,
    TranslateOutError,
    Fail(FailureKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    NoAccountAvailable,
    RateLimitedAllAccounts,
    UpstreamUnavailable,
    ContentLengthExceeded,
}

/// Maximum SELECT attempts after an account-level failure, per §4.8.
pub fn max_attempts(active_account_count: usize) -> u32 {
    active_account_count.min(3) as u32
}

/// Pure transition function. No I/O; the driver interprets `OrchestratorAction`.
pub fn handle_event(
    state: OrchestratorState,
    event: OrchestratorEvent,
    bound: u32,
) -> (OrchestratorState, OrchestratorAction) {
    match (state, event) {
        (OrchestratorState::Normalize { attempt }, OrchestratorEvent::Normalized) => {
            (OrchestratorState::Select { attempt }, OrchestratorAction::GovernPre)
        }

        (OrchestratorState::Select { attempt }, OrchestratorEvent::Selected { account_id }) => (
            OrchestratorState::Call { account_id: account_id.clone(), attempt },
            OrchestratorAction::Call { account_id },
        ),

        (OrchestratorState::Select { .. }, OrchestratorEvent::SelectFailed) => (
            OrchestratorState::Done { outcome: Outcome::ExhaustedRetries },
            OrchestratorAction::Fail(FailureKind::NoAccountAvailable),
        ),

        (OrchestratorState::Call { .. }, OrchestratorEvent::CallOk) => (
            OrchestratorState::Done { outcome: Outcome::Ok },
            OrchestratorAction::TranslateOut,
        ),

        (OrchestratorState::Call { account_id, attempt }, OrchestratorEvent::CallRateLimited) => {
            if attempt + 1 >= bound {
                (
                    OrchestratorState::Done { outcome: Outcome::ExhaustedRetries },
                    OrchestratorAction::Fail(FailureKind::RateLimitedAllAccounts),
                )
            } else {
                (
                    OrchestratorState::Select { attempt: attempt + 1 },
                    OrchestratorAction::MarkCooldown { account_id },
                )
            }
        }

        (OrchestratorState::Call { account_id, attempt }, OrchestratorEvent::CallAuthFailed) => (
            OrchestratorState::Select { attempt: attempt + 1 },
            OrchestratorAction::MarkUnhealthyAndRefresh { account_id },
        ),

        (OrchestratorState::Call { account_id, .. }, OrchestratorEvent::CallLengthExceeded) => (
            OrchestratorState::GovernPost { account_id: account_id.clone() },
            OrchestratorAction::GovernPost { account_id },
        ),

        (OrchestratorState::Call { account_id: _, attempt }, OrchestratorEvent::CallServerOrTransportError) => {
            if attempt + 1 >= bound {
                (
                    OrchestratorState::Done { outcome: Outcome::ExhaustedRetries },
                    OrchestratorAction::Fail(FailureKind::UpstreamUnavailable),
                )
            } else {
                (OrchestratorState::Select { attempt: attempt + 1 }, OrchestratorAction::Select)
            }
        }

        (OrchestratorState::Call { .. }, OrchestratorEvent::CallClientError) => (
            OrchestratorState::Done { outcome: Outcome::ClientError },
            OrchestratorAction::TranslateOutError,
        ),

        (OrchestratorState::GovernPost { account_id }, OrchestratorEvent::GovernedPost) => (
            OrchestratorState::Call { account_id: account_id.clone(), attempt: u32::MAX - 1 },
            OrchestratorAction::Call { account_id },
        ),

        (state, _event) => (state, OrchestratorAction::Fail(FailureKind::UpstreamUnavailable)),
    }
}

fn category_to_event(category: &ErrorCategory) -> OrchestratorEvent {
    match category {
        ErrorCategory::RateLimited { .. } => OrchestratorEvent::CallRateLimited,
        ErrorCategory::AuthFailed => OrchestratorEvent::CallAuthFailed,
        ErrorCategory::LengthExceeded => OrchestratorEvent::CallLengthExceeded,
        ErrorCategory::ServerError | ErrorCategory::TransportError => {
            OrchestratorEvent::CallServerOrTransportError
        }
        ErrorCategory::ClientError { .. } => OrchestratorEvent::CallClientError,
    }
}

/// Collaborators the driver needs, shared by every request.
pub struct Orchestrator {
    pub store: Arc<CredentialStore>,
    pub selector: Arc<Selector>,
    pub client: Arc<UpstreamClient>,
    pub governor: Arc<Governor>,
    pub refresher: Arc<Refresher>,
    pub summarizer: crate::summarizer::GatewaySummarizer,
}

/// The result of driving one non-streaming request to completion.
pub enum DriveResult {
    Ok(kiro_client::AssembledResponse, String),
    Error(Error),
}

impl Orchestrator {
    /// Drive a non-streaming request: NORMALIZE was already applied by the
    /// caller (message normalization has no failure mode), so this starts
    /// at GOVERN_PRE/SELECT and loops through CALL outcomes per §4.8.
    pub async fn drive(
        &self,
        session_id: Option<&str>,
        messages: Vec<Message>,
        tools: &[kiro_protocol::ToolDefinition],
        upstream_model: &str,
    ) -> DriveResult {
        let active_count = self
            .store
            .list()
            .await
            .iter()
            .filter(|a| a.enabled)
            .count();
        let bound = max_attempts(active_count).max(1);

        let mut excluded: Vec<String> = Vec::new();
        let mut state = OrchestratorState::Normalize { attempt: 0 };
        let (next_state, action) = handle_event(state, OrchestratorEvent::Normalized, bound);
        state = next_state;
        debug_assert!(matches!(action, OrchestratorAction::GovernPre));

        let mut messages = self.governor.govern_pre(messages, Some(&self.summarizer as &dyn Summarizer)).await;

        loop {
            let select_attempt = match state {
                OrchestratorState::Select { attempt } => attempt,
                _ => 0,
            };

            let account = match self.selector.select(session_id, &excluded).await {
                Ok(a) => a,
                Err(_) => return DriveResult::Error(Error::NoAccountAvailable("no selectable account".into())),
            };

            let (new_state, call_action) = handle_event(
                OrchestratorState::Select { attempt: select_attempt },
                OrchestratorEvent::Selected { account_id: account.id.clone() },
                bound,
            );
            state = new_state;
            debug_assert!(matches!(call_action, OrchestratorAction::Call { .. }));

            let body = kiro_protocol::request::build_body(upstream_model, &messages, tools, false);
            let result = self.client.call(&account, &body).await;

            match result {
                Ok(assembled) => {
                    self.store.record_call_finished(&account.id, false).await;
                    return DriveResult::Ok(assembled, account.id);
                }
                Err(e) => {
                    self.store.record_call_finished(&account.id, true).await;
                    let Some(category) = e.category() else {
                        return DriveResult::Error(Error::Internal(e.to_string()));
                    };
                    crate::metrics::record_upstream_error(error_kind_label(category));

                    let event = category_to_event(category);
                    let (outcome_state, outcome_action) = handle_event(
                        OrchestratorState::Call { account_id: account.id.clone(), attempt: select_attempt },
                        event,
                        bound,
                    );

                    match outcome_action {
                        OrchestratorAction::MarkCooldown { account_id } => {
                            let _ = self.store.mark_cooldown(&account_id, RATE_LIMIT_COOLDOWN_MS).await;
                            excluded.push(account_id);
                            state = outcome_state;
                            continue;
                        }
                        OrchestratorAction::MarkUnhealthyAndRefresh { account_id } => {
                            let _ = self.store.mark_unhealthy(&account_id, "upstream rejected access token".into()).await;
                            let _ = self.refresher.refresh_account(&account_id).await;
                            excluded.push(account_id);
                            state = outcome_state;
                            continue;
                        }
                        OrchestratorAction::Select => {
                            excluded.push(account.id.clone());
                            state = outcome_state;
                            continue;
                        }
                        OrchestratorAction::GovernPost { account_id } => {
                            messages = self.governor.govern_post_length_exceeded(messages, Some(&self.summarizer as &dyn Summarizer)).await;
                            let body = kiro_protocol::request::build_body(upstream_model, &messages, tools, false);
                            match self.client.call(&account, &body).await {
                                Ok(assembled) => {
                                    self.store.record_call_finished(&account_id, false).await;
                                    return DriveResult::Ok(assembled, account_id);
                                }
                                Err(_) => {
                                    self.store.record_call_finished(&account_id, true).await;
                                    return DriveResult::Error(Error::ContentLengthExceeded);
                                }
                            }
                        }
                        OrchestratorAction::Fail(FailureKind::RateLimitedAllAccounts) => {
                            return DriveResult::Error(Error::RateLimitedAllAccounts);
                        }
                        OrchestratorAction::Fail(FailureKind::UpstreamUnavailable) => {
                            return DriveResult::Error(Error::UpstreamUnavailable(e.to_string()));
                        }
                        OrchestratorAction::TranslateOutError => {
                            return DriveResult::Error(Error::BadRequest(e.to_string()));
                        }
                        _ => return DriveResult::Error(Error::Internal("unreachable orchestrator action".into())),
                    }
                }
            }
        }
    }

    /// Drive a streaming request up to the point the upstream connection
    /// commits (its first byte). Account failures observed while opening
    /// the connection retry through SELECT exactly like the non-streaming
    /// path; once the returned stream starts yielding deltas the caller
    /// owns it and cannot switch accounts mid-stream, per §4.8/§5.
    pub async fn drive_streaming(
        &self,
        session_id: Option<&str>,
        messages: Vec<Message>,
        tools: &[kiro_protocol::ToolDefinition],
        upstream_model: &str,
    ) -> std::result::Result<(kiro_client::DeltaStream, String), Error> {
        let active_count = self.store.list().await.iter().filter(|a| a.enabled).count();
        let bound = max_attempts(active_count).max(1);
        let mut excluded: Vec<String> = Vec::new();
        let messages = self.governor.govern_pre(messages, Some(&self.summarizer as &dyn Summarizer)).await;

        loop {
            let account = self
                .selector
                .select(session_id, &excluded)
                .await
                .map_err(|_| Error::NoAccountAvailable("no selectable account".into()))?;

            let body = kiro_protocol::request::build_body(upstream_model, &messages, tools, true);
            match self.client.call_streaming(&account, &body).await {
                Ok(stream) => return Ok((stream, account.id)),
                Err(e) => {
                    self.store.record_call_finished(&account.id, true).await;
                    let Some(category) = e.category() else {
                        return Err(Error::Internal(e.to_string()));
                    };
                    crate::metrics::record_upstream_error(error_kind_label(category));

                    let attempt = excluded.len() as u32;
                    let event = category_to_event(category);
                    let (_, action) = handle_event(
                        OrchestratorState::Call { account_id: account.id.clone(), attempt },
                        event,
                        bound,
                    );
                    match action {
                        OrchestratorAction::MarkCooldown { account_id } => {
                            let _ = self.store.mark_cooldown(&account_id, RATE_LIMIT_COOLDOWN_MS).await;
                            excluded.push(account_id);
                        }
                        OrchestratorAction::MarkUnhealthyAndRefresh { account_id } => {
                            let _ = self.store.mark_unhealthy(&account_id, "upstream rejected access token".into()).await;
                            let _ = self.refresher.refresh_account(&account_id).await;
                            excluded.push(account_id);
                        }
                        OrchestratorAction::Select => excluded.push(account.id.clone()),
                        OrchestratorAction::Fail(FailureKind::RateLimitedAllAccounts) => {
                            return Err(Error::RateLimitedAllAccounts);
                        }
                        OrchestratorAction::TranslateOutError => {
                            return Err(Error::BadRequest(e.to_string()));
                        }
                        _ => return Err(Error::UpstreamUnavailable(e.to_string())),
                    }
                }
            }
        }
    }
}

fn error_kind_label(category: &ErrorCategory) -> &'static str {
    match category {
        ErrorCategory::RateLimited { .. } => "rate_limited",
        ErrorCategory::AuthFailed => "auth_failed",
        ErrorCategory::LengthExceeded => "length_exceeded",
        ErrorCategory::ServerError => "server_error",
        ErrorCategory::TransportError => "transport_error",
        ErrorCategory::ClientError { .. } => "client_error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_to_select_emits_govern_pre() {
        let (state, action) = handle_event(OrchestratorState::Normalize { attempt: 0 }, OrchestratorEvent::Normalized, 3);
        assert!(matches!(state, OrchestratorState::Select { attempt: 0 }));
        assert!(matches!(action, OrchestratorAction::GovernPre));
    }

    #[test]
    fn select_to_call_on_selected() {
        let (state, action) = handle_event(
            OrchestratorState::Select { attempt: 0 },
            OrchestratorEvent::Selected { account_id: "a".into() },
            3,
        );
        assert!(matches!(state, OrchestratorState::Call { .. }));
        assert!(matches!(action, OrchestratorAction::Call { .. }));
    }

    #[test]
    fn select_failure_fails_with_no_account_available() {
        let (state, action) = handle_event(OrchestratorState::Select { attempt: 0 }, OrchestratorEvent::SelectFailed, 3);
        assert!(matches!(state, OrchestratorState::Done { outcome: Outcome::ExhaustedRetries }));
        assert!(matches!(action, OrchestratorAction::Fail(FailureKind::NoAccountAvailable)));
    }

    #[test]
    fn call_ok_translates_out_and_completes() {
        let (state, action) = handle_event(
            OrchestratorState::Call { account_id: "a".into(), attempt: 0 },
            OrchestratorEvent::CallOk,
            3,
        );
        assert!(matches!(state, OrchestratorState::Done { outcome: Outcome::Ok }));
        assert!(matches!(action, OrchestratorAction::TranslateOut));
    }

    #[test]
    fn rate_limited_marks_cooldown_and_reselects_within_bound() {
        let (state, action) = handle_event(
            OrchestratorState::Call { account_id: "a".into(), attempt: 0 },
            OrchestratorEvent::CallRateLimited,
            3,
        );
        assert!(matches!(state, OrchestratorState::Select { attempt: 1 }));
        assert!(matches!(action, OrchestratorAction::MarkCooldown { .. }));
    }

    #[test]
    fn rate_limited_exhausts_bound_and_fails() {
        let (state, action) = handle_event(
            OrchestratorState::Call { account_id: "a".into(), attempt: 2 },
            OrchestratorEvent::CallRateLimited,
            3,
        );
        assert!(matches!(state, OrchestratorState::Done { outcome: Outcome::ExhaustedRetries }));
        assert!(matches!(action, OrchestratorAction::Fail(FailureKind::RateLimitedAllAccounts)));
    }

    #[test]
    fn auth_failed_marks_unhealthy_and_reselects() {
        let (state, action) = handle_event(
            OrchestratorState::Call { account_id: "a".into(), attempt: 0 },
            OrchestratorEvent::CallAuthFailed,
            3,
        );
        assert!(matches!(state, OrchestratorState::Select { attempt: 1 }));
        assert!(matches!(action, OrchestratorAction::MarkUnhealthyAndRefresh { .. }));
    }

    #[test]
    fn length_exceeded_governs_post_then_calls_once() {
        let (state, action) = handle_event(
            OrchestratorState::Call { account_id: "a".into(), attempt: 0 },
            OrchestratorEvent::CallLengthExceeded,
            3,
        );
        assert!(matches!(state, OrchestratorState::GovernPost { .. }));
        assert!(matches!(action, OrchestratorAction::GovernPost { .. }));

        let (state2, action2) = handle_event(state, OrchestratorEvent::GovernedPost, 3);
        assert!(matches!(state2, OrchestratorState::Call { .. }));
        assert!(matches!(action2, OrchestratorAction::Call { .. }));
    }

    #[test]
    fn server_error_reselects_within_bound_then_fails_at_bound() {
        let (state, action) = handle_event(
            OrchestratorState::Call { account_id: "a".into(), attempt: 0 },
            OrchestratorEvent::CallServerOrTransportError,
            2,
        );
        assert!(matches!(state, OrchestratorState::Select { attempt: 1 }));
        assert!(matches!(action, OrchestratorAction::Select));

        let (state2, action2) = handle_event(
            OrchestratorState::Call { account_id: "a".into(), attempt: 1 },
            OrchestratorEvent::CallServerOrTransportError,
            2,
        );
        assert!(matches!(state2, OrchestratorState::Done { outcome: Outcome::ExhaustedRetries }));
        assert!(matches!(action2, OrchestratorAction::Fail(FailureKind::UpstreamUnavailable)));
    }

    #[test]
    fn client_error_translates_out_error_and_completes() {
        let (state, action) = handle_event(
            OrchestratorState::Call { account_id: "a".into(), attempt: 0 },
            OrchestratorEvent::CallClientError,
            3,
        );
        assert!(matches!(state, OrchestratorState::Done { outcome: Outcome::ClientError }));
        assert!(matches!(action, OrchestratorAction::TranslateOutError));
    }

    #[test]
    fn max_attempts_caps_at_three() {
        assert_eq!(max_attempts(1), 1);
        assert_eq!(max_attempts(2), 2);
        assert_eq!(max_attempts(5), 3);
        assert_eq!(max_attempts(0), 0);
    }
}
