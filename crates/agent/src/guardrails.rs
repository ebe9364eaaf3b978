use std::sync::Arc;

use calhelper_core::audit::{AuditContext, AuditSink};
use calhelper_core::domain::session::PendingAction;
use calhelper_core::flows::{
    ConfirmationFlow, FlowEngine, FlowTransitionError, GateContext, GateEvent, TransitionOutcome,
};

const AFFIRMATIVE_PHRASES: &[&str] = &[
    "yes",
    "y",
    "yeah",
    "yep",
    "yup",
    "sure",
    "ok",
    "okay",
    "confirm",
    "confirmed",
    "go ahead",
    "do it",
    "please do",
    "yes please",
    "sounds good",
    "correct",
    "thats right",
    "book it",
    "absolutely",
];

const NEGATIVE_PHRASES: &[&str] = &[
    "no",
    "n",
    "nope",
    "nah",
    "never mind",
    "nevermind",
    "stop",
    "abort",
    "forget it",
    "cancel that",
    "dont",
    "do not",
    "no thanks",
    "no thank you",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplyClass {
    Affirmative,
    Negative,
    Other,
}

/// Only an utterance that is entirely a known phrase counts; "yes but at 4pm"
/// is a correction, not a confirmation.
pub fn classify_reply(text: &str) -> ReplyClass {
    let normalized = normalize_reply(text);
    if AFFIRMATIVE_PHRASES.contains(&normalized.as_str()) {
        ReplyClass::Affirmative
    } else if NEGATIVE_PHRASES.contains(&normalized.as_str()) {
        ReplyClass::Negative
    } else {
        ReplyClass::Other
    }
}

fn normalize_reply(text: &str) -> String {
    let mut sanitized = String::with_capacity(text.len());
    for character in text.chars() {
        if character.is_alphanumeric() || character.is_whitespace() {
            sanitized.extend(character.to_lowercase());
        } else if character != '\'' && character != '\u{2019}' {
            sanitized.push(' ');
        }
    }
    sanitized.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Drives a pending action through the confirmation state machine.
pub struct ConfirmationGate {
    engine: FlowEngine<ConfirmationFlow>,
    audit: Arc<dyn AuditSink>,
}

impl ConfirmationGate {
    pub fn new(audit: Arc<dyn AuditSink>) -> Self {
        Self { engine: FlowEngine::new(ConfirmationFlow), audit }
    }

    /// Applies `event` and records the resulting status on the action.
    pub fn advance(
        &self,
        pending: &mut PendingAction,
        event: GateEvent,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        let context = GateContext::missing(pending.missing_parameters());
        let audit = audit.with_pending_action(Some(pending.id));
        let outcome = self.engine.apply_with_audit(
            &pending.status,
            &event,
            &context,
            self.audit.as_ref(),
            &audit,
        )?;

        tracing::info!(
            event_name = "gate.transition",
            correlation_id = %audit.correlation_id,
            pending_action_id = %pending.id,
            operation = pending.kind.tool_name(),
            from = ?outcome.from,
            to = ?outcome.to,
            "confirmation gate transition"
        );
        pending.status = outcome.to;
        Ok(outcome)
    }
}
