use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use calhelper_core::domain::booking::Booking;
use calhelper_core::domain::operation::{
    AmbiguityReason, OperationKind, OperationRequest, ParamKey, Parameters,
};
use calhelper_core::domain::session::{PendingAction, Session};
use calhelper_core::domain::slot::SlotSet;
use calhelper_core::domain::time::TimeContext;

use crate::llm::{InterpretationContext, Interpreter, InterpretedCall};

/// Maps one user utterance plus session context to a structured request.
///
/// The router never fails: interpreter outages, timeouts and unresolvable
/// references all surface as an ambiguous request the runtime can explain.
pub struct IntentRouter {
    interpreter: Arc<dyn Interpreter>,
    timeout: Duration,
    history_turns: usize,
    time: TimeContext,
}

impl IntentRouter {
    pub fn new(
        interpreter: Arc<dyn Interpreter>,
        timeout: Duration,
        history_turns: usize,
        time: TimeContext,
    ) -> Self {
        Self { interpreter, timeout, history_turns, time }
    }

    pub async fn route(&self, session: &Session, text: &str) -> OperationRequest {
        let context = self.context(session, text);
        let call = match tokio::time::timeout(self.timeout, self.interpreter.interpret(&context)).await
        {
            Ok(Ok(call)) => call,
            Ok(Err(error)) => {
                tracing::warn!(
                    event_name = "router.interpreter_failed",
                    session_id = %session.id,
                    error = %error,
                    "interpreter unavailable"
                );
                return OperationRequest::ambiguous(AmbiguityReason::InterpreterUnavailable);
            }
            Err(_) => {
                tracing::warn!(
                    event_name = "router.interpreter_timeout",
                    session_id = %session.id,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "interpreter timed out"
                );
                return OperationRequest::ambiguous(AmbiguityReason::InterpreterUnavailable);
            }
        };

        let request = self.resolve(session, call);
        tracing::debug!(
            event_name = "router.routed",
            session_id = %session.id,
            operation = request.kind.tool_name(),
            parameters = request.parameters.len(),
            ambiguous = request.is_ambiguous(),
            "utterance routed"
        );
        request
    }

    fn resolve(&self, session: &Session, call: InterpretedCall) -> OperationRequest {
        let mut kind = OperationKind::from_tool_name(&call.tool);
        if kind == OperationKind::None && call.tool != OperationKind::None.tool_name() {
            tracing::info!(
                event_name = "router.unsupported_tool",
                session_id = %session.id,
                tool = %call.tool,
                "interpreter proposed an unsupported tool"
            );
        }

        let mut parameters = parameters_from_arguments(&call.arguments);
        let pending = session.pending.as_ref();

        if let Some(raw) = parameters.remove(ParamKey::SlotIndex) {
            let target = match (kind, pending.map(|pending| pending.kind)) {
                (OperationKind::RescheduleBooking, _)
                | (OperationKind::None, Some(OperationKind::RescheduleBooking)) => {
                    Some(ParamKey::NewStartTime)
                }
                (OperationKind::CreateBooking, _)
                | (OperationKind::None, Some(OperationKind::CreateBooking)) => {
                    Some(ParamKey::StartTime)
                }
                (OperationKind::None, None) => {
                    kind = OperationKind::CreateBooking;
                    Some(ParamKey::StartTime)
                }
                _ => None,
            };
            if let Some(target) = target {
                if let Err(reason) =
                    resolve_slot(&raw, session.slots.as_ref(), target, &mut parameters)
                {
                    return ambiguous(reason, call.message);
                }
            }
        }

        if let Some(raw) = parameters.remove(ParamKey::BookingIndex) {
            if let Err(reason) = resolve_booking(&raw, &session.booking_candidates, &mut parameters)
            {
                return ambiguous(reason, call.message);
            }
        }

        if !parameters.contains(ParamKey::BookingId) {
            if let Some(hint) = parameters.get(ParamKey::BookingHint).map(str::to_string) {
                let matching = self.time.parse_instant(&hint).map(|instant| {
                    session
                        .booking_candidates
                        .iter()
                        .filter(|booking| booking.start == instant)
                        .collect::<Vec<_>>()
                });
                if let Some([only]) = matching.as_deref() {
                    parameters.insert(ParamKey::BookingId, only.id.0.clone());
                    parameters.remove(ParamKey::BookingHint);
                }
            }
        } else {
            parameters.remove(ParamKey::BookingHint);
        }

        if kind == OperationKind::FindSlots && !parameters.contains(ParamKey::RangeEnd) {
            if let Some(start) = parameters
                .get(ParamKey::RangeStart)
                .and_then(|value| self.time.parse_range_start(value))
            {
                parameters.insert(ParamKey::RangeEnd, self.time.one_day_after(&start).to_rfc3339());
            }
        }

        match pending {
            Some(pending)
                if kind == pending.kind || (kind == OperationKind::None && !parameters.is_empty()) =>
            {
                let mut merged = pending.parameters.clone();
                merged.merge(&parameters);
                OperationRequest { reply: call.message, ..OperationRequest::new(pending.kind, merged) }
            }
            None if kind == OperationKind::None && !parameters.is_empty() && call.message.is_none() => {
                OperationRequest::ambiguous(AmbiguityReason::Unclear)
            }
            _ if kind == OperationKind::None => OperationRequest::conversation(call.message),
            _ => OperationRequest { reply: call.message, ..OperationRequest::new(kind, parameters) },
        }
    }

    fn context(&self, session: &Session, text: &str) -> InterpretationContext {
        InterpretationContext {
            now: self.time.now(),
            time_zone: self.time.zone_name().to_string(),
            history: session.recent_turns(self.history_turns).to_vec(),
            user_text: text.to_string(),
            pending: session.pending.as_ref().map(describe_pending),
            slots: session
                .slots
                .as_ref()
                .map(|set| {
                    set.slots
                        .iter()
                        .enumerate()
                        .map(|(position, slot)| {
                            format!("{}. {}", position + 1, self.time.localize(&slot.start).to_rfc3339())
                        })
                        .collect()
                })
                .unwrap_or_default(),
            booking_candidates: session
                .booking_candidates
                .iter()
                .enumerate()
                .map(|(position, booking)| self.describe_candidate(position + 1, booking))
                .collect(),
        }
    }

    fn describe_candidate(&self, number: usize, booking: &Booking) -> String {
        format!(
            "{number}. {} at {} (uid {})",
            booking.title,
            self.time.localize(&booking.start).to_rfc3339(),
            booking.id
        )
    }
}

fn ambiguous(reason: AmbiguityReason, reply: Option<String>) -> OperationRequest {
    OperationRequest { reply, ..OperationRequest::ambiguous(reason) }
}

fn describe_pending(pending: &PendingAction) -> String {
    let collected = pending
        .parameters
        .iter()
        .map(|(key, value)| format!("{}={value}", key.as_str()))
        .collect::<Vec<_>>()
        .join(", ");
    let missing = pending
        .missing_parameters()
        .iter()
        .map(ParamKey::as_str)
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "{} ({:?}); collected: [{collected}]; missing: [{missing}]",
        pending.kind.tool_name(),
        pending.status
    )
}

/// Strings and numbers are kept; unknown keys and other JSON values are dropped.
fn parameters_from_arguments(arguments: &Value) -> Parameters {
    let mut parameters = Parameters::new();
    let Some(object) = arguments.as_object() else {
        return parameters;
    };
    for (name, value) in object {
        let Some(key) = ParamKey::from_name(name) else {
            continue;
        };
        match value {
            Value::String(text) => parameters.insert(key, text.as_str()),
            Value::Number(number) => parameters.insert(key, number.to_string()),
            _ => {}
        }
    }
    parameters
}

fn parse_index(raw: &str) -> Option<usize> {
    raw.trim().trim_start_matches('#').parse::<usize>().ok()
}

fn resolve_slot(
    raw: &str,
    slots: Option<&SlotSet>,
    target: ParamKey,
    parameters: &mut Parameters,
) -> Result<(), AmbiguityReason> {
    let slots = slots.filter(|set| !set.is_empty()).ok_or(AmbiguityReason::NoSlotsCached)?;
    let index = parse_index(raw).ok_or(AmbiguityReason::Unclear)?;
    let slot = slots.get(index).ok_or(AmbiguityReason::SlotReferenceOutOfRange {
        index,
        available: slots.len(),
    })?;

    parameters.insert(target, slot.start.to_rfc3339());
    if target == ParamKey::StartTime && !parameters.contains(ParamKey::EventType) {
        parameters.insert(ParamKey::EventType, slot.event_type_id.to_string());
    }
    Ok(())
}

fn resolve_booking(
    raw: &str,
    candidates: &[Booking],
    parameters: &mut Parameters,
) -> Result<(), AmbiguityReason> {
    if candidates.is_empty() {
        return Err(AmbiguityReason::NoBookingsCached);
    }
    let index = parse_index(raw).ok_or(AmbiguityReason::Unclear)?;
    let booking = index
        .checked_sub(1)
        .and_then(|position| candidates.get(position))
        .ok_or(AmbiguityReason::BookingReferenceOutOfRange { index, available: candidates.len() })?;

    parameters.insert(ParamKey::BookingId, booking.id.0.clone());
    parameters.remove(ParamKey::BookingHint);
    Ok(())
}
