use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use calhelper_calendar::{CalComClient, CalendarClient, CalendarError};
use calhelper_core::audit::{
    AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink, TracingAuditSink,
};
use calhelper_core::config::AppConfig;
use calhelper_core::domain::booking::{Booking, BookingStatus};
use calhelper_core::domain::operation::{AmbiguityReason, OperationKind, ParamKey, Parameters};
use calhelper_core::domain::session::{PendingAction, Session, SessionId, Turn};
use calhelper_core::domain::time::TimeContext;
use calhelper_core::errors::{ToolError, TurnError};
use calhelper_core::flows::{GateEvent, PendingStatus};

use crate::conversation::IntentRouter;
use crate::guardrails::{classify_reply, ConfirmationGate, ReplyClass};
use crate::llm::{Interpreter, InterpreterError, OpenAiInterpreter};
use crate::session::SessionStore;
use crate::synthesizer::ResponseSynthesizer;
use crate::tools::{Payload, RateBudget, RetryPolicy, ToolAdapter};

const ACTOR: &str = "agent-runtime";

#[derive(Debug, Error)]
pub enum RuntimeBuildError {
    #[error("a calendar client is required")]
    MissingCalendar,
    #[error("an interpreter is required")]
    MissingInterpreter,
    #[error("calendar client could not be built: {0}")]
    Calendar(#[from] CalendarError),
    #[error("interpreter could not be built: {0}")]
    Interpreter(#[from] InterpreterError),
}

pub struct AgentRuntimeBuilder {
    calendar: Option<Arc<dyn CalendarClient>>,
    interpreter: Option<Arc<dyn Interpreter>>,
    audit: Option<Arc<dyn AuditSink>>,
    time: TimeContext,
    retry: RetryPolicy,
    tool_timeout: Duration,
    interpreter_timeout: Duration,
    requests_per_minute: u32,
    history_turns: usize,
}

impl Default for AgentRuntimeBuilder {
    fn default() -> Self {
        Self {
            calendar: None,
            interpreter: None,
            audit: None,
            time: TimeContext::utc(),
            retry: RetryPolicy::default(),
            tool_timeout: Duration::from_secs(15),
            interpreter_timeout: Duration::from_secs(30),
            requests_per_minute: 100,
            history_turns: 12,
        }
    }
}

impl AgentRuntimeBuilder {
    pub fn calendar(mut self, calendar: Arc<dyn CalendarClient>) -> Self {
        self.calendar = Some(calendar);
        self
    }

    pub fn interpreter(mut self, interpreter: Arc<dyn Interpreter>) -> Self {
        self.interpreter = Some(interpreter);
        self
    }

    pub fn audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn time(mut self, time: TimeContext) -> Self {
        self.time = time;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    pub fn interpreter_timeout(mut self, timeout: Duration) -> Self {
        self.interpreter_timeout = timeout;
        self
    }

    pub fn requests_per_minute(mut self, limit: u32) -> Self {
        self.requests_per_minute = limit;
        self
    }

    pub fn history_turns(mut self, turns: usize) -> Self {
        self.history_turns = turns;
        self
    }

    pub fn build(self) -> Result<AgentRuntime, RuntimeBuildError> {
        let calendar = self.calendar.ok_or(RuntimeBuildError::MissingCalendar)?;
        let interpreter = self.interpreter.ok_or(RuntimeBuildError::MissingInterpreter)?;
        let audit = self.audit.unwrap_or_else(|| Arc::new(TracingAuditSink));

        Ok(AgentRuntime {
            sessions: SessionStore::new(),
            router: IntentRouter::new(
                interpreter,
                self.interpreter_timeout,
                self.history_turns,
                self.time,
            ),
            gate: ConfirmationGate::new(Arc::clone(&audit)),
            tools: ToolAdapter::new(
                calendar,
                Arc::clone(&audit),
                self.time,
                self.tool_timeout,
                self.retry,
                Arc::new(RateBudget::per_minute(self.requests_per_minute)),
            ),
            synthesizer: ResponseSynthesizer::new(self.time),
            audit,
            time: self.time,
        })
    }
}

/// Entry point for every conversational turn.
pub struct AgentRuntime {
    sessions: SessionStore,
    router: IntentRouter,
    gate: ConfirmationGate,
    tools: ToolAdapter,
    synthesizer: ResponseSynthesizer,
    audit: Arc<dyn AuditSink>,
    time: TimeContext,
}

impl AgentRuntime {
    pub fn builder() -> AgentRuntimeBuilder {
        AgentRuntimeBuilder::default()
    }

    /// Wires the Cal.com client and the configured chat-completions interpreter.
    pub fn from_config(config: &AppConfig) -> Result<Self, RuntimeBuildError> {
        let calendar = CalComClient::from_config(&config.calendar)?;
        let interpreter = OpenAiInterpreter::from_config(&config.llm)?;

        Self::builder()
            .calendar(Arc::new(calendar))
            .interpreter(Arc::new(interpreter))
            .time(config.assistant.time_context())
            .tool_timeout(Duration::from_secs(config.calendar.timeout_secs))
            .interpreter_timeout(Duration::from_secs(config.llm.timeout_secs))
            .requests_per_minute(config.calendar.max_requests_per_minute)
            .history_turns(config.assistant.history_turns)
            .build()
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub async fn end_session(&self, session_id: &SessionId) -> bool {
        self.sessions.end(session_id).await
    }

    /// Processes one user utterance and returns the assistant reply.
    ///
    /// Turns of the same session run one at a time. The only error is a fatal
    /// credential failure, after which the session is gone.
    pub async fn handle_turn(&self, session_id: &SessionId, text: &str) -> Result<String, TurnError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(self.synthesizer.empty_input());
        }

        let correlation_id = Uuid::new_v4().to_string();
        let mut session = self.sessions.lock(session_id).await;
        let audit = AuditContext::new(
            Some(session_id.clone()),
            session.pending.as_ref().map(|pending| pending.id),
            correlation_id.clone(),
            ACTOR,
        );
        session.push_turn(Turn::user(text));

        let outcome = self.respond(&mut session, text, &audit).await;
        match outcome {
            Ok(reply) => {
                session.push_turn(Turn::assistant(reply.clone()));
                self.audit.emit(
                    AuditEvent::from_context(
                        &audit.with_pending_action(session.pending.as_ref().map(|pending| pending.id)),
                        "turn.completed",
                        AuditCategory::Ingress,
                        AuditOutcome::Success,
                    )
                    .with_metadata("pending_status", format!("{:?}", session.pending_status())),
                );
                Ok(reply)
            }
            Err(error) => {
                drop(session);
                self.sessions.end(session_id).await;
                self.audit.emit(
                    AuditEvent::from_context(
                        &audit,
                        "session.terminated",
                        AuditCategory::System,
                        AuditOutcome::Failed,
                    )
                    .with_metadata("error", error.kind_label()),
                );
                tracing::error!(
                    event_name = "turn.fatal",
                    correlation_id = %correlation_id,
                    session_id = %session_id,
                    error = %error,
                    "session terminated"
                );
                Err(TurnError::Unauthorized { session_id: session_id.clone() })
            }
        }
    }

    /// `Err` carries only fatal tool errors.
    async fn respond(
        &self,
        session: &mut Session,
        text: &str,
        audit: &AuditContext,
    ) -> Result<String, ToolError> {
        let class = classify_reply(text);
        match (class, session.pending.as_ref().map(|pending| pending.status)) {
            (ReplyClass::Negative, Some(_)) => return Ok(self.abandon(session, audit)),
            (ReplyClass::Affirmative, Some(PendingStatus::AwaitingConfirmation)) => {
                return self.confirm(session, audit).await;
            }
            (ReplyClass::Affirmative, Some(_)) => {
                if let Some(pending) = &session.pending {
                    return Ok(self.synthesizer.clarification(
                        pending.kind,
                        &pending.missing_parameters(),
                        &[],
                    ));
                }
            }
            (ReplyClass::Affirmative, None) => return Ok(self.synthesizer.nothing_to_confirm()),
            _ => {}
        }

        let request = self.router.route(session, text).await;
        if let Some(reason) = &request.ambiguity {
            return Ok(self.with_reminder(session, self.synthesizer.ambiguity(reason)));
        }

        match request.kind {
            OperationKind::None => {
                let reply = request
                    .reply
                    .unwrap_or_else(|| self.synthesizer.ambiguity(&AmbiguityReason::Unclear));
                Ok(self.with_reminder(session, reply))
            }
            kind if kind.is_mutating() => self.negotiate(session, kind, request.parameters, audit).await,
            kind => self.read(session, kind, request.parameters, audit).await,
        }
    }

    fn abandon(&self, session: &mut Session, audit: &AuditContext) -> String {
        let Some(mut pending) = session.pending.take() else {
            return self.synthesizer.nothing_to_confirm();
        };
        if let Err(error) = self.gate.advance(&mut pending, GateEvent::Declined, audit) {
            tracing::warn!(
                event_name = "negotiation.abandon_rejected",
                correlation_id = %audit.correlation_id,
                error = %error,
                "decline did not match gate state"
            );
        }
        self.synthesizer.abandoned(pending.kind)
    }

    async fn confirm(&self, session: &mut Session, audit: &AuditContext) -> Result<String, ToolError> {
        let Some(mut pending) = session.pending.take() else {
            return Ok(self.synthesizer.nothing_to_confirm());
        };
        let kind = pending.kind;

        if let Err(error) = self.gate.advance(&mut pending, GateEvent::Affirmed, audit) {
            tracing::warn!(
                event_name = "negotiation.confirm_rejected",
                correlation_id = %audit.correlation_id,
                error = %error,
                "confirmation did not match gate state"
            );
            let reply = self.synthesizer.clarification(kind, &pending.missing_parameters(), &[]);
            session.pending = Some(pending);
            return Ok(reply);
        }

        let audit = audit.with_pending_action(Some(pending.id));
        let result = self.tools.execute(kind, &pending.parameters, &audit).await;
        session.invalidate_slots();
        let candidates = std::mem::take(&mut session.booking_candidates);

        match result {
            Ok(payload) => Ok(self.synthesizer.render(&payload)),
            Err(ToolError::Conflict { detail })
                if matches!(kind, OperationKind::CreateBooking | OperationKind::RescheduleBooking) =>
            {
                tracing::info!(
                    event_name = "negotiation.slot_conflict",
                    correlation_id = %audit.correlation_id,
                    operation = kind.tool_name(),
                    detail = %detail,
                    "requested slot was taken"
                );
                self.recover_conflict(session, kind, pending.parameters, &candidates, &audit).await
            }
            Err(error) => self.failure(kind, error),
        }
    }

    /// Offers the remaining slots of the same day and reopens the create or
    /// reschedule without its start time.
    async fn recover_conflict(
        &self,
        session: &mut Session,
        kind: OperationKind,
        mut parameters: Parameters,
        candidates: &[Booking],
        audit: &AuditContext,
    ) -> Result<String, ToolError> {
        let start_key = match kind {
            OperationKind::RescheduleBooking => ParamKey::NewStartTime,
            _ => ParamKey::StartTime,
        };
        let day = parameters
            .get(start_key)
            .and_then(|start| self.time.parse_instant(start))
            .and_then(|start| self.time.day_bounds(&start));
        parameters.remove(start_key);

        let event_type = match kind {
            OperationKind::RescheduleBooking => {
                self.event_type_of_booking(&parameters, candidates, audit).await?
            }
            _ => parameters.get(ParamKey::EventType).map(str::to_string),
        };

        let mut fresh = None;
        if let (Some((start, end)), Some(event_type)) = (day, event_type) {
            let search = Parameters::new()
                .with(ParamKey::EventType, event_type)
                .with(ParamKey::RangeStart, start.to_rfc3339())
                .with(ParamKey::RangeEnd, end.to_rfc3339());
            match self.tools.execute(OperationKind::FindSlots, &search, audit).await {
                Ok(Payload::Slots(slots)) => fresh = Some(slots),
                Ok(_) => {}
                Err(error) if error.is_fatal() => return Err(error),
                Err(error) => tracing::warn!(
                    event_name = "negotiation.conflict_slots_unavailable",
                    correlation_id = %audit.correlation_id,
                    error = %error,
                    "could not refresh slots after conflict"
                ),
            }
        }

        let mut reopened = PendingAction::open(kind, parameters);
        if let Err(error) = self.gate.advance(&mut reopened, GateEvent::MutationRequested, audit) {
            tracing::warn!(
                event_name = "negotiation.reopen_rejected",
                correlation_id = %audit.correlation_id,
                error = %error,
                "could not reopen negotiation"
            );
        }
        session.pending = Some(reopened);
        let reply = self.synthesizer.conflict(kind, fresh.as_ref());
        session.slots = fresh;
        Ok(reply)
    }

    /// Event type of the booking being moved: from the listed candidates, or
    /// from a fresh booking list when it was named by id directly.
    async fn event_type_of_booking(
        &self,
        parameters: &Parameters,
        candidates: &[Booking],
        audit: &AuditContext,
    ) -> Result<Option<String>, ToolError> {
        let Some(booking_id) = parameters.get(ParamKey::BookingId) else {
            return Ok(None);
        };
        let event_type_in = |bookings: &[Booking]| {
            bookings
                .iter()
                .find(|booking| booking.id.0 == booking_id)
                .and_then(|booking| booking.event_type_id)
                .map(|id| id.to_string())
        };
        if let Some(found) = event_type_in(candidates) {
            return Ok(Some(found));
        }

        match self.tools.execute(OperationKind::ListBookings, &Parameters::new(), audit).await {
            Ok(Payload::Bookings { bookings, .. }) => Ok(event_type_in(bookings.as_slice())),
            Ok(_) => Ok(None),
            Err(error) if error.is_fatal() => Err(error),
            Err(error) => {
                tracing::warn!(
                    event_name = "negotiation.conflict_booking_unavailable",
                    correlation_id = %audit.correlation_id,
                    error = %error,
                    "could not look up the booking being moved"
                );
                Ok(None)
            }
        }
    }

    async fn read(
        &self,
        session: &mut Session,
        kind: OperationKind,
        parameters: Parameters,
        audit: &AuditContext,
    ) -> Result<String, ToolError> {
        if let Err(problems) = self.tools.validate(kind, &parameters) {
            let missing = parameters.missing_for(kind);
            let problems = problems
                .into_iter()
                .filter(|problem| !missing.contains(&problem.key))
                .collect::<Vec<_>>();
            return Ok(self.synthesizer.clarification(kind, &missing, &problems));
        }

        let payload = match self.tools.execute(kind, &parameters, audit).await {
            Ok(payload) => payload,
            Err(error) => return self.failure(kind, error),
        };
        match &payload {
            Payload::Slots(slots) => session.slots = Some(slots.clone()),
            Payload::Bookings { bookings, .. } => session.booking_candidates = time_ordered(bookings),
            _ => {}
        }

        Ok(self.with_reminder(session, self.synthesizer.render(&payload)))
    }

    /// Appends what the open negotiation still waits for, if there is one.
    fn with_reminder(&self, session: &Session, mut reply: String) -> String {
        if let Some(pending) = &session.pending {
            reply.push_str("\n\n");
            reply.push_str(&self.synthesizer.pending_reminder(pending));
        }
        reply
    }

    async fn negotiate(
        &self,
        session: &mut Session,
        kind: OperationKind,
        mut parameters: Parameters,
        audit: &AuditContext,
    ) -> Result<String, ToolError> {
        parameters.remove(ParamKey::SlotIndex);
        parameters.remove(ParamKey::BookingIndex);

        let previous = session.pending.clone();
        let (mut pending, event) = match session.pending.take() {
            Some(mut existing) if existing.kind == kind => {
                let event = if existing.status == PendingStatus::AwaitingConfirmation {
                    GateEvent::Corrected
                } else {
                    GateEvent::ParametersSupplied
                };
                existing.parameters.merge(&parameters);
                (existing, event)
            }
            replaced => {
                if let Some(replaced) = replaced {
                    tracing::info!(
                        event_name = "negotiation.replaced",
                        correlation_id = %audit.correlation_id,
                        previous = replaced.kind.tool_name(),
                        next = kind.tool_name(),
                        "pending action replaced by a new request"
                    );
                }
                (PendingAction::open(kind, parameters), GateEvent::MutationRequested)
            }
        };

        let mut listed = None;
        if matches!(kind, OperationKind::CancelBooking | OperationKind::RescheduleBooking)
            && !pending.parameters.contains(ParamKey::BookingId)
        {
            match self.lookup_candidates(&mut pending, audit).await {
                Ok(candidates) => {
                    session.booking_candidates = candidates.clone();
                    listed = Some(candidates);
                }
                Err(error) => {
                    if error.is_fatal() {
                        return Err(error);
                    }
                    session.pending = previous;
                    return self.failure(OperationKind::ListBookings, error);
                }
            }
        }

        if pending.parameters.contains(ParamKey::BookingId) {
            pending.parameters.remove(ParamKey::BookingHint);
        }

        let mut problems = Vec::new();
        if pending.missing_parameters().is_empty() {
            if let Err(found) = self.tools.validate(kind, &pending.parameters) {
                for problem in &found {
                    pending.parameters.remove(problem.key);
                }
                problems = found;
            }
        }

        let gate_audit = audit.with_pending_action(Some(pending.id));
        if let Err(error) = self.gate.advance(&mut pending, event, &gate_audit) {
            tracing::warn!(
                event_name = "negotiation.transition_rejected",
                correlation_id = %audit.correlation_id,
                error = %error,
                "negotiation event did not match gate state"
            );
        }

        let reply = match pending.status {
            PendingStatus::AwaitingConfirmation if problems.is_empty() => {
                self.synthesizer.confirmation(&pending)
            }
            PendingStatus::AwaitingConfirmation => format!(
                "{}\n{}",
                self.synthesizer.clarification(kind, &[], &problems),
                self.synthesizer.confirmation(&pending)
            ),
            _ => match &listed {
                Some(candidates) if !pending.parameters.contains(ParamKey::BookingId) => {
                    self.synthesizer.candidates(kind, candidates)
                }
                _ => self.synthesizer.clarification(kind, &pending.missing_parameters(), &problems),
            },
        };
        session.pending = Some(pending);
        Ok(reply)
    }

    /// Lists active bookings on the mentioned day, or today, so the user can
    /// pick one. A hint matching exactly one booking selects it directly.
    async fn lookup_candidates(
        &self,
        pending: &mut PendingAction,
        audit: &AuditContext,
    ) -> Result<Vec<Booking>, ToolError> {
        let hint = pending
            .parameters
            .get(ParamKey::BookingHint)
            .and_then(|hint| self.time.parse_instant(hint));
        let bounds = match hint {
            Some(instant) => self.time.day_bounds(&instant),
            None => self.time.today_bounds(),
        };
        let Some((start, end)) = bounds else {
            return Ok(Vec::new());
        };

        let search = Parameters::new()
            .with(ParamKey::RangeStart, start.to_rfc3339())
            .with(ParamKey::RangeEnd, end.to_rfc3339());
        let bookings = match self.tools.execute(OperationKind::ListBookings, &search, audit).await? {
            Payload::Bookings { bookings, .. } => bookings,
            _ => Vec::new(),
        };
        let candidates = time_ordered(&bookings)
            .into_iter()
            .filter(|booking| {
                !matches!(booking.status, BookingStatus::Cancelled | BookingStatus::Rescheduled)
            })
            .collect::<Vec<_>>();

        if let Some(instant) = hint {
            let mut matching = candidates.iter().filter(|booking| booking.start == instant);
            if let (Some(only), None) = (matching.next(), matching.next()) {
                pending.parameters.insert(ParamKey::BookingId, only.id.0.clone());
                pending.parameters.remove(ParamKey::BookingHint);
            }
        }
        Ok(candidates)
    }

    fn failure(&self, kind: OperationKind, error: ToolError) -> Result<String, ToolError> {
        if error.is_fatal() {
            return Err(error);
        }
        Ok(self.synthesizer.error(kind, &error))
    }
}

fn time_ordered(bookings: &[Booking]) -> Vec<Booking> {
    let mut ordered = bookings.to_vec();
    ordered.sort_by_key(|booking| booking.start);
    ordered
}
