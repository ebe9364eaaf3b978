use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, FixedOffset};

use calhelper_calendar::{CalendarClient, CalendarError, CalendarOperation};
use calhelper_core::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use calhelper_core::domain::booking::{Attendee, Booking, BookingFilter, BookingId, NewBooking};
use calhelper_core::domain::event_type::{EventType, EventTypeId};
use calhelper_core::domain::operation::{OperationKind, ParamKey, Parameters};
use calhelper_core::domain::slot::{DateRange, SlotSet};
use calhelper_core::domain::time::TimeContext;
use calhelper_core::errors::ToolError;

const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Normalized result of one calendar operation.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    EventTypes(Vec<EventType>),
    Bookings { bookings: Vec<Booking>, filter: BookingFilter },
    Slots(SlotSet),
    BookingCreated(Booking),
    BookingCancelled(Booking),
    BookingRescheduled { previous: BookingId, booking: Booking },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParameterProblem {
    pub key: ParamKey,
    pub reason: String,
}

impl ParameterProblem {
    fn new(key: ParamKey, reason: impl Into<String>) -> Self {
        Self { key, reason: reason.into() }
    }

    pub fn describe(&self) -> String {
        format!("{}: {}", self.key.label(), self.reason)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 1, base_delay_ms: 250, max_delay_ms: 5_000 }
    }
}

impl RetryPolicy {
    pub fn immediate() -> Self {
        Self { max_retries: 1, base_delay_ms: 0, max_delay_ms: 0 }
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

/// Sliding-window budget of remote calls shared by every session.
#[derive(Debug)]
pub struct RateBudget {
    limit: usize,
    window: Duration,
    calls: Mutex<VecDeque<Instant>>,
}

impl RateBudget {
    pub fn per_minute(limit: u32) -> Self {
        Self::new(limit as usize, RATE_WINDOW)
    }

    pub fn new(limit: usize, window: Duration) -> Self {
        Self { limit, window, calls: Mutex::new(VecDeque::new()) }
    }

    pub fn try_acquire(&self) -> bool {
        let now = Instant::now();
        let mut calls = match self.calls.lock() {
            Ok(calls) => calls,
            Err(poisoned) => poisoned.into_inner(),
        };
        while calls.front().is_some_and(|first| now.duration_since(*first) >= self.window) {
            calls.pop_front();
        }
        if calls.len() >= self.limit {
            return false;
        }
        calls.push_back(now);
        true
    }
}

enum Command {
    ListEventTypes,
    ListBookings(BookingFilter),
    FindSlots { event_type: String, range: DateRange },
    CreateBooking { event_type: String, start: DateTime<FixedOffset>, attendee: Attendee },
    CancelBooking { booking_id: BookingId, reason: Option<String> },
    RescheduleBooking { booking_id: BookingId, new_start: DateTime<FixedOffset> },
}

/// Turns validated operation requests into calendar calls.
pub struct ToolAdapter {
    calendar: Arc<dyn CalendarClient>,
    audit: Arc<dyn AuditSink>,
    time: TimeContext,
    timeout: Duration,
    retry: RetryPolicy,
    budget: Arc<RateBudget>,
}

impl ToolAdapter {
    pub fn new(
        calendar: Arc<dyn CalendarClient>,
        audit: Arc<dyn AuditSink>,
        time: TimeContext,
        timeout: Duration,
        retry: RetryPolicy,
        budget: Arc<RateBudget>,
    ) -> Self {
        Self { calendar, audit, time, timeout, retry, budget }
    }

    pub fn time(&self) -> &TimeContext {
        &self.time
    }

    /// Local shape checks only; nothing is sent.
    pub fn validate(
        &self,
        kind: OperationKind,
        parameters: &Parameters,
    ) -> Result<(), Vec<ParameterProblem>> {
        self.command(kind, parameters).map(|_| ())
    }

    pub async fn execute(
        &self,
        kind: OperationKind,
        parameters: &Parameters,
        audit: &AuditContext,
    ) -> Result<Payload, ToolError> {
        let command = self.command(kind, parameters).map_err(|problems| {
            ToolError::InvalidParameters {
                problems: problems.iter().map(ParameterProblem::describe).collect(),
            }
        })?;

        let result = self.run(command).await;
        let (outcome, error_kind) = match &result {
            Ok(_) => (AuditOutcome::Success, None),
            Err(error) => (AuditOutcome::Failed, Some(error.kind_label())),
        };
        let mut event = AuditEvent::from_context(audit, "tool.executed", AuditCategory::Tool, outcome)
            .with_metadata("operation", kind.tool_name());
        if let Some(error_kind) = error_kind {
            event = event.with_metadata("error", error_kind);
        }
        self.audit.emit(event);
        result
    }

    fn command(
        &self,
        kind: OperationKind,
        parameters: &Parameters,
    ) -> Result<Command, Vec<ParameterProblem>> {
        let mut problems = Vec::new();
        for key in parameters.missing_for(kind) {
            problems.push(ParameterProblem::new(key, "is required"));
        }
        if !problems.is_empty() {
            return Err(problems);
        }

        let command = match kind {
            OperationKind::ListEventTypes => Command::ListEventTypes,
            OperationKind::ListBookings => {
                let after_start = self.range_bound(parameters, ParamKey::RangeStart, &mut problems);
                let before_end = self.range_bound(parameters, ParamKey::RangeEnd, &mut problems);
                if let (Some(start), Some(end)) = (after_start, before_end) {
                    if start >= end {
                        problems.push(ParameterProblem::new(
                            ParamKey::RangeEnd,
                            "must be after the start of the range",
                        ));
                    }
                }
                Command::ListBookings(BookingFilter { after_start, before_end })
            }
            OperationKind::FindSlots => {
                let event_type = self.event_type(parameters, &mut problems);
                let start = self.range_bound(parameters, ParamKey::RangeStart, &mut problems);
                let end = self.range_bound(parameters, ParamKey::RangeEnd, &mut problems);
                let range = match (start, end) {
                    (Some(start), Some(end)) => DateRange::new(start, end).or_else(|| {
                        problems.push(ParameterProblem::new(
                            ParamKey::RangeEnd,
                            "must be after the start of the range",
                        ));
                        None
                    }),
                    _ => None,
                };
                match range {
                    Some(range) => Command::FindSlots { event_type, range },
                    None => return Err(problems),
                }
            }
            OperationKind::CreateBooking => {
                let event_type = self.event_type(parameters, &mut problems);
                let start = self.instant(parameters, ParamKey::StartTime, &mut problems);
                let attendee = self.attendee(parameters, &mut problems);
                match start {
                    Some(start) => Command::CreateBooking { event_type, start, attendee },
                    None => return Err(problems),
                }
            }
            OperationKind::CancelBooking => Command::CancelBooking {
                booking_id: self.booking_id(parameters, &mut problems),
                reason: parameters.get(ParamKey::Reason).map(str::to_string),
            },
            OperationKind::RescheduleBooking => {
                let booking_id = self.booking_id(parameters, &mut problems);
                match self.instant(parameters, ParamKey::NewStartTime, &mut problems) {
                    Some(new_start) => Command::RescheduleBooking { booking_id, new_start },
                    None => return Err(problems),
                }
            }
            OperationKind::None => {
                return Err(vec![ParameterProblem::new(
                    ParamKey::EventType,
                    "no calendar operation was requested",
                )]);
            }
        };

        if problems.is_empty() {
            Ok(command)
        } else {
            Err(problems)
        }
    }

    fn range_bound(
        &self,
        parameters: &Parameters,
        key: ParamKey,
        problems: &mut Vec<ParameterProblem>,
    ) -> Option<DateTime<FixedOffset>> {
        let value = parameters.get(key)?;
        let parsed = match key {
            ParamKey::RangeEnd => self.time.parse_range_end(value),
            _ => self.time.parse_range_start(value),
        };
        if parsed.is_none() {
            problems.push(ParameterProblem::new(
                key,
                format!("`{value}` is not a date or ISO-8601 time"),
            ));
        }
        parsed
    }

    fn instant(
        &self,
        parameters: &Parameters,
        key: ParamKey,
        problems: &mut Vec<ParameterProblem>,
    ) -> Option<DateTime<FixedOffset>> {
        let value = parameters.get(key)?;
        let parsed = self.time.parse_instant(value);
        if parsed.is_none() {
            problems.push(ParameterProblem::new(
                key,
                format!("`{value}` is not an ISO-8601 time such as 2025-07-10T09:00:00-0700"),
            ));
        }
        parsed
    }

    fn event_type(&self, parameters: &Parameters, problems: &mut Vec<ParameterProblem>) -> String {
        let value = parameters.get(ParamKey::EventType).unwrap_or_default().to_string();
        if value.is_empty() {
            problems.push(ParameterProblem::new(ParamKey::EventType, "is required"));
        }
        value
    }

    fn booking_id(&self, parameters: &Parameters, problems: &mut Vec<ParameterProblem>) -> BookingId {
        let booking_id = BookingId(parameters.get(ParamKey::BookingId).unwrap_or_default().to_string());
        if !booking_id.is_well_formed() {
            problems.push(ParameterProblem::new(
                ParamKey::BookingId,
                format!("`{booking_id}` is not a booking id"),
            ));
        }
        booking_id
    }

    fn attendee(&self, parameters: &Parameters, problems: &mut Vec<ParameterProblem>) -> Attendee {
        let name = parameters.get(ParamKey::AttendeeName).unwrap_or_default().to_string();
        let email = parameters.get(ParamKey::AttendeeEmail).unwrap_or_default().to_string();
        if !is_plausible_email(&email) {
            problems.push(ParameterProblem::new(
                ParamKey::AttendeeEmail,
                format!("`{email}` is not an email address"),
            ));
        }

        let time_zone = match parameters.get(ParamKey::AttendeeTimeZone) {
            Some(zone) => match TimeContext::from_zone_name(zone) {
                Some(context) => context.zone_name().to_string(),
                None => {
                    problems.push(ParameterProblem::new(
                        ParamKey::AttendeeTimeZone,
                        format!("`{zone}` is not an IANA time zone"),
                    ));
                    zone.to_string()
                }
            },
            None => self.time.zone_name().to_string(),
        };

        Attendee { name, email, time_zone }
    }

    async fn run(&self, command: Command) -> Result<Payload, ToolError> {
        match command {
            Command::ListEventTypes => {
                let event_types = self.list_event_types().await?;
                Ok(Payload::EventTypes(event_types))
            }
            Command::ListBookings(filter) => {
                let bookings = self
                    .call(CalendarOperation::ListBookings, || self.calendar.list_bookings(&filter))
                    .await?;
                Ok(Payload::Bookings { bookings, filter })
            }
            Command::FindSlots { event_type, range } => {
                let event_type_id = self.resolve_event_type(&event_type).await?;
                let slots = self
                    .call(CalendarOperation::FindSlots, || {
                        self.calendar.find_slots(event_type_id, &range)
                    })
                    .await?;
                Ok(Payload::Slots(SlotSet::new(event_type_id, range, slots)))
            }
            Command::CreateBooking { event_type, start, attendee } => {
                let event_type_id = self.resolve_event_type(&event_type).await?;
                let booking = NewBooking { event_type_id, start, attendee };
                let created = self
                    .call(CalendarOperation::CreateBooking, || {
                        self.calendar.create_booking(&booking)
                    })
                    .await?;
                Ok(Payload::BookingCreated(created))
            }
            Command::CancelBooking { booking_id, reason } => {
                let cancelled = self
                    .call(CalendarOperation::CancelBooking, || {
                        self.calendar.cancel_booking(&booking_id, reason.as_deref())
                    })
                    .await?;
                Ok(Payload::BookingCancelled(cancelled))
            }
            Command::RescheduleBooking { booking_id, new_start } => {
                let booking = self
                    .call(CalendarOperation::RescheduleBooking, || {
                        self.calendar.reschedule_booking(&booking_id, new_start)
                    })
                    .await?;
                Ok(Payload::BookingRescheduled { previous: booking_id, booking })
            }
        }
    }

    async fn list_event_types(&self) -> Result<Vec<EventType>, ToolError> {
        self.call(CalendarOperation::ListEventTypes, || self.calendar.list_event_types()).await
    }

    async fn resolve_event_type(&self, reference: &str) -> Result<EventTypeId, ToolError> {
        if let Ok(id) = reference.trim().parse::<u64>() {
            return Ok(EventTypeId(id));
        }

        self.list_event_types()
            .await?
            .into_iter()
            .find(|event_type| event_type.matches(reference))
            .map(|event_type| event_type.id)
            .ok_or_else(|| ToolError::NotFound { resource: format!("event type `{reference}`") })
    }

    /// Budgeted, time-bounded call. Reads get one retry on transient failure;
    /// mutations never repeat.
    async fn call<T, F, Fut>(&self, operation: CalendarOperation, request: F) -> Result<T, ToolError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, CalendarError>>,
    {
        let mut attempt = 0_u32;
        loop {
            if !self.budget.try_acquire() {
                tracing::warn!(
                    event_name = "tool.rate_limited",
                    operation = operation.as_str(),
                    "calendar rate budget exhausted"
                );
                return Err(ToolError::transient("too many calendar requests in the last minute"));
            }

            let result = match tokio::time::timeout(self.timeout, request()).await {
                Ok(result) => result,
                Err(_) => Err(CalendarError::Timeout { request_sent: true }),
            };
            let error = match result {
                Ok(value) => return Ok(value),
                Err(error) => {
                    tracing::debug!(
                        event_name = "tool.remote_error",
                        operation = operation.as_str(),
                        remote = %error,
                        "calendar returned an error"
                    );
                    map_calendar_error(operation, error)
                }
            };

            let retryable = !operation.is_mutating() && error.is_transient();
            if !retryable || attempt >= self.retry.max_retries {
                tracing::warn!(
                    event_name = "tool.call_failed",
                    operation = operation.as_str(),
                    attempt,
                    error = %error,
                    "calendar call failed"
                );
                return Err(error);
            }

            attempt += 1;
            let delay = self.retry.delay_for_attempt(attempt);
            tracing::info!(
                event_name = "tool.retry_scheduled",
                operation = operation.as_str(),
                attempt,
                delay_ms = delay.as_millis() as u64,
                "retrying calendar call"
            );
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }
}

fn map_calendar_error(operation: CalendarOperation, error: CalendarError) -> ToolError {
    let outcome_unknown = operation.is_mutating() && error.request_sent();
    match error {
        CalendarError::Status { status: 401 | 403, .. } => ToolError::Unauthorized,
        CalendarError::Status { status: 404, .. } => {
            ToolError::NotFound { resource: missing_resource(operation).to_string() }
        }
        CalendarError::Status { status: 409, .. } => {
            ToolError::Conflict { detail: "the requested time is no longer available".to_string() }
        }
        CalendarError::Status { status: 429, message } => {
            ToolError::Transient { detail: message, outcome_unknown: false }
        }
        CalendarError::Status { status, message } if status >= 500 => {
            ToolError::Transient { detail: message, outcome_unknown }
        }
        CalendarError::Status { status, .. } => ToolError::InvalidParameters {
            problems: vec![format!("the calendar did not accept these details (status {status})")],
        },
        CalendarError::Network { message, .. } => ToolError::Transient { detail: message, outcome_unknown },
        CalendarError::Timeout { .. } => {
            ToolError::Transient { detail: "the calendar did not answer in time".to_string(), outcome_unknown }
        }
        CalendarError::Decode(message) => ToolError::Transient { detail: message, outcome_unknown },
    }
}

/// Remote 404 bodies are not shown to the user; name what was missing instead.
fn missing_resource(operation: CalendarOperation) -> &'static str {
    match operation {
        CalendarOperation::ListEventTypes
        | CalendarOperation::FindSlots
        | CalendarOperation::CreateBooking => "the event type",
        CalendarOperation::CancelBooking | CalendarOperation::RescheduleBooking => "the booking",
        CalendarOperation::ListBookings | CalendarOperation::Profile => "the calendar account",
    }
}

fn is_plausible_email(value: &str) -> bool {
    let mut parts = value.split('@');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(local), Some(domain), None) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !value.chars().any(char::is_whitespace)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::DateTime;

    use calhelper_calendar::{CalendarError, CalendarOperation, InMemoryCalendar};
    use calhelper_core::audit::{AuditContext, InMemoryAuditSink};
    use calhelper_core::domain::event_type::{EventType, EventTypeId};
    use calhelper_core::domain::operation::{OperationKind, ParamKey, Parameters};
    use calhelper_core::domain::time::TimeContext;
    use calhelper_core::errors::ToolError;

    use super::{is_plausible_email, Payload, RateBudget, RetryPolicy, ToolAdapter};

    fn calendar() -> Arc<InMemoryCalendar> {
        Arc::new(
            InMemoryCalendar::new()
                .with_event_type(EventType {
                    id: EventTypeId(42),
                    title: "30 Min Meeting".to_string(),
                    slug: "30min".to_string(),
                    length_minutes: 30,
                    description: None,
                })
                .with_slot(
                    EventTypeId(42),
                    DateTime::parse_from_rfc3339("2025-07-10T16:00:00Z").expect("valid"),
                ),
        )
    }

    fn adapter(calendar: Arc<InMemoryCalendar>, budget: usize) -> ToolAdapter {
        ToolAdapter::new(
            calendar,
            Arc::new(InMemoryAuditSink::default()),
            TimeContext::utc(),
            Duration::from_millis(200),
            RetryPolicy::immediate(),
            Arc::new(RateBudget::new(budget, Duration::from_secs(60))),
        )
    }

    fn audit() -> AuditContext {
        AuditContext::new(None, None, "req-test", "tool-adapter")
    }

    #[tokio::test]
    async fn transient_read_is_retried_exactly_once() {
        let calendar = calendar();
        let adapter = adapter(Arc::clone(&calendar), 10);
        for _ in 0..2 {
            calendar
                .fail_next(CalendarOperation::ListBookings, CalendarError::status(503, "down"))
                .await;
        }

        let error = adapter
            .execute(OperationKind::ListBookings, &Parameters::new(), &audit())
            .await
            .expect_err("both attempts fail");

        assert!(error.is_transient());
        assert_eq!(calendar.count(CalendarOperation::ListBookings).await, 2);
    }

    #[tokio::test]
    async fn mutations_are_never_retried_and_flag_unknown_outcome() {
        let calendar = calendar();
        let adapter = adapter(Arc::clone(&calendar), 10);
        calendar
            .fail_next(
                CalendarOperation::CancelBooking,
                CalendarError::Timeout { request_sent: true },
            )
            .await;

        let error = adapter
            .execute(
                OperationKind::CancelBooking,
                &Parameters::new().with(ParamKey::BookingId, "uid-1"),
                &audit(),
            )
            .await
            .expect_err("timeout");

        assert_eq!(
            error,
            ToolError::Transient {
                detail: "the calendar did not answer in time".to_string(),
                outcome_unknown: true
            }
        );
        assert_eq!(calendar.count(CalendarOperation::CancelBooking).await, 1);
    }

    #[tokio::test]
    async fn invalid_parameters_never_reach_the_calendar() {
        let calendar = calendar();
        let adapter = adapter(Arc::clone(&calendar), 10);
        let parameters = Parameters::new()
            .with(ParamKey::EventType, "42")
            .with(ParamKey::StartTime, "tomorrow-ish")
            .with(ParamKey::AttendeeName, "Ana")
            .with(ParamKey::AttendeeEmail, "ana at example");

        let error = adapter
            .execute(OperationKind::CreateBooking, &parameters, &audit())
            .await
            .expect_err("invalid");

        let problems = match error {
            ToolError::InvalidParameters { problems } => problems,
            other => panic!("unexpected error {other:?}"),
        };
        assert_eq!(problems.len(), 2);
        assert!(calendar.calls().await.is_empty());
    }

    #[tokio::test]
    async fn event_type_names_are_resolved() {
        let calendar = calendar();
        let adapter = adapter(Arc::clone(&calendar), 10);
        let parameters = Parameters::new()
            .with(ParamKey::EventType, "30 min meeting")
            .with(ParamKey::RangeStart, "2025-07-10");

        let missing_end = adapter.execute(OperationKind::FindSlots, &parameters, &audit()).await;
        assert!(matches!(missing_end, Err(ToolError::InvalidParameters { .. })));

        let parameters = parameters.with(ParamKey::RangeEnd, "2025-07-10");
        let payload = adapter
            .execute(OperationKind::FindSlots, &parameters, &audit())
            .await
            .expect("slots found");

        match payload {
            Payload::Slots(set) => {
                assert_eq!(set.event_type_id, EventTypeId(42));
                assert_eq!(set.len(), 1);
            }
            other => panic!("unexpected payload {other:?}"),
        }

        let unknown = adapter
            .execute(
                OperationKind::FindSlots,
                &parameters.clone().with(ParamKey::EventType, "board meeting"),
                &audit(),
            )
            .await;
        assert!(matches!(unknown, Err(ToolError::NotFound { .. })));
    }

    #[tokio::test]
    async fn remote_error_text_is_not_passed_through() {
        let calendar = calendar();
        let adapter = adapter(Arc::clone(&calendar), 10);
        let parameters = Parameters::new().with(ParamKey::BookingId, "uid-gone");

        let missing = adapter
            .execute(OperationKind::CancelBooking, &parameters, &audit())
            .await
            .expect_err("unknown booking");
        match missing {
            ToolError::NotFound { resource } => {
                assert_eq!(resource, "the booking");
                assert!(!resource.contains("uid-gone"));
            }
            other => panic!("unexpected error {other:?}"),
        }

        calendar
            .fail_next(
                CalendarOperation::ListBookings,
                CalendarError::status(422, "{\"field\":\"internal.trace\"}"),
            )
            .await;
        let rejected = adapter
            .execute(OperationKind::ListBookings, &Parameters::new(), &audit())
            .await
            .expect_err("rejected");
        match rejected {
            ToolError::InvalidParameters { problems } => {
                assert_eq!(problems.len(), 1);
                assert!(problems[0].contains("422"));
                assert!(!problems[0].contains("internal.trace"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn budget_rejects_without_contacting_remote() {
        let calendar = calendar();
        let adapter = adapter(Arc::clone(&calendar), 1);

        adapter
            .execute(OperationKind::ListEventTypes, &Parameters::new(), &audit())
            .await
            .expect("first call fits the budget");
        let error = adapter
            .execute(OperationKind::ListEventTypes, &Parameters::new(), &audit())
            .await
            .expect_err("budget exhausted");

        assert!(error.is_transient());
        assert_eq!(calendar.count(CalendarOperation::ListEventTypes).await, 1);
    }

    #[tokio::test]
    async fn slow_calendar_times_out() {
        let calendar = Arc::new(InMemoryCalendar::new().with_latency(Duration::from_secs(5)));
        let adapter = adapter(Arc::clone(&calendar), 10);

        let error = adapter
            .execute(OperationKind::ListEventTypes, &Parameters::new(), &audit())
            .await
            .expect_err("times out");

        assert!(error.is_transient());
    }

    #[tokio::test]
    async fn credential_failures_are_fatal() {
        let calendar = calendar();
        let adapter = adapter(Arc::clone(&calendar), 10);
        calendar
            .fail_next(CalendarOperation::ListEventTypes, CalendarError::status(401, "invalid key"))
            .await;

        let error = adapter
            .execute(OperationKind::ListEventTypes, &Parameters::new(), &audit())
            .await
            .expect_err("unauthorized");
        assert!(error.is_fatal());
        assert_eq!(calendar.count(CalendarOperation::ListEventTypes).await, 1);
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy { max_retries: 3, base_delay_ms: 250, max_delay_ms: 600 };
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(250));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(600));
    }

    #[test]
    fn email_shape() {
        assert!(is_plausible_email("ana@example.com"));
        assert!(!is_plausible_email("ana@localhost"));
        assert!(!is_plausible_email("ana example@x.com"));
        assert!(!is_plausible_email("@example.com"));
    }
}
