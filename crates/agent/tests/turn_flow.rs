//! End-to-end turns against a scripted interpreter and the in-memory calendar.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use serde_json::json;

use calhelper_agent::{
    AgentRuntime, InterpretationContext, InterpretedCall, Interpreter, InterpreterError,
    RetryPolicy,
};
use calhelper_calendar::{CalendarError, CalendarOperation, InMemoryCalendar};
use calhelper_core::audit::InMemoryAuditSink;
use calhelper_core::domain::booking::{Attendee, Booking, BookingId, BookingStatus};
use calhelper_core::domain::event_type::{EventType, EventTypeId};
use calhelper_core::domain::operation::{OperationKind, ParamKey};
use calhelper_core::domain::session::SessionId;
use calhelper_core::domain::time::TimeContext;
use calhelper_core::errors::TurnError;
use calhelper_core::flows::PendingStatus;

#[derive(Default)]
struct ScriptedInterpreter {
    script: Mutex<VecDeque<Result<InterpretedCall, InterpreterError>>>,
    contexts: Mutex<Vec<InterpretationContext>>,
}

impl ScriptedInterpreter {
    fn push(&self, call: InterpretedCall) {
        self.script.lock().expect("script lock").push_back(Ok(call));
    }

    fn push_error(&self, error: InterpreterError) {
        self.script.lock().expect("script lock").push_back(Err(error));
    }

    fn calls(&self) -> usize {
        self.contexts.lock().expect("contexts lock").len()
    }
}

#[async_trait]
impl Interpreter for ScriptedInterpreter {
    async fn interpret(
        &self,
        context: &InterpretationContext,
    ) -> Result<InterpretedCall, InterpreterError> {
        self.contexts.lock().expect("contexts lock").push(context.clone());
        self.script
            .lock()
            .expect("script lock")
            .pop_front()
            .unwrap_or_else(|| Ok(InterpretedCall::reply("How can I help with your calendar?")))
    }
}

struct Harness {
    runtime: AgentRuntime,
    calendar: Arc<InMemoryCalendar>,
    interpreter: Arc<ScriptedInterpreter>,
    audit: InMemoryAuditSink,
    session: SessionId,
}

impl Harness {
    fn new(calendar: InMemoryCalendar) -> Self {
        Self::with_budget(calendar, 100)
    }

    fn with_budget(calendar: InMemoryCalendar, requests_per_minute: u32) -> Self {
        let calendar = Arc::new(calendar);
        let interpreter = Arc::new(ScriptedInterpreter::default());
        let audit = InMemoryAuditSink::default();
        let runtime = AgentRuntime::builder()
            .calendar(calendar.clone())
            .interpreter(interpreter.clone())
            .audit(Arc::new(audit.clone()))
            .time(TimeContext::utc())
            .retry(RetryPolicy::immediate())
            .tool_timeout(Duration::from_secs(2))
            .requests_per_minute(requests_per_minute)
            .build()
            .expect("runtime builds");

        Self { runtime, calendar, interpreter, audit, session: SessionId::from("sess-it") }
    }

    async fn say(&self, text: &str) -> String {
        self.runtime.handle_turn(&self.session, text).await.expect("turn succeeds")
    }

    async fn pending_status(&self) -> PendingStatus {
        self.runtime.sessions().get(&self.session).await.pending_status()
    }
}

fn at(value: &str) -> DateTime<FixedOffset> {
    DateTime::parse_from_rfc3339(value).expect("valid instant")
}

fn intro_call() -> EventType {
    EventType {
        id: EventTypeId(42),
        title: "30 Min Meeting".to_string(),
        slug: "30min".to_string(),
        length_minutes: 30,
        description: None,
    }
}

fn booking(uid: &str, start: DateTime<FixedOffset>) -> Booking {
    Booking {
        id: BookingId(uid.to_string()),
        title: format!("Sync {uid}"),
        event_type_id: Some(EventTypeId(42)),
        start,
        end: start + chrono::Duration::minutes(30),
        attendees: vec![Attendee {
            name: "Bo".to_string(),
            email: "bo@example.com".to_string(),
            time_zone: "UTC".to_string(),
        }],
        status: BookingStatus::Confirmed,
    }
}

fn calendar_with_slots() -> InMemoryCalendar {
    InMemoryCalendar::new()
        .with_event_type(intro_call())
        .with_slot(EventTypeId(42), at("2030-07-10T16:00:00Z"))
        .with_slot(EventTypeId(42), at("2030-07-10T18:00:00Z"))
}

#[tokio::test]
async fn missing_attendee_merges_and_mutation_runs_once_after_yes() {
    let harness = Harness::new(calendar_with_slots());

    harness.interpreter.push(InterpretedCall::tool(
        "create_booking",
        json!({ "event_type": "30min", "start_time": "2030-07-10T16:00:00Z" }),
    ));
    let reply = harness.say("book a 30 minute call on July 10 2030 at 4pm").await;
    assert!(reply.contains("attendee name"), "{reply}");
    assert_eq!(harness.pending_status().await, PendingStatus::CollectingParameters);
    let opened = harness.runtime.sessions().get(&harness.session).await.pending.expect("pending");

    harness.interpreter.push(InterpretedCall::tool(
        "none",
        json!({ "attendee_name": "Ana", "attendee_email": "ana@example.com" }),
    ));
    let reply = harness.say("It's for Ana, ana@example.com").await;
    assert!(reply.starts_with("Please confirm: create a booking"), "{reply}");
    let awaiting = harness.runtime.sessions().get(&harness.session).await.pending.expect("pending");
    assert_eq!(awaiting.id, opened.id);
    assert_eq!(awaiting.status, PendingStatus::AwaitingConfirmation);
    assert_eq!(harness.calendar.mutating_calls().await, 0);

    let interpreted_before_yes = harness.interpreter.calls();
    let reply = harness.say("yes").await;
    assert!(reply.starts_with("Booked"), "{reply}");
    assert_eq!(harness.interpreter.calls(), interpreted_before_yes);
    assert_eq!(harness.calendar.count(CalendarOperation::CreateBooking).await, 1);
    assert_eq!(harness.pending_status().await, PendingStatus::None);

    let reply = harness.say("yes").await;
    assert!(reply.contains("nothing waiting"), "{reply}");
    assert_eq!(harness.calendar.count(CalendarOperation::CreateBooking).await, 1);
    assert_eq!(harness.audit.events_of_type("tool.executed").len(), 1);
}

#[tokio::test]
async fn declining_clears_the_pending_action_without_calls() {
    let harness = Harness::new(calendar_with_slots());
    harness.interpreter.push(InterpretedCall::tool(
        "create_booking",
        json!({
            "event_type": "42",
            "start_time": "2030-07-10T16:00:00Z",
            "attendee_name": "Ana",
            "attendee_email": "ana@example.com"
        }),
    ));

    let reply = harness.say("book Ana at 4pm on the 10th").await;
    assert!(reply.starts_with("Please confirm"), "{reply}");

    let reply = harness.say("No").await;
    assert!(reply.starts_with("Okay, I won't create a booking"), "{reply}");
    assert_eq!(harness.pending_status().await, PendingStatus::None);
    assert!(harness.calendar.calls().await.is_empty());
}

#[tokio::test]
async fn affirmative_while_collecting_does_not_execute() {
    let harness = Harness::new(calendar_with_slots());
    harness.interpreter.push(InterpretedCall::tool(
        "create_booking",
        json!({ "event_type": "42", "start_time": "2030-07-10T16:00:00Z" }),
    ));
    harness.say("book the intro call at 4pm").await;

    let reply = harness.say("ok").await;
    assert!(reply.contains("I still need"), "{reply}");
    assert_eq!(harness.calendar.mutating_calls().await, 0);
    assert_eq!(harness.pending_status().await, PendingStatus::CollectingParameters);
}

#[tokio::test]
async fn listing_bookings_bypasses_the_gate_and_is_time_ordered() {
    let harness = Harness::new(
        InMemoryCalendar::new()
            .with_booking(booking("late", at("2030-07-12T15:00:00Z")))
            .with_booking(booking("early", at("2030-07-11T09:00:00Z"))),
    );
    harness.interpreter.push(InterpretedCall::tool(
        "list_bookings",
        json!({ "range_start": "2030-07-08", "range_end": "2030-07-14" }),
    ));

    let reply = harness.say("show my meetings this week").await;
    let early = reply.find("Sync early").expect("early listed");
    let late = reply.find("Sync late").expect("late listed");
    assert!(early < late, "{reply}");
    assert_eq!(harness.pending_status().await, PendingStatus::None);

    harness.interpreter.push(InterpretedCall::tool(
        "list_bookings",
        json!({ "range_start": "2031-01-01", "range_end": "2031-01-07" }),
    ));
    let reply = harness.say("and the first week of 2031?").await;
    assert_eq!(reply, "No meetings found for that period.");
}

#[tokio::test]
async fn unresolved_cancel_lists_todays_candidates_then_confirms_choice() {
    let (midnight, _) = TimeContext::utc().today_bounds().expect("today has bounds");
    let three_pm = midnight + chrono::Duration::hours(15);
    let harness = Harness::new(
        InMemoryCalendar::new()
            .with_booking(booking("uid-a", three_pm))
            .with_booking(booking("uid-morning", midnight + chrono::Duration::hours(9)))
            .with_booking(booking("uid-b", three_pm)),
    );

    harness.interpreter.push(InterpretedCall::tool(
        "cancel_booking",
        json!({ "booking_hint": three_pm.to_rfc3339() }),
    ));
    let reply = harness.say("cancel my 3pm meeting").await;
    assert!(reply.starts_with("Which meeting should I cancel?"), "{reply}");
    assert!(reply.contains("3. "), "{reply}");
    assert_eq!(harness.pending_status().await, PendingStatus::CollectingParameters);
    assert_eq!(harness.calendar.mutating_calls().await, 0);

    harness.interpreter.push(InterpretedCall::tool("none", json!({ "booking_index": 3 })));
    let reply = harness.say("the last one").await;
    assert!(reply.starts_with("Please confirm: cancel a booking"), "{reply}");
    assert!(reply.contains("uid-b"), "{reply}");

    harness.say("yes").await;
    assert_eq!(harness.calendar.count(CalendarOperation::CancelBooking).await, 1);
    let cancelled = harness
        .calendar
        .bookings()
        .await
        .into_iter()
        .filter(|booking| booking.status == BookingStatus::Cancelled)
        .map(|booking| booking.id.0)
        .collect::<Vec<_>>();
    assert_eq!(cancelled, vec!["uid-b".to_string()]);
}

#[tokio::test]
async fn second_listed_slot_is_booked_exactly_once() {
    let harness = Harness::new(calendar_with_slots());

    harness.interpreter.push(InterpretedCall::tool(
        "find_slots",
        json!({ "event_type": "30min", "range_start": "2030-07-10" }),
    ));
    let reply = harness.say("when am I free on July 10 2030?").await;
    assert!(reply.contains("1. ") && reply.contains("2. "), "{reply}");

    harness.interpreter.push(InterpretedCall::tool(
        "none",
        json!({ "slot_index": 2, "attendee_name": "Ana", "attendee_email": "ana@example.com" }),
    ));
    let reply = harness.say("the second one, for Ana at ana@example.com").await;
    assert!(reply.starts_with("Please confirm: create a booking"), "{reply}");

    harness.say("go ahead").await;
    let bookings = harness.calendar.bookings().await;
    assert_eq!(harness.calendar.count(CalendarOperation::CreateBooking).await, 1);
    assert_eq!(bookings.len(), 1);
    assert_eq!(bookings[0].start, at("2030-07-10T18:00:00Z"));

    let session = harness.runtime.sessions().get(&harness.session).await;
    assert!(session.slots.is_none());
}

#[tokio::test]
async fn transient_list_failure_retries_once_and_keeps_pending_action() {
    let harness = Harness::new(calendar_with_slots());
    harness.interpreter.push(InterpretedCall::tool(
        "create_booking",
        json!({ "event_type": "42", "start_time": "2030-07-10T16:00:00Z" }),
    ));
    harness.say("book the intro call at 4pm").await;
    let before = harness.runtime.sessions().get(&harness.session).await.pending;

    for _ in 0..2 {
        harness
            .calendar
            .fail_next(CalendarOperation::ListBookings, CalendarError::status(503, "maintenance"))
            .await;
    }
    harness.interpreter.push(InterpretedCall::tool("list_bookings", json!({})));
    let reply = harness.say("what's on my calendar?").await;

    assert!(reply.contains("temporarily unavailable"), "{reply}");
    assert_eq!(harness.calendar.count(CalendarOperation::ListBookings).await, 2);
    assert_eq!(harness.runtime.sessions().get(&harness.session).await.pending, before);
}

#[tokio::test]
async fn taken_slot_offers_fresh_slots_and_reopens_booking() {
    let harness = Harness::new(calendar_with_slots());
    harness.interpreter.push(InterpretedCall::tool(
        "create_booking",
        json!({
            "event_type": "42",
            "start_time": "2030-07-10T16:00:00Z",
            "attendee_name": "Ana",
            "attendee_email": "ana@example.com"
        }),
    ));
    harness.say("book Ana at 4pm on July 10 2030").await;
    let confirmed = harness.runtime.sessions().get(&harness.session).await.pending.expect("pending");

    harness.calendar.remove_slot(EventTypeId(42), at("2030-07-10T16:00:00Z")).await;
    let reply = harness.say("yes").await;

    assert!(reply.starts_with("That time was just taken."), "{reply}");
    assert!(reply.contains("1. "), "{reply}");
    let session = harness.runtime.sessions().get(&harness.session).await;
    let reopened = session.pending.expect("booking reopened");
    assert_ne!(reopened.id, confirmed.id);
    assert_eq!(reopened.kind, OperationKind::CreateBooking);
    assert_eq!(reopened.status, PendingStatus::CollectingParameters);
    assert!(!reopened.parameters.contains(ParamKey::StartTime));
    assert_eq!(session.slots.map(|set| set.len()), Some(1));
    assert_eq!(harness.calendar.count(CalendarOperation::CreateBooking).await, 1);
}

#[tokio::test]
async fn taken_reschedule_slot_offers_same_day_slots_and_reopens_move() {
    let harness = Harness::new(
        calendar_with_slots().with_booking(booking("uid-1", at("2030-07-09T15:00:00Z"))),
    );
    harness.interpreter.push(InterpretedCall::tool(
        "reschedule_booking",
        json!({ "booking_id": "uid-1", "new_start_time": "2030-07-10T16:00:00Z" }),
    ));
    let reply = harness.say("move uid-1 to 4pm on July 10 2030").await;
    assert!(reply.starts_with("Please confirm: reschedule"), "{reply}");

    harness.calendar.remove_slot(EventTypeId(42), at("2030-07-10T16:00:00Z")).await;
    let reply = harness.say("yes").await;

    assert!(reply.starts_with("That time was just taken."), "{reply}");
    assert!(reply.contains("1. "), "{reply}");
    assert!(reply.contains("move the meeting there"), "{reply}");
    let session = harness.runtime.sessions().get(&harness.session).await;
    let reopened = session.pending.expect("reschedule reopened");
    assert_eq!(reopened.kind, OperationKind::RescheduleBooking);
    assert_eq!(reopened.status, PendingStatus::CollectingParameters);
    assert!(!reopened.parameters.contains(ParamKey::NewStartTime));
    assert_eq!(reopened.parameters.get(ParamKey::BookingId), Some("uid-1"));
    assert_eq!(session.slots.map(|set| set.len()), Some(1));

    harness.interpreter.push(InterpretedCall::tool("none", json!({ "slot_index": 1 })));
    let reply = harness.say("the first one").await;
    assert!(reply.starts_with("Please confirm: reschedule"), "{reply}");

    harness.say("yes").await;
    assert_eq!(harness.calendar.count(CalendarOperation::RescheduleBooking).await, 2);
    let moved = harness
        .calendar
        .bookings()
        .await
        .into_iter()
        .filter(|booking| booking.status == BookingStatus::Confirmed)
        .map(|booking| booking.start)
        .collect::<Vec<_>>();
    assert_eq!(moved, vec![at("2030-07-10T18:00:00Z")]);
}

#[tokio::test]
async fn failed_candidate_lookup_leaves_no_half_open_cancel() {
    let harness = Harness::new(
        calendar_with_slots().with_booking(booking("uid-1", at("2030-07-09T15:00:00Z"))),
    );
    for _ in 0..2 {
        harness
            .calendar
            .fail_next(CalendarOperation::ListBookings, CalendarError::status(503, "maintenance"))
            .await;
    }
    harness.interpreter.push(InterpretedCall::tool("cancel_booking", json!({})));
    let reply = harness.say("cancel my meeting").await;
    assert!(reply.contains("temporarily unavailable"), "{reply}");
    assert_eq!(harness.pending_status().await, PendingStatus::None);

    harness
        .interpreter
        .push(InterpretedCall::tool("cancel_booking", json!({ "booking_id": "uid-1" })));
    let reply = harness.say("cancel uid-1").await;
    assert!(reply.starts_with("Please confirm: cancel a booking"), "{reply}");

    harness.say("yes").await;
    assert_eq!(harness.calendar.count(CalendarOperation::CancelBooking).await, 1);
}

#[tokio::test]
async fn interpreter_outage_restates_the_open_confirmation() {
    let harness = Harness::new(calendar_with_slots());
    harness.interpreter.push(InterpretedCall::tool(
        "create_booking",
        json!({
            "event_type": "42",
            "start_time": "2030-07-10T16:00:00Z",
            "attendee_name": "Ana",
            "attendee_email": "ana@example.com"
        }),
    ));
    harness.say("book Ana at 4pm on July 10 2030").await;
    assert_eq!(harness.pending_status().await, PendingStatus::AwaitingConfirmation);

    harness.interpreter.push_error(InterpreterError::Timeout);
    let reply = harness.say("what about the morning instead?").await;

    assert!(reply.contains("Still waiting for your yes or no"), "{reply}");
    assert_eq!(harness.pending_status().await, PendingStatus::AwaitingConfirmation);
    assert_eq!(harness.calendar.mutating_calls().await, 0);
}

#[tokio::test]
async fn rejected_credentials_end_the_session() {
    let harness = Harness::new(calendar_with_slots());
    harness
        .calendar
        .fail_next(CalendarOperation::ListEventTypes, CalendarError::status(401, "invalid api key"))
        .await;
    harness.interpreter.push(InterpretedCall::tool("list_event_types", json!({})));

    let error = harness
        .runtime
        .handle_turn(&harness.session, "what event types do I have?")
        .await
        .expect_err("credentials rejected");

    assert_eq!(error, TurnError::Unauthorized { session_id: harness.session.clone() });
    assert_eq!(harness.runtime.sessions().active_sessions().await, 0);
    assert_eq!(harness.audit.events_of_type("session.terminated").len(), 1);
}

#[tokio::test]
async fn calls_past_the_rate_budget_never_reach_the_calendar() {
    let harness = Harness::with_budget(calendar_with_slots(), 1);
    harness.interpreter.push(InterpretedCall::tool("list_event_types", json!({})));
    harness.interpreter.push(InterpretedCall::tool("list_event_types", json!({})));

    let first = harness.say("list my event types").await;
    assert!(first.contains("30 Min Meeting"), "{first}");
    let second = harness.say("list them again").await;

    assert!(second.contains("temporarily unavailable"), "{second}");
    assert_eq!(harness.calendar.count(CalendarOperation::ListEventTypes).await, 1);
}

#[tokio::test]
async fn blank_input_and_small_talk_touch_nothing() {
    let harness = Harness::new(calendar_with_slots());

    let reply = harness.say("   ").await;
    assert!(reply.contains("didn't catch"), "{reply}");
    assert_eq!(harness.interpreter.calls(), 0);

    harness.interpreter.push(InterpretedCall::reply("Hello! I can help with your calendar."));
    let reply = harness.say("hi there").await;
    assert_eq!(reply, "Hello! I can help with your calendar.");
    assert!(harness.calendar.calls().await.is_empty());

    let session = harness.runtime.sessions().get(&harness.session).await;
    assert_eq!(session.turns().len(), 2);
}
