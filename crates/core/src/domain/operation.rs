use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    ListEventTypes,
    ListBookings,
    FindSlots,
    CreateBooking,
    CancelBooking,
    RescheduleBooking,
    None,
}

impl OperationKind {
    pub const SUPPORTED: [OperationKind; 6] = [
        Self::ListEventTypes,
        Self::ListBookings,
        Self::FindSlots,
        Self::CreateBooking,
        Self::CancelBooking,
        Self::RescheduleBooking,
    ];

    pub fn tool_name(&self) -> &'static str {
        match self {
            Self::ListEventTypes => "list_event_types",
            Self::ListBookings => "list_bookings",
            Self::FindSlots => "find_slots",
            Self::CreateBooking => "create_booking",
            Self::CancelBooking => "cancel_booking",
            Self::RescheduleBooking => "reschedule_booking",
            Self::None => "none",
        }
    }

    /// Anything outside the supported set maps to `None`.
    pub fn from_tool_name(name: &str) -> Self {
        let normalized = name.trim().to_ascii_lowercase().replace('-', "_");
        Self::SUPPORTED
            .into_iter()
            .find(|kind| kind.tool_name() == normalized)
            .unwrap_or(Self::None)
    }

    pub fn is_mutating(&self) -> bool {
        matches!(self, Self::CreateBooking | Self::CancelBooking | Self::RescheduleBooking)
    }

    pub fn required_parameters(&self) -> &'static [ParamKey] {
        match self {
            Self::CreateBooking => &[
                ParamKey::EventType,
                ParamKey::StartTime,
                ParamKey::AttendeeName,
                ParamKey::AttendeeEmail,
            ],
            Self::CancelBooking => &[ParamKey::BookingId],
            Self::RescheduleBooking => &[ParamKey::BookingId, ParamKey::NewStartTime],
            Self::FindSlots => &[ParamKey::EventType, ParamKey::RangeStart, ParamKey::RangeEnd],
            Self::ListEventTypes | Self::ListBookings | Self::None => &[],
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::ListEventTypes => "list your event types",
            Self::ListBookings => "list your bookings",
            Self::FindSlots => "find open slots",
            Self::CreateBooking => "create a booking",
            Self::CancelBooking => "cancel a booking",
            Self::RescheduleBooking => "reschedule a booking",
            Self::None => "chat",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKey {
    EventType,
    StartTime,
    AttendeeName,
    AttendeeEmail,
    AttendeeTimeZone,
    BookingId,
    NewStartTime,
    RangeStart,
    RangeEnd,
    Reason,
    SlotIndex,
    BookingIndex,
    BookingHint,
}

impl ParamKey {
    pub const ALL: [ParamKey; 13] = [
        Self::EventType,
        Self::StartTime,
        Self::AttendeeName,
        Self::AttendeeEmail,
        Self::AttendeeTimeZone,
        Self::BookingId,
        Self::NewStartTime,
        Self::RangeStart,
        Self::RangeEnd,
        Self::Reason,
        Self::SlotIndex,
        Self::BookingIndex,
        Self::BookingHint,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EventType => "event_type",
            Self::StartTime => "start_time",
            Self::AttendeeName => "attendee_name",
            Self::AttendeeEmail => "attendee_email",
            Self::AttendeeTimeZone => "attendee_time_zone",
            Self::BookingId => "booking_id",
            Self::NewStartTime => "new_start_time",
            Self::RangeStart => "range_start",
            Self::RangeEnd => "range_end",
            Self::Reason => "reason",
            Self::SlotIndex => "slot_index",
            Self::BookingIndex => "booking_index",
            Self::BookingHint => "booking_hint",
        }
    }

    /// Resolves a parameter name, tolerating the aliases interpreters tend to emit.
    pub fn from_name(name: &str) -> Option<Self> {
        let normalized = name.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        let key = match normalized.as_str() {
            "event_type_id" | "event_type_slug" | "eventtypeid" => Self::EventType,
            "start" | "time" => Self::StartTime,
            "name" => Self::AttendeeName,
            "email" => Self::AttendeeEmail,
            "time_zone" | "timezone" | "attendee_timezone" => Self::AttendeeTimeZone,
            "booking_uid" | "uid" => Self::BookingId,
            "new_start" => Self::NewStartTime,
            "start_date" | "after_start" => Self::RangeStart,
            "end_date" | "before_end" => Self::RangeEnd,
            "cancellation_reason" => Self::Reason,
            "slot" | "slot_number" => Self::SlotIndex,
            "booking_number" => Self::BookingIndex,
            "booking_time" | "start_time_hint" => Self::BookingHint,
            other => return Self::ALL.into_iter().find(|key| key.as_str() == other),
        };
        Some(key)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::EventType => "event type",
            Self::StartTime => "start time",
            Self::AttendeeName => "attendee name",
            Self::AttendeeEmail => "attendee email",
            Self::AttendeeTimeZone => "attendee time zone",
            Self::BookingId => "booking",
            Self::NewStartTime => "new start time",
            Self::RangeStart => "search from",
            Self::RangeEnd => "search until",
            Self::Reason => "reason",
            Self::SlotIndex => "slot number",
            Self::BookingIndex => "booking number",
            Self::BookingHint => "booking time mentioned",
        }
    }

    /// References are resolved against session caches and never reach the calendar.
    pub fn is_reference(&self) -> bool {
        matches!(self, Self::SlotIndex | Self::BookingIndex | Self::BookingHint)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameters(BTreeMap<ParamKey, String>);

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: ParamKey, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: ParamKey) -> Option<&str> {
        self.0.get(&key).map(String::as_str)
    }

    pub fn contains(&self, key: ParamKey) -> bool {
        self.0.contains_key(&key)
    }

    /// Blank values are ignored so an interpreter cannot erase collected progress.
    pub fn insert(&mut self, key: ParamKey, value: impl Into<String>) {
        let value = value.into();
        let trimmed = value.trim();
        if !trimmed.is_empty() {
            self.0.insert(key, trimmed.to_string());
        }
    }

    pub fn remove(&mut self, key: ParamKey) -> Option<String> {
        self.0.remove(&key)
    }

    /// Later values win. Returns whether anything changed.
    pub fn merge(&mut self, newer: &Parameters) -> bool {
        let mut changed = false;
        for (key, value) in &newer.0 {
            if self.0.get(key) != Some(value) {
                self.0.insert(*key, value.clone());
                changed = true;
            }
        }
        changed
    }

    pub fn missing_for(&self, kind: OperationKind) -> Vec<ParamKey> {
        kind.required_parameters().iter().copied().filter(|key| !self.contains(*key)).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ParamKey, &str)> {
        self.0.iter().map(|(key, value)| (*key, value.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum AmbiguityReason {
    InterpreterUnavailable,
    Unclear,
    NoSlotsCached,
    SlotReferenceOutOfRange { index: usize, available: usize },
    NoBookingsCached,
    BookingReferenceOutOfRange { index: usize, available: usize },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRequest {
    pub kind: OperationKind,
    pub parameters: Parameters,
    pub ambiguity: Option<AmbiguityReason>,
    pub reply: Option<String>,
}

impl OperationRequest {
    pub fn new(kind: OperationKind, parameters: Parameters) -> Self {
        Self { kind, parameters, ambiguity: None, reply: None }
    }

    pub fn conversation(reply: Option<String>) -> Self {
        Self { kind: OperationKind::None, parameters: Parameters::new(), ambiguity: None, reply }
    }

    pub fn ambiguous(reason: AmbiguityReason) -> Self {
        Self {
            kind: OperationKind::None,
            parameters: Parameters::new(),
            ambiguity: Some(reason),
            reply: None,
        }
    }

    pub fn is_ambiguous(&self) -> bool {
        self.ambiguity.is_some()
    }

    pub fn missing_parameters(&self) -> Vec<ParamKey> {
        self.parameters.missing_for(self.kind)
    }
}
