use std::fmt;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use crate::domain::event_type::EventTypeId;

/// Remote booking uid.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BookingId(pub String);

impl BookingId {
    pub fn is_well_formed(&self) -> bool {
        !self.0.is_empty()
            && self.0.len() <= 128
            && self.0.chars().all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_'))
    }
}

impl fmt::Display for BookingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Confirmed,
    Pending,
    Cancelled,
    Rescheduled,
}

impl BookingStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Confirmed => "confirmed",
            Self::Pending => "pending",
            Self::Cancelled => "cancelled",
            Self::Rescheduled => "rescheduled",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attendee {
    pub name: String,
    pub email: String,
    pub time_zone: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub title: String,
    pub event_type_id: Option<EventTypeId>,
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
    pub attendees: Vec<Attendee>,
    pub status: BookingStatus,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BookingFilter {
    pub after_start: Option<DateTime<FixedOffset>>,
    pub before_end: Option<DateTime<FixedOffset>>,
}

impl BookingFilter {
    pub fn admits(&self, booking: &Booking) -> bool {
        self.after_start.map_or(true, |after| booking.start >= after)
            && self.before_end.map_or(true, |before| booking.end <= before)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewBooking {
    pub event_type_id: EventTypeId,
    pub start: DateTime<FixedOffset>,
    pub attendee: Attendee,
}
