use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use calhelper_core::domain::booking::{Booking, BookingFilter, BookingId, NewBooking};
use calhelper_core::domain::event_type::{EventType, EventTypeId};
use calhelper_core::domain::slot::{DateRange, Slot};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CalendarError {
    #[error("calendar responded with status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("calendar request failed: {message}")]
    Network { message: String, request_sent: bool },
    #[error("calendar request timed out")]
    Timeout { request_sent: bool },
    #[error("calendar response could not be decoded: {0}")]
    Decode(String),
}

impl CalendarError {
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self::Status { status, message: message.into() }
    }

    /// Whether the remote may have acted on the request.
    pub fn request_sent(&self) -> bool {
        match self {
            Self::Status { .. } | Self::Decode(_) => true,
            Self::Network { request_sent, .. } | Self::Timeout { request_sent } => *request_sent,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalendarOperation {
    Profile,
    ListEventTypes,
    ListBookings,
    FindSlots,
    CreateBooking,
    CancelBooking,
    RescheduleBooking,
}

impl CalendarOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Profile => "profile",
            Self::ListEventTypes => "list_event_types",
            Self::ListBookings => "list_bookings",
            Self::FindSlots => "find_slots",
            Self::CreateBooking => "create_booking",
            Self::CancelBooking => "cancel_booking",
            Self::RescheduleBooking => "reschedule_booking",
        }
    }

    pub fn is_mutating(&self) -> bool {
        matches!(self, Self::CreateBooking | Self::CancelBooking | Self::RescheduleBooking)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: u64,
    pub email: String,
    pub username: Option<String>,
    pub time_zone: Option<String>,
}

/// Remote calendar capability. Implementations never retry on their own.
#[async_trait]
pub trait CalendarClient: Send + Sync {
    async fn profile(&self) -> Result<Profile, CalendarError>;

    async fn list_event_types(&self) -> Result<Vec<EventType>, CalendarError>;

    async fn list_bookings(&self, filter: &BookingFilter) -> Result<Vec<Booking>, CalendarError>;

    async fn find_slots(
        &self,
        event_type_id: EventTypeId,
        range: &DateRange,
    ) -> Result<Vec<Slot>, CalendarError>;

    async fn create_booking(&self, booking: &NewBooking) -> Result<Booking, CalendarError>;

    async fn cancel_booking(
        &self,
        booking_id: &BookingId,
        reason: Option<&str>,
    ) -> Result<Booking, CalendarError>;

    async fn reschedule_booking(
        &self,
        booking_id: &BookingId,
        new_start: DateTime<FixedOffset>,
    ) -> Result<Booking, CalendarError>;
}
