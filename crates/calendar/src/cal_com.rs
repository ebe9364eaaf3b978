//! Cal.com v2 REST client.
//!
//! Every request carries the raw API key in `Authorization` and the
//! `cal-api-version` pinned for its endpoint family.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};
use reqwest::{Client, RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use calhelper_core::config::CalendarConfig;
use calhelper_core::domain::booking::{
    Attendee, Booking, BookingFilter, BookingId, BookingStatus, NewBooking,
};
use calhelper_core::domain::event_type::{EventType, EventTypeId};
use calhelper_core::domain::slot::{DateRange, Slot};

use crate::client::{CalendarClient, CalendarError, CalendarOperation, Profile};

const BOOKINGS_API_VERSION: &str = "2024-08-13";
const SLOTS_API_VERSION: &str = "2024-09-04";
const EVENT_TYPES_API_VERSION: &str = "2024-06-14";
const BOOKING_PAGE_SIZE: &str = "100";
const ATTENDEE_LANGUAGE: &str = "en";

#[derive(Clone)]
pub struct CalComClient {
    client: Client,
    base_url: String,
    api_key: SecretString,
}

impl std::fmt::Debug for CalComClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CalComClient").field("base_url", &self.base_url).finish_non_exhaustive()
    }
}

impl CalComClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: SecretString,
        timeout: Duration,
    ) -> Result<Self, CalendarError> {
        let client = Client::builder().timeout(timeout).build().map_err(|error| {
            CalendarError::Network { message: error.to_string(), request_sent: false }
        })?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    pub fn from_config(config: &CalendarConfig) -> Result<Self, CalendarError> {
        Self::new(
            config.base_url.clone(),
            config.api_key.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    fn request(&self, method: reqwest::Method, path: &str, api_version: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}/{}", self.base_url, path.trim_start_matches('/')))
            .header("Authorization", self.api_key.expose_secret())
            .header("cal-api-version", api_version)
    }

    async fn send<T>(
        &self,
        operation: CalendarOperation,
        request: RequestBuilder,
    ) -> Result<T, CalendarError>
    where
        T: DeserializeOwned,
    {
        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;

        if !status.is_success() {
            tracing::warn!(
                event_name = "calendar.request_failed",
                operation = operation.as_str(),
                status = status.as_u16(),
                "calendar request failed"
            );
            return Err(CalendarError::status(status.as_u16(), error_message(status, &body)));
        }

        tracing::debug!(
            event_name = "calendar.request_succeeded",
            operation = operation.as_str(),
            status = status.as_u16(),
            "calendar request succeeded"
        );

        serde_json::from_str::<Envelope<T>>(&body)
            .map(|envelope| envelope.data)
            .map_err(|error| CalendarError::Decode(error.to_string()))
    }
}

#[async_trait]
impl CalendarClient for CalComClient {
    async fn profile(&self) -> Result<Profile, CalendarError> {
        let request = self.request(reqwest::Method::GET, "me", BOOKINGS_API_VERSION);
        let raw: RawProfile = self.send(CalendarOperation::Profile, request).await?;
        Ok(Profile {
            id: raw.id,
            email: raw.email,
            username: raw.username,
            time_zone: raw.time_zone,
        })
    }

    async fn list_event_types(&self) -> Result<Vec<EventType>, CalendarError> {
        let request = self.request(reqwest::Method::GET, "event-types", EVENT_TYPES_API_VERSION);
        let raw: Vec<RawEventType> = self.send(CalendarOperation::ListEventTypes, request).await?;
        Ok(raw.into_iter().map(RawEventType::into_event_type).collect())
    }

    async fn list_bookings(&self, filter: &BookingFilter) -> Result<Vec<Booking>, CalendarError> {
        let mut query = vec![("take", BOOKING_PAGE_SIZE.to_string())];
        if let Some(after_start) = filter.after_start {
            query.push(("afterStart", utc_timestamp(&after_start)));
        }
        if let Some(before_end) = filter.before_end {
            query.push(("beforeEnd", utc_timestamp(&before_end)));
        }

        let request =
            self.request(reqwest::Method::GET, "bookings", BOOKINGS_API_VERSION).query(&query);
        let raw: Vec<RawBooking> = self.send(CalendarOperation::ListBookings, request).await?;
        raw.into_iter().map(RawBooking::into_booking).collect()
    }

    async fn find_slots(
        &self,
        event_type_id: EventTypeId,
        range: &DateRange,
    ) -> Result<Vec<Slot>, CalendarError> {
        let query = [
            ("eventTypeId", event_type_id.to_string()),
            ("start", utc_timestamp(&range.start)),
            ("end", utc_timestamp(&range.end)),
            ("timeZone", "UTC".to_string()),
        ];
        let request = self.request(reqwest::Method::GET, "slots", SLOTS_API_VERSION).query(&query);
        let raw: BTreeMap<String, Vec<RawSlot>> =
            self.send(CalendarOperation::FindSlots, request).await?;

        let mut slots = Vec::new();
        for raw_slot in raw.into_values().flatten() {
            let start = parse_timestamp(&raw_slot.start)?;
            if range.contains(&start) {
                slots.push(Slot { event_type_id, start });
            }
        }
        Ok(slots)
    }

    async fn create_booking(&self, booking: &NewBooking) -> Result<Booking, CalendarError> {
        let body = json!({
            "start": utc_timestamp(&booking.start),
            "eventTypeId": booking.event_type_id.0,
            "attendee": {
                "name": booking.attendee.name,
                "email": booking.attendee.email,
                "timeZone": booking.attendee.time_zone,
                "language": ATTENDEE_LANGUAGE,
            },
        });
        let request =
            self.request(reqwest::Method::POST, "bookings", BOOKINGS_API_VERSION).json(&body);
        let raw: RawBooking = self.send(CalendarOperation::CreateBooking, request).await?;
        raw.into_booking()
    }

    async fn cancel_booking(
        &self,
        booking_id: &BookingId,
        reason: Option<&str>,
    ) -> Result<Booking, CalendarError> {
        let body = match reason {
            Some(reason) => json!({ "cancellationReason": reason }),
            None => json!({}),
        };
        let request = self
            .request(
                reqwest::Method::POST,
                &format!("bookings/{booking_id}/cancel"),
                BOOKINGS_API_VERSION,
            )
            .json(&body);
        let raw: RawBooking = self.send(CalendarOperation::CancelBooking, request).await?;
        raw.into_booking()
    }

    async fn reschedule_booking(
        &self,
        booking_id: &BookingId,
        new_start: DateTime<FixedOffset>,
    ) -> Result<Booking, CalendarError> {
        let request = self
            .request(
                reqwest::Method::POST,
                &format!("bookings/{booking_id}/reschedule"),
                BOOKINGS_API_VERSION,
            )
            .json(&json!({ "start": utc_timestamp(&new_start) }));
        let raw: RawBooking = self.send(CalendarOperation::RescheduleBooking, request).await?;
        raw.into_booking()
    }
}

fn transport_error(error: reqwest::Error) -> CalendarError {
    let request_sent = !error.is_connect() && !error.is_builder();
    if error.is_timeout() {
        CalendarError::Timeout { request_sent }
    } else {
        CalendarError::Network { message: error.to_string(), request_sent }
    }
}

fn error_message(status: StatusCode, body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| {
            value
                .pointer("/error/message")
                .or_else(|| value.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("unexpected status").to_string())
}

fn utc_timestamp(instant: &DateTime<FixedOffset>) -> String {
    instant.with_timezone(&Utc).to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(value: &str) -> Result<DateTime<FixedOffset>, CalendarError> {
    DateTime::parse_from_rfc3339(value)
        .map_err(|error| CalendarError::Decode(format!("invalid timestamp `{value}`: {error}")))
}

#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawProfile {
    id: u64,
    email: String,
    username: Option<String>,
    time_zone: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEventType {
    id: u64,
    title: String,
    slug: String,
    length_in_minutes: u32,
    description: Option<String>,
}

impl RawEventType {
    fn into_event_type(self) -> EventType {
        EventType {
            id: EventTypeId(self.id),
            title: self.title,
            slug: self.slug,
            length_minutes: self.length_in_minutes,
            description: self.description.filter(|value| !value.trim().is_empty()),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAttendee {
    name: String,
    email: String,
    time_zone: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawBooking {
    uid: String,
    #[serde(default)]
    title: String,
    status: String,
    start: String,
    end: String,
    event_type_id: Option<u64>,
    #[serde(default)]
    attendees: Vec<RawAttendee>,
    #[serde(default)]
    rescheduled: Option<bool>,
}

impl RawBooking {
    fn into_booking(self) -> Result<Booking, CalendarError> {
        let status = booking_status(&self.status, self.rescheduled.unwrap_or(false));
        Ok(Booking {
            id: BookingId(self.uid),
            title: self.title,
            event_type_id: self.event_type_id.map(EventTypeId),
            start: parse_timestamp(&self.start)?,
            end: parse_timestamp(&self.end)?,
            attendees: self
                .attendees
                .into_iter()
                .map(|attendee| Attendee {
                    name: attendee.name,
                    email: attendee.email,
                    time_zone: attendee.time_zone.unwrap_or_else(|| "UTC".to_string()),
                })
                .collect(),
            status,
        })
    }
}

fn booking_status(raw: &str, rescheduled: bool) -> BookingStatus {
    if rescheduled {
        return BookingStatus::Rescheduled;
    }
    match raw.trim().to_ascii_lowercase().as_str() {
        "accepted" | "confirmed" => BookingStatus::Confirmed,
        "cancelled" | "canceled" | "rejected" => BookingStatus::Cancelled,
        "rescheduled" => BookingStatus::Rescheduled,
        _ => BookingStatus::Pending,
    }
}

#[derive(Deserialize)]
struct RawSlot {
    start: String,
}
