use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use tokio::sync::Mutex;

use calhelper_core::domain::booking::{Booking, BookingFilter, BookingId, BookingStatus, NewBooking};
use calhelper_core::domain::event_type::{EventType, EventTypeId};
use calhelper_core::domain::slot::{DateRange, Slot};

use crate::client::{CalendarClient, CalendarError, CalendarOperation, Profile};

const DEFAULT_LENGTH_MINUTES: i64 = 30;

/// Deterministic calendar that records every call and can be scripted to fail.
pub struct InMemoryCalendar {
    state: Mutex<CalendarState>,
    latency: Option<Duration>,
}

struct CalendarState {
    profile: Profile,
    event_types: Vec<EventType>,
    bookings: Vec<Booking>,
    slots: Vec<Slot>,
    calls: Vec<CalendarOperation>,
    failures: HashMap<CalendarOperation, VecDeque<CalendarError>>,
    next_uid: u64,
}

impl Default for InMemoryCalendar {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCalendar {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CalendarState {
                profile: Profile {
                    id: 1,
                    email: "owner@example.com".to_string(),
                    username: Some("owner".to_string()),
                    time_zone: Some("UTC".to_string()),
                },
                event_types: Vec::new(),
                bookings: Vec::new(),
                slots: Vec::new(),
                calls: Vec::new(),
                failures: HashMap::new(),
                next_uid: 1,
            }),
            latency: None,
        }
    }

    pub fn with_event_type(mut self, event_type: EventType) -> Self {
        self.state.get_mut().event_types.push(event_type);
        self
    }

    pub fn with_booking(mut self, booking: Booking) -> Self {
        self.state.get_mut().bookings.push(booking);
        self
    }

    pub fn with_slot(mut self, event_type_id: EventTypeId, start: DateTime<FixedOffset>) -> Self {
        self.state.get_mut().slots.push(Slot { event_type_id, start });
        self
    }

    /// Every call sleeps this long before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Queues an error returned by the next call of `operation`.
    pub async fn fail_next(&self, operation: CalendarOperation, error: CalendarError) {
        self.state.lock().await.failures.entry(operation).or_default().push_back(error);
    }

    pub async fn calls(&self) -> Vec<CalendarOperation> {
        self.state.lock().await.calls.clone()
    }

    pub async fn count(&self, operation: CalendarOperation) -> usize {
        self.state.lock().await.calls.iter().filter(|call| **call == operation).count()
    }

    pub async fn mutating_calls(&self) -> usize {
        self.state.lock().await.calls.iter().filter(|call| call.is_mutating()).count()
    }

    pub async fn bookings(&self) -> Vec<Booking> {
        self.state.lock().await.bookings.clone()
    }

    pub async fn remove_slot(&self, event_type_id: EventTypeId, start: DateTime<FixedOffset>) {
        self.state
            .lock()
            .await
            .slots
            .retain(|slot| !(slot.event_type_id == event_type_id && slot.start == start));
    }

    async fn enter(
        &self,
        operation: CalendarOperation,
    ) -> Result<tokio::sync::MutexGuard<'_, CalendarState>, CalendarError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let mut state = self.state.lock().await;
        state.calls.push(operation);
        if let Some(error) = state.failures.get_mut(&operation).and_then(VecDeque::pop_front) {
            return Err(error);
        }
        Ok(state)
    }
}

impl CalendarState {
    fn length_of(&self, event_type_id: Option<EventTypeId>) -> chrono::Duration {
        let minutes = event_type_id
            .and_then(|id| self.event_types.iter().find(|event_type| event_type.id == id))
            .map(|event_type| i64::from(event_type.length_minutes))
            .unwrap_or(DEFAULT_LENGTH_MINUTES);
        chrono::Duration::minutes(minutes)
    }

    fn next_booking_id(&mut self) -> BookingId {
        let id = BookingId(format!("mem-booking-{}", self.next_uid));
        self.next_uid += 1;
        id
    }

    fn take_slot(
        &mut self,
        event_type_id: EventTypeId,
        start: DateTime<FixedOffset>,
    ) -> Result<(), CalendarError> {
        let position = self
            .slots
            .iter()
            .position(|slot| slot.event_type_id == event_type_id && slot.start == start)
            .ok_or_else(|| {
                CalendarError::status(409, "The requested time slot is no longer available")
            })?;
        self.slots.remove(position);
        Ok(())
    }

    fn active_booking_mut(&mut self, booking_id: &BookingId) -> Result<&mut Booking, CalendarError> {
        self.bookings
            .iter_mut()
            .find(|booking| &booking.id == booking_id && booking.status != BookingStatus::Cancelled)
            .ok_or_else(|| CalendarError::status(404, format!("Booking with uid={booking_id} not found")))
    }
}

#[async_trait]
impl CalendarClient for InMemoryCalendar {
    async fn profile(&self) -> Result<Profile, CalendarError> {
        let state = self.enter(CalendarOperation::Profile).await?;
        Ok(state.profile.clone())
    }

    async fn list_event_types(&self) -> Result<Vec<EventType>, CalendarError> {
        let state = self.enter(CalendarOperation::ListEventTypes).await?;
        Ok(state.event_types.clone())
    }

    async fn list_bookings(&self, filter: &BookingFilter) -> Result<Vec<Booking>, CalendarError> {
        let state = self.enter(CalendarOperation::ListBookings).await?;
        let mut bookings = state
            .bookings
            .iter()
            .filter(|booking| filter.admits(booking))
            .cloned()
            .collect::<Vec<_>>();
        bookings.sort_by_key(|booking| booking.start);
        Ok(bookings)
    }

    async fn find_slots(
        &self,
        event_type_id: EventTypeId,
        range: &DateRange,
    ) -> Result<Vec<Slot>, CalendarError> {
        let state = self.enter(CalendarOperation::FindSlots).await?;
        if !state.event_types.iter().any(|event_type| event_type.id == event_type_id) {
            return Err(CalendarError::status(404, format!("Event type {event_type_id} not found")));
        }
        Ok(state
            .slots
            .iter()
            .filter(|slot| slot.event_type_id == event_type_id && range.contains(&slot.start))
            .cloned()
            .collect())
    }

    async fn create_booking(&self, booking: &NewBooking) -> Result<Booking, CalendarError> {
        let mut state = self.enter(CalendarOperation::CreateBooking).await?;
        let title = state
            .event_types
            .iter()
            .find(|event_type| event_type.id == booking.event_type_id)
            .map(|event_type| format!("{} with {}", event_type.title, booking.attendee.name))
            .ok_or_else(|| {
                CalendarError::status(404, format!("Event type {} not found", booking.event_type_id))
            })?;
        state.take_slot(booking.event_type_id, booking.start)?;

        let created = Booking {
            id: state.next_booking_id(),
            title,
            event_type_id: Some(booking.event_type_id),
            start: booking.start,
            end: booking.start + state.length_of(Some(booking.event_type_id)),
            attendees: vec![booking.attendee.clone()],
            status: BookingStatus::Confirmed,
        };
        state.bookings.push(created.clone());
        Ok(created)
    }

    async fn cancel_booking(
        &self,
        booking_id: &BookingId,
        _reason: Option<&str>,
    ) -> Result<Booking, CalendarError> {
        let mut state = self.enter(CalendarOperation::CancelBooking).await?;
        let booking = state.active_booking_mut(booking_id)?;
        booking.status = BookingStatus::Cancelled;
        Ok(booking.clone())
    }

    async fn reschedule_booking(
        &self,
        booking_id: &BookingId,
        new_start: DateTime<FixedOffset>,
    ) -> Result<Booking, CalendarError> {
        let mut state = self.enter(CalendarOperation::RescheduleBooking).await?;
        if let Some(event_type_id) = state.active_booking_mut(booking_id)?.event_type_id {
            state.take_slot(event_type_id, new_start)?;
        }
        let original = state.active_booking_mut(booking_id)?;
        original.status = BookingStatus::Rescheduled;
        let mut moved = original.clone();

        moved.end = new_start + (moved.end - moved.start);
        moved.start = new_start;
        moved.status = BookingStatus::Confirmed;
        moved.id = state.next_booking_id();
        state.bookings.push(moved.clone());
        Ok(moved)
    }
}
