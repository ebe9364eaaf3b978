use chrono::{DateTime, FixedOffset};

use calhelper_core::domain::booking::Booking;
use calhelper_core::domain::event_type::EventType;
use calhelper_core::domain::operation::{AmbiguityReason, OperationKind, ParamKey, Parameters};
use calhelper_core::domain::session::PendingAction;
use calhelper_core::domain::slot::SlotSet;
use calhelper_core::domain::time::TimeContext;
use calhelper_core::errors::ToolError;

use crate::tools::{ParameterProblem, Payload};

/// Renders every user-facing reply. Times are shown in the assistant's zone.
#[derive(Clone, Copy, Debug, Default)]
pub struct ResponseSynthesizer {
    time: TimeContext,
}

impl ResponseSynthesizer {
    pub fn new(time: TimeContext) -> Self {
        Self { time }
    }

    pub fn format_instant(&self, instant: &DateTime<FixedOffset>) -> String {
        format!(
            "{} ({})",
            self.time.localize(instant).format("%a %b %-d, %Y at %-I:%M %p"),
            self.time.zone_name()
        )
    }

    pub fn render(&self, payload: &Payload) -> String {
        match payload {
            Payload::EventTypes(event_types) => self.event_types(event_types),
            Payload::Bookings { bookings, .. } => self.bookings(bookings),
            Payload::Slots(slots) => self.slots(slots),
            Payload::BookingCreated(booking) => format!(
                "Booked {} for {}. Booking id: {}.",
                booking.title,
                self.format_instant(&booking.start),
                booking.id
            ),
            Payload::BookingCancelled(booking) => format!(
                "Cancelled {} on {}.",
                booking.title,
                self.format_instant(&booking.start)
            ),
            Payload::BookingRescheduled { previous, booking } => format!(
                "Moved {} to {}. The new booking id is {} (was {previous}).",
                booking.title,
                self.format_instant(&booking.start),
                booking.id
            ),
        }
    }

    fn event_types(&self, event_types: &[EventType]) -> String {
        if event_types.is_empty() {
            return "You don't have any event types yet.".to_string();
        }
        let mut sorted = event_types.iter().collect::<Vec<_>>();
        sorted.sort_by(|left, right| {
            left.length_minutes.cmp(&right.length_minutes).then_with(|| left.title.cmp(&right.title))
        });

        let mut lines = vec!["Your event types:".to_string()];
        for event_type in sorted {
            lines.push(format!(
                "- {} ({} min, id {}, slug {})",
                event_type.title, event_type.length_minutes, event_type.id, event_type.slug
            ));
        }
        lines.join("\n")
    }

    fn bookings(&self, bookings: &[Booking]) -> String {
        if bookings.is_empty() {
            return "No meetings found for that period.".to_string();
        }
        let mut lines = vec!["Your meetings:".to_string()];
        lines.extend(self.numbered_bookings(bookings));
        lines.join("\n")
    }

    /// Listed in time order, numbered from 1.
    fn numbered_bookings(&self, bookings: &[Booking]) -> Vec<String> {
        let mut sorted = bookings.iter().collect::<Vec<_>>();
        sorted.sort_by_key(|booking| booking.start);
        sorted
            .into_iter()
            .enumerate()
            .map(|(position, booking)| {
                let attendees = booking
                    .attendees
                    .iter()
                    .map(|attendee| attendee.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                let with = if attendees.is_empty() { String::new() } else { format!(" with {attendees}") };
                format!(
                    "{}. {}: {}{with} [{}] (id {})",
                    position + 1,
                    self.format_instant(&booking.start),
                    booking.title,
                    booking.status.label(),
                    booking.id
                )
            })
            .collect()
    }

    fn slots(&self, slots: &SlotSet) -> String {
        if slots.is_empty() {
            return "There are no open slots in that window. Try another day or a wider range."
                .to_string();
        }
        let mut lines = vec!["Open slots:".to_string()];
        lines.extend(self.numbered_slots(slots));
        lines.push("Reply with a slot number to book it.".to_string());
        lines.join("\n")
    }

    fn numbered_slots(&self, slots: &SlotSet) -> Vec<String> {
        slots
            .slots
            .iter()
            .enumerate()
            .map(|(position, slot)| format!("{}. {}", position + 1, self.format_instant(&slot.start)))
            .collect()
    }

    /// Restates every collected parameter so the user confirms exactly what runs.
    pub fn confirmation(&self, pending: &PendingAction) -> String {
        let mut lines = vec![format!("Please confirm: {}", pending.kind.label())];
        lines.extend(self.parameter_lines(&pending.parameters));
        lines.push("Reply \"yes\" to proceed or \"no\" to cancel.".to_string());
        lines.join("\n")
    }

    fn parameter_lines(&self, parameters: &Parameters) -> Vec<String> {
        parameters
            .iter()
            .map(|(key, value)| format!("- {}: {}", key.label(), self.parameter_value(key, value)))
            .collect()
    }

    fn parameter_value(&self, key: ParamKey, value: &str) -> String {
        let instant = match key {
            ParamKey::StartTime | ParamKey::NewStartTime | ParamKey::BookingHint => {
                self.time.parse_instant(value)
            }
            ParamKey::RangeStart => self.time.parse_range_start(value),
            ParamKey::RangeEnd => self.time.parse_range_end(value),
            _ => None,
        };
        instant.map(|instant| self.format_instant(&instant)).unwrap_or_else(|| value.to_string())
    }

    pub fn clarification(
        &self,
        kind: OperationKind,
        missing: &[ParamKey],
        problems: &[ParameterProblem],
    ) -> String {
        let mut lines = Vec::new();
        if !problems.is_empty() {
            lines.push(format!("I can't {} with those details yet:", kind.label()));
            lines.extend(problems.iter().map(|problem| format!("- {}", problem.describe())));
        }
        if !missing.is_empty() {
            let labels = missing.iter().map(ParamKey::label).collect::<Vec<_>>().join(", ");
            lines.push(format!("To {}, I still need: {labels}.", kind.label()));
        }
        if lines.is_empty() {
            lines.push(format!("Could you tell me more about how to {}?", kind.label()));
        }
        lines.join("\n")
    }

    pub fn ambiguity(&self, reason: &AmbiguityReason) -> String {
        match reason {
            AmbiguityReason::InterpreterUnavailable => {
                "I couldn't interpret that just now. Please try rephrasing in a moment.".to_string()
            }
            AmbiguityReason::Unclear => {
                "I'm not sure what you'd like me to do. You can ask me to list event types, show \
                 bookings, find open slots, or book, cancel or reschedule a meeting."
                    .to_string()
            }
            AmbiguityReason::NoSlotsCached => {
                "I don't have any open slots to pick from yet. Ask me to find availability first."
                    .to_string()
            }
            AmbiguityReason::SlotReferenceOutOfRange { index, available } => format!(
                "There is no slot {index}; I listed {available}. Which one did you mean?"
            ),
            AmbiguityReason::NoBookingsCached => {
                "I haven't listed any bookings yet. Which meeting do you mean?".to_string()
            }
            AmbiguityReason::BookingReferenceOutOfRange { index, available } => format!(
                "There is no booking {index}; I listed {available}. Which one did you mean?"
            ),
        }
    }

    pub fn candidates(&self, kind: OperationKind, bookings: &[Booking]) -> String {
        if bookings.is_empty() {
            return format!(
                "I couldn't find a matching meeting to {}. Which booking do you mean? A date or booking id helps.",
                verb(kind)
            );
        }
        let mut lines = vec![format!("Which meeting should I {}?", verb(kind))];
        lines.extend(self.numbered_bookings(bookings));
        lines.push("Reply with its number.".to_string());
        lines.join("\n")
    }

    /// Sent when the chosen slot was taken between listing and booking.
    pub fn conflict(&self, kind: OperationKind, slots: Option<&SlotSet>) -> String {
        let mut lines = vec!["That time was just taken.".to_string()];
        match slots.filter(|set| !set.is_empty()) {
            Some(set) => {
                lines.push("These slots are still open that day:".to_string());
                lines.extend(self.numbered_slots(set));
                lines.push(match kind {
                    OperationKind::RescheduleBooking => {
                        "Reply with a slot number to move the meeting there.".to_string()
                    }
                    _ => "Reply with a slot number to book one.".to_string(),
                });
            }
            None => lines.push("Nothing else is open that day. Try another date.".to_string()),
        }
        lines.join("\n")
    }

    pub fn abandoned(&self, kind: OperationKind) -> String {
        format!("Okay, I won't {}. Nothing was changed.", kind.label())
    }

    pub fn error(&self, kind: OperationKind, error: &ToolError) -> String {
        match error {
            ToolError::NotFound { resource } => {
                format!("I couldn't {}: {resource} was not found.", kind.label())
            }
            ToolError::Conflict { .. } => format!(
                "I couldn't {} because that time is no longer available. Ask me for open slots to pick another.",
                kind.label()
            ),
            ToolError::Unauthorized => {
                "The calendar rejected the configured API key. Update CAL_API_KEY and start a new conversation."
                    .to_string()
            }
            ToolError::Transient { outcome_unknown: true, .. } => format!(
                "The calendar stopped responding and I can't tell whether the request to {} went through. \
                 Please list your bookings to check before trying again.",
                kind.label()
            ),
            ToolError::Transient { .. } => format!(
                "The calendar is temporarily unavailable, so I couldn't {}. Please try again in a moment.",
                kind.label()
            ),
            ToolError::InvalidParameters { problems } => format!(
                "The calendar rejected the request to {}: {}.",
                kind.label(),
                problems.join("; ")
            ),
        }
    }

    pub fn empty_input(&self) -> String {
        "I didn't catch anything. What would you like to do with your calendar?".to_string()
    }

    pub fn nothing_to_confirm(&self) -> String {
        "There's nothing waiting for confirmation. What would you like to do?".to_string()
    }

    pub fn pending_reminder(&self, pending: &PendingAction) -> String {
        let missing = pending.missing_parameters();
        if missing.is_empty() {
            format!("(Still waiting for your yes or no to {}.)", pending.kind.label())
        } else {
            let labels = missing.iter().map(ParamKey::label).collect::<Vec<_>>().join(", ");
            format!("(To {}, I still need: {labels}.)", pending.kind.label())
        }
    }
}

fn verb(kind: OperationKind) -> &'static str {
    match kind {
        OperationKind::RescheduleBooking => "reschedule",
        OperationKind::CancelBooking => "cancel",
        _ => "use",
    }
}
