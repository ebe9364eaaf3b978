use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::event_type::EventTypeId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
}

impl DateRange {
    pub fn new(start: DateTime<FixedOffset>, end: DateTime<FixedOffset>) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn contains(&self, instant: &DateTime<FixedOffset>) -> bool {
        *instant >= self.start && *instant < self.end
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub event_type_id: EventTypeId,
    pub start: DateTime<FixedOffset>,
}

/// Slots returned by one availability search. Indices shown to the user are 1-based.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotSet {
    pub event_type_id: EventTypeId,
    pub range: DateRange,
    pub slots: Vec<Slot>,
    pub fetched_at: DateTime<Utc>,
}

impl SlotSet {
    pub fn new(event_type_id: EventTypeId, range: DateRange, mut slots: Vec<Slot>) -> Self {
        slots.sort_by_key(|slot| slot.start);
        slots.dedup_by_key(|slot| slot.start);
        Self { event_type_id, range, slots, fetched_at: Utc::now() }
    }

    pub fn get(&self, index: usize) -> Option<&Slot> {
        index.checked_sub(1).and_then(|position| self.slots.get(position))
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
