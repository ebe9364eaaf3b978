use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventTypeId(pub u64);

impl fmt::Display for EventTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventType {
    pub id: EventTypeId,
    pub title: String,
    pub slug: String,
    pub length_minutes: u32,
    pub description: Option<String>,
}

impl EventType {
    /// Matches a user-supplied reference against the id, title or slug.
    pub fn matches(&self, reference: &str) -> bool {
        let reference = reference.trim();
        if reference.is_empty() {
            return false;
        }
        reference == self.id.to_string()
            || reference.eq_ignore_ascii_case(&self.title)
            || reference.eq_ignore_ascii_case(&self.slug)
    }
}
