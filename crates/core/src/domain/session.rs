use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::booking::Booking;
use crate::domain::operation::{OperationKind, ParamKey, Parameters};
use crate::domain::slot::SlotSet;
use crate::flows::PendingStatus;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new_random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
    pub at: DateTime<Utc>,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self { role: Role::User, text: text.into(), at: Utc::now() }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self { role: Role::Assistant, text: text.into(), at: Utc::now() }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PendingActionId(pub Uuid);

impl PendingActionId {
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for PendingActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A mutating operation being negotiated with the user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAction {
    pub id: PendingActionId,
    pub kind: OperationKind,
    pub parameters: Parameters,
    pub status: PendingStatus,
    pub opened_at: DateTime<Utc>,
}

impl PendingAction {
    pub fn open(kind: OperationKind, parameters: Parameters) -> Self {
        Self {
            id: PendingActionId::new_random(),
            kind,
            parameters,
            status: PendingStatus::None,
            opened_at: Utc::now(),
        }
    }

    pub fn missing_parameters(&self) -> Vec<ParamKey> {
        self.parameters.missing_for(self.kind)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    turns: Vec<Turn>,
    pub pending: Option<PendingAction>,
    pub slots: Option<SlotSet>,
    pub booking_candidates: Vec<Booking>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: SessionId) -> Self {
        let now = Utc::now();
        Self {
            id,
            turns: Vec::new(),
            pending: None,
            slots: None,
            booking_candidates: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// History is append-only; there is no way to edit or drop a recorded turn.
    pub fn push_turn(&mut self, turn: Turn) {
        self.updated_at = turn.at;
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn recent_turns(&self, limit: usize) -> &[Turn] {
        let start = self.turns.len().saturating_sub(limit);
        &self.turns[start..]
    }

    pub fn pending_status(&self) -> PendingStatus {
        self.pending.as_ref().map(|pending| pending.status).unwrap_or(PendingStatus::None)
    }

    pub fn invalidate_slots(&mut self) {
        self.slots = None;
    }
}

#[cfg(test)]
mod tests {
    use super::{PendingAction, Session, SessionId, Turn};
    use crate::domain::operation::{OperationKind, ParamKey, Parameters};
    use crate::flows::PendingStatus;

    #[test]
    fn history_is_append_only_and_windowed() {
        let mut session = Session::new(SessionId::from("sess-1"));
        session.push_turn(Turn::user("hi"));
        session.push_turn(Turn::assistant("hello"));
        session.push_turn(Turn::user("book a call"));

        assert_eq!(session.turns().len(), 3);
        let recent = session.recent_turns(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].text, "hello");
        assert_eq!(session.recent_turns(10).len(), 3);
    }

    #[test]
    fn pending_status_defaults_to_none() {
        let mut session = Session::new(SessionId::new_random());
        assert_eq!(session.pending_status(), PendingStatus::None);

        let mut pending = PendingAction::open(
            OperationKind::CancelBooking,
            Parameters::new().with(ParamKey::BookingId, "uid-1"),
        );
        pending.status = PendingStatus::AwaitingConfirmation;
        session.pending = Some(pending);

        assert_eq!(session.pending_status(), PendingStatus::AwaitingConfirmation);
    }

    #[test]
    fn reopened_actions_get_fresh_identity() {
        let first = PendingAction::open(OperationKind::CreateBooking, Parameters::new());
        let second = PendingAction::open(OperationKind::CreateBooking, Parameters::new());

        assert_ne!(first.id, second.id);
        assert_eq!(first.missing_parameters().len(), 4);
    }
}
