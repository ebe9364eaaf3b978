pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;

pub use audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
pub use domain::booking::{Attendee, Booking, BookingFilter, BookingId, BookingStatus, NewBooking};
pub use domain::event_type::{EventType, EventTypeId};
pub use domain::operation::{
    AmbiguityReason, OperationKind, OperationRequest, ParamKey, Parameters,
};
pub use domain::session::{PendingAction, PendingActionId, Role, Session, SessionId, Turn};
pub use domain::slot::{DateRange, Slot, SlotSet};
pub use domain::time::TimeContext;
pub use errors::{DomainError, InterfaceError, ToolError, TurnError};
pub use flows::PendingStatus;
