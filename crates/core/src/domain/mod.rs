pub mod booking;
pub mod event_type;
pub mod operation;
pub mod session;
pub mod slot;
pub mod time;
