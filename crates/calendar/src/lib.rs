pub mod cal_com;
pub mod client;
pub mod memory;

pub use cal_com::CalComClient;
pub use client::{CalendarClient, CalendarError, CalendarOperation, Profile};
pub use memory::InMemoryCalendar;
