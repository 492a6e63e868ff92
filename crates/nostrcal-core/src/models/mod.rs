pub mod calendar;
pub mod tag_utils;

pub use calendar::{CalendarEntry, CalendarTime};
