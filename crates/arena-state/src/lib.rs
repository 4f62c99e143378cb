pub mod draft;
pub mod events;

pub use draft::{DraftMachine, DraftNotification, DraftPick, DraftSession, DraftState};
pub use events::{LogClock, LogEvent, LogLine, LogParseError, LogParser};
