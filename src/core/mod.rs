pub mod filter_state;
pub mod log_state;

pub use filter_state::{FilterState, RenderedLine};
pub use log_state::{LogEntry, LogState};
