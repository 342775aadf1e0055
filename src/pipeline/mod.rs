//! Capture-to-result pipeline: dispatch gate, result store, and the mode
//! state machine that wires them together.

pub mod capture_loop;
pub mod log;
pub mod mode;
pub mod store;
pub mod worker;

pub use capture_loop::CaptureLoop;
pub use log::{LogEntry, ResultLog};
pub use mode::{Mode, ModeController};
pub use store::{ResultSnapshot, ResultStore};
pub use worker::{DetectionWorker, DispatchStats, Dispatcher};
