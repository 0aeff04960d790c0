//! Services - long-running tasks and the gate state machine
//!
//! - `gate` - gate controller: inhibit, grace windows, open/close cycle
//! - `frame_source` - resilient frame acquisition from one capture device
//! - `entry_watch` - entry camera loop (plate recognition)
//! - `exit_watch` - exit camera loop (zone A to B crossing)

pub mod entry_watch;
pub mod exit_watch;
pub mod frame_source;
pub mod gate;

pub use entry_watch::EntryWatch;
pub use exit_watch::ExitWatch;
pub use frame_source::{Backoff, FrameReader, FrameSource};
pub use gate::{GateController, GateTimings};
