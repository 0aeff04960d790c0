//! Domain models - core types and pure decision components
//!
//! - `types` - Origin, GateState, Frame, Point, DoorStatus
//! - `zones` - Polygon and the A-then-B `ZoneSequencer`
//! - `entry_policy` - `EntryTriggerPolicy` for plate-triggered opens
//! - `whitelist` - allowed plate identities

pub mod entry_policy;
pub mod types;
pub mod whitelist;
pub mod zones;

pub use entry_policy::{Candidate, EntryTriggerPolicy};
pub use types::{DoorStatus, Frame, GateState, Origin, Point};
pub use whitelist::Whitelist;
pub use zones::{Polygon, ZoneSequencer, ZoneUpdate};
