//! IO modules - external system interfaces
//!
//! - `camera` - capture devices (HTTP snapshot cameras)
//! - `detectors` - plate recognizer and motion detector adapters
//! - `relay` - gate relay actuators (log, sysfs GPIO, HTTP)
//! - `limit_switch` - end-position switches (GPIO or RS485 door status)
//! - `gpio` - sysfs GPIO lines
//! - `rs485` - serial door controller status monitoring
//! - `event_log` - JSONL gate event log
//! - `http_auth` - credentials embedded in device URLs
//! - `http_api` - metrics, health and manual-open HTTP endpoint

pub mod camera;
pub mod detectors;
pub mod event_log;
pub mod gpio;
pub mod http_api;
pub mod http_auth;
pub mod limit_switch;
pub mod relay;
pub mod rs485;

pub use camera::{CaptureDevice, HttpSnapshotDevice};
pub use detectors::{
    HttpMotionDetector, HttpPlateRecognizer, MotionDetector, PlateFormat, PlateReading,
    PlateRecognizer,
};
pub use event_log::EventLog;
pub use http_api::start_http_server;
pub use limit_switch::{build_limit_switches, LimitSwitch, LimitSwitches};
pub use relay::{build_relay, Actuator};
pub use rs485::Rs485Monitor;
