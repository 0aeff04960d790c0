//! Gate end-position limit switches
//!
//! Both switches are optional. A switch that cannot be read reports "not
//! pressed", which makes the waiting phase fall back to its timeout.

use crate::domain::types::DoorStatus;
use crate::infra::config::{Config, LimitSwitchSource};
use crate::io::gpio::{Direction, GpioLine};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

pub trait LimitSwitch: Send + Sync {
    fn is_pressed(&self) -> bool;
}

/// Active-low switch on a sysfs GPIO input: pressed pulls the line to ground.
///
/// sysfs cannot enable the SoC's internal bias, so the line needs an external
/// pull-up resistor to read high while the switch is open.
pub struct GpioSwitch {
    line: GpioLine,
}

impl GpioSwitch {
    pub fn new(pin: u32) -> anyhow::Result<Self> {
        Ok(Self::from_line(GpioLine::open(pin, Direction::In)?))
    }

    pub fn from_line(line: GpioLine) -> Self {
        Self { line }
    }
}

impl LimitSwitch for GpioSwitch {
    fn is_pressed(&self) -> bool {
        match self.line.read() {
            Ok(high) => !high,
            Err(e) => {
                warn!(pin = %self.line.pin(), error = %e, "limit_switch_read_failed");
                false
            }
        }
    }
}

/// Virtual switch pressed while the door controller reports `target`
pub struct DoorStatusSwitch {
    status: watch::Receiver<DoorStatus>,
    target: DoorStatus,
}

impl DoorStatusSwitch {
    pub fn new(status: watch::Receiver<DoorStatus>, target: DoorStatus) -> Self {
        Self { status, target }
    }
}

impl LimitSwitch for DoorStatusSwitch {
    fn is_pressed(&self) -> bool {
        *self.status.borrow() == self.target
    }
}

/// The pair of optional end-position switches
#[derive(Clone, Default)]
pub struct LimitSwitches {
    pub open: Option<Arc<dyn LimitSwitch>>,
    pub closed: Option<Arc<dyn LimitSwitch>>,
}

impl LimitSwitches {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_configured(&self) -> bool {
        self.open.is_some() || self.closed.is_some()
    }
}

fn gpio_switch(pin: Option<u32>, position: &'static str) -> Option<Arc<dyn LimitSwitch>> {
    let pin = pin?;
    match GpioSwitch::new(pin) {
        Ok(switch) => {
            info!(pin = %pin, position = %position, "limit_switch_ready");
            Some(Arc::new(switch))
        }
        Err(e) => {
            warn!(
                pin = %pin,
                position = %position,
                error = %format!("{e:#}"),
                "limit_switch_unavailable"
            );
            None
        }
    }
}

/// Build switches from config.
///
/// `door_status` must be provided when the source is RS485; without it the
/// switches are left out and phases run on their timeouts.
pub fn build_limit_switches(
    config: &Config,
    door_status: Option<watch::Receiver<DoorStatus>>,
) -> LimitSwitches {
    if !config.use_limit_switch() {
        return LimitSwitches::none();
    }

    match config.limit_switch_source() {
        LimitSwitchSource::Gpio => {
            let pins = config.limit_switch();
            LimitSwitches {
                open: gpio_switch(pins.pin_open, "open"),
                closed: gpio_switch(pins.pin_closed, "closed"),
            }
        }
        LimitSwitchSource::Rs485 => match door_status {
            Some(rx) => LimitSwitches {
                open: Some(Arc::new(DoorStatusSwitch::new(rx.clone(), DoorStatus::Open))),
                closed: Some(Arc::new(DoorStatusSwitch::new(rx, DoorStatus::Closed))),
            },
            None => {
                warn!("limit_switch_rs485_not_running");
                LimitSwitches::none()
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_gpio_switch_is_active_low() {
        let root = tempdir().unwrap();
        let line_dir = root.path().join("gpio22");
        fs::create_dir_all(&line_dir).unwrap();
        fs::write(line_dir.join("value"), "1").unwrap();

        let switch = GpioSwitch::from_line(
            GpioLine::open_at(root.path(), 22, Direction::In).unwrap(),
        );
        assert!(!switch.is_pressed());

        fs::write(line_dir.join("value"), "0").unwrap();
        assert!(switch.is_pressed());

        // Unreadable line falls back to "not pressed"
        fs::remove_file(line_dir.join("value")).unwrap();
        assert!(!switch.is_pressed());
    }

    #[test]
    fn test_door_status_switch_follows_channel() {
        let (tx, rx) = watch::channel(DoorStatus::Unknown);
        let open = DoorStatusSwitch::new(rx.clone(), DoorStatus::Open);
        let closed = DoorStatusSwitch::new(rx, DoorStatus::Closed);

        assert!(!open.is_pressed());
        assert!(!closed.is_pressed());

        tx.send_replace(DoorStatus::Open);
        assert!(open.is_pressed());
        assert!(!closed.is_pressed());

        tx.send_replace(DoorStatus::Closed);
        assert!(!open.is_pressed());
        assert!(closed.is_pressed());
    }

    #[test]
    fn test_disabled_limit_switches() {
        let switches = build_limit_switches(&Config::default(), None);
        assert!(!switches.is_configured());
    }
}
