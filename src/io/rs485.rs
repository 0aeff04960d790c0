//! RS485 door controller status monitoring
//!
//! Used as a limit-switch source when the gate operator reports its own
//! position. Status is published on a watch channel.
//!
//! Protocol:
//! - Baud: 19200, 8N1
//! - Command frame: 8 bytes, starts with 0x7E
//! - Response frame: 18 bytes, starts with 0x7F
//! - Checksum: sum all bytes, bitwise NOT

use crate::domain::types::DoorStatus;
use crate::infra::config::Config;
use std::io::ErrorKind;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::watch;
use tokio::time::interval;
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, warn};

const START_BYTE_COMMAND: u8 = 0x7E;
const START_BYTE_RESPONSE: u8 = 0x7F;
const CMD_QUERY: u8 = 0x10;
const COMMAND_FRAME_LEN: usize = 8;
const RESPONSE_FRAME_LEN: usize = 18;

// Door status codes
const DOOR_CLOSED: u8 = 0x00;
const DOOR_OPEN: u8 = 0x01;
const DOOR_RESTING: u8 = 0x02;
const DOOR_IN_MOTION: u8 = 0x03;
const DOOR_FIRE_SIGNAL_OPEN: u8 = 0x04;

/// Maximum short reads per poll before giving up on a frame
const MAX_READ_ATTEMPTS: usize = 50;

/// Wait between attempts to reopen the serial port
const REOPEN_DELAY: Duration = Duration::from_secs(5);

/// Build query command frame (8 bytes)
pub fn build_query_command(machine_number: u8) -> [u8; COMMAND_FRAME_LEN] {
    let mut frame = [0u8; COMMAND_FRAME_LEN];
    frame[0] = START_BYTE_COMMAND;
    frame[2] = machine_number;
    frame[3] = CMD_QUERY;

    let sum: u8 = frame[..7].iter().fold(0u8, |acc, &x| acc.wrapping_add(x));
    frame[7] = !sum;
    frame
}

/// Parse a response frame and extract door status
pub fn parse_response(data: &[u8]) -> Option<DoorStatus> {
    if data.len() != RESPONSE_FRAME_LEN || data[0] != START_BYTE_RESPONSE {
        warn!(len = data.len(), "rs485_invalid_frame");
        return None;
    }

    // Sum of all bytes including checksum, plus one, wraps to zero
    let sum: u8 = data.iter().fold(0u8, |acc, &x| acc.wrapping_add(x));
    if sum.wrapping_add(1) != 0 {
        let hex_dump: String = data.iter().map(|b| format!("{:02X}", b)).collect::<Vec<_>>().join(" ");
        warn!(sum = %sum, raw_bytes = %hex_dump, "rs485_checksum_failed");
        return None;
    }

    let status = match data[4] {
        DOOR_CLOSED | DOOR_RESTING => DoorStatus::Closed,
        DOOR_OPEN | DOOR_FIRE_SIGNAL_OPEN => DoorStatus::Open,
        DOOR_IN_MOTION => DoorStatus::Moving,
        _ => DoorStatus::Unknown,
    };
    Some(status)
}

/// Reassembles response frames from serial chunks
#[derive(Debug, Default)]
struct ResponseAssembler {
    pending: Vec<u8>,
}

impl ResponseAssembler {
    fn push(&mut self, chunk: &[u8]) {
        self.pending.extend_from_slice(chunk);
        self.align();
    }

    /// Drop everything before the next response start byte
    fn align(&mut self) {
        match self.pending.iter().position(|&b| b == START_BYTE_RESPONSE) {
            Some(0) => {}
            Some(skip) => {
                debug!(discarded = skip, "rs485_sync_discarded_bytes");
                self.pending.drain(..skip);
            }
            None => self.pending.clear(),
        }
    }

    fn has_frame(&self) -> bool {
        self.pending.len() >= RESPONSE_FRAME_LEN
    }

    /// Take one complete frame, if buffered, and decode it
    fn take_status(&mut self) -> Option<DoorStatus> {
        if !self.has_frame() {
            return None;
        }
        let frame: Vec<u8> = self.pending.drain(..RESPONSE_FRAME_LEN).collect();
        self.align();
        parse_response(&frame)
    }

    fn clear(&mut self) {
        self.pending.clear();
    }
}

pub struct Rs485Monitor {
    device: String,
    baud: u32,
    machine_number: u8,
    poll_interval: Duration,
    status_tx: watch::Sender<DoorStatus>,
    assembler: ResponseAssembler,
}

impl Rs485Monitor {
    /// Create a monitor and the receiver its status is published on
    pub fn new(config: &Config) -> (Self, watch::Receiver<DoorStatus>) {
        let (status_tx, status_rx) = watch::channel(DoorStatus::Unknown);
        let monitor = Self {
            device: config.rs485_device().to_string(),
            baud: config.rs485_baud(),
            machine_number: 1,
            poll_interval: Duration::from_millis(config.rs485_poll_interval_ms().max(10)),
            status_tx,
            assembler: ResponseAssembler::default(),
        };
        (monitor, status_rx)
    }

    /// Read until one response frame is buffered or the attempt budget runs out
    async fn query_response(
        &mut self,
        port: &mut tokio_serial::SerialStream,
    ) -> Result<Option<DoorStatus>, std::io::Error> {
        let mut chunk = [0u8; 64];

        for _ in 0..MAX_READ_ATTEMPTS {
            if self.assembler.has_frame() {
                break;
            }
            match tokio::time::timeout(Duration::from_millis(50), port.read(&mut chunk)).await {
                Ok(Ok(n)) => self.assembler.push(&chunk[..n]),
                Ok(Err(e)) if e.kind() == ErrorKind::TimedOut => {}
                Ok(Err(e)) => return Err(e),
                Err(_) => {}
            }
        }

        if !self.assembler.has_frame() {
            debug!(buffered = self.assembler.pending.len(), "rs485_no_complete_frame");
        }
        Ok(self.assembler.take_status())
    }

    fn open_port(&self) -> Option<tokio_serial::SerialStream> {
        match tokio_serial::new(&self.device, self.baud)
            .timeout(Duration::from_millis(100))
            .open_native_async()
        {
            Ok(port) => {
                info!(device = %self.device, "rs485_port_opened");
                Some(port)
            }
            Err(e) => {
                warn!(device = %self.device, error = %e, "rs485_port_open_failed");
                None
            }
        }
    }

    fn publish(&self, status: DoorStatus) {
        if *self.status_tx.borrow() != status {
            info!(door = %status.as_str(), "rs485_status");
            self.status_tx.send_replace(status);
        }
    }

    /// Poll the door controller until shutdown
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            device = %self.device,
            baud = %self.baud,
            poll_interval_ms = %self.poll_interval.as_millis(),
            "rs485_monitor_started"
        );

        let mut port = self.open_port();
        let mut poll_timer = interval(self.poll_interval);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("rs485_shutdown");
                        return;
                    }
                }
                _ = poll_timer.tick() => {}
            }

            let Some(ref mut p) = port else {
                self.publish(DoorStatus::Unknown);
                tokio::select! {
                    _ = shutdown.changed() => {}
                    _ = tokio::time::sleep(REOPEN_DELAY) => {}
                }
                port = self.open_port();
                continue;
            };

            let cmd = build_query_command(self.machine_number);
            if let Err(e) = p.write_all(&cmd).await {
                warn!(error = %e, "rs485_write_error");
                port = None;
                continue;
            }

            match self.query_response(p).await {
                Ok(Some(status)) => self.publish(status),
                Ok(None) => {}
                Err(e) => {
                    warn!(error = %e, "rs485_read_error");
                    self.assembler.clear();
                    port = None;
                }
            }
        }
    }
}
