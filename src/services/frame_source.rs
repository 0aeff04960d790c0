//! Frame source - continuous acquisition from one capture device
//!
//! A spawned loop locks the device for as long as it runs. It opens it, reads
//! frames into a single shared slot, and on any failure releases the device
//! and reopens after an exponential backoff. Readers take a clone of the
//! latest frame; the slot lock is held only for the swap or the clone, never
//! across an await.

use crate::domain::types::Frame;
use crate::infra::metrics::Metrics;
use crate::io::camera::CaptureDevice;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Bound on how long `stop` waits for the loop to exit
const STOP_TIMEOUT: Duration = Duration::from_secs(1);

/// How often readers look for a newer frame
const FRAME_POLL: Duration = Duration::from_millis(30);

/// The running loop holds the lock for its whole lifetime
type SharedDevice = Arc<tokio::sync::Mutex<Box<dyn CaptureDevice>>>;

/// Reconnect delay: starts at `initial`, grows by `factor` per consecutive
/// failure, capped at `max`
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    factor: f64,
    max: Duration,
    current: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), 1.5, Duration::from_secs(10))
    }
}

impl Backoff {
    pub fn new(initial: Duration, factor: f64, max: Duration) -> Self {
        Self { initial, factor, max, current: initial }
    }

    /// Delay for this failure; the following one will be longer
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.mul_f64(self.factor).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// Read-only handle to a source's latest frame
#[derive(Clone)]
pub struct FrameReader {
    name: Arc<str>,
    slot: Arc<Mutex<Option<Frame>>>,
}

impl FrameReader {
    #[cfg(test)]
    pub(crate) fn empty(name: &str) -> Self {
        Self { name: Arc::from(name), slot: Arc::new(Mutex::new(None)) }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Most recent frame, or `None` before the first capture
    pub fn latest(&self) -> Option<Frame> {
        self.slot.lock().clone()
    }

    /// Wait for a frame whose sequence number differs from `seen`.
    /// Returns `None` once shutdown is signalled.
    pub async fn next_after(
        &self,
        seen: u64,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Option<Frame> {
        loop {
            if *shutdown.borrow() {
                return None;
            }
            if let Some(frame) = self.latest().filter(|f| f.seq != seen) {
                return Some(frame);
            }
            tokio::select! {
                _ = tokio::time::sleep(FRAME_POLL) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
            }
        }
    }
}

pub struct FrameSource {
    reader: FrameReader,
    /// Outlives the loop, so a source whose loop was aborted can start again
    device: SharedDevice,
    task: Option<JoinHandle<()>>,
    shutdown_tx: watch::Sender<bool>,
    metrics: Arc<Metrics>,
}

impl FrameSource {
    pub fn new(name: &str, device: Box<dyn CaptureDevice>, metrics: Arc<Metrics>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            reader: FrameReader { name: Arc::from(name), slot: Arc::new(Mutex::new(None)) },
            device: Arc::new(tokio::sync::Mutex::new(device)),
            task: None,
            shutdown_tx,
            metrics,
        }
    }

    pub fn reader(&self) -> FrameReader {
        self.reader.clone()
    }

    pub fn latest(&self) -> Option<Frame> {
        self.reader.latest()
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    /// Spawn the acquisition loop. Calling again while running does nothing.
    pub fn start(&mut self) {
        if self.task.is_some() {
            return;
        }
        self.shutdown_tx.send_replace(false);

        let acquisition = Acquisition {
            name: self.reader.name.clone(),
            device: self.device.clone(),
            slot: self.reader.slot.clone(),
            metrics: self.metrics.clone(),
            shutdown: self.shutdown_tx.subscribe(),
        };
        self.task = Some(tokio::spawn(acquisition.run()));
    }

    /// Signal the loop to end and wait for it, at most `STOP_TIMEOUT`
    pub async fn stop(&mut self) {
        let Some(mut task) = self.task.take() else {
            return;
        };
        self.shutdown_tx.send_replace(true);

        match tokio::time::timeout(STOP_TIMEOUT, &mut task).await {
            Ok(Ok(())) => {
                info!(source = %self.reader.name, "frame_source_stopped");
            }
            Ok(Err(e)) => {
                warn!(source = %self.reader.name, error = %e, "frame_source_task_failed");
            }
            Err(_) => {
                // Device stays in `self.device`; the next loop reopens it
                task.abort();
                let _ = task.await;
                warn!(source = %self.reader.name, "frame_source_stop_timeout");
            }
        }
    }
}

struct Acquisition {
    name: Arc<str>,
    device: SharedDevice,
    slot: Arc<Mutex<Option<Frame>>>,
    metrics: Arc<Metrics>,
    shutdown: watch::Receiver<bool>,
}

impl Acquisition {
    async fn run(mut self) {
        let mut device = self.device.clone().lock_owned().await;
        info!(source = %self.name, device = %device.describe(), "frame_source_started");

        let mut backoff = Backoff::default();
        let mut opened = false;
        // Continue numbering across restarts so readers never see a repeat
        let mut seq = self.slot.lock().as_ref().map_or(0, |f| f.seq);

        while !*self.shutdown.borrow() {
            if !opened {
                match device.open().await {
                    Ok(()) => {
                        opened = true;
                        backoff.reset();
                        info!(source = %self.name, "frame_source_device_opened");
                    }
                    Err(e) => {
                        let delay = backoff.next_delay();
                        warn!(
                            source = %self.name,
                            error = %format!("{e:#}"),
                            retry_ms = %delay.as_millis(),
                            "frame_source_open_failed"
                        );
                        if self.pause(delay).await {
                            break;
                        }
                        continue;
                    }
                }
            }

            let read = tokio::select! {
                read = device.read() => read,
                _ = self.shutdown.changed() => break,
            };

            match read {
                Ok(data) => {
                    seq += 1;
                    let frame = Frame { data, captured_at: Instant::now().into_std(), seq };
                    *self.slot.lock() = Some(frame);
                    self.metrics.record_frame();
                    debug!(source = %self.name, seq = %seq, "frame_captured");
                }
                Err(e) => {
                    device.release();
                    opened = false;
                    let delay = backoff.next_delay();
                    warn!(
                        source = %self.name,
                        error = %format!("{e:#}"),
                        retry_ms = %delay.as_millis(),
                        "frame_source_read_failed"
                    );
                    if self.pause(delay).await {
                        break;
                    }
                }
            }
        }

        if opened {
            device.release();
        }
        debug!(source = %self.name, frames = %seq, "frame_source_loop_exit");
    }

    /// Sleep before a reopen. Returns true when shutdown was requested.
    async fn pause(&mut self, delay: Duration) -> bool {
        self.metrics.record_reconnect();
        tokio::select! {
            _ = tokio::time::sleep(delay) => false,
            changed = self.shutdown.changed() => changed.is_err() || *self.shutdown.borrow(),
        }
    }
}
