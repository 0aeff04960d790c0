//! Gate relay actuators
//!
//! The gate operator is triggered by a short relay pulse. Implementations
//! never return errors: a failed switch is logged and the cycle carries on.

use crate::infra::config::{Config, RelayKind};
use crate::io::gpio::{Direction, GpioLine};
use crate::io::http_auth::AuthUrl;
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[async_trait]
pub trait Actuator: Send + Sync {
    async fn on(&self);
    async fn off(&self);
}

/// Relay stand-in that only records and logs its state
#[derive(Debug, Default)]
pub struct LogRelay {
    energized: AtomicBool,
}

impl LogRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_on(&self) -> bool {
        self.energized.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Actuator for LogRelay {
    async fn on(&self) {
        self.energized.store(true, Ordering::SeqCst);
        info!("relay_on");
    }

    async fn off(&self) {
        self.energized.store(false, Ordering::SeqCst);
        info!("relay_off");
    }
}

/// Relay on a sysfs GPIO output
pub struct GpioRelay {
    line: GpioLine,
    active_high: bool,
}

impl GpioRelay {
    pub fn new(pin: u32, active_high: bool) -> anyhow::Result<Self> {
        let line = GpioLine::open(pin, Direction::Out)?;
        let relay = Self { line, active_high };
        // Start de-energized
        relay.drive(false);
        info!(pin = %pin, active_high = %active_high, "gpio_relay_ready");
        Ok(relay)
    }

    fn drive(&self, energized: bool) {
        let level = energized == self.active_high;
        if let Err(e) = self.line.write(level) {
            error!(
                pin = %self.line.pin(),
                energized = %energized,
                error = %e,
                "gpio_relay_write_failed"
            );
        }
    }
}

#[async_trait]
impl Actuator for GpioRelay {
    async fn on(&self) {
        self.drive(true);
    }

    async fn off(&self) {
        self.drive(false);
    }
}

/// Network relay board switched by plain GET requests
pub struct HttpRelay {
    client: reqwest::Client,
    on_url: AuthUrl,
    off_url: AuthUrl,
}

impl HttpRelay {
    pub fn new(on_url: &str, off_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .http1_only()
            .build()
            .context("Failed to build relay HTTP client")?;
        Ok(Self { client, on_url: AuthUrl::parse(on_url), off_url: AuthUrl::parse(off_url) })
    }

    async fn send(&self, target: &AuthUrl, action: &'static str) {
        let request = target.apply(self.client.get(&target.url).header("Accept", "*/*"));
        match request.send().await {
            Ok(response) if response.status().is_success() => {
                info!(action = %action, status = %response.status().as_u16(), "http_relay_switched");
            }
            Ok(response) => {
                warn!(action = %action, status = %response.status().as_u16(), "http_relay_bad_status");
            }
            Err(e) => {
                error!(action = %action, error = %e, "http_relay_request_failed");
            }
        }
    }
}

#[async_trait]
impl Actuator for HttpRelay {
    async fn on(&self) {
        self.send(&self.on_url, "on").await;
    }

    async fn off(&self) {
        self.send(&self.off_url, "off").await;
    }
}

fn try_build(config: &Config) -> anyhow::Result<Arc<dyn Actuator>> {
    let relay = config.relay();
    match relay.kind {
        RelayKind::Log => Ok(Arc::new(LogRelay::new())),
        RelayKind::Gpio => {
            let pin = relay.pin.ok_or_else(|| anyhow!("relay.pin is required for gpio relay"))?;
            Ok(Arc::new(GpioRelay::new(pin, relay.active_high)?))
        }
        RelayKind::Http => {
            let on_url =
                relay.on_url.as_deref().ok_or_else(|| anyhow!("relay.on_url is required"))?;
            let off_url =
                relay.off_url.as_deref().ok_or_else(|| anyhow!("relay.off_url is required"))?;
            Ok(Arc::new(HttpRelay::new(on_url, off_url, config.relay_timeout())?))
        }
    }
}

/// Build the configured relay, degrading to `LogRelay` if it cannot be set up
pub fn build_relay(config: &Config) -> Arc<dyn Actuator> {
    match try_build(config) {
        Ok(relay) => relay,
        Err(e) => {
            warn!(
                kind = ?config.relay_kind(),
                error = %format!("{e:#}"),
                "relay_unavailable_using_log_relay"
            );
            Arc::new(LogRelay::new())
        }
    }
}
