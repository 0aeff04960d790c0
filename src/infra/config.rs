//! Configuration loading from TOML files
//!
//! The binary picks the file from `--config`, then the `CONFIG_FILE`
//! environment variable, then `config/gate.toml`. A missing or unreadable
//! file falls back to defaults.
//!
//! Durations are written in seconds (fractions allowed) unless the key ends in `_ms`.

use anyhow::Context;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RelayKind {
    /// Log relay transitions only
    #[default]
    Log,
    /// Linux sysfs GPIO output
    Gpio,
    /// HTTP relay board with on/off URLs
    Http,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LimitSwitchSource {
    /// Linux sysfs GPIO inputs, one pin per end position
    #[default]
    Gpio,
    /// Door controller status polled over RS485
    Rs485,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    #[serde(default = "default_site_id")]
    pub id: String,
}

fn default_site_id() -> String {
    "gate".to_string()
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self { id: default_site_id() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GateConfig {
    #[serde(default = "default_pulse_sec")]
    pub pulse_sec: f64,
    #[serde(default = "default_opening_timeout")]
    pub opening_timeout: f64,
    #[serde(default = "default_open_auto_close")]
    pub open_auto_close: f64,
    #[serde(default = "default_closing_timeout")]
    pub closing_timeout: f64,
    #[serde(default = "default_cooldown_after_close")]
    pub cooldown_after_close: f64,
    #[serde(default = "default_grace_sec")]
    pub grace_sec: f64,
    #[serde(default)]
    pub use_limit_switch: bool,
    #[serde(default = "default_limit_poll_ms")]
    pub limit_poll_ms: u64,
}

fn default_pulse_sec() -> f64 {
    0.7
}

fn default_opening_timeout() -> f64 {
    5.0
}

fn default_open_auto_close() -> f64 {
    15.0
}

fn default_closing_timeout() -> f64 {
    10.0
}

fn default_cooldown_after_close() -> f64 {
    8.0
}

fn default_grace_sec() -> f64 {
    60.0
}

fn default_limit_poll_ms() -> u64 {
    50
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            pulse_sec: default_pulse_sec(),
            opening_timeout: default_opening_timeout(),
            open_auto_close: default_open_auto_close(),
            closing_timeout: default_closing_timeout(),
            cooldown_after_close: default_cooldown_after_close(),
            grace_sec: default_grace_sec(),
            use_limit_switch: false,
            limit_poll_ms: default_limit_poll_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub kind: RelayKind,
    #[serde(default)]
    pub pin: Option<u32>,
    #[serde(default)]
    pub active_high: bool,
    #[serde(default)]
    pub on_url: Option<String>,
    #[serde(default)]
    pub off_url: Option<String>,
    #[serde(default = "default_relay_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_relay_timeout_ms() -> u64 {
    2000
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            kind: RelayKind::Log,
            pin: None,
            active_high: false,
            on_url: None,
            off_url: None,
            timeout_ms: default_relay_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LimitSwitchConfig {
    #[serde(default)]
    pub source: LimitSwitchSource,
    #[serde(default)]
    pub pin_open: Option<u32>,
    #[serde(default)]
    pub pin_closed: Option<u32>,
    #[serde(default = "default_rs485_device")]
    pub device: String,
    #[serde(default = "default_rs485_baud")]
    pub baud: u32,
    #[serde(default = "default_rs485_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_rs485_device() -> String {
    "/dev/ttyAMA4".to_string()
}

fn default_rs485_baud() -> u32 {
    19200
}

fn default_rs485_poll_interval_ms() -> u64 {
    250
}

impl Default for LimitSwitchConfig {
    fn default() -> Self {
        Self {
            source: LimitSwitchSource::Gpio,
            pin_open: None,
            pin_closed: None,
            device: default_rs485_device(),
            baud: default_rs485_baud(),
            poll_interval_ms: default_rs485_poll_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CameraConfig {
    /// Snapshot URL, may carry `user:pass@` credentials
    pub url: String,
    #[serde(default = "default_fps")]
    pub fps: u32,
    #[serde(default = "default_camera_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_fps() -> u32 {
    10
}

fn default_camera_timeout_ms() -> u64 {
    3000
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CamerasConfig {
    #[serde(default, rename = "in")]
    pub entry: Option<CameraConfig>,
    #[serde(default, rename = "out")]
    pub exit: Option<CameraConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectionConfig {
    #[serde(default)]
    pub plate_url: Option<String>,
    #[serde(default)]
    pub motion_url: Option<String>,
    #[serde(default = "default_detection_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_detection_timeout_ms() -> u64 {
    2000
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self { plate_url: None, motion_url: None, timeout_ms: default_detection_timeout_ms() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EntryConfig {
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,
    #[serde(default = "default_identity_cooldown")]
    pub cooldown_sec: f64,
    #[serde(default = "default_recognize_every")]
    pub recognize_every: u32,
    #[serde(default = "default_plate_regex")]
    pub plate_regex: String,
}

fn default_min_confidence() -> f32 {
    0.3
}

fn default_identity_cooldown() -> f64 {
    10.0
}

fn default_recognize_every() -> u32 {
    5
}

fn default_plate_regex() -> String {
    "^[A-Z0-9]{4,8}$".to_string()
}

impl Default for EntryConfig {
    fn default() -> Self {
        Self {
            min_confidence: default_min_confidence(),
            cooldown_sec: default_identity_cooldown(),
            recognize_every: default_recognize_every(),
            plate_regex: default_plate_regex(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ZonesOutConfig {
    #[serde(default, rename = "a")]
    pub zone_a: Vec<[f64; 2]>,
    #[serde(default, rename = "b")]
    pub zone_b: Vec<[f64; 2]>,
    #[serde(default = "default_max_seconds_a_to_b")]
    pub max_seconds_a_to_b: f64,
    #[serde(default)]
    pub min_speed_px_per_s: f64,
}

fn default_max_seconds_a_to_b() -> f64 {
    4.0
}

impl Default for ZonesOutConfig {
    fn default() -> Self {
        Self {
            zone_a: Vec::new(),
            zone_b: Vec::new(),
            max_seconds_a_to_b: default_max_seconds_a_to_b(),
            min_speed_px_per_s: 0.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_whitelist_file")]
    pub whitelist_file: String,
    #[serde(default = "default_log_file")]
    pub log_file: String,
}

fn default_whitelist_file() -> String {
    "data/whitelist.txt".to_string()
}

fn default_log_file() -> String {
    "logs/events.jsonl".to_string()
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self { whitelist_file: default_whitelist_file(), log_file: default_log_file() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,
    /// HTTP endpoint port (0 to disable)
    #[serde(default)]
    pub http_port: u16,
}

fn default_metrics_interval() -> u64 {
    30
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval(), http_port: 0 }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub gate: GateConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub limit_switch: LimitSwitchConfig,
    #[serde(default)]
    pub cameras: CamerasConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub entry: EntryConfig,
    #[serde(default)]
    pub zones_out: ZonesOutConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    gate: GateConfig,
    relay: RelayConfig,
    limit_switch: LimitSwitchConfig,
    entry_camera: Option<CameraConfig>,
    exit_camera: Option<CameraConfig>,
    detection: DetectionConfig,
    entry: EntryConfig,
    zones_out: ZonesOutConfig,
    paths: PathsConfig,
    metrics: MetricsConfig,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default".to_string())
    }
}

/// Seconds from config to a Duration; negative or non-finite values become zero
fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: String) -> Self {
        Self {
            site_id: toml_config.site.id,
            gate: toml_config.gate,
            relay: toml_config.relay,
            limit_switch: toml_config.limit_switch,
            entry_camera: toml_config.cameras.entry,
            exit_camera: toml_config.cameras.exit,
            detection: toml_config.detection,
            entry: toml_config.entry,
            zones_out: toml_config.zones_out,
            paths: toml_config.paths,
            metrics: toml_config.metrics,
            config_file,
        }
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self::from_toml(toml_config, path.display().to_string()))
    }

    /// Load configuration from `path`, falling back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(error = %format!("{e:#}"), "config_load_failed_using_defaults");
                Self::default()
            }
        }
    }

    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    // Gate timing
    pub fn pulse_duration(&self) -> Duration {
        secs(self.gate.pulse_sec)
    }

    pub fn opening_timeout(&self) -> Duration {
        secs(self.gate.opening_timeout)
    }

    pub fn open_auto_close(&self) -> Duration {
        secs(self.gate.open_auto_close)
    }

    pub fn closing_timeout(&self) -> Duration {
        secs(self.gate.closing_timeout)
    }

    pub fn cooldown_after_close(&self) -> Duration {
        secs(self.gate.cooldown_after_close)
    }

    pub fn grace_period(&self) -> Duration {
        secs(self.gate.grace_sec)
    }

    pub fn use_limit_switch(&self) -> bool {
        self.gate.use_limit_switch
    }

    pub fn limit_poll_interval(&self) -> Duration {
        Duration::from_millis(self.gate.limit_poll_ms.max(1))
    }

    // Relay
    pub fn relay(&self) -> &RelayConfig {
        &self.relay
    }

    pub fn relay_kind(&self) -> RelayKind {
        self.relay.kind
    }

    pub fn relay_timeout(&self) -> Duration {
        Duration::from_millis(self.relay.timeout_ms)
    }

    // Limit switches
    pub fn limit_switch(&self) -> &LimitSwitchConfig {
        &self.limit_switch
    }

    pub fn limit_switch_source(&self) -> LimitSwitchSource {
        self.limit_switch.source
    }

    pub fn rs485_device(&self) -> &str {
        &self.limit_switch.device
    }

    pub fn rs485_baud(&self) -> u32 {
        self.limit_switch.baud
    }

    pub fn rs485_poll_interval_ms(&self) -> u64 {
        self.limit_switch.poll_interval_ms
    }

    // Cameras and detectors
    pub fn entry_camera(&self) -> Option<&CameraConfig> {
        self.entry_camera.as_ref()
    }

    pub fn exit_camera(&self) -> Option<&CameraConfig> {
        self.exit_camera.as_ref()
    }

    pub fn plate_url(&self) -> Option<&str> {
        self.detection.plate_url.as_deref()
    }

    pub fn motion_url(&self) -> Option<&str> {
        self.detection.motion_url.as_deref()
    }

    pub fn detection_timeout(&self) -> Duration {
        Duration::from_millis(self.detection.timeout_ms)
    }

    // Entry policy
    pub fn min_confidence(&self) -> f32 {
        self.entry.min_confidence
    }

    pub fn identity_cooldown(&self) -> Duration {
        secs(self.entry.cooldown_sec)
    }

    pub fn recognize_every(&self) -> u32 {
        self.entry.recognize_every.max(1)
    }

    pub fn plate_regex(&self) -> &str {
        &self.entry.plate_regex
    }

    // Exit zones
    pub fn zone_a(&self) -> &[[f64; 2]] {
        &self.zones_out.zone_a
    }

    pub fn zone_b(&self) -> &[[f64; 2]] {
        &self.zones_out.zone_b
    }

    pub fn max_a_to_b(&self) -> Duration {
        secs(self.zones_out.max_seconds_a_to_b)
    }

    pub fn min_speed_px_per_s(&self) -> f64 {
        self.zones_out.min_speed_px_per_s
    }

    // Paths
    pub fn whitelist_file(&self) -> &str {
        &self.paths.whitelist_file
    }

    pub fn log_file(&self) -> &str {
        &self.paths.log_file
    }

    // Metrics
    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics.interval_secs.max(1)
    }

    pub fn http_port(&self) -> u16 {
        self.metrics.http_port
    }

    /// Builder method for tests to shrink gate timings
    #[cfg(test)]
    pub fn with_gate_timings(mut self, gate: GateConfig) -> Self {
        self.gate = gate;
        self
    }
}
