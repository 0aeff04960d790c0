//! ANPR gate controller
//!
//! Opens a single vehicle gate for whitelisted plates on the entry camera and
//! for objects crossing zone A then zone B on the exit camera.
//!
//! Module structure:
//! - `domain/` - Core types and pure decision logic (zones, entry policy, whitelist)
//! - `io/` - External interfaces (cameras, detectors, relay, limit switches, RS485, HTTP)
//! - `services/` - Gate controller, frame sources, camera loops
//! - `infra/` - Infrastructure (Config, Metrics)

use anyhow::Context;
use anpr_gate::domain::{EntryTriggerPolicy, Polygon, Whitelist, ZoneSequencer};
use anpr_gate::infra::{Config, LimitSwitchSource, Metrics};
use anpr_gate::io::{
    build_limit_switches, build_relay, start_http_server, EventLog, HttpMotionDetector,
    HttpPlateRecognizer, HttpSnapshotDevice, PlateFormat, Rs485Monitor,
};
use anpr_gate::services::{EntryWatch, ExitWatch, FrameSource, GateController, GateTimings};
use clap::Parser;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// ANPR gate controller - entry by plate, exit by motion
#[derive(Parser, Debug)]
#[command(name = "anpr-gate", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, env = "CONFIG_FILE", default_value = "config/gate.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG=debug shows every frame and policy decision
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    let args = Args::parse();
    info!(version = %env!("CARGO_PKG_VERSION"), git = %env!("GIT_HASH"), "anpr-gate starting");

    let config = Config::load_from_path(&args.config);
    info!(
        config_file = %config.config_file(),
        site = %config.site_id(),
        relay = ?config.relay_kind(),
        use_limit_switch = %config.use_limit_switch(),
        limit_switch_source = ?config.limit_switch_source(),
        entry_camera = %config.entry_camera().is_some(),
        exit_camera = %config.exit_camera().is_some(),
        http_port = %config.http_port(),
        "config_loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let metrics = Arc::new(Metrics::new());
    let events = Arc::new(EventLog::new(config.log_file()));

    let whitelist = match Whitelist::load(config.whitelist_file()) {
        Ok(whitelist) => Arc::new(whitelist),
        Err(e) => {
            warn!(error = %format!("{e:#}"), "whitelist_unavailable");
            Arc::new(Whitelist::default())
        }
    };

    // Door controller status doubles as limit switches when configured
    let door_status = if config.use_limit_switch()
        && config.limit_switch_source() == LimitSwitchSource::Rs485
    {
        let (monitor, status_rx) = Rs485Monitor::new(&config);
        let rs485_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            monitor.run(rs485_shutdown).await;
        });
        Some(status_rx)
    } else {
        None
    };

    let gate = Arc::new(GateController::new(
        GateTimings::from_config(&config),
        build_relay(&config),
        build_limit_switches(&config, door_status),
        events.clone(),
        metrics.clone(),
    ));

    let mut sources: Vec<FrameSource> = Vec::new();
    let mut loops: Vec<JoinHandle<()>> = Vec::new();

    match (config.entry_camera(), config.plate_url()) {
        (Some(camera), Some(plate_url)) => {
            let format = PlateFormat::new(config.plate_regex())?;
            let recognizer = HttpPlateRecognizer::new(plate_url, config.detection_timeout(), format)
                .context("Failed to create plate recognizer")?;
            let device = HttpSnapshotDevice::new(camera);
            let mut source = FrameSource::new("in", Box::new(device), metrics.clone());
            source.start();

            let entry = EntryWatch::new(
                source.reader(),
                Box::new(recognizer),
                whitelist.clone(),
                EntryTriggerPolicy::new(config.min_confidence(), config.identity_cooldown()),
                config.recognize_every(),
                gate.clone(),
                events.clone(),
                metrics.clone(),
            );
            loops.push(tokio::spawn(entry.run(shutdown_rx.clone())));
            sources.push(source);
        }
        (Some(_), None) => warn!("entry_camera_without_plate_url"),
        _ => info!("entry_camera_disabled"),
    }

    match (config.exit_camera(), config.motion_url()) {
        (Some(camera), Some(motion_url)) => {
            let zone_a = Polygon::from(config.zone_a().to_vec());
            let zone_b = Polygon::from(config.zone_b().to_vec());
            if zone_a.vertices().len() < 3 || zone_b.vertices().len() < 3 {
                warn!("exit_zones_incomplete");
            }
            let detector = HttpMotionDetector::new(motion_url, config.detection_timeout())
                .context("Failed to create motion detector")?;
            let device = HttpSnapshotDevice::new(camera);
            let mut source = FrameSource::new("out", Box::new(device), metrics.clone());
            source.start();

            let exit = ExitWatch::new(
                source.reader(),
                Box::new(detector),
                ZoneSequencer::new(zone_a, zone_b, config.max_a_to_b()),
                config.min_speed_px_per_s(),
                gate.clone(),
                events.clone(),
                metrics.clone(),
            );
            loops.push(tokio::spawn(exit.run(shutdown_rx.clone())));
            sources.push(source);
        }
        (Some(_), None) => warn!("exit_camera_without_motion_url"),
        _ => info!("exit_camera_disabled"),
    }

    if sources.is_empty() {
        warn!("no_camera_active");
    }

    let http_port = config.http_port();
    if http_port > 0 {
        let http_metrics = metrics.clone();
        let http_gate = gate.clone();
        let site_id = config.site_id().to_string();
        let http_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) =
                start_http_server(http_port, http_metrics, site_id, http_gate, http_shutdown).await
            {
                error!(error = %format!("{e:#}"), "http_server_error");
            }
        });
    }

    let reporter_metrics = metrics.clone();
    let metrics_interval = config.metrics_interval_secs().max(1);
    let mut reporter_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval));
        loop {
            tokio::select! {
                _ = interval.tick() => reporter_metrics.report().log(),
                _ = reporter_shutdown.changed() => return,
            }
        }
    });

    events.log("start", json!({"site": config.site_id(), "cameras": sources.len()}));

    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl+C")?;
    info!("shutdown_signal_received");
    let _ = shutdown_tx.send(true);

    for handle in loops {
        if let Err(e) = handle.await {
            warn!(error = %e, "camera_loop_join_failed");
        }
    }
    for source in sources.iter_mut() {
        source.stop().await;
    }

    metrics.report().log();
    events.log("stop", json!({"state": gate.state().as_str()}));
    info!("anpr-gate shutdown complete");
    Ok(())
}
