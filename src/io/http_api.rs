//! Operator HTTP endpoint
//!
//! - `GET /metrics` Prometheus text format
//! - `GET /health` liveness
//! - `GET /gate` gate state as JSON
//! - `POST /gate/open` manual open request, subject to the same inhibit
//!   and grace rules as the cameras

use crate::domain::types::Origin;
use crate::infra::metrics::{Metrics, MetricsSummary};
use crate::services::gate::GateController;
use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

fn write_metric(
    output: &mut String,
    name: &str,
    help: &str,
    typ: MetricType,
    site: &str,
    val: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val}");
}

fn write_requests(output: &mut String, site: &str, summary: &MetricsSummary) {
    let name = "gate_requests_accepted_total";
    let _ = writeln!(output, "# HELP {name} Accepted open requests by origin");
    let _ = writeln!(output, "# TYPE {name} counter");
    for (origin, val) in [
        (Origin::In, summary.requests_in),
        (Origin::Out, summary.requests_out),
        (Origin::Manual, summary.requests_manual),
    ] {
        let _ = writeln!(output, "{name}{{site=\"{site}\",origin=\"{origin}\"}} {val}");
    }
}

/// Format metrics in Prometheus text exposition format
fn format_prometheus_metrics(metrics: &Metrics, site: &str) -> String {
    let summary = metrics.report();
    let mut output = String::with_capacity(2048);

    write_metric(
        &mut output,
        "gate_uptime_seconds",
        "Seconds since start",
        MetricType::Gauge,
        site,
        summary.uptime_secs,
    );
    write_metric(
        &mut output,
        "gate_frames_captured_total",
        "Frames captured across all cameras",
        MetricType::Counter,
        site,
        summary.frames_captured,
    );
    write_metric(
        &mut output,
        "gate_device_reconnects_total",
        "Capture device reopen attempts",
        MetricType::Counter,
        site,
        summary.device_reconnects,
    );
    write_metric(
        &mut output,
        "gate_plate_readings_total",
        "Plate recognizer answers with text",
        MetricType::Counter,
        site,
        summary.plate_readings,
    );
    write_metric(
        &mut output,
        "gate_motion_triggers_total",
        "Zone A to B sequences completed",
        MetricType::Counter,
        site,
        summary.motion_triggers,
    );
    write_requests(&mut output, site, &summary);
    write_metric(
        &mut output,
        "gate_requests_refused_total",
        "Open requests refused by inhibit or grace",
        MetricType::Counter,
        site,
        summary.requests_refused,
    );
    write_metric(
        &mut output,
        "gate_cycles_completed_total",
        "Full open-close cycles completed",
        MetricType::Counter,
        site,
        summary.cycles_completed,
    );
    write_metric(
        &mut output,
        "gate_limit_switch_timeouts_total",
        "Position waits ended by timeout with a switch present",
        MetricType::Counter,
        site,
        summary.limit_switch_timeouts,
    );
    write_metric(
        &mut output,
        "gate_state",
        "Current gate state (0=closed, 1=opening, 2=open, 3=closing)",
        MetricType::Gauge,
        site,
        summary.gate_state,
    );

    output
}

fn json_response(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(Full::new(Bytes::from(body)))
        .expect("static response should not fail")
}

async fn handle_request<B>(
    req: Request<B>,
    metrics: Arc<Metrics>,
    site_id: Arc<String>,
    gate: Arc<GateController>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => {
            let body = format_prometheus_metrics(&metrics, &site_id);
            Ok(Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", "text/plain; version=0.0.4; charset=utf-8")
                .body(Full::new(Bytes::from(body)))
                .expect("static response should not fail"))
        }
        (&Method::GET, "/health") => Ok(Response::builder()
            .status(StatusCode::OK)
            .body(Full::new(Bytes::from("ok")))
            .expect("static response should not fail")),
        (&Method::GET, "/gate") => {
            let body = serde_json::to_string(&gate.status()).unwrap_or_else(|_| "{}".to_string());
            Ok(json_response(StatusCode::OK, body))
        }
        (&Method::POST, "/gate/open") => {
            let accepted = gate.request_open(Origin::Manual, "http").await;
            info!(accepted = %accepted, "manual_gate_open");
            let body = serde_json::json!({"ok": accepted, "state": gate.state().as_str()});
            let status = if accepted { StatusCode::OK } else { StatusCode::CONFLICT };
            Ok(json_response(status, body.to_string()))
        }
        (&Method::OPTIONS, "/gate/open") => Ok(Response::builder()
            .status(StatusCode::OK)
            .header("Access-Control-Allow-Origin", "*")
            .header("Access-Control-Allow-Methods", "POST, OPTIONS")
            .header("Access-Control-Allow-Headers", "Content-Type")
            .body(Full::new(Bytes::from("")))
            .expect("static response should not fail")),
        _ => Ok(Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::from("Not Found")))
            .expect("static response should not fail")),
    }
}

/// Serve the operator endpoint until shutdown
pub async fn start_http_server(
    port: u16,
    metrics: Arc<Metrics>,
    site_id: String,
    gate: Arc<GateController>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    let site_id = Arc::new(site_id);

    info!(port = %port, site = %site_id, "http_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let metrics = metrics.clone();
                        let site_id = site_id.clone();
                        let gate = gate.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let metrics = metrics.clone();
                                let site_id = site_id.clone();
                                let gate = gate.clone();
                                async move { handle_request(req, metrics, site_id, gate).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "http_connection_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "http_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("http_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::GateState;
    use crate::io::event_log::EventLog;
    use crate::io::limit_switch::LimitSwitches;
    use crate::io::relay::LogRelay;
    use crate::services::gate::GateTimings;
    use http_body_util::BodyExt;

    fn gate(metrics: Arc<Metrics>) -> Arc<GateController> {
        Arc::new(GateController::new(
            GateTimings::default(),
            Arc::new(LogRelay::new()),
            LimitSwitches::none(),
            Arc::new(EventLog::disabled()),
            metrics,
        ))
    }

    async fn call(
        method: Method,
        path: &str,
        metrics: &Arc<Metrics>,
        gate: &Arc<GateController>,
    ) -> (StatusCode, String) {
        let req = Request::builder().method(method).uri(path).body(()).unwrap();
        let response = handle_request(req, metrics.clone(), Arc::new("depot".into()), gate.clone())
            .await
            .unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[test]
    fn test_format_prometheus_metrics() {
        let metrics = Metrics::new();
        metrics.record_frame();
        metrics.record_frame();
        metrics.record_request_accepted(Origin::Out);
        metrics.set_gate_state(GateState::Open);

        let output = format_prometheus_metrics(&metrics, "depot");

        assert!(output.contains("gate_frames_captured_total{site=\"depot\"} 2"));
        assert!(output.contains("gate_requests_accepted_total{site=\"depot\",origin=\"out\"} 1"));
        assert!(output.contains("gate_requests_accepted_total{site=\"depot\",origin=\"in\"} 0"));
        assert!(output.contains("gate_state{site=\"depot\"} 2"));
        assert!(output.contains("# TYPE gate_requests_refused_total counter"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_routes() {
        let metrics = Arc::new(Metrics::new());
        let gate = gate(metrics.clone());

        let (status, body) = call(Method::GET, "/health", &metrics, &gate).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");

        let (status, body) = call(Method::GET, "/gate", &metrics, &gate).await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["state"], "CLOSED");
        assert_eq!(json["inhibit"], false);

        let (status, _) = call(Method::GET, "/nope", &metrics, &gate).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_open_follows_gate_rules() {
        let metrics = Arc::new(Metrics::new());
        let gate = gate(metrics.clone());

        let (status, body) = call(Method::POST, "/gate/open", &metrics, &gate).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("\"ok\":true"));

        let (status, body) = call(Method::POST, "/gate/open", &metrics, &gate).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body.contains("\"ok\":false"));

        assert_eq!(metrics.report().requests_manual, 1);
        assert_eq!(metrics.report().requests_refused, 1);
    }
}
