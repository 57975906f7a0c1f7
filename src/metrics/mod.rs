use autometrics::prometheus_exporter;
use lazy_static::lazy_static;
use prometheus::{
    exponential_buckets, register_histogram_vec, HistogramVec, IntCounterVec, Opts, Registry,
};
use tokio::sync::watch;
use warp::{Filter, Rejection, Reply};

lazy_static! {
    pub static ref PHASE_SECONDS_METRIC: HistogramVec = register_histogram_vec!(
        "phase_seconds",
        "Histogram of wall-clock seconds spent per harness phase",
        &["phase"],
        exponential_buckets(30.0, 2.0, 10).unwrap()
    )
    .expect("metric can not be created");

    pub static ref RUNBOOK_STEP_SECONDS_METRIC: HistogramVec = register_histogram_vec!(
        "runbook_step_seconds",
        "Histogram of wall-clock seconds spent per recovery-runbook step",
        &["runbook", "step"],
        exponential_buckets(1.0, 2.0, 12).unwrap()
    )
    .expect("metric can not be created");

    pub static ref PHASE_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new("phase_failures", "phase_failures"),
        &["phase"]
    )
    .expect("Should succeed to create metric");

    pub static ref HEARTBEAT_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new("lease_heartbeat_failures", "lease_heartbeat_failures"),
        &["resource_type"]
    )
    .expect("Should succeed to create metric");

    pub static ref ARTIFACT_JOB_OUTCOMES: IntCounterVec = IntCounterVec::new(
        Opts::new("artifact_jobs", "artifact_jobs"),
        &["outcome"]
    )
    .expect("Should succeed to create metric");

    pub static ref REGISTRY: Registry = Registry::new();
}

fn register_custom_metrics(registry: &Registry) {
    registry
        .register(Box::new(PHASE_SECONDS_METRIC.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(RUNBOOK_STEP_SECONDS_METRIC.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(PHASE_FAILURES.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(HEARTBEAT_FAILURES.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(ARTIFACT_JOB_OUTCOMES.clone()))
        .expect("collector can be registered");
}

pub async fn start_server(port: u16, mut shutdown_signal: watch::Receiver<()>) {
    register_custom_metrics(&REGISTRY);

    let metrics_route = warp::path!("metrics")
        .map(|| REGISTRY.clone())
        .and_then(metrics_handler);

    let (_, server) =
        warp::serve(metrics_route).bind_with_graceful_shutdown(([0, 0, 0, 0], port), async move {
            let _ = shutdown_signal.changed().await;
        });
    server.await;
}

/// One scrape body: the harness registry, the default registry and the
/// autometrics families appended in that order.
async fn metrics_handler(registry: Registry) -> Result<impl Reply, Rejection> {
    let mut body = encode_families(&registry.gather());
    body.push_str(&encode_families(&prometheus::gather()));
    body.push_str(&get_metrics_body());
    Ok(body)
}

fn encode_families(families: &[prometheus::proto::MetricFamily]) -> String {
    use prometheus::Encoder;

    let mut buffer = Vec::new();
    if let Err(e) = prometheus::TextEncoder::new().encode(families, &mut buffer) {
        tracing::error!(error = %e, "could not encode metrics");
    }
    // Text exposition format is ascii; a decode failure means a broken
    // collector, not a broken scrape
    String::from_utf8(buffer).unwrap_or_default()
}

/// Export metrics for Prometheus to scrape
pub fn get_metrics_body() -> String {
    let autometrics_response = prometheus_exporter::encode_http_response();
    autometrics_response.into_body()
}
