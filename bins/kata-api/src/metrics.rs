use kata_common::types::{ExecutorKind, FailureKind, Report};
use lazy_static::lazy_static;
use prometheus::{
    core::Collector, histogram_opts, opts, Encoder, Histogram, IntCounter, IntCounterVec,
    Registry, TextEncoder,
};
use std::sync::Once;
use tracing::error;

lazy_static! {
    static ref REGISTRY: Registry = Registry::new();
    static ref SUBMISSIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        opts!("kata_submissions_total", "Submissions handled grouped by outcome"),
        &["outcome"]
    )
    .unwrap();
    static ref TEST_CASES_TOTAL: IntCounterVec = IntCounterVec::new(
        opts!("kata_test_cases_total", "Test cases evaluated grouped by result"),
        &["result"]
    )
    .unwrap();
    static ref FALLBACK_ACTIVATIONS_TOTAL: IntCounter = IntCounter::new(
        "kata_fallback_activations_total",
        "Submissions judged by the unsandboxed fallback executor"
    )
    .unwrap();
    static ref SUBMISSION_DURATION_SECONDS: Histogram = Histogram::with_opts(histogram_opts!(
        "kata_submission_duration_seconds",
        "Wall-clock time to judge a submission",
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    ))
    .unwrap();
}

static REGISTER: Once = Once::new();

fn register<C>(collector: C)
where
    C: Collector + Clone + Send + Sync + 'static,
{
    if let Err(err) = REGISTRY.register(Box::new(collector.clone())) {
        if !matches!(err, prometheus::Error::AlreadyReg) {
            error!(?err, "failed to register metric");
        }
    }
}

pub fn register_metrics() {
    REGISTER.call_once(|| {
        register(SUBMISSIONS_TOTAL.clone());
        register(TEST_CASES_TOTAL.clone());
        register(FALLBACK_ACTIVATIONS_TOTAL.clone());
        register(SUBMISSION_DURATION_SECONDS.clone());
    });
}

pub fn record_outcome(outcome: &str) {
    SUBMISSIONS_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_duration(seconds: f64) {
    SUBMISSION_DURATION_SECONDS.observe(seconds);
}

pub fn record_report(report: &Report) {
    record_outcome(if report.all_passed { "passed" } else { "failed" });

    for result in &report.results {
        let label = match (result.passed, result.error_kind) {
            (true, _) => "passed",
            (false, None) => "mismatch",
            (false, Some(kind)) => match kind {
                FailureKind::Timeout => "timeout",
                FailureKind::RuntimeError => "runtime_error",
                FailureKind::Unsupported => "unsupported",
                FailureKind::SandboxFailure => "sandbox_failure",
            },
        };
        TEST_CASES_TOTAL.with_label_values(&[label]).inc();
    }

    if report.executor == Some(ExecutorKind::Fallback) {
        FALLBACK_ACTIVATIONS_TOTAL.inc();
    }
}

/// Render every registered metric in the Prometheus text format.
pub fn encode() -> Result<(String, String), prometheus::Error> {
    register_metrics();
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&REGISTRY.gather(), &mut buffer)?;
    let body = String::from_utf8_lossy(&buffer).into_owned();
    Ok((encoder.format_type().to_string(), body))
}
