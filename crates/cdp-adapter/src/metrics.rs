use std::time::Duration;

use lazy_static::lazy_static;
use prometheus::{core::Collector, histogram_opts, HistogramVec, IntCounter, IntCounterVec, Registry};
use tracing::error;

lazy_static! {
    static ref BROWSER_COMMANDS_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("flowpilot_browser_commands_total", "Total browser commands executed"),
        &["method"]
    )
    .expect("valid browser command counter");
    static ref BROWSER_COMMAND_FAILURES_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new(
            "flowpilot_browser_command_failures_total",
            "Total browser command failures"
        ),
        &["method"]
    )
    .expect("valid browser failure counter");
    static ref BROWSER_COMMAND_DURATION: HistogramVec = HistogramVec::new(
        histogram_opts!(
            "flowpilot_browser_command_duration_seconds",
            "Browser command latency",
            vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0, 15.0]
        ),
        &["method"]
    )
    .expect("valid browser latency histogram");
    static ref BROWSER_PAGES_OPENED_TOTAL: IntCounter =
        IntCounter::new("flowpilot_browser_pages_opened_total", "Total pages created")
            .expect("valid page counter");
}

fn register<C>(registry: &Registry, collector: C)
where
    C: Collector + Clone + Send + Sync + 'static,
{
    if let Err(err) = registry.register(Box::new(collector.clone())) {
        if !matches!(err, prometheus::Error::AlreadyReg) {
            error!(?err, "failed to register browser metric");
        }
    }
}

pub fn register_metrics(registry: &Registry) {
    register(registry, BROWSER_COMMANDS_TOTAL.clone());
    register(registry, BROWSER_COMMAND_FAILURES_TOTAL.clone());
    register(registry, BROWSER_COMMAND_DURATION.clone());
    register(registry, BROWSER_PAGES_OPENED_TOTAL.clone());
}

pub fn record_command(method: &str, elapsed: Duration, ok: bool) {
    BROWSER_COMMANDS_TOTAL.with_label_values(&[method]).inc();
    BROWSER_COMMAND_DURATION
        .with_label_values(&[method])
        .observe(elapsed.as_secs_f64());
    if !ok {
        BROWSER_COMMAND_FAILURES_TOTAL
            .with_label_values(&[method])
            .inc();
    }
}

pub fn record_page_opened() {
    BROWSER_PAGES_OPENED_TOTAL.inc();
}
