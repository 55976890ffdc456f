use std::time::Duration;

use lazy_static::lazy_static;
use prometheus::{core::Collector, histogram_opts, HistogramVec, IntCounterVec, Registry};
use tracing::error;

lazy_static! {
    static ref NODE_DISPATCH_DURATION: HistogramVec = HistogramVec::new(
        histogram_opts!(
            "flowpilot_node_dispatch_duration_seconds",
            "Node dispatch latency by action",
            vec![0.005, 0.025, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 15.0, 60.0]
        ),
        &["action"]
    )
    .expect("valid node dispatch histogram");
    static ref NODE_FAILURES_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("flowpilot_node_failures_total", "Nodes that finished unsuccessfully"),
        &["action"]
    )
    .expect("valid node failure counter");
}

fn register<C>(registry: &Registry, collector: C)
where
    C: Collector + Clone + Send + Sync + 'static,
{
    if let Err(err) = registry.register(Box::new(collector.clone())) {
        if !matches!(err, prometheus::Error::AlreadyReg) {
            error!(?err, "failed to register node metric");
        }
    }
}

pub fn register_metrics(registry: &Registry) {
    register(registry, NODE_DISPATCH_DURATION.clone());
    register(registry, NODE_FAILURES_TOTAL.clone());
}

pub fn record_dispatch(action: &str, elapsed: Duration, success: bool) {
    NODE_DISPATCH_DURATION
        .with_label_values(&[action])
        .observe(elapsed.as_secs_f64());
    if !success {
        NODE_FAILURES_TOTAL.with_label_values(&[action]).inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failures_are_counted_per_action() {
        let registry = Registry::new();
        register_metrics(&registry);
        record_dispatch("click", Duration::from_millis(3), false);
        let families = registry.gather();
        let failures = families
            .iter()
            .find(|family| family.get_name() == "flowpilot_node_failures_total")
            .expect("failure family");
        assert!(failures
            .get_metric()
            .iter()
            .any(|m| m.get_label().iter().any(|l| l.get_value() == "click")));
    }
}
