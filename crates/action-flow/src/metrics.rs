use flowpilot_core_types::ExecutionStatus;
use lazy_static::lazy_static;
use prometheus::{core::Collector, IntCounterVec, IntGauge, Opts, Registry};
use tracing::error;

lazy_static! {
    static ref EXECUTIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("flowpilot_executions_total", "Finished flow executions by status"),
        &["status"]
    )
    .expect("valid executions counter");
    static ref EXECUTIONS_ACTIVE: IntGauge = IntGauge::new(
        "flowpilot_executions_active",
        "Flow executions currently traversing"
    )
    .expect("valid active executions gauge");
}

fn register<C>(registry: &Registry, collector: C)
where
    C: Collector + Clone + Send + Sync + 'static,
{
    if let Err(err) = registry.register(Box::new(collector.clone())) {
        if !matches!(err, prometheus::Error::AlreadyReg) {
            error!(?err, "failed to register flow metric");
        }
    }
}

pub fn register_metrics(registry: &Registry) {
    register(registry, EXECUTIONS_TOTAL.clone());
    register(registry, EXECUTIONS_ACTIVE.clone());
}

pub(crate) fn execution_started() {
    EXECUTIONS_ACTIVE.inc();
}

pub(crate) fn execution_finished(status: ExecutionStatus) {
    EXECUTIONS_ACTIVE.dec();
    EXECUTIONS_TOTAL.with_label_values(&[status.as_str()]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finished_executions_are_labelled_by_status() {
        let registry = Registry::new();
        register_metrics(&registry);
        execution_started();
        execution_finished(ExecutionStatus::Cancelled);
        let families = registry.gather();
        let total = families
            .iter()
            .find(|f| f.get_name() == "flowpilot_executions_total")
            .expect("executions family");
        assert!(total
            .get_metric()
            .iter()
            .any(|m| m.get_label().iter().any(|l| l.get_value() == "cancelled")));
    }
}
