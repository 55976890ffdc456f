use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use flowpilot_core_types::{ExecutionId, ExecutionStatus, FlowId, CANCELLED_BY_USER};
use flowpilot_event_bus::{EventBus, InMemoryBus, Subscription};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::errors::StateError;
use crate::events::{EventEnvelope, EventPayload, ExecutionEvent, LogLevel};
use crate::record::{ExecutionLogEntry, ExecutionRecord};
use crate::store::ExecutionStore;

const STREAM_HISTORY_LIMIT: usize = 256;
const STREAM_CHANNEL_CAPACITY: usize = 256;
const DEFAULT_BUS_CAPACITY: usize = 1024;

struct StreamHistory {
    next_id: u64,
    events: VecDeque<EventEnvelope>,
}

impl StreamHistory {
    fn new() -> Self {
        Self {
            next_id: 0,
            events: VecDeque::new(),
        }
    }

    fn record(&mut self, event: ExecutionEvent) -> EventEnvelope {
        let envelope = EventEnvelope {
            id: self.next_id,
            event,
        };
        self.next_id = self.next_id.wrapping_add(1);
        self.events.push_back(envelope.clone());
        if self.events.len() > STREAM_HISTORY_LIMIT {
            self.events.pop_front();
        }
        envelope
    }

    fn since(&self, cursor: Option<u64>) -> Vec<EventEnvelope> {
        self.events
            .iter()
            .filter(|env| cursor.map(|id| env.id > id).unwrap_or(true))
            .cloned()
            .collect()
    }
}

struct ExecutionStream {
    flow_id: FlowId,
    sender: broadcast::Sender<EventEnvelope>,
    history: Mutex<StreamHistory>,
}

/// Tracks every execution's status and turns each transition into an ordered event stream.
///
/// Events for one execution are numbered and published while the history lock is held, so
/// per-execution subscribers and the process-wide bus observe them in emission order.
pub struct ExecutionStatusRegistry {
    records: DashMap<String, Mutex<ExecutionRecord>>,
    streams: DashMap<String, Arc<ExecutionStream>>,
    bus: Arc<InMemoryBus<EventEnvelope>>,
    store: Option<Arc<dyn ExecutionStore>>,
}

impl ExecutionStatusRegistry {
    pub fn new(store: Option<Arc<dyn ExecutionStore>>) -> Self {
        Self::with_bus(store, InMemoryBus::new(DEFAULT_BUS_CAPACITY))
    }

    pub fn with_bus(
        store: Option<Arc<dyn ExecutionStore>>,
        bus: Arc<InMemoryBus<EventEnvelope>>,
    ) -> Self {
        Self {
            records: DashMap::new(),
            streams: DashMap::new(),
            bus,
            store,
        }
    }

    pub fn register(
        self: &Arc<Self>,
        execution_id: ExecutionId,
        flow_id: FlowId,
        variables: Map<String, Value>,
    ) -> ExecutionHandle {
        let id = execution_id.0.clone();
        let mut record = ExecutionRecord::new(execution_id.clone(), flow_id.clone());
        record.variables = variables;
        self.records.insert(id.clone(), Mutex::new(record));
        let (sender, _) = broadcast::channel(STREAM_CHANNEL_CAPACITY);
        self.streams.insert(
            id,
            Arc::new(ExecutionStream {
                flow_id,
                sender,
                history: Mutex::new(StreamHistory::new()),
            }),
        );
        ExecutionHandle {
            registry: Arc::clone(self),
            execution_id,
        }
    }

    pub fn handle(self: &Arc<Self>, execution_id: &str) -> Option<ExecutionHandle> {
        self.records.contains_key(execution_id).then(|| ExecutionHandle {
            registry: Arc::clone(self),
            execution_id: ExecutionId::from(execution_id),
        })
    }

    pub fn snapshot(&self, execution_id: &str) -> Option<ExecutionRecord> {
        let entry = self.records.get(execution_id)?;
        let record = entry.value().lock();
        Some(record.clone())
    }

    /// Snapshot from memory, falling back to the store for executions no longer tracked.
    pub async fn lookup(&self, execution_id: &str) -> Option<ExecutionRecord> {
        if let Some(record) = self.snapshot(execution_id) {
            return Some(record);
        }
        let store = self.store.as_ref()?;
        match store.load(execution_id).await {
            Ok(record) => record,
            Err(err) => {
                warn!(?err, execution_id, "failed to load execution from store");
                None
            }
        }
    }

    /// Like [`lookup`](Self::lookup) but surfaces store failures.
    pub async fn load(&self, execution_id: &str) -> Result<ExecutionRecord, StateError> {
        if let Some(record) = self.snapshot(execution_id) {
            return Ok(record);
        }
        let Some(store) = self.store.as_ref() else {
            return Err(StateError::ExecutionNotFound(execution_id.to_string()));
        };
        store
            .load(execution_id)
            .await?
            .ok_or_else(|| StateError::ExecutionNotFound(execution_id.to_string()))
    }

    /// Every execution still held in memory, oldest first.
    pub fn all_snapshots(&self) -> Vec<ExecutionRecord> {
        let mut records: Vec<_> = self
            .records
            .iter()
            .map(|entry| entry.value().lock().clone())
            .collect();
        records.sort_by_key(|r| r.created_at);
        records
    }

    pub fn subscribe(&self, execution_id: &str) -> Option<broadcast::Receiver<EventEnvelope>> {
        let stream = self.streams.get(execution_id)?;
        Some(stream.sender.subscribe())
    }

    /// Every event of every execution.
    pub fn subscribe_all(&self) -> Subscription<EventEnvelope> {
        self.bus.subscribe()
    }

    /// Bus events of a single execution, including ones that have not been registered yet.
    pub fn subscribe_execution(&self, execution_id: &str) -> Subscription<EventEnvelope> {
        let wanted = execution_id.to_string();
        self.bus
            .subscribe_filtered(move |envelope| envelope.event.execution_id.0 == wanted)
    }

    pub fn stream_history_since(
        &self,
        execution_id: &str,
        last_event_id: Option<u64>,
    ) -> Option<Vec<EventEnvelope>> {
        let stream = self.streams.get(execution_id)?;
        let history = stream.history.lock();
        Some(history.since(last_event_id))
    }

    /// Drop finished executions that completed before `cutoff`. Returns how many were removed.
    pub fn prune_finished_before(&self, cutoff: DateTime<Utc>) -> usize {
        let expired: Vec<String> = self
            .records
            .iter()
            .filter(|entry| {
                let record = entry.value().lock();
                record.status.is_terminal()
                    && record.completed_at.map(|at| at < cutoff).unwrap_or(false)
            })
            .map(|entry| entry.key().clone())
            .collect();
        for id in &expired {
            self.records.remove(id);
            self.streams.remove(id);
        }
        expired.len()
    }

    fn emit(&self, execution_id: &ExecutionId, payload: EventPayload) {
        let Some(stream) = self.streams.get(&execution_id.0).map(|s| s.value().clone()) else {
            return;
        };
        let event = ExecutionEvent {
            execution_id: execution_id.clone(),
            flow_id: stream.flow_id.clone(),
            timestamp: Utc::now(),
            payload,
        };
        let mut history = stream.history.lock();
        let envelope = history.record(event);
        debug!(
            execution_id = %execution_id,
            event_id = envelope.id,
            kind = envelope.event.kind(),
            "execution event"
        );
        let _ = stream.sender.send(envelope.clone());
        self.bus.send(envelope);
    }
}

impl Default for ExecutionStatusRegistry {
    fn default() -> Self {
        Self::new(None)
    }
}

/// Write access to one registered execution.
#[derive(Clone)]
pub struct ExecutionHandle {
    registry: Arc<ExecutionStatusRegistry>,
    execution_id: ExecutionId,
}

impl fmt::Debug for ExecutionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionHandle")
            .field("execution_id", &self.execution_id)
            .finish()
    }
}

impl ExecutionHandle {
    pub fn execution_id(&self) -> &ExecutionId {
        &self.execution_id
    }

    pub fn snapshot(&self) -> Option<ExecutionRecord> {
        self.registry.snapshot(&self.execution_id.0)
    }

    pub fn status(&self) -> Option<ExecutionStatus> {
        let entry = self.registry.records.get(&self.execution_id.0)?;
        let status = entry.value().lock().status;
        Some(status)
    }

    pub fn mark_running(&self) {
        if self.transition(ExecutionStatus::Running, |record| {
            record.started_at = Some(Utc::now());
        }) {
            self.emit(EventPayload::ExecutionStatus {
                status: ExecutionStatus::Running,
                error: None,
            });
        }
    }

    pub fn node_started(&self, node_id: &str, node_name: &str, action: &str) {
        if self.with_record(|record| record.current_node_id = Some(node_id.to_string())) {
            self.emit(EventPayload::NodeExecution {
                node_id: node_id.to_string(),
                node_name: node_name.to_string(),
                action: action.to_string(),
            });
        }
    }

    pub fn node_completed(&self, node_id: &str, action: &str, result: Value) {
        self.emit(EventPayload::NodeCompletion {
            node_id: node_id.to_string(),
            action: action.to_string(),
            result,
        });
    }

    pub fn node_failed(&self, node_id: &str, action: &str, error: &str) {
        self.emit(EventPayload::NodeError {
            node_id: node_id.to_string(),
            action: action.to_string(),
            error: error.to_string(),
        });
    }

    /// Replace the variable snapshot without emitting events; used once the run's initial scope is
    /// known.
    pub fn seed_variables(&self, variables: &Map<String, Value>) {
        self.with_record(|record| record.variables = variables.clone());
    }

    pub fn variable_updated(&self, name: &str, value: &Value) {
        if self.with_record(|record| {
            record.variables.insert(name.to_string(), value.clone());
        }) {
            self.emit(EventPayload::VariableUpdate {
                name: name.to_string(),
                value: value.clone(),
            });
        }
    }

    pub fn variable_removed(&self, name: &str) {
        if self.with_record(|record| {
            record.variables.remove(name);
        }) {
            self.emit(EventPayload::VariableUpdate {
                name: name.to_string(),
                value: Value::Null,
            });
        }
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>, node_id: Option<&str>) {
        self.emit(EventPayload::LogMessage {
            level,
            message: message.into(),
            node_id: node_id.map(str::to_string),
        });
    }

    pub fn append_log_entry(&self, entry: ExecutionLogEntry) {
        self.with_record(|record| record.execution_log.push(entry));
    }

    /// Terminal success. Returns false when the execution already finished.
    pub fn complete(&self, results: Value) -> bool {
        let mut duration_ms = 0;
        let results_for_record = results.clone();
        let moved = self.transition(ExecutionStatus::Completed, |record| {
            record.results = Some(results_for_record);
            record.completed_at = Some(Utc::now());
            duration_ms = record.duration_ms().unwrap_or(0);
        });
        if moved {
            self.emit(EventPayload::ExecutionStatus {
                status: ExecutionStatus::Completed,
                error: None,
            });
            self.emit(EventPayload::ExecutionComplete {
                results,
                duration_ms,
            });
        }
        moved
    }

    pub fn fail(&self, error: &str) -> bool {
        let moved = self.transition(ExecutionStatus::Failed, |record| {
            record.error = Some(error.to_string());
            record.completed_at = Some(Utc::now());
        });
        if moved {
            self.emit(EventPayload::ExecutionStatus {
                status: ExecutionStatus::Failed,
                error: Some(error.to_string()),
            });
            self.emit(EventPayload::ExecutionError {
                error: error.to_string(),
            });
        }
        moved
    }

    pub fn cancel(&self) -> bool {
        let moved = self.transition(ExecutionStatus::Cancelled, |record| {
            record.error = Some(CANCELLED_BY_USER.to_string());
            record.completed_at = Some(Utc::now());
        });
        if moved {
            self.emit(EventPayload::ExecutionStatus {
                status: ExecutionStatus::Cancelled,
                error: Some(CANCELLED_BY_USER.to_string()),
            });
        }
        moved
    }

    /// Save the current snapshot. Store failures are logged and swallowed.
    pub async fn persist(&self) {
        let Some(store) = self.registry.store.clone() else {
            return;
        };
        let Some(record) = self.snapshot() else {
            return;
        };
        if let Err(err) = store.save(&record).await {
            warn!(
                execution_id = %self.execution_id,
                ?err,
                "failed to persist execution snapshot"
            );
        }
    }

    fn emit(&self, payload: EventPayload) {
        self.registry.emit(&self.execution_id, payload);
    }

    fn transition<F>(&self, next: ExecutionStatus, update: F) -> bool
    where
        F: FnOnce(&mut ExecutionRecord),
    {
        let Some(entry) = self.registry.records.get(&self.execution_id.0) else {
            return false;
        };
        let mut record = entry.value().lock();
        if !record.status.can_transition_to(next) {
            debug!(
                execution_id = %self.execution_id,
                from = %record.status,
                to = %next,
                "ignoring status transition"
            );
            return false;
        }
        record.status = next;
        update(&mut record);
        true
    }

    fn with_record<F>(&self, update: F) -> bool
    where
        F: FnOnce(&mut ExecutionRecord),
    {
        if let Some(entry) = self.registry.records.get(&self.execution_id.0) {
            let mut record = entry.value().lock();
            update(&mut record);
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryExecutionStore;
    use serde_json::json;
    use tokio::time::{timeout, Duration};

    fn registry() -> Arc<ExecutionStatusRegistry> {
        Arc::new(ExecutionStatusRegistry::default())
    }

    #[tokio::test]
    async fn stream_preserves_emission_order() {
        let registry = registry();
        let handle = registry.register(ExecutionId::new(), FlowId::from("flow"), Map::new());
        let mut stream = registry.subscribe(&handle.execution_id().0).expect("receiver");

        handle.mark_running();
        handle.node_started("a", "A", "navigate");
        handle.variable_updated("x", &json!(1));
        handle.node_completed("a", "navigate", json!({"success": true}));
        handle.complete(json!({"x": 1}));

        let mut kinds = Vec::new();
        let mut ids = Vec::new();
        for _ in 0..6 {
            let envelope = timeout(Duration::from_millis(100), stream.recv())
                .await
                .expect("event available")
                .expect("event");
            assert_eq!(envelope.event.flow_id, FlowId::from("flow"));
            kinds.push(envelope.event.kind());
            ids.push(envelope.id);
        }
        assert_eq!(
            kinds,
            vec![
                "execution-status",
                "node-execution",
                "variable-update",
                "node-completion",
                "execution-status",
                "execution-complete"
            ]
        );
        assert_eq!(ids, vec![0, 1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn terminal_status_is_sticky() {
        let registry = registry();
        let handle = registry.register(ExecutionId::new(), FlowId::default(), Map::new());
        handle.mark_running();
        assert!(handle.cancel());
        assert!(!handle.fail("late failure"));
        assert!(!handle.complete(json!({})));

        let snapshot = handle.snapshot().unwrap();
        assert_eq!(snapshot.status, ExecutionStatus::Cancelled);
        assert_eq!(snapshot.error.as_deref(), Some(CANCELLED_BY_USER));
        assert!(snapshot.completed_at.is_some());
    }

    #[tokio::test]
    async fn history_replays_after_cursor() {
        let registry = registry();
        let handle = registry.register(ExecutionId::new(), FlowId::default(), Map::new());
        handle.mark_running();
        handle.log(LogLevel::Info, "one", None);
        handle.log(LogLevel::Info, "two", None);

        let id = handle.execution_id().0.clone();
        assert_eq!(registry.stream_history_since(&id, None).unwrap().len(), 3);
        let tail = registry.stream_history_since(&id, Some(1)).unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].id, 2);
    }

    #[tokio::test]
    async fn bus_sees_events_from_every_execution() {
        let registry = registry();
        let mut all = registry.subscribe_all();
        let first = registry.register(ExecutionId::from("one"), FlowId::default(), Map::new());
        let second = registry.register(ExecutionId::from("two"), FlowId::default(), Map::new());
        first.mark_running();
        second.mark_running();

        let a = all.next().await.unwrap();
        let b = all.next().await.unwrap();
        assert_eq!(a.event.execution_id.0, "one");
        assert_eq!(b.event.execution_id.0, "two");
    }

    #[tokio::test]
    async fn execution_subscription_filters_other_runs() {
        let registry = registry();
        let mut only_two = registry.subscribe_execution("two");
        let first = registry.register(ExecutionId::from("one"), FlowId::default(), Map::new());
        let second = registry.register(ExecutionId::from("two"), FlowId::default(), Map::new());
        first.mark_running();
        second.mark_running();

        let event = only_two.next().await.unwrap();
        assert_eq!(event.event.execution_id.0, "two");
    }

    #[tokio::test]
    async fn persist_writes_snapshot_to_store() {
        let store = Arc::new(InMemoryExecutionStore::new());
        let registry = Arc::new(ExecutionStatusRegistry::new(Some(store.clone())));
        let handle = registry.register(ExecutionId::from("p"), FlowId::default(), Map::new());
        handle.mark_running();
        handle.fail("boom");
        handle.persist().await;

        let saved = store.load("p").await.unwrap().expect("saved");
        assert_eq!(saved.status, ExecutionStatus::Failed);
        assert_eq!(saved.error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn prune_removes_only_old_finished_records() {
        let registry = registry();
        let done = registry.register(ExecutionId::from("done"), FlowId::default(), Map::new());
        done.mark_running();
        done.complete(json!(null));
        let live = registry.register(ExecutionId::from("live"), FlowId::default(), Map::new());
        live.mark_running();

        let removed = registry.prune_finished_before(Utc::now() + chrono::Duration::seconds(1));
        assert_eq!(removed, 1);
        assert!(registry.snapshot("done").is_none());
        assert!(registry.snapshot("live").is_some());
    }

    #[tokio::test]
    async fn load_reports_unknown_execution() {
        let registry = registry();
        let err = registry.load("missing").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(registry.handle("missing").is_none());
    }
}
