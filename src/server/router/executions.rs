use std::convert::Infallible;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use action_flow::FlowDefinition;
use async_stream::stream;
use axum::response::sse::{Event, KeepAlive};
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response, Sse},
    routing::{get, post},
    Json, Router,
};
use flowpilot_core_types::ExecutionStatus;
use flowpilot_state_center::EventEnvelope;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::sync::broadcast;
use tracing::{error, info, instrument};

use crate::errors::{ApiError, ApiResult};
use crate::server::AppState;

pub(super) fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/executions",
            get(list_executions_handler).post(create_execution_handler),
        )
        .route("/api/executions/:execution_id", get(get_execution_handler))
        .route(
            "/api/executions/:execution_id/stop",
            post(stop_execution_handler),
        )
        .route(
            "/api/executions/:execution_id/events",
            get(execution_events_sse_handler),
        )
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListExecutionsQuery {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    flow_id: Option<String>,
}

/// Summaries of the executions held in memory, oldest first.
#[instrument(name = "flowpilot.executions.list", skip(state))]
async fn list_executions_handler(
    State(state): State<AppState>,
    Query(query): Query<ListExecutionsQuery>,
) -> ApiResult<Json<Value>> {
    let status = query
        .status
        .as_deref()
        .map(ExecutionStatus::from_str)
        .transpose()
        .map_err(|err| ApiError::BadRequest(err.to_string()))?;

    let executions: Vec<Value> = state
        .states()
        .all_snapshots()
        .into_iter()
        .filter(|record| status.map_or(true, |wanted| record.status == wanted))
        .filter(|record| {
            query
                .flow_id
                .as_deref()
                .map_or(true, |flow_id| record.flow_id.as_str() == flow_id)
        })
        .map(|record| {
            json!({
                "executionId": record.execution_id,
                "flowId": record.flow_id,
                "status": record.status,
                "createdAt": record.created_at,
                "completedAt": record.completed_at,
                "durationMs": record.duration_ms(),
                "error": record.error,
            })
        })
        .collect();

    Ok(Json(json!({
        "success": true,
        "total": executions.len(),
        "executions": executions,
    })))
}

/// Either an inline flow or the id of a flow from the flows directory.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateExecutionRequest {
    #[serde(default)]
    flow: Option<FlowDefinition>,
    #[serde(default)]
    flow_id: Option<String>,
    #[serde(default)]
    variables: Map<String, Value>,
}

#[instrument(name = "flowpilot.executions.create", skip(state, request))]
async fn create_execution_handler(
    State(state): State<AppState>,
    Json(request): Json<CreateExecutionRequest>,
) -> ApiResult<Response> {
    let flow = match (request.flow, request.flow_id) {
        (Some(flow), _) => Arc::new(flow),
        (None, Some(flow_id)) => state
            .flows()
            .get(&flow_id)
            .ok_or_else(|| ApiError::NotFound(format!("Flow {}", flow_id)))?,
        (None, None) => {
            return Err(ApiError::BadRequest(
                "Request needs either `flow` or `flowId`".to_string(),
            ))
        }
    };
    flow.validate().into_result()?;

    let engine = Arc::clone(state.engine());
    let context = engine.create_context(&flow);
    let execution_id = context.execution_id.to_string();
    let variables = request.variables;
    info!(execution_id = %execution_id, flow_id = %flow.id, "execution accepted");

    let task_id = execution_id.clone();
    tokio::spawn(async move {
        if let Err(err) = engine.execute(&flow, context, variables).await {
            error!(execution_id = %task_id, %err, "background execution aborted");
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "success": true, "executionId": execution_id })),
    )
        .into_response())
}

#[instrument(name = "flowpilot.executions.get", skip(state), fields(execution_id = %execution_id))]
async fn get_execution_handler(
    State(state): State<AppState>,
    Path(execution_id): Path<String>,
) -> ApiResult<Response> {
    let record = state.states().load(&execution_id).await?;
    Ok(Json(record).into_response())
}

#[instrument(name = "flowpilot.executions.stop", skip(state), fields(execution_id = %execution_id))]
async fn stop_execution_handler(
    State(state): State<AppState>,
    Path(execution_id): Path<String>,
) -> ApiResult<Json<Value>> {
    if state.engine().stop_execution(&execution_id).await {
        return Ok(Json(json!({ "success": true, "stopped": true })));
    }
    let record = state.states().load(&execution_id).await?;
    Ok(Json(json!({
        "success": true,
        "stopped": false,
        "status": record.status,
    })))
}

#[derive(Debug, Default, Deserialize)]
struct EventsQuery {
    #[serde(default)]
    cursor: Option<u64>,
}

/// Replays the execution's history after the cursor (`?cursor=` or `Last-Event-ID`), then
/// follows live events until the execution's final event.
#[instrument(
    name = "flowpilot.executions.events",
    skip(state, headers, query),
    fields(execution_id = %execution_id)
)]
async fn execution_events_sse_handler(
    State(state): State<AppState>,
    Path(execution_id): Path<String>,
    headers: HeaderMap,
    Query(query): Query<EventsQuery>,
) -> ApiResult<Response> {
    let registry = state.states();
    let mut receiver = registry
        .subscribe(&execution_id)
        .ok_or_else(|| ApiError::NotFound("Execution".to_string()))?;

    let header_cursor = headers
        .get("last-event-id")
        .and_then(|value| value.to_str().ok())
        .and_then(|raw| raw.parse::<u64>().ok());
    let cursor = query.cursor.or(header_cursor);
    let history = registry
        .stream_history_since(&execution_id, cursor)
        .unwrap_or_default();

    let stream = stream! {
        let mut last_id = cursor;
        let mut finished = false;
        for envelope in history {
            last_id = Some(envelope.id);
            finished = envelope.event.payload.is_final();
            yield Ok::<Event, Infallible>(event_from_envelope(&envelope));
            if finished {
                break;
            }
        }
        while !finished {
            match receiver.recv().await {
                Ok(envelope) => {
                    if last_id.is_some_and(|last| envelope.id <= last) {
                        continue;
                    }
                    last_id = Some(envelope.id);
                    finished = envelope.event.payload.is_final();
                    yield Ok(event_from_envelope(&envelope));
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    Ok(Sse::new(stream)
        .keep_alive(
            KeepAlive::new()
                .interval(Duration::from_secs(15))
                .text("keep-alive"),
        )
        .into_response())
}

fn event_from_envelope(envelope: &EventEnvelope) -> Event {
    let event_json = serde_json::to_string(&envelope.event).unwrap_or_else(|_| "{}".to_string());
    Event::default()
        .id(envelope.id.to_string())
        .event(envelope.event.kind())
        .data(event_json)
}
