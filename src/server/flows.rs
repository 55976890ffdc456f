//! Flows exposed as HTTP endpoints through their `apiConfig`.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use action_flow::{ApiConfig, FlowDefinition, ParameterBinding, ParameterSource};
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{ConnectInfo, Path as PathParams, Query, State},
    http::{HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{on, MethodFilter},
    Json, Router,
};
use flowpilot_core_types::ExecutionStatus;
use serde_json::{json, Map, Value};
use tracing::{debug, info, instrument, warn};

use crate::errors::ApiError;

use super::auth::authorize;
use super::state::AppState;

/// Flows loaded from the flows directory, keyed by id.
#[derive(Default)]
pub struct FlowCatalog {
    flows: Vec<Arc<FlowDefinition>>,
}

impl FlowCatalog {
    pub fn new(flows: Vec<FlowDefinition>) -> Self {
        Self {
            flows: flows.into_iter().map(Arc::new).collect(),
        }
    }

    /// Load every `.json`, `.yaml` and `.yml` flow under `dir`. Invalid flows are skipped with a
    /// warning; a missing directory yields an empty catalog.
    pub async fn load_dir(dir: &Path) -> Result<Self> {
        if !dir.exists() {
            warn!(dir = %dir.display(), "flows directory not found; no flow routes exposed");
            return Ok(Self::default());
        }

        let mut entries = tokio::fs::read_dir(dir)
            .await
            .with_context(|| format!("Failed to read flows directory {}", dir.display()))?;
        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_flow = matches!(
                path.extension().and_then(|ext| ext.to_str()),
                Some("json") | Some("yaml") | Some("yml")
            );
            if is_flow {
                paths.push(path);
            }
        }
        paths.sort();

        let mut flows = Vec::new();
        for path in paths {
            match FlowDefinition::load(&path).await {
                Ok(flow) => {
                    let report = flow.validate();
                    if report.is_valid() {
                        flows.push(flow);
                    } else {
                        let reasons: Vec<_> = report.errors().map(|f| f.message.clone()).collect();
                        warn!(path = %path.display(), errors = ?reasons, "skipping invalid flow");
                    }
                }
                Err(err) => warn!(path = %path.display(), %err, "skipping unreadable flow"),
            }
        }
        info!(dir = %dir.display(), count = flows.len(), "flows loaded");
        Ok(Self::new(flows))
    }

    pub fn get(&self, id: &str) -> Option<Arc<FlowDefinition>> {
        self.flows.iter().find(|flow| flow.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    /// Flows whose `apiConfig` is enabled.
    pub fn exposed(&self) -> impl Iterator<Item = (&Arc<FlowDefinition>, &ApiConfig)> {
        self.flows.iter().filter_map(|flow| {
            flow.api_config
                .as_ref()
                .filter(|api| api.enabled)
                .map(|api| (flow, api))
        })
    }
}

/// Route path for a flow: absolute paths are used as-is, relative ones live under `/flows`.
pub fn route_path(api: &ApiConfig) -> String {
    let trimmed = api.path.trim();
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/flows/{}", trimmed)
    }
}

fn method_filter(method: &str) -> Option<MethodFilter> {
    match method.trim().to_ascii_uppercase().as_str() {
        "GET" => Some(MethodFilter::GET),
        "POST" => Some(MethodFilter::POST),
        "PUT" => Some(MethodFilter::PUT),
        "PATCH" => Some(MethodFilter::PATCH),
        "DELETE" => Some(MethodFilter::DELETE),
        _ => None,
    }
}

/// One route per exposed flow. `reserved` holds `METHOD path` pairs already taken by the API.
pub fn routes(catalog: &FlowCatalog, reserved: &[(&str, &str)]) -> Router<AppState> {
    let mut taken: HashSet<(String, String)> = reserved
        .iter()
        .map(|(method, path)| (method.to_string(), path.to_string()))
        .collect();
    let mut router = Router::new();

    for (flow, api) in catalog.exposed() {
        let path = route_path(api);
        let method = api.method.trim().to_ascii_uppercase();
        let Some(filter) = method_filter(&method) else {
            warn!(flow_id = %flow.id, method = %api.method, "unsupported method; flow not exposed");
            continue;
        };
        if !taken.insert((method.clone(), path.clone())) {
            warn!(flow_id = %flow.id, %method, %path, "route already taken; flow not exposed");
            continue;
        }

        info!(flow_id = %flow.id, %method, %path, "exposing flow");
        let flow = Arc::clone(flow);
        router = router.route(
            &path,
            on(
                filter,
                move |State(state): State<AppState>,
                      connect: Option<ConnectInfo<SocketAddr>>,
                      params: Option<PathParams<HashMap<String, String>>>,
                      Query(query): Query<HashMap<String, String>>,
                      headers: HeaderMap,
                      body: Bytes| {
                    let flow = Arc::clone(&flow);
                    async move {
                        let request = FlowRequest {
                            client: client_key(&headers, connect.map(|c| c.0)),
                            params: params.map(|p| p.0).unwrap_or_default(),
                            query,
                            headers,
                            body,
                        };
                        invoke_flow(state, flow, request).await
                    }
                },
            ),
        );
    }
    router
}

struct FlowRequest {
    client: String,
    params: HashMap<String, String>,
    query: HashMap<String, String>,
    headers: HeaderMap,
    body: Bytes,
}

#[instrument(name = "flowpilot.flows.invoke", skip_all, fields(flow_id = %flow.id, client = %request.client))]
async fn invoke_flow(state: AppState, flow: Arc<FlowDefinition>, request: FlowRequest) -> Response {
    match run_flow(&state, &flow, request).await {
        Ok(response) => response,
        Err(err) => {
            warn!(flow_id = %flow.id, %err, "flow request rejected");
            err.into_response()
        }
    }
}

async fn run_flow(
    state: &AppState,
    flow: &FlowDefinition,
    request: FlowRequest,
) -> Result<Response, ApiError> {
    let Some(api) = flow.api_config.as_ref() else {
        return Err(ApiError::NotFound("Flow route".to_string()));
    };

    if !authorize(api.auth.as_ref(), &request.headers) {
        return Err(ApiError::Unauthorized);
    }
    if let Some(limit) = api.rate_limit.as_ref() {
        let key = format!("{}:{}", flow.id, request.client);
        if let Err(wait) = state.rate_limiter().check(&key, limit) {
            debug!(flow = %flow.id, client = %request.client, "rate limit exceeded");
            return Err(ApiError::RateLimited {
                retry_after_secs: wait.as_secs().max(1),
            });
        }
    }

    let body = if request.body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&request.body)
            .map_err(|err| ApiError::BadRequest(format!("Invalid JSON body: {}", err)))?
    };
    let variables = bind_parameters(&api.parameters, &request.query, &body, &request.params)
        .map_err(ApiError::MissingParameter)?;

    let record = state.engine().run(flow, variables).await?;
    match record.status {
        ExecutionStatus::Completed => Ok(render_results(record.results.unwrap_or(Value::Null))),
        status => Ok((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "success": false,
                "executionId": record.execution_id,
                "status": status,
                "error": record.error,
            })),
        )
            .into_response()),
    }
}

/// Map request parameters onto initial flow variables.
///
/// Missing or empty values fall back to `defaultValue`; a required parameter with neither is
/// reported by name. Without declared bindings, a JSON object body is passed through whole.
pub fn bind_parameters(
    bindings: &[ParameterBinding],
    query: &HashMap<String, String>,
    body: &Value,
    params: &HashMap<String, String>,
) -> Result<Map<String, Value>, String> {
    let mut variables = Map::new();
    if bindings.is_empty() {
        if let Value::Object(fields) = body {
            variables.extend(fields.clone());
        }
        return Ok(variables);
    }

    for binding in bindings {
        let raw = match binding.source {
            ParameterSource::Query => query.get(&binding.name).cloned().map(Value::String),
            ParameterSource::Param => params.get(&binding.name).cloned().map(Value::String),
            ParameterSource::Body => body.get(&binding.name).cloned(),
        };
        let present = raw.filter(|value| match value {
            Value::Null => false,
            Value::String(s) => !s.is_empty(),
            _ => true,
        });
        match present.or_else(|| binding.default_value.clone()) {
            Some(value) => {
                variables.insert(binding.name.clone(), value);
            }
            None if binding.required => return Err(binding.name.clone()),
            None => {}
        }
    }
    Ok(variables)
}

fn render_results(results: Value) -> Response {
    match results {
        Value::String(text) if text.trim_start().starts_with('<') => Html(text).into_response(),
        Value::String(text) => text.into_response(),
        other => Json(other).into_response(),
    }
}

fn client_key(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|raw| raw.split(',').next())
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty())
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn binding(name: &str, source: ParameterSource, required: bool) -> ParameterBinding {
        ParameterBinding {
            name: name.to_string(),
            source,
            required,
            default_value: None,
        }
    }

    #[test]
    fn binds_each_source() {
        let bindings = vec![
            binding("q", ParameterSource::Query, true),
            binding("limit", ParameterSource::Body, false),
            binding("id", ParameterSource::Param, true),
        ];
        let query = HashMap::from([("q".to_string(), "rust".to_string())]);
        let params = HashMap::from([("id".to_string(), "42".to_string())]);
        let vars = bind_parameters(&bindings, &query, &json!({"limit": 5}), &params).unwrap();
        assert_eq!(vars["q"], json!("rust"));
        assert_eq!(vars["limit"], json!(5));
        assert_eq!(vars["id"], json!("42"));
    }

    #[test]
    fn missing_required_parameter_is_named() {
        let bindings = vec![binding("q", ParameterSource::Query, true)];
        let query = HashMap::from([("q".to_string(), String::new())]);
        let err = bind_parameters(&bindings, &query, &Value::Null, &HashMap::new()).unwrap_err();
        assert_eq!(err, "q");
    }

    #[test]
    fn default_value_fills_missing_parameter() {
        let mut page = binding("page", ParameterSource::Query, true);
        page.default_value = Some(json!(1));
        let vars =
            bind_parameters(&[page], &HashMap::new(), &Value::Null, &HashMap::new()).unwrap();
        assert_eq!(vars["page"], json!(1));
    }

    #[test]
    fn body_passes_through_without_bindings() {
        let vars = bind_parameters(
            &[],
            &HashMap::new(),
            &json!({"a": 1, "b": "x"}),
            &HashMap::new(),
        )
        .unwrap();
        assert_eq!(vars.len(), 2);
    }

    #[test]
    fn relative_paths_live_under_flows() {
        let mut api: ApiConfig = serde_json::from_value(json!({"enabled": true, "path": "search"}))
            .unwrap();
        assert_eq!(route_path(&api), "/flows/search");
        api.path = "/custom/search".into();
        assert_eq!(route_path(&api), "/custom/search");
        assert_eq!(api.method, "POST");
    }

    #[test]
    fn forwarded_header_wins_over_peer() {
        let mut headers = HeaderMap::new();
        let peer: SocketAddr = "10.0.0.1:5000".parse().unwrap();
        assert_eq!(client_key(&headers, Some(peer)), "10.0.0.1");
        headers.insert("x-forwarded-for", "1.2.3.4, 10.0.0.1".parse().unwrap());
        assert_eq!(client_key(&headers, Some(peer)), "1.2.3.4");
        assert_eq!(client_key(&HeaderMap::new(), None), "unknown");
    }
}
