//! Flow definitions as stored: nodes, edges, default variables and the opaque browser / API
//! configuration handed to collaborators.

use std::collections::HashSet;
use std::path::Path;

use action_primitives::{is_known_action, FlowNode};
use cdp_adapter::BrowserSettings;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::FlowError;

/// Flow definition - the immutable input of every execution
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowDefinition {
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub nodes: Vec<FlowNode>,

    #[serde(default)]
    pub edges: Vec<FlowEdge>,

    /// Default variables; caller-supplied values win
    #[serde(default)]
    pub variables: Map<String, Value>,

    #[serde(default)]
    pub browser_settings: BrowserSettings,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_config: Option<ApiConfig>,
}

/// Directed connection between two nodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowEdge {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
}

impl FlowEdge {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: None,
            source: source.into(),
            target: target.into(),
            source_handle: None,
        }
    }

    pub fn with_handle(mut self, handle: impl Into<String>) -> Self {
        self.source_handle = Some(handle.into());
        self
    }

    /// Source handle, with an empty string treated as absent.
    pub fn handle(&self) -> Option<&str> {
        self.source_handle
            .as_deref()
            .map(str::trim)
            .filter(|h| !h.is_empty())
    }
}

/// How a stored flow is exposed as an HTTP endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub path: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub parameters: Vec<ParameterBinding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<ApiAuth>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitConfig>,
}

fn default_method() -> String {
    "POST".to_string()
}

/// Where a request parameter is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterSource {
    Query,
    Body,
    Param,
}

/// Maps one request parameter onto an initial flow variable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterBinding {
    pub name: String,
    #[serde(rename = "type")]
    pub source: ParameterSource,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ApiAuth {
    /// Matched against the `X-API-Key` header
    ApiKey { key: String },
    /// Matched against `Authorization: Bearer <token>`
    Bearer { token: String },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitConfig {
    pub requests: u32,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

fn default_window_secs() -> u64 {
    60
}

/// Severity of a validation finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    pub message: String,
}

impl Finding {
    fn error(node_id: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            node_id: node_id.map(str::to_string),
            message: message.into(),
        }
    }

    fn warning(node_id: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            node_id: node_id.map(str::to_string),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub findings: Vec<Finding>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        !self.findings.iter().any(|f| f.severity == Severity::Error)
    }

    pub fn errors(&self) -> impl Iterator<Item = &Finding> {
        self.findings
            .iter()
            .filter(|f| f.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Finding> {
        self.findings
            .iter()
            .filter(|f| f.severity == Severity::Warning)
    }

    /// Collapse error findings into one `ValidationFailed`.
    pub fn into_result(self) -> Result<(), FlowError> {
        let messages: Vec<String> = self.errors().map(|f| f.message.clone()).collect();
        if messages.is_empty() {
            Ok(())
        } else {
            Err(FlowError::ValidationFailed(messages.join("; ")))
        }
    }
}

impl FlowDefinition {
    pub fn from_json_str(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(raw)
    }

    /// Load a flow from a `.json`, `.yaml` or `.yml` file. A missing id falls back to the file
    /// stem.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, FlowError> {
        let path = path.as_ref();
        let load_failed = |reason: String| FlowError::LoadFailed {
            path: path.display().to_string(),
            reason,
        };
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|err| load_failed(err.to_string()))?;
        let is_yaml = matches!(
            path.extension().and_then(|ext| ext.to_str()),
            Some("yaml") | Some("yml")
        );
        let mut flow = if is_yaml {
            Self::from_yaml_str(&raw).map_err(|err| load_failed(err.to_string()))?
        } else {
            Self::from_json_str(&raw).map_err(|err| load_failed(err.to_string()))?
        };
        if flow.id.trim().is_empty() {
            flow.id = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .unwrap_or("flow")
                .to_string();
        }
        Ok(flow)
    }

    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }

    /// Structural checks run before serving or executing a flow.
    ///
    /// Errors: duplicate node ids, unknown action kinds, no entry node.
    /// Warnings: edges that reference missing nodes (ignored during traversal).
    pub fn validate(&self) -> ValidationReport {
        let mut report = ValidationReport::default();

        if self.nodes.is_empty() {
            report.findings.push(Finding::error(None, "Flow has no nodes"));
            return report;
        }

        let mut seen = HashSet::new();
        for node in &self.nodes {
            if !seen.insert(node.id.as_str()) {
                report.findings.push(Finding::error(
                    Some(&node.id),
                    format!("Duplicate node id '{}'", node.id),
                ));
            }
            if !is_known_action(&node.action) {
                report.findings.push(Finding::error(
                    Some(&node.id),
                    format!("Unknown action: {}", node.action),
                ));
            }
        }

        for edge in &self.edges {
            for end in [&edge.source, &edge.target] {
                if !seen.contains(end.as_str()) {
                    report.findings.push(Finding::warning(
                        None,
                        format!(
                            "Edge {} -> {} references missing node '{}'",
                            edge.source, edge.target, end
                        ),
                    ));
                }
            }
        }

        if crate::graph::FlowGraph::new(self).entry().is_none() {
            report
                .findings
                .push(Finding::error(None, "Flow has no entry node"));
        }

        if let Some(api) = &self.api_config {
            if api.enabled && api.path.trim().is_empty() {
                report
                    .findings
                    .push(Finding::error(None, "apiConfig.enabled requires a path"));
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn flow(value: Value) -> FlowDefinition {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn parses_editor_shape() {
        let def = flow(json!({
            "id": "f1",
            "name": "Demo",
            "nodes": [
                {"id": "start-node", "action": "start"},
                {"id": "n1", "action": "navigate", "config": {"url": "https://x.test"}, "label": "Open"}
            ],
            "edges": [{"source": "start-node", "target": "n1", "sourceHandle": null}],
            "variables": {"q": "rust"},
            "browserSettings": {"headless": false, "keepOpen": true},
            "apiConfig": {
                "enabled": true,
                "path": "/demo",
                "parameters": [{"name": "q", "type": "query", "required": true}],
                "auth": {"type": "apiKey", "key": "k"},
                "rateLimit": {"requests": 5}
            }
        }));
        assert_eq!(def.nodes.len(), 2);
        assert!(def.browser_settings.keep_open);
        let api = def.api_config.unwrap();
        assert_eq!(api.method, "POST");
        assert_eq!(api.parameters[0].source, ParameterSource::Query);
        assert_eq!(api.rate_limit.unwrap().window_secs, 60);
    }

    #[test]
    fn empty_handle_counts_as_absent() {
        let edge = FlowEdge::new("a", "b").with_handle(" ");
        assert_eq!(edge.handle(), None);
        assert_eq!(FlowEdge::new("a", "b").with_handle("true").handle(), Some("true"));
    }

    #[test]
    fn validate_reports_structural_problems() {
        let def = flow(json!({
            "nodes": [
                {"id": "a", "action": "start"},
                {"id": "a", "action": "click"},
                {"id": "b", "action": "teleport"}
            ],
            "edges": [{"source": "a", "target": "ghost"}]
        }));
        let report = def.validate();
        assert!(!report.is_valid());
        assert_eq!(report.errors().count(), 2);
        assert_eq!(report.warnings().count(), 1);
        assert!(report.into_result().is_err());
    }

    #[tokio::test]
    async fn load_yaml_uses_file_stem_as_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("search.yaml");
        std::fs::write(
            &path,
            "name: Search\nnodes:\n  - id: start-node\n    action: start\nedges: []\n",
        )
        .unwrap();
        let def = FlowDefinition::load(&path).await.unwrap();
        assert_eq!(def.id, "search");
        assert!(def.validate().is_valid());
    }
}
