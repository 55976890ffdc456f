//! Flow nodes and their typed action configurations.

use cdp_adapter::{CookieSpec, ElementState, WaitUntil};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::errors::ActionError;
use crate::lenient;

/// One step of a flow graph as stored: the action kind stays a string and the configuration stays
/// raw JSON until dispatch, so a flow with an unknown or malformed node can still be loaded.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FlowNode {
    pub id: String,
    pub action: String,
    #[serde(default)]
    pub config: Value,
    #[serde(default)]
    pub label: String,
}

impl FlowNode {
    pub fn new(id: impl Into<String>, action: impl Into<String>, config: Value) -> Self {
        Self {
            id: id.into(),
            action: action.into(),
            config,
            label: String::new(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Label when set, otherwise the id.
    pub fn display_name(&self) -> &str {
        if self.label.is_empty() {
            &self.id
        } else {
            &self.label
        }
    }

    pub fn is_start(&self) -> bool {
        self.id == "start-node" || self.action == "start"
    }

    pub fn parse_action(&self) -> Result<NodeAction, ActionError> {
        NodeAction::parse(&self.action, &self.config)
    }
}

/// Every action kind the dispatcher understands.
pub const ACTION_KINDS: &[&str] = &[
    "navigate",
    "click",
    "type",
    "waitFor",
    "scroll",
    "extractText",
    "extractHtml",
    "extractAttribute",
    "screenshot",
    "waitTime",
    "setVariable",
    "condition",
    "isVisible",
    "hover",
    "selectOption",
    "checkBox",
    "keyPress",
    "iframe",
    "download",
    "uploadFile",
    "clearCookies",
    "setCookie",
    "alert",
    "regex",
    "extractUrls",
    "loop",
    "response",
    "start",
];

pub fn is_known_action(kind: &str) -> bool {
    ACTION_KINDS.contains(&kind)
}

/// A node's action with its configuration parsed.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(tag = "action", content = "config", rename_all = "camelCase")]
pub enum NodeAction {
    Navigate(NavigateConfig),
    Click(ClickConfig),
    Type(TypeConfig),
    WaitFor(WaitForConfig),
    Scroll(ScrollConfig),
    ExtractText(ExtractConfig),
    ExtractHtml(ExtractConfig),
    ExtractAttribute(ExtractAttributeConfig),
    Screenshot(ScreenshotConfig),
    WaitTime(WaitTimeConfig),
    SetVariable(SetVariableConfig),
    Condition(ConditionConfig),
    IsVisible(IsVisibleConfig),
    Hover(HoverConfig),
    SelectOption(SelectOptionConfig),
    CheckBox(CheckBoxConfig),
    KeyPress(KeyPressConfig),
    Iframe(IframeConfig),
    Download(DownloadConfig),
    UploadFile(UploadFileConfig),
    ClearCookies(EmptyConfig),
    SetCookie(SetCookieConfig),
    Alert(AlertConfig),
    Regex(RegexConfig),
    ExtractUrls(ExtractUrlsConfig),
    Loop(LoopNodeConfig),
    Response(ResponseConfig),
    Start(EmptyConfig),
}

impl NodeAction {
    pub fn parse(kind: &str, config: &Value) -> Result<Self, ActionError> {
        if !is_known_action(kind) {
            return Err(ActionError::UnknownAction(kind.to_string()));
        }
        let config = match config {
            Value::Null => json!({}),
            other => other.clone(),
        };
        serde_json::from_value(json!({ "action": kind, "config": config }))
            .map_err(|err| ActionError::invalid_config(kind, err))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            NodeAction::Navigate(_) => "navigate",
            NodeAction::Click(_) => "click",
            NodeAction::Type(_) => "type",
            NodeAction::WaitFor(_) => "waitFor",
            NodeAction::Scroll(_) => "scroll",
            NodeAction::ExtractText(_) => "extractText",
            NodeAction::ExtractHtml(_) => "extractHtml",
            NodeAction::ExtractAttribute(_) => "extractAttribute",
            NodeAction::Screenshot(_) => "screenshot",
            NodeAction::WaitTime(_) => "waitTime",
            NodeAction::SetVariable(_) => "setVariable",
            NodeAction::Condition(_) => "condition",
            NodeAction::IsVisible(_) => "isVisible",
            NodeAction::Hover(_) => "hover",
            NodeAction::SelectOption(_) => "selectOption",
            NodeAction::CheckBox(_) => "checkBox",
            NodeAction::KeyPress(_) => "keyPress",
            NodeAction::Iframe(_) => "iframe",
            NodeAction::Download(_) => "download",
            NodeAction::UploadFile(_) => "uploadFile",
            NodeAction::ClearCookies(_) => "clearCookies",
            NodeAction::SetCookie(_) => "setCookie",
            NodeAction::Alert(_) => "alert",
            NodeAction::Regex(_) => "regex",
            NodeAction::ExtractUrls(_) => "extractUrls",
            NodeAction::Loop(_) => "loop",
            NodeAction::Response(_) => "response",
            NodeAction::Start(_) => "start",
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct EmptyConfig {}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct NavigateConfig {
    pub url: Option<String>,
    pub url_variable: Option<String>,
    pub wait_until: Option<WaitUntil>,
    #[serde(deserialize_with = "lenient::opt_u64")]
    pub timeout: Option<u64>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ClickConfig {
    pub selector: Option<String>,
    pub selector_variable: Option<String>,
    #[serde(deserialize_with = "lenient::opt_u64")]
    pub timeout: Option<u64>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct TypeConfig {
    pub selector: Option<String>,
    pub text: Option<String>,
    pub text_variable: Option<String>,
    #[serde(deserialize_with = "lenient::opt_bool")]
    pub clear: Option<bool>,
    #[serde(deserialize_with = "lenient::opt_u64")]
    pub delay: Option<u64>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct WaitForConfig {
    pub selector: Option<String>,
    pub state: Option<ElementState>,
    #[serde(deserialize_with = "lenient::opt_u64")]
    pub timeout: Option<u64>,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScrollType {
    Element,
    Position,
    Top,
    Bottom,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ScrollConfig {
    pub scroll_type: Option<ScrollType>,
    pub selector: Option<String>,
    #[serde(deserialize_with = "lenient::opt_i64")]
    pub x: Option<i64>,
    #[serde(deserialize_with = "lenient::opt_i64")]
    pub y: Option<i64>,
}

/// Shared by `extractText` and `extractHtml`.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ExtractConfig {
    pub selector: Option<String>,
    pub variable: Option<String>,
    #[serde(deserialize_with = "lenient::opt_bool")]
    pub multiple: Option<bool>,
    #[serde(deserialize_with = "lenient::opt_bool")]
    pub outer: Option<bool>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExtractAttributeConfig {
    #[serde(default)]
    pub selector: Option<String>,
    pub attribute: String,
    #[serde(default)]
    pub variable: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_bool")]
    pub multiple: Option<bool>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ScreenshotConfig {
    pub path: Option<String>,
    #[serde(deserialize_with = "lenient::opt_bool")]
    pub full_page: Option<bool>,
    pub selector: Option<String>,
    pub variable: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct WaitTimeConfig {
    #[serde(deserialize_with = "lenient::opt_u64")]
    pub duration: Option<u64>,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    String,
    Number,
    Boolean,
    Json,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SetVariableConfig {
    pub variable: String,
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub value_type: Option<ValueType>,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConditionType {
    #[default]
    Variable,
    Element,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ConditionOperator {
    #[serde(alias = "equal", alias = "==")]
    Equals,
    #[serde(alias = "notEqual", alias = "!=")]
    NotEquals,
    Contains,
    #[serde(alias = "matches")]
    Regex,
    #[serde(alias = "isTruthy")]
    Truthy,
    Exists,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ConditionConfig {
    pub condition_type: ConditionType,
    pub variable: Option<String>,
    pub selector: Option<String>,
    pub operator: Option<ConditionOperator>,
    pub value: Value,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct IsVisibleConfig {
    pub selector: Option<String>,
    #[serde(deserialize_with = "lenient::opt_u64")]
    pub timeout: Option<u64>,
    pub variable: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct HoverConfig {
    pub selector: Option<String>,
    #[serde(deserialize_with = "lenient::opt_u64")]
    pub timeout: Option<u64>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct SelectOptionConfig {
    pub selector: Option<String>,
    pub value: Option<String>,
    pub value_variable: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct CheckBoxConfig {
    pub selector: Option<String>,
    #[serde(deserialize_with = "lenient::opt_bool")]
    pub checked: Option<bool>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KeyPressConfig {
    pub key: String,
    #[serde(default)]
    pub selector: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum IframeOperation {
    #[default]
    ExtractText,
    ExtractHtml,
    Click,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct IframeConfig {
    pub selector: Option<String>,
    pub inner_selector: Option<String>,
    pub operation: IframeOperation,
    pub variable: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct DownloadConfig {
    pub selector: Option<String>,
    pub download_path: Option<String>,
    #[serde(deserialize_with = "lenient::opt_u64")]
    pub wait_time: Option<u64>,
    pub variable: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct UploadFileConfig {
    pub selector: Option<String>,
    pub file_path: Option<String>,
    #[serde(deserialize_with = "lenient::string_list")]
    pub file_paths: Vec<String>,
    pub file_path_variable: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct SetCookieConfig {
    pub name: Option<String>,
    pub value: Option<String>,
    pub domain: Option<String>,
    pub path: Option<String>,
    pub url: Option<String>,
    pub expires: Option<f64>,
    #[serde(deserialize_with = "lenient::opt_bool")]
    pub http_only: Option<bool>,
    #[serde(deserialize_with = "lenient::opt_bool")]
    pub secure: Option<bool>,
    pub cookies: Vec<CookieSpec>,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum AlertAction {
    #[default]
    Accept,
    Dismiss,
    GetText,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AlertConfig {
    pub action: AlertAction,
    pub prompt_text: Option<String>,
    #[serde(deserialize_with = "lenient::opt_u64")]
    pub timeout: Option<u64>,
    pub variable: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RegexSource {
    #[default]
    Text,
    Variable,
    Element,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RegexOperation {
    #[default]
    Match,
    Extract,
    Replace,
    Test,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RegexConfig {
    #[serde(default)]
    pub source: RegexSource,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub source_variable: Option<String>,
    #[serde(default)]
    pub selector: Option<String>,
    pub pattern: String,
    #[serde(default)]
    pub flags: Option<String>,
    #[serde(default)]
    pub operation: RegexOperation,
    #[serde(default)]
    pub replacement: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_bool")]
    pub match_all: Option<bool>,
    #[serde(default)]
    pub variable: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ExtractUrlsConfig {
    pub selector: Option<String>,
    pub base_url: Option<String>,
    #[serde(deserialize_with = "lenient::opt_bool")]
    pub remove_duplicates: Option<bool>,
    #[serde(deserialize_with = "lenient::opt_bool")]
    pub exclude_empty: Option<bool>,
    pub variable: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum LoopType {
    #[default]
    Array,
    ForEach,
    Times,
    While,
}

/// Condition re-checked before every `while` iteration.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct VariableCondition {
    pub variable: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operator: Option<ConditionOperator>,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub value: Value,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct LoopNodeConfig {
    pub loop_type: LoopType,
    pub array_variable: Option<String>,
    pub item_variable: Option<String>,
    pub index_variable: Option<String>,
    #[serde(deserialize_with = "lenient::opt_u64")]
    pub count: Option<u64>,
    pub condition: Option<VariableCondition>,
    #[serde(deserialize_with = "lenient::opt_u64")]
    pub max_iterations: Option<u64>,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFormat {
    #[default]
    Json,
    Text,
    Html,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ResponseConfig {
    #[serde(deserialize_with = "lenient::string_list")]
    pub variables: Vec<String>,
    #[serde(deserialize_with = "lenient::opt_bool")]
    pub merge_arrays: Option<bool>,
    pub merged_key: Option<String>,
    #[serde(deserialize_with = "lenient::opt_bool")]
    pub include_metadata: Option<bool>,
    pub format: ResponseFormat,
}

impl ConditionOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionOperator::Equals => "equals",
            ConditionOperator::NotEquals => "notEquals",
            ConditionOperator::Contains => "contains",
            ConditionOperator::Regex => "regex",
            ConditionOperator::Truthy => "truthy",
            ConditionOperator::Exists => "exists",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_kind_is_reported_by_name() {
        let err = NodeAction::parse("doesNotExist", &json!({})).unwrap_err();
        assert!(err.to_string().contains("Unknown action"));
        assert!(err.to_string().contains("doesNotExist"));
    }

    #[test]
    fn null_config_parses_for_configless_actions() {
        assert_eq!(
            NodeAction::parse("start", &Value::Null).unwrap(),
            NodeAction::Start(EmptyConfig {})
        );
        assert_eq!(
            NodeAction::parse("clearCookies", &Value::Null).unwrap().kind(),
            "clearCookies"
        );
    }

    #[test]
    fn missing_required_field_is_invalid_config() {
        let err = NodeAction::parse("regex", &json!({"text": "abc"})).unwrap_err();
        assert!(matches!(err, ActionError::InvalidConfig { .. }));
        assert!(err.to_string().starts_with("Invalid config for regex"));
    }

    #[test]
    fn string_numbers_are_accepted() {
        let action = NodeAction::parse(
            "navigate",
            &json!({"url": "https://x.test", "timeout": "1500", "waitUntil": "networkidle2"}),
        )
        .unwrap();
        match action {
            NodeAction::Navigate(cfg) => {
                assert_eq!(cfg.timeout, Some(1500));
                assert_eq!(cfg.wait_until, Some(WaitUntil::NetworkIdle));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn loop_config_reads_while_condition() {
        let action = NodeAction::parse(
            "loop",
            &json!({
                "loopType": "while",
                "condition": {"variable": "more", "operator": "truthy"},
                "maxIterations": 5
            }),
        )
        .unwrap();
        let NodeAction::Loop(cfg) = action else {
            panic!("expected loop");
        };
        assert_eq!(cfg.loop_type, LoopType::While);
        assert_eq!(cfg.max_iterations, Some(5));
        assert_eq!(
            cfg.condition.unwrap().operator,
            Some(ConditionOperator::Truthy)
        );
    }

    #[test]
    fn every_listed_kind_parses_or_reports_config() {
        for kind in ACTION_KINDS {
            match NodeAction::parse(kind, &json!({})) {
                Ok(action) => assert_eq!(action.kind(), *kind),
                Err(err) => assert!(matches!(err, ActionError::InvalidConfig { .. }), "{kind}"),
            }
        }
    }
}
