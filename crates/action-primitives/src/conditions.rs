//! Condition evaluation shared by `condition` nodes and `while` loops.

use cdp_adapter::BrowserPage;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

use crate::errors::ActionError;
use crate::interpolate::stringify;
use crate::node::{ConditionOperator, VariableCondition};

/// JavaScript-style truthiness; a missing variable is falsy.
pub fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(false),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(_)) | Some(Value::Object(_)) => true,
    }
}

/// Operator used when a node leaves it blank: `truthy` without a comparison value, `equals` otherwise.
pub fn default_operator(expected: &Value) -> ConditionOperator {
    if expected.is_null() {
        ConditionOperator::Truthy
    } else {
        ConditionOperator::Equals
    }
}

fn loosely_equal(actual: &Value, expected: &Value) -> bool {
    actual == expected || stringify(actual) == stringify(expected)
}

/// Compare a variable value against an expected value.
pub fn compare(
    actual: Option<&Value>,
    operator: ConditionOperator,
    expected: &Value,
) -> Result<bool, ActionError> {
    let outcome = match operator {
        ConditionOperator::Exists => matches!(actual, Some(v) if !v.is_null()),
        ConditionOperator::Truthy => is_truthy(actual),
        ConditionOperator::Equals => loosely_equal(actual.unwrap_or(&Value::Null), expected),
        ConditionOperator::NotEquals => !loosely_equal(actual.unwrap_or(&Value::Null), expected),
        ConditionOperator::Contains => match actual {
            Some(Value::Array(items)) => items.iter().any(|item| loosely_equal(item, expected)),
            Some(Value::Object(map)) => map.contains_key(&stringify(expected)),
            Some(value) => stringify(value).contains(&stringify(expected)),
            None => false,
        },
        ConditionOperator::Regex => {
            let pattern = stringify(expected);
            let regex = Regex::new(&pattern)
                .map_err(|err| ActionError::InvalidPattern(format!("{}: {}", pattern, err)))?;
            actual
                .map(|value| regex.is_match(&stringify(value)))
                .unwrap_or(false)
        }
    };
    Ok(outcome)
}

pub fn evaluate_variable_condition(
    variables: &Map<String, Value>,
    condition: &VariableCondition,
) -> Result<bool, ActionError> {
    let operator = condition
        .operator
        .unwrap_or_else(|| default_operator(&condition.value));
    compare(
        variables.get(&condition.variable),
        operator,
        &condition.value,
    )
}

/// Evaluate a condition against the first element matching `selector`.
///
/// Absence is a normal `false`; probe failures are logged and also read as `false`.
pub async fn evaluate_element_condition(
    page: &dyn BrowserPage,
    selector: &str,
    operator: ConditionOperator,
    expected: &Value,
) -> bool {
    let texts = match page.query_text(selector).await {
        Ok(texts) => texts,
        Err(err) => {
            debug!(selector, %err, "element condition probe failed");
            return false;
        }
    };
    let Some(first) = texts.first() else {
        return matches!(operator, ConditionOperator::NotEquals);
    };
    let text = Value::String(first.clone());
    match operator {
        ConditionOperator::Exists => true,
        ConditionOperator::Truthy => !first.trim().is_empty(),
        other => compare(Some(&text), other, expected).unwrap_or_else(|err| {
            debug!(selector, %err, "element condition comparison failed");
            false
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdp_adapter::{StubDocument, StubElement, StubPage, StubScript};
    use serde_json::json;

    #[test]
    fn truthiness_follows_javascript() {
        assert!(!is_truthy(None));
        assert!(!is_truthy(Some(&json!(0))));
        assert!(!is_truthy(Some(&json!(""))));
        assert!(is_truthy(Some(&json!([]))));
        assert!(is_truthy(Some(&json!("no"))));
    }

    #[test]
    fn equals_compares_rendered_values() {
        assert!(compare(Some(&json!(5)), ConditionOperator::Equals, &json!("5")).unwrap());
        assert!(compare(Some(&json!("a")), ConditionOperator::NotEquals, &json!("b")).unwrap());
    }

    #[test]
    fn contains_handles_strings_and_arrays() {
        let list = json!(["x", "y"]);
        assert!(compare(Some(&list), ConditionOperator::Contains, &json!("y")).unwrap());
        assert!(compare(Some(&json!("hello")), ConditionOperator::Contains, &json!("ell")).unwrap());
        assert!(!compare(None, ConditionOperator::Contains, &json!("ell")).unwrap());
    }

    #[test]
    fn bad_regex_is_an_error() {
        let err = compare(Some(&json!("x")), ConditionOperator::Regex, &json!("(")).unwrap_err();
        assert!(matches!(err, ActionError::InvalidPattern(_)));
    }

    #[test]
    fn variable_condition_defaults_operator() {
        let vars = json!({"more": true}).as_object().cloned().unwrap();
        let cond = VariableCondition {
            variable: "more".into(),
            operator: None,
            value: Value::Null,
        };
        assert!(evaluate_variable_condition(&vars, &cond).unwrap());
    }

    #[tokio::test]
    async fn element_conditions_read_absence_as_false() {
        let page = StubPage::new(
            StubScript::new(
                StubDocument::new().with_element("#status", StubElement::text("Ready to go")),
            ),
            Default::default(),
        );
        let expected = json!("Ready");
        assert!(evaluate_element_condition(&page, "#status", ConditionOperator::Contains, &expected).await);
        assert!(evaluate_element_condition(&page, "#status", ConditionOperator::Exists, &Value::Null).await);
        assert!(!evaluate_element_condition(&page, "#missing", ConditionOperator::Exists, &Value::Null).await);
        assert!(!evaluate_element_condition(&page, "#missing", ConditionOperator::Contains, &expected).await);
    }
}
