//! Request body validation against a version's example body.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;

/// Differences between a request body and the example it should follow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ValidationReport {
    #[schema(example = json!(["KEY1", "KEY3.SUBKEY5"]))]
    pub missing_keys: Vec<String>,
    #[schema(example = json!(["ROWS[4].VALUE"]))]
    pub extra_keys: Vec<String>,
    #[schema(example = json!(["FLAG (expected boolean, got number)", "ROWS[2] (expected object, got string)"]))]
    pub type_mismatches: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.missing_keys.is_empty() && self.extra_keys.is_empty() && self.type_mismatches.is_empty()
    }
}

/// Compare `incoming` with `expected`.
///
/// Nested keys are reported as `parent.child`, sequence elements as
/// `key[i]` and checked against the first example element. Integers and
/// floats are interchangeable, and an empty example sequence accepts any
/// elements.
pub fn validate(expected: &Map<String, Value>, incoming: &Map<String, Value>) -> ValidationReport {
    let mut report = ValidationReport::default();
    compare_maps(expected, incoming, "", &mut report);
    report
}

fn join(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{parent}.{key}")
    }
}

fn compare_maps(
    expected: &Map<String, Value>,
    incoming: &Map<String, Value>,
    parent: &str,
    report: &mut ValidationReport,
) {
    for (key, expected_value) in expected {
        let path = join(parent, key);
        match incoming.get(key) {
            Some(value) => compare_values(expected_value, value, &path, report),
            None => report.missing_keys.push(path),
        }
    }
    for key in incoming.keys() {
        if !expected.contains_key(key) {
            report.extra_keys.push(join(parent, key));
        }
    }
}

fn compare_values(expected: &Value, incoming: &Value, path: &str, report: &mut ValidationReport) {
    match (expected, incoming) {
        (Value::Object(expected), Value::Object(incoming)) => {
            compare_maps(expected, incoming, path, report)
        }
        (Value::Array(expected), Value::Array(incoming)) => {
            let Some(first) = expected.first() else {
                return;
            };
            for (idx, item) in incoming.iter().enumerate() {
                compare_values(first, item, &format!("{path}[{idx}]"), report);
            }
        }
        (expected, incoming) if type_name(expected) != type_name(incoming) => {
            report.type_mismatches.push(format!(
                "{path} (expected {}, got {})",
                type_name(expected),
                type_name(incoming)
            ));
        }
        _ => {}
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn check(expected: Value, incoming: Value) -> ValidationReport {
        validate(
            expected.as_object().unwrap(),
            incoming.as_object().unwrap(),
        )
    }

    #[test]
    fn test_matching_body_is_valid() {
        let report = check(
            json!({"TITLE": "x", "COUNT": 1, "ROWS": [{"A": "1"}]}),
            json!({"TITLE": "y", "COUNT": 2.5, "ROWS": [{"A": "2"}, {"A": "3"}]}),
        );
        assert!(report.is_valid(), "{report:?}");
    }

    #[test]
    fn test_missing_and_extra_keys_use_paths() {
        let report = check(
            json!({"A": "x", "NESTED": {"B": "y", "C": "z"}}),
            json!({"NESTED": {"B": "y", "D": "w"}, "E": 1}),
        );
        assert_eq!(report.missing_keys, vec!["A", "NESTED.C"]);
        assert_eq!(report.extra_keys, vec!["NESTED.D", "E"]);
        assert!(!report.is_valid());
    }

    #[test]
    fn test_sequence_elements_follow_first_example() {
        let report = check(
            json!({"ROWS": [{"A": "1"}]}),
            json!({"ROWS": [{"A": "1"}, "oops", {"A": "2", "X": true}]}),
        );
        assert_eq!(report.type_mismatches, vec!["ROWS[1] (expected object, got string)"]);
        assert_eq!(report.extra_keys, vec!["ROWS[2].X"]);
    }

    #[test]
    fn test_empty_example_sequence_accepts_anything() {
        let report = check(json!({"ROWS": []}), json!({"ROWS": [1, "two", {"x": 3}]}));
        assert!(report.is_valid());
    }

    #[test]
    fn test_type_mismatch_is_described() {
        let report = check(json!({"FLAG": true}), json!({"FLAG": 1}));
        assert_eq!(report.type_mismatches, vec!["FLAG (expected boolean, got number)"]);
    }
}
