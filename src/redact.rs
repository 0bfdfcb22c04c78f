//! Removal of sensitive fields from log records.

use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;

/// Keys that must never reach a log sink, at any depth.
///
/// Matching is exact and case-sensitive. The default set is `password` and
/// `cvv`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "Vec<String>")]
pub struct SensitiveFields(HashSet<String>);

impl SensitiveFields {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(fields.into_iter().map(Into::into).collect())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Strip every sensitive key from `value`, descending through objects and arrays.
    pub fn redact(&self, value: &mut Value) {
        if self.is_empty() {
            return;
        }
        match value {
            Value::Object(map) => {
                map.retain(|key, _| !self.contains(key));
                for nested in map.values_mut() {
                    self.redact(nested);
                }
            }
            Value::Array(items) => {
                for item in items {
                    self.redact(item);
                }
            }
            _ => {}
        }
    }

    /// Redact a JSON document held as text.
    ///
    /// Returns the re-serialized document when a sensitive key was removed,
    /// `None` when `text` is not a JSON object or array or has nothing to
    /// remove.
    pub fn redact_text(&self, text: &str) -> Option<String> {
        if self.is_empty() {
            return None;
        }
        let mut document: Value = serde_json::from_str(text).ok()?;
        if !(document.is_object() || document.is_array()) {
            return None;
        }
        let original = document.clone();
        self.redact(&mut document);
        if document == original {
            return None;
        }
        serde_json::to_string(&document).ok()
    }
}

impl Default for SensitiveFields {
    fn default() -> Self {
        Self::new(["password", "cvv"])
    }
}

impl From<Vec<String>> for SensitiveFields {
    fn from(fields: Vec<String>) -> Self {
        Self::new(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_redacts_nested_keys() {
        let mut record = json!({
            "method": "POST",
            "body": {
                "password": "hunter2",
                "card": { "number": "4111", "cvv": "123" },
                "people": [
                    { "name": "a", "password": "x" },
                    [ { "cvv": "999", "keep": true } ]
                ]
            }
        });

        SensitiveFields::default().redact(&mut record);

        assert_eq!(
            record,
            json!({
                "method": "POST",
                "body": {
                    "card": { "number": "4111" },
                    "people": [
                        { "name": "a" },
                        [ { "keep": true } ]
                    ]
                }
            })
        );
    }

    #[test]
    fn test_matching_is_exact() {
        let mut record = json!({ "Password": "kept", "password_hint": "kept", "password": "gone" });
        SensitiveFields::default().redact(&mut record);
        assert_eq!(record, json!({ "Password": "kept", "password_hint": "kept" }));
    }

    #[test]
    fn test_scalars_untouched() {
        let mut record = json!("password");
        SensitiveFields::default().redact(&mut record);
        assert_eq!(record, json!("password"));
    }

    #[test]
    fn test_redact_text() {
        let fields = SensitiveFields::default();

        let redacted = fields
            .redact_text(r#"{"user":"ada","password":"hunter2","items":[{"cvv":"1"}]}"#)
            .unwrap();
        let redacted: Value = serde_json::from_str(&redacted).unwrap();
        assert_eq!(redacted, json!({ "user": "ada", "items": [{}] }));

        assert_eq!(fields.redact_text(r#"{"user":"ada"}"#), None);
        assert_eq!(fields.redact_text("password=hunter2"), None);
        assert_eq!(fields.redact_text(r#""password""#), None);
    }

    #[test]
    fn test_deserialize_from_list() {
        let fields: SensitiveFields = serde_json::from_value(json!(["ssn", "token"])).unwrap();
        assert!(fields.contains("ssn"));
        assert!(fields.contains("token"));
        assert!(!fields.contains("password"));
    }
}
