//! Per-field error collection and typed extraction from JSON objects.
//!
//! Decoders keep going after the first bad field so a client sees every
//! problem in one response.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::domain::fields::FieldProblem;

/// Field name → messages, serialized as a JSON object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<String, Vec<String>>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(field: impl Into<String>, problem: FieldProblem) -> Self {
        let mut errors = Self::new();
        errors.push(field, problem);
        errors
    }

    pub fn push(&mut self, field: impl Into<String>, problem: FieldProblem) {
        self.push_message(field, problem.to_string());
    }

    pub fn push_message(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.entry(field.into()).or_default().push(message.into());
    }

    /// Unwrap `result`, recording its problem under `field` on failure.
    pub fn capture<T>(&mut self, field: &str, result: Result<T, FieldProblem>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(problem) => {
                self.push(field, problem);
                None
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// `Ok(())` when nothing was recorded.
    pub fn into_result(self) -> Result<(), FieldErrors> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

pub fn parse_uuid(raw: &str) -> Result<Uuid, FieldProblem> {
    let trimmed = raw.trim();
    Uuid::parse_str(trimmed).map_err(|_| FieldProblem::InvalidIdentifier {
        raw: trimmed.to_string(),
    })
}

/// Typed accessors over a JSON object body.
///
/// Each accessor returns `None` when the key is absent (or `null` for
/// non-nullable fields) and records a problem when the value has the wrong
/// shape.
pub struct JsonFields<'a> {
    object: &'a Map<String, Value>,
}

impl<'a> JsonFields<'a> {
    pub fn new(object: &'a Map<String, Value>) -> Self {
        Self { object }
    }

    pub fn text(&self, errors: &mut FieldErrors, key: &str) -> Option<String> {
        match self.object.get(key)? {
            Value::Null => None,
            Value::String(value) => Some(value.clone()),
            Value::Number(number) => Some(number.to_string()),
            _ => {
                errors.push(key, FieldProblem::WrongType { expected: "a string" });
                None
            }
        }
    }

    pub fn uuid(&self, errors: &mut FieldErrors, key: &str) -> Option<Uuid> {
        match self.object.get(key)? {
            Value::Null => None,
            value => errors.capture(key, uuid_value(value)),
        }
    }

    /// `Some(None)` when the key is present with `null` or an empty string.
    pub fn nullable_uuid(&self, errors: &mut FieldErrors, key: &str) -> Option<Option<Uuid>> {
        match self.object.get(key)? {
            Value::Null => Some(None),
            Value::String(raw) if raw.trim().is_empty() => Some(None),
            value => errors.capture(key, uuid_value(value)).map(Some),
        }
    }

    pub fn uuid_list(&self, errors: &mut FieldErrors, key: &str) -> Option<Vec<Uuid>> {
        match self.object.get(key)? {
            Value::Null => None,
            Value::Array(items) => {
                let mut ids = Vec::with_capacity(items.len());
                let mut failed = false;
                for item in items {
                    match uuid_value(item) {
                        Ok(id) => ids.push(id),
                        Err(problem) => {
                            errors.push(key, problem);
                            failed = true;
                        }
                    }
                }
                (!failed).then_some(ids)
            }
            _ => {
                errors.push(key, FieldProblem::WrongType { expected: "a list of ids" });
                None
            }
        }
    }

    pub fn array(&self, errors: &mut FieldErrors, key: &str) -> Option<&'a [Value]> {
        match self.object.get(key)? {
            Value::Null => None,
            Value::Array(items) => Some(items.as_slice()),
            _ => {
                errors.push(key, FieldProblem::WrongType { expected: "a list" });
                None
            }
        }
    }
}

pub fn uuid_value(value: &Value) -> Result<Uuid, FieldProblem> {
    match value {
        Value::String(raw) => parse_uuid(raw),
        other => Err(FieldProblem::InvalidIdentifier {
            raw: other.to_string(),
        }),
    }
}

/// Require a JSON object body, reporting anything else under `non_field_errors`.
pub fn expect_object(value: &Value) -> Result<&Map<String, Value>, FieldErrors> {
    value.as_object().ok_or_else(|| {
        let mut errors = FieldErrors::new();
        errors.push_message(
            "non_field_errors",
            "Invalid data. Expected a dictionary.",
        );
        errors
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn collects_every_problem() {
        let body = json!({
            "name": 42,
            "category": "nope",
            "composition": ["also-nope", Uuid::nil().to_string()],
            "flag": true
        });
        let object = expect_object(&body).expect("object");
        let fields = JsonFields::new(object);
        let mut errors = FieldErrors::new();

        assert_eq!(fields.text(&mut errors, "name").as_deref(), Some("42"));
        assert_eq!(fields.text(&mut errors, "flag"), None);
        assert_eq!(fields.uuid(&mut errors, "category"), None);
        assert_eq!(fields.uuid_list(&mut errors, "composition"), None);

        assert!(errors.contains("flag"));
        assert!(errors.contains("category"));
        assert_eq!(errors.get("composition").map(<[String]>::len), Some(1));
        assert!(!errors.contains("name"));
    }

    #[test]
    fn nullable_uuid_distinguishes_clear_from_absent() {
        let body = json!({ "sub_category": null });
        let object = expect_object(&body).expect("object");
        let fields = JsonFields::new(object);
        let mut errors = FieldErrors::new();

        assert_eq!(fields.nullable_uuid(&mut errors, "sub_category"), Some(None));
        assert_eq!(fields.nullable_uuid(&mut errors, "missing"), None);
        assert!(errors.is_empty());
    }

    #[test]
    fn non_object_body_is_rejected() {
        let errors = expect_object(&json!([1, 2])).expect_err("array body");
        assert!(errors.contains("non_field_errors"));
    }

    #[test]
    fn serializes_as_plain_map() {
        let errors = FieldErrors::single("name", FieldProblem::Missing);
        assert_eq!(
            serde_json::to_value(&errors).expect("serialize"),
            json!({ "name": ["This field is required."] })
        );
    }
}
