//! Schema validation capability.
//!
//! The procedure pipeline only needs "validate this value, give me the
//! failing fields". Any validation library can plug in by implementing
//! [`Schema`]; plain closures work too. [`ObjectSchema`] is a small
//! structural validator for the common "object with typed fields" case.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One failing field: where it is and what is wrong with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// Path from the validated root to the offending value.
    /// Empty when the root itself is invalid.
    pub path: Vec<String>,
    pub message: String,
}

impl FieldError {
    pub fn new<I, S>(path: I, message: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            path: path.into_iter().map(Into::into).collect(),
            message: message.into(),
        }
    }

    /// Error on the validated value itself.
    pub fn root(message: impl Into<String>) -> Self {
        Self {
            path: Vec::new(),
            message: message.into(),
        }
    }
}

/// Validate a JSON value, returning every failing field.
pub trait Schema: Send + Sync + 'static {
    fn validate(&self, value: &Value) -> Result<(), Vec<FieldError>>;
}

impl<F> Schema for F
where
    F: Fn(&Value) -> Result<(), Vec<FieldError>> + Send + Sync + 'static,
{
    fn validate(&self, value: &Value) -> Result<(), Vec<FieldError>> {
        self(value)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Structural object schema
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// JSON value kinds recognised by [`ObjectSchema`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    String,
    Number,
    Integer,
    Bool,
    Array,
    Object,
    Any,
}

impl Kind {
    fn matches(self, value: &Value) -> bool {
        match self {
            Kind::String => value.is_string(),
            Kind::Number => value.is_number(),
            Kind::Integer => value.is_i64() || value.is_u64(),
            Kind::Bool => value.is_boolean(),
            Kind::Array => value.is_array(),
            Kind::Object => value.is_object(),
            Kind::Any => true,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Kind::String => "string",
            Kind::Number => "number",
            Kind::Integer => "integer",
            Kind::Bool => "boolean",
            Kind::Array => "array",
            Kind::Object => "object",
            Kind::Any => "any",
        }
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[derive(Debug, Clone)]
struct FieldRule {
    name: String,
    kind: Kind,
    required: bool,
}

/// Validates that a value is an object whose declared fields have the
/// declared kinds. Undeclared fields are ignored.
///
/// ```
/// use sy_domain::{Kind, ObjectSchema, Schema};
///
/// let schema = ObjectSchema::new().required("name", Kind::String);
/// assert!(schema.validate(&serde_json::json!({"name": "Ada"})).is_ok());
/// let errors = schema.validate(&serde_json::json!({})).unwrap_err();
/// assert_eq!(errors[0].path, vec!["name"]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ObjectSchema {
    fields: Vec<FieldRule>,
}

impl ObjectSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required(mut self, name: impl Into<String>, kind: Kind) -> Self {
        self.fields.push(FieldRule {
            name: name.into(),
            kind,
            required: true,
        });
        self
    }

    /// Field may be missing or `null`; when present it must match `kind`.
    pub fn optional(mut self, name: impl Into<String>, kind: Kind) -> Self {
        self.fields.push(FieldRule {
            name: name.into(),
            kind,
            required: false,
        });
        self
    }
}

impl Schema for ObjectSchema {
    fn validate(&self, value: &Value) -> Result<(), Vec<FieldError>> {
        let Some(object) = value.as_object() else {
            return Err(vec![FieldError::root(format!(
                "Expected object, received {}",
                kind_of(value)
            ))]);
        };

        let errors: Vec<FieldError> = self
            .fields
            .iter()
            .filter_map(|rule| match object.get(&rule.name) {
                None | Some(Value::Null) if rule.required => {
                    Some(FieldError::new([rule.name.as_str()], "Required"))
                }
                None | Some(Value::Null) => None,
                Some(v) if !rule.kind.matches(v) => Some(FieldError::new(
                    [rule.name.as_str()],
                    format!("Expected {}, received {}", rule.kind.name(), kind_of(v)),
                )),
                Some(_) => None,
            })
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn person() -> ObjectSchema {
        ObjectSchema::new()
            .required("name", Kind::String)
            .optional("age", Kind::Integer)
    }

    #[test]
    fn valid_object_passes() {
        assert!(person().validate(&json!({"name": "Ada", "age": 36})).is_ok());
        assert!(person().validate(&json!({"name": "Ada"})).is_ok());
    }

    #[test]
    fn missing_required_field_reported_by_path() {
        let errors = person().validate(&json!({})).unwrap_err();
        assert_eq!(errors, vec![FieldError::new(["name"], "Required")]);
    }

    #[test]
    fn one_error_per_failing_field() {
        let errors = person()
            .validate(&json!({"name": 7, "age": "old"}))
            .unwrap_err();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].path, vec!["name"]);
        assert_eq!(errors[0].message, "Expected string, received number");
        assert_eq!(errors[1].path, vec!["age"]);
    }

    #[test]
    fn non_object_fails_at_root() {
        let errors = person().validate(&Value::Null).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].path.is_empty());
        assert!(errors[0].message.contains("null"));
    }

    #[test]
    fn closures_are_schemas() {
        let positive = |v: &Value| match v.as_i64() {
            Some(n) if n > 0 => Ok(()),
            _ => Err(vec![FieldError::root("must be positive")]),
        };
        assert!(positive.validate(&json!(3)).is_ok());
        assert!(positive.validate(&json!(-3)).is_err());
    }
}
