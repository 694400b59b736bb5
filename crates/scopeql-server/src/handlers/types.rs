//! Data types for operation results.

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use serde_json::Value;

use scopeql_domain::model::Row;

/// Shape of `data` in a result, so clients can unwrap it generically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    /// One serialized row, or null.
    Instance,
    /// A list of serialized rows.
    Queryset,
    /// A number, or an object of numbers.
    Number,
    Boolean,
    None,
}

impl ResponseType {
    pub fn as_str(self) -> &'static str {
        match self {
            ResponseType::Instance => "instance",
            ResponseType::Queryset => "queryset",
            ResponseType::Number => "number",
            ResponseType::Boolean => "boolean",
            ResponseType::None => "none",
        }
    }
}

/// Uniform `{data, metadata}` result of every operation.
///
/// Serializes as:
///
/// ```json
/// {"data": ..., "metadata": {"<flag>": ..., "response_type": "instance"}}
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct OperationResult {
    pub data: Value,
    pub response_type: ResponseType,
    /// Operation-specific metadata flags such as `created` or `deleted_count`.
    pub flags: Row,
}

impl OperationResult {
    pub fn new(data: Value, response_type: ResponseType) -> Self {
        Self {
            data,
            response_type,
            flags: Row::new(),
        }
    }

    /// Adds a metadata flag.
    pub fn with_flag(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.flags.insert(key.to_string(), value.into());
        self
    }

    /// A metadata flag by name.
    pub fn flag(&self, key: &str) -> Option<&Value> {
        self.flags.get(key)
    }

    /// The `metadata` object, `response_type` included.
    pub fn metadata(&self) -> Value {
        let mut metadata = self.flags.clone();
        metadata.insert(
            "response_type".to_string(),
            Value::String(self.response_type.as_str().to_string()),
        );
        Value::Object(metadata)
    }

    /// The full result as JSON.
    pub fn to_value(&self) -> Value {
        serde_json::json!({ "data": self.data, "metadata": self.metadata() })
    }
}

impl Serialize for OperationResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("OperationResult", 2)?;
        state.serialize_field("data", &self.data)?;
        state.serialize_field("metadata", &self.metadata())?;
        state.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_metadata_always_carries_response_type() {
        let result = OperationResult::new(json!([]), ResponseType::Queryset).with_flag("read", true);

        assert_eq!(
            result.metadata(),
            json!({"read": true, "response_type": "queryset"})
        );
    }

    #[test]
    fn test_serializes_as_data_and_metadata() {
        let result = OperationResult::new(Value::Null, ResponseType::Number)
            .with_flag("deleted_count", 2);

        let value = serde_json::to_value(&result).unwrap();

        assert_eq!(value, result.to_value());
        assert_eq!(value["metadata"]["deleted_count"], json!(2));
        assert_eq!(value["data"], Value::Null);
    }
}
