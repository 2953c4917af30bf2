//! Typed access to tool call arguments.

use crate::error::RunwireError;

/// Wrapper around parsed tool call arguments providing typed extraction.
#[derive(Debug, Clone)]
pub struct ToolArguments {
    value: serde_json::Value,
}

impl ToolArguments {
    pub fn new(value: serde_json::Value) -> Self {
        Self { value }
    }

    /// Get the raw JSON value.
    pub fn raw(&self) -> &serde_json::Value {
        &self.value
    }

    /// Get a string argument by key.
    pub fn get_str(&self, key: &str) -> Result<&str, RunwireError> {
        self.value
            .get(key)
            .and_then(|v| v.as_str())
            .ok_or_else(|| RunwireError::InvalidArgument(format!("Missing string argument: {key}")))
    }

    /// Get an optional string argument.
    pub fn get_str_opt(&self, key: &str) -> Option<&str> {
        self.value.get(key).and_then(|v| v.as_str())
    }

    /// Get an integer argument.
    pub fn get_i64(&self, key: &str) -> Result<i64, RunwireError> {
        self.value.get(key).and_then(|v| v.as_i64()).ok_or_else(|| {
            RunwireError::InvalidArgument(format!("Missing integer argument: {key}"))
        })
    }

    /// Get a boolean argument.
    pub fn get_bool(&self, key: &str) -> Result<bool, RunwireError> {
        self.value.get(key).and_then(|v| v.as_bool()).ok_or_else(|| {
            RunwireError::InvalidArgument(format!("Missing boolean argument: {key}"))
        })
    }

    /// Deserialize the entire arguments into a typed struct.
    pub fn deserialize<T: serde::de::DeserializeOwned>(&self) -> Result<T, RunwireError> {
        serde_json::from_value(self.value.clone()).map_err(|e| {
            RunwireError::InvalidArgument(format!("Failed to deserialize arguments: {e}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_getters() {
        let args = ToolArguments::new(serde_json::json!({"name": "Ada", "n": 3, "on": true}));
        assert_eq!(args.get_str("name").unwrap(), "Ada");
        assert_eq!(args.get_i64("n").unwrap(), 3);
        assert!(args.get_bool("on").unwrap());
        assert_eq!(args.get_str_opt("missing"), None);
        assert!(matches!(
            args.get_str("missing"),
            Err(RunwireError::InvalidArgument(_))
        ));
    }

    #[test]
    fn deserialize_into_struct() {
        #[derive(serde::Deserialize)]
        struct Query {
            q: String,
            limit: Option<u32>,
        }
        let args = ToolArguments::new(serde_json::json!({"q": "rust"}));
        let query: Query = args.deserialize().unwrap();
        assert_eq!(query.q, "rust");
        assert_eq!(query.limit, None);
    }
}
