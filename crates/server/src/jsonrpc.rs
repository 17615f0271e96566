//! JSON-RPC 2.0 request parsing and response building
//!
//! The control protocol is JSON-RPC 2.0, one document per line. This
//! module owns the generic layer: request validation, typed parameter
//! extraction with range checks, and the response / error / notification
//! document shapes. Method semantics live in the coordinator's dispatcher.

use std::fmt;

use serde_json::{Value, json};

/// Invalid JSON was received
pub const PARSE_ERROR: i32 = -32700;
/// The JSON is not a valid request object
pub const INVALID_REQUEST: i32 = -32600;
/// The method does not exist
pub const METHOD_NOT_FOUND: i32 = -32601;
/// Invalid method parameters
pub const INVALID_PARAMS: i32 = -32602;
/// Internal JSON-RPC error
pub const INTERNAL_ERROR: i32 = -32603;

/// A JSON-RPC error to be returned to the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcError {
    /// JSON-RPC error code
    pub code: i32,
    /// Human-readable message
    pub message: String,
}

impl RpcError {
    /// Invalid JSON
    pub fn parse_error() -> Self {
        Self {
            code: PARSE_ERROR,
            message: "Parse error".into(),
        }
    }

    /// Structurally invalid request object
    pub fn invalid_request() -> Self {
        Self {
            code: INVALID_REQUEST,
            message: "Invalid Request".into(),
        }
    }

    /// Unknown method
    pub fn method_not_found() -> Self {
        Self {
            code: METHOD_NOT_FOUND,
            message: "Method not found".into(),
        }
    }

    /// Missing, mistyped, or out-of-range parameter
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self {
            code: INVALID_PARAMS,
            message: message.into(),
        }
    }

    /// Internal error (also used for unknown clients)
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            code: INTERNAL_ERROR,
            message: message.into(),
        }
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

impl std::error::Error for RpcError {}

/// A validated JSON-RPC 2.0 request
#[derive(Debug, Clone)]
pub struct RpcRequest {
    /// Method name
    pub method: String,
    /// Params object, if any
    pub params: Option<Value>,
    /// Request id, echoed in the response
    pub id: Value,
}

impl RpcRequest {
    /// Parse and validate one request line
    pub fn parse(line: &str) -> Result<Self, RpcError> {
        let value: Value = serde_json::from_str(line).map_err(|_| RpcError::parse_error())?;
        let obj = value.as_object().ok_or_else(RpcError::invalid_request)?;

        if obj.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
            return Err(RpcError::invalid_request());
        }

        let method = obj
            .get("method")
            .and_then(Value::as_str)
            .ok_or_else(RpcError::invalid_request)?
            .to_string();

        let id = match obj.get("id") {
            Some(id @ (Value::String(_) | Value::Number(_))) => id.clone(),
            _ => return Err(RpcError::invalid_request()),
        };

        let params = match obj.get("params") {
            None | Some(Value::Null) => None,
            Some(params @ Value::Object(_)) => Some(params.clone()),
            Some(_) => return Err(RpcError::invalid_request()),
        };

        Ok(Self { method, params, id })
    }

    fn param(&self, name: &str) -> Option<&Value> {
        self.params.as_ref()?.get(name)
    }

    /// Whether a parameter is present
    pub fn has_param(&self, name: &str) -> bool {
        self.param(name).is_some()
    }

    /// A string parameter, if present and a string
    pub fn opt_str_param(&self, name: &str) -> Option<&str> {
        self.param(name)?.as_str()
    }

    /// A required string parameter
    pub fn str_param(&self, name: &str) -> Result<&str, RpcError> {
        self.param(name)
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::invalid_params(format!("missing string param '{name}'")))
    }

    /// A required boolean parameter
    pub fn bool_param(&self, name: &str) -> Result<bool, RpcError> {
        self.param(name)
            .and_then(Value::as_bool)
            .ok_or_else(|| RpcError::invalid_params(format!("missing bool param '{name}'")))
    }

    /// A required integer parameter constrained to `[min, max]`
    pub fn int_param(&self, name: &str, min: i64, max: i64) -> Result<i64, RpcError> {
        let value = self
            .param(name)
            .and_then(Value::as_i64)
            .ok_or_else(|| RpcError::invalid_params(format!("missing integer param '{name}'")))?;

        if value < min || value > max {
            return Err(RpcError::invalid_params(format!(
                "param '{name}' = {value} out of range [{min}, {max}]"
            )));
        }
        Ok(value)
    }
}

/// A success response document
pub fn response(id: &Value, result: Value) -> String {
    json!({
        "jsonrpc": "2.0",
        "result": result,
        "id": id,
    })
    .to_string()
}

/// An error response document; `id` is null when the request id is unknown
pub fn error_response(id: Option<&Value>, error: &RpcError) -> String {
    json!({
        "jsonrpc": "2.0",
        "error": {
            "code": error.code,
            "message": error.message,
        },
        "id": id.cloned().unwrap_or(Value::Null),
    })
    .to_string()
}

/// An unsolicited notification document (no id)
pub fn notification(method: &str, params: Value) -> String {
    json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": params,
    })
    .to_string()
}

#[cfg(test)]
#[path = "jsonrpc_test.rs"]
mod tests;
