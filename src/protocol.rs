//! JSON-RPC 2.0 envelope and params types for the stdio channel.
//!
//! Requests arrive one per line on stdin; responses leave one per line on
//! stdout. Every response carries exactly one of `result` or `error`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{AppError, Result};

/// Protocol version stamped on every response.
pub const JSONRPC_VERSION: &str = "2.0";

/// Malformed request line.
pub const PARSE_ERROR: i64 = -32700;
/// Unknown method.
pub const METHOD_NOT_FOUND: i64 = -32601;
/// Params do not match the method's schema.
pub const INVALID_PARAMS: i64 = -32602;
/// Script or remote call failed, or the execution timed out.
pub const EXECUTION_FAILURE: i64 = -32000;
/// The execution was cancelled.
pub const CANCELLED: i64 = -32001;

/// Id used when the request id could not be recovered.
pub const UNKNOWN_REQUEST_ID: i64 = 0;

/// Method name for script execution.
pub const METHOD_EXECUTE: &str = "execute";
/// Method name for cancellation.
pub const METHOD_CANCEL: &str = "cancel";

/// Inbound request envelope.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Request {
    /// Protocol version; accepted but not enforced.
    #[serde(default)]
    pub jsonrpc: Option<String>,
    /// Caller-assigned request id.
    pub id: i64,
    /// Method name.
    pub method: String,
    /// Method-specific payload.
    #[serde(default)]
    pub params: Option<Value>,
}

impl Request {
    /// Decode `params` into the method's params type.
    ///
    /// Absent or `null` params decode as the type's default.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Protocol` if params are present but do not match.
    pub fn params_as<T>(&self) -> Result<T>
    where
        T: DeserializeOwned + Default,
    {
        match &self.params {
            None | Some(Value::Null) => Ok(T::default()),
            Some(params) => serde_json::from_value(params.clone())
                .map_err(|err| AppError::Protocol(format!("{} params: {err}", self.method))),
        }
    }
}

/// JSON-RPC error object.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RpcError {
    /// Numeric error code.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
    /// Optional structured detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    /// Build an error without detail data.
    #[must_use]
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

impl From<&AppError> for RpcError {
    fn from(err: &AppError) -> Self {
        let code = match err {
            AppError::Cancelled => CANCELLED,
            AppError::Protocol(_) => INVALID_PARAMS,
            _ => EXECUTION_FAILURE,
        };
        Self::new(code, err.rpc_message())
    }
}

/// Success or failure payload of a response.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// Successful result value.
    Result(Value),
    /// Error object.
    Error(RpcError),
}

/// Outbound response envelope.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Response {
    /// Always [`JSONRPC_VERSION`].
    pub jsonrpc: String,
    /// Id of the request this answers.
    pub id: i64,
    /// Either `result` or `error`.
    #[serde(flatten)]
    pub outcome: Outcome,
}

impl Response {
    /// Build a success response.
    #[must_use]
    pub fn success(id: i64, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            id,
            outcome: Outcome::Result(result),
        }
    }

    /// Build an error response.
    #[must_use]
    pub fn failure(id: i64, error: RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            id,
            outcome: Outcome::Error(error),
        }
    }

    /// Build an error response from a runtime error.
    #[must_use]
    pub fn from_error(id: i64, err: &AppError) -> Self {
        Self::failure(id, RpcError::from(err))
    }

    /// Response for a line that could not be decoded.
    #[must_use]
    pub fn parse_error(detail: impl std::fmt::Display) -> Self {
        Self::failure(
            UNKNOWN_REQUEST_ID,
            RpcError::new(PARSE_ERROR, format!("Parse error: {detail}")),
        )
    }

    /// Response for an unknown method.
    #[must_use]
    pub fn method_not_found(id: i64, method: &str) -> Self {
        Self::failure(
            id,
            RpcError::new(METHOD_NOT_FOUND, format!("Method not found: {method}")),
        )
    }

    /// Error object, if this is a failure response.
    #[must_use]
    pub fn error(&self) -> Option<&RpcError> {
        match &self.outcome {
            Outcome::Error(err) => Some(err),
            Outcome::Result(_) => None,
        }
    }

    /// Result value, if this is a success response.
    #[must_use]
    pub fn result(&self) -> Option<&Value> {
        match &self.outcome {
            Outcome::Result(value) => Some(value),
            Outcome::Error(_) => None,
        }
    }
}

/// Params for the `execute` method.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteParams {
    /// Script source; a missing script runs as an empty one.
    #[serde(default)]
    pub script: String,
    /// Session namespace for `session.*` operations.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Time bound in seconds; non-positive values use the default.
    #[serde(default)]
    pub timeout: Option<f64>,
    /// Inventory service URL, sticky for later executions.
    #[serde(default)]
    pub server_url: Option<String>,
}

/// Params for the `cancel` method.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct CancelParams {
    /// Target execution id; omitted means the current execution.
    #[serde(default)]
    pub id: Option<i64>,
}
