//! Remote calls to the inventory service.
//!
//! Scripts reach the service through a [`RemoteHandle`], which binds a
//! [`RemoteCaller`] to the execution's server URL and cancellation token.
//! [`HttpRemoteClient`] is the production caller: one `POST` per call to
//! `{server_url}/api/script/call`, no retries.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{AppError, Result};

/// Path of the script call endpoint, relative to the server URL.
pub const CALL_PATH: &str = "/api/script/call";

/// Boxed future returned by [`RemoteCaller::call`].
pub type RemoteFuture<'a> = Pin<Box<dyn Future<Output = Result<Value>> + Send + 'a>>;

/// Capability to invoke a named method on the inventory service.
pub trait RemoteCaller: Send + Sync {
    /// Call `method` with `params` on the service at `server_url`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Remote`] when the service reports a failure or
    /// cannot be reached, and [`AppError::Cancelled`] when `cancel` fires
    /// before the round trip completes.
    fn call<'a>(
        &'a self,
        server_url: &'a str,
        method: &'a str,
        params: Option<Value>,
        cancel: &'a CancellationToken,
    ) -> RemoteFuture<'a>;
}

/// Request body of the call endpoint.
#[derive(Debug, Serialize)]
struct CallBody<'a> {
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<&'a Value>,
}

/// HTTP implementation of [`RemoteCaller`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpRemoteClient {
    http: reqwest::Client,
}

impl HttpRemoteClient {
    /// Build a client, optionally bounding each request.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the HTTP client cannot be constructed.
    pub fn new(request_timeout: Option<Duration>) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = request_timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder
            .build()
            .map_err(|err| AppError::Config(format!("failed to build http client: {err}")))?;
        Ok(Self { http })
    }

    async fn round_trip(
        &self,
        server_url: &str,
        method: &str,
        params: Option<&Value>,
    ) -> Result<Value> {
        let url = format!("{}{CALL_PATH}", server_url.trim_end_matches('/'));
        let response = self
            .http
            .post(&url)
            .json(&CallBody { method, params })
            .send()
            .await
            .map_err(|err| AppError::Remote(format!("API call failed: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::Remote(format!(
                "API call failed: {} {text}",
                status.as_u16()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|err| AppError::Remote(format!("API call returned invalid JSON: {err}")))?;

        interpret_body(body)
    }
}

impl RemoteCaller for HttpRemoteClient {
    fn call<'a>(
        &'a self,
        server_url: &'a str,
        method: &'a str,
        params: Option<Value>,
        cancel: &'a CancellationToken,
    ) -> RemoteFuture<'a> {
        Box::pin(async move {
            debug!(method, server_url, "remote call");
            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    debug!(method, "remote call cancelled");
                    Err(AppError::Cancelled)
                }

                result = self.round_trip(server_url, method, params.as_ref()) => result,
            }
        })
    }
}

/// Extract the `result` of a 2xx response body, failing on a non-empty
/// `error` field.
///
/// # Errors
///
/// Returns `AppError::Remote` carrying the reported error text.
pub fn interpret_body(body: Value) -> Result<Value> {
    let Value::Object(mut fields) = body else {
        return Ok(Value::Null);
    };

    match fields.remove("error") {
        None | Some(Value::Null) => {}
        Some(Value::String(msg)) if msg.is_empty() => {}
        Some(Value::String(msg)) => return Err(AppError::Remote(msg)),
        Some(Value::Bool(false)) => {}
        Some(Value::Object(err)) if err.is_empty() => {}
        Some(other) => return Err(AppError::Remote(error_text(&other))),
    }

    Ok(fields.remove("result").unwrap_or(Value::Null))
}

/// Prefer an error object's `message`; fall back to its JSON text.
fn error_text(error: &Value) -> String {
    match error.get("message") {
        Some(Value::String(msg)) => msg.clone(),
        _ => error.to_string(),
    }
}

/// A remote caller bound to one execution's server URL and token.
#[derive(Clone)]
pub struct RemoteHandle {
    caller: Arc<dyn RemoteCaller>,
    server_url: String,
    cancel: CancellationToken,
}

impl RemoteHandle {
    /// Bind `caller` to a server URL and cancellation token.
    #[must_use]
    pub fn new(
        caller: Arc<dyn RemoteCaller>,
        server_url: String,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            caller,
            server_url,
            cancel,
        }
    }

    /// Server URL calls go to.
    #[must_use]
    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    /// Call `method` on the service.
    ///
    /// # Errors
    ///
    /// See [`RemoteCaller::call`].
    pub async fn call(&self, method: &str, params: Option<Value>) -> Result<Value> {
        if self.cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }
        self.caller
            .call(&self.server_url, method, params, &self.cancel)
            .await
    }
}

impl std::fmt::Debug for RemoteHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteHandle")
            .field("server_url", &self.server_url)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}
