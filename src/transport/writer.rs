//! Response writer task.
//!
//! A single task owns the output stream. Responses reach it through a
//! [`ResponseSink`]; each one is serialised to a compact single-line JSON
//! string, terminated by `\n`, written and flushed before the next response
//! is taken. Output order is therefore exactly the order of `send` calls,
//! and bytes from two responses never interleave.

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::protocol::Response;
use crate::{AppError, Result};

/// Written when a response cannot be serialised.
const SERIALIZATION_FALLBACK: &str =
    r#"{"jsonrpc":"2.0","id":0,"error":{"code":-32000,"message":"response serialization failed"}}"#;

/// Cloneable handle for enqueuing responses on the writer task.
///
/// `send` is synchronous so it can be called while holding a lock; this is
/// how the dispatcher pins a cancel response ahead of the execution it
/// cancels.
#[derive(Debug, Clone)]
pub struct ResponseSink {
    tx: mpsc::UnboundedSender<Response>,
}

impl ResponseSink {
    /// Create a sink and the receiver the writer task drains.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Response>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Enqueue `response` behind everything sent before it.
    ///
    /// A response sent after the writer has stopped is dropped and logged.
    pub fn send(&self, response: Response) {
        let id = response.id;
        if self.tx.send(response).is_err() {
            debug!(request_id = id, "writer: output closed, dropping response");
        }
    }
}

/// Spawn the writer task over `output`.
///
/// The task exits once every [`ResponseSink`] clone has been dropped and the
/// queue is empty, or on the first write failure.
pub fn spawn_writer<W>(output: W) -> (ResponseSink, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (sink, rx) = ResponseSink::channel();
    let handle = tokio::spawn(run_writer(output, rx));
    (sink, handle)
}

/// Writer loop; see [`spawn_writer`].
///
/// # Errors
///
/// Returns `AppError::Io` if a write or flush on `output` fails.
pub async fn run_writer<W>(mut output: W, mut rx: mpsc::UnboundedReceiver<Response>) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    while let Some(response) = rx.recv().await {
        let mut line = serde_json::to_string(&response).unwrap_or_else(|err| {
            warn!(request_id = response.id, %err, "writer: failed to serialise response");
            SERIALIZATION_FALLBACK.to_owned()
        });
        line.push('\n');

        if let Err(err) = write_line(&mut output, line.as_bytes()).await {
            warn!(request_id = response.id, error = %err, "writer: write to output failed");
            return Err(err);
        }
    }

    debug!("writer: all sinks dropped, stopping");
    Ok(())
}

async fn write_line<W>(output: &mut W, bytes: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    output
        .write_all(bytes)
        .await
        .map_err(|err| AppError::Io(format!("write failed: {err}")))?;
    output
        .flush()
        .await
        .map_err(|err| AppError::Io(format!("flush failed: {err}")))
}
