//! Request dispatcher: the stdio read loop.
//!
//! Reads framed lines, decodes each into a JSON-RPC [`Request`], and routes
//! it:
//!
//! | Method     | Path                                                     |
//! |------------|----------------------------------------------------------|
//! | `cancel`   | handled inline before the next line is read              |
//! | `execute`  | admitted into the [`ExecutionQueue`]; never blocks reads |
//! | *(other)*  | answered with `-32601`                                   |
//!
//! Every line that reaches the dispatcher gets exactly one response. Execute
//! responses leave in request order because each job awaits the previous
//! one. A cancel response is enqueued under the controller's state lock, so
//! it is always written before the response of the execution it cancels.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::RuntimeConfig;
use crate::execution::{ExecutionController, ExecutionQueue, ExecutionRequest};
use crate::protocol::{
    CancelParams, ExecuteParams, Request, Response, METHOD_CANCEL, METHOD_EXECUTE,
};
use crate::remote::RemoteCaller;
use crate::script::ScriptEngine;
use crate::transport::{spawn_writer, Frame, LineCodec, ResponseSink};
use crate::{AppError, Result};

/// Routes requests from one input stream to the execution controller.
#[derive(Debug)]
pub struct Dispatcher {
    controller: Arc<ExecutionController>,
    queue: ExecutionQueue,
    server_url: String,
    default_timeout: Option<Duration>,
    max_line_bytes: usize,
}

impl Dispatcher {
    /// Build a dispatcher from configuration and its two collaborators.
    #[must_use]
    pub fn new(
        config: &RuntimeConfig,
        engine: Arc<dyn ScriptEngine>,
        remote: Arc<dyn RemoteCaller>,
    ) -> Self {
        Self::with_controller(config, Arc::new(ExecutionController::new(engine, remote)))
    }

    /// Build a dispatcher around an existing controller.
    #[must_use]
    pub fn with_controller(config: &RuntimeConfig, controller: Arc<ExecutionController>) -> Self {
        Self {
            controller,
            queue: ExecutionQueue::new(),
            server_url: config.server_url.clone(),
            default_timeout: config.default_timeout(),
            max_line_bytes: config.max_line_bytes,
        }
    }

    /// Controller executions run on.
    #[must_use]
    pub fn controller(&self) -> &Arc<ExecutionController> {
        &self.controller
    }

    /// Server URL the next execution will use unless it supplies its own.
    #[must_use]
    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    /// Serve requests from `input`, writing responses to `output`.
    ///
    /// Returns once `input` is exhausted (or fails) or `shutdown` fires, every
    /// admitted execution has answered, and the writer has flushed every
    /// response. On shutdown, admitted and running executions are cancelled
    /// first and answer with `-32001`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if writing to `output` failed.
    pub async fn serve<R, W>(
        &mut self,
        input: R,
        output: W,
        shutdown: CancellationToken,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (sink, writer) = spawn_writer(output);
        let mut frames = FramedRead::new(input, LineCodec::with_max_line_bytes(self.max_line_bytes));

        loop {
            tokio::select! {
                biased;

                () = shutdown.cancelled() => {
                    let cancelled = self.controller.cancel_all();
                    info!(cancelled, "dispatcher: shutdown requested, stopping reads");
                    break;
                }

                frame = frames.next() => match frame {
                    None => {
                        debug!("dispatcher: input closed");
                        break;
                    }
                    Some(Err(err)) => {
                        warn!(error = %err, "dispatcher: input read failed, treating as end of stream");
                        break;
                    }
                    Some(Ok(Frame::Line(line))) => self.handle_line(&line, &sink),
                    Some(Ok(Frame::Oversized)) => {
                        warn!(limit = self.max_line_bytes, "dispatcher: oversized line discarded");
                        sink.send(Response::parse_error(format!(
                            "line exceeds {} bytes",
                            self.max_line_bytes
                        )));
                    }
                    Some(Ok(Frame::Malformed(reason))) => {
                        warn!(%reason, "dispatcher: undecodable line");
                        sink.send(Response::parse_error(reason));
                    }
                },
            }
        }

        self.queue.drain().await;
        drop(sink);

        match writer.await {
            Ok(result) => result,
            Err(err) => Err(AppError::Io(format!("writer task failed: {err}"))),
        }
    }

    /// Decode and route one request line.
    pub fn handle_line(&mut self, line: &str, sink: &ResponseSink) {
        let request: Request = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(err) => {
                warn!(error = %err, "dispatcher: unparseable request");
                sink.send(Response::parse_error(err));
                return;
            }
        };

        debug!(request_id = request.id, method = %request.method, "dispatcher: request");

        match request.method.as_str() {
            METHOD_CANCEL => self.handle_cancel(&request, sink),
            METHOD_EXECUTE => self.handle_execute(&request, sink),
            other => {
                debug!(request_id = request.id, method = other, "dispatcher: unknown method");
                sink.send(Response::method_not_found(request.id, other));
            }
        }
    }

    fn handle_cancel(&self, request: &Request, sink: &ResponseSink) {
        let id = request.id;
        let params = match request.params_as::<CancelParams>() {
            Ok(params) => params,
            Err(err) => {
                sink.send(Response::from_error(id, &err));
                return;
            }
        };

        let outcome = self.controller.cancel(params.id, |outcome| {
            sink.send(Response::success(id, outcome.to_value()));
        });
        debug!(request_id = id, target = ?params.id, ?outcome, "dispatcher: cancel handled");
    }

    fn handle_execute(&mut self, request: &Request, sink: &ResponseSink) {
        let id = request.id;
        let sink = sink.clone();

        let params = match request.params_as::<ExecuteParams>() {
            Ok(params) => params,
            Err(err) => {
                // Queued so the error keeps its place among execute responses.
                self.queue.admit(async move {
                    sink.send(Response::from_error(id, &err));
                });
                return;
            }
        };

        if let Some(url) = params.server_url.as_deref().map(str::trim) {
            if !url.is_empty() && url != self.server_url {
                info!(server_url = url, "dispatcher: server url updated");
                self.server_url = url.to_owned();
            }
        }

        let execution = ExecutionRequest {
            script: params.script,
            session_id: params.session_id,
            timeout: resolve_timeout(params.timeout, self.default_timeout),
            server_url: self.server_url.clone(),
        };

        let admission = self.controller.admit(id);
        let controller = Arc::clone(&self.controller);
        let span = info_span!("execution", execution_id = id);

        self.queue.admit(
            async move {
                let response = match controller.run(admission, execution).await {
                    Ok(outcome) => {
                        info!("execution completed");
                        Response::success(id, outcome.into_result())
                    }
                    Err(err) => {
                        info!(error = %err, "execution failed");
                        Response::from_error(id, &err)
                    }
                };
                sink.send(response);
            }
            .instrument(span),
        );
    }
}

/// A positive `requested` timeout (in seconds) wins over `default`.
///
/// A positive request too large for a `Duration` is unbounded, never
/// shortened to the default.
#[must_use]
pub fn resolve_timeout(requested: Option<f64>, default: Option<Duration>) -> Option<Duration> {
    match requested.filter(|seconds| *seconds > 0.0) {
        Some(seconds) => Duration::try_from_secs_f64(seconds).ok(),
        None => default,
    }
}
