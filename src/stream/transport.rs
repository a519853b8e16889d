use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;

use agent_api::{AgentApiError, Frame, RunStatus, SseFrameParser};

use crate::error::StreamError;
use crate::stream::backend::AgentBackend;
use crate::stream::registry::{ActiveConnection, ConnectionRegistry, NonRunningCache};

/// Fixed window for the connection-establishment timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const STREAM_RETRY_DELAY: Duration = Duration::from_millis(500);
/// Consecutive reopen attempts tolerated while the run still reports
/// itself as running.
const MAX_STREAM_REOPENS: u32 = 5;

/// Transport strategy for consuming run output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportKind {
    /// Long-lived unidirectional connection the server pushes lines on.
    #[default]
    Push,
    /// Polling fallback that re-reads the growing response body and
    /// forwards only the unseen byte delta.
    LongPoll,
}

/// Why the transport closed. Terminal from the transport's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportClose {
    /// Server ended the stream cleanly.
    StreamEnded,
    /// A status re-check confirmed the run reached this terminal state.
    RunEnded(RunStatus),
    /// Preflight or re-check showed the run is gone or never active.
    AgentNotRunning,
    /// The connection could not be (re-)established.
    ConnectFailed,
}

/// Caller-supplied delivery callbacks for one connection.
pub struct TransportHandlers {
    pub on_frame: Box<dyn FnMut(Frame) + Send>,
    pub on_error: Box<dyn FnMut(StreamError) + Send>,
    pub on_close: Box<dyn FnMut(TransportClose) + Send>,
}

impl TransportHandlers {
    #[must_use]
    pub fn noop() -> Self {
        Self {
            on_frame: Box::new(|_| {}),
            on_error: Box::new(|_| {}),
            on_close: Box::new(|_| {}),
        }
    }
}

/// Idempotent teardown handle for one connection attempt.
///
/// Closing guarantees the underlying transport is cancelled and
/// untracked on every exit path, including failures during setup.
pub struct StreamDisposer {
    run_id: String,
    cancel: Option<Arc<AtomicBool>>,
    registry: Option<ConnectionRegistry>,
    closed: AtomicBool,
}

impl StreamDisposer {
    fn live(run_id: &str, cancel: Arc<AtomicBool>, registry: ConnectionRegistry) -> Self {
        Self {
            run_id: run_id.to_string(),
            cancel: Some(cancel),
            registry: Some(registry),
            closed: AtomicBool::new(false),
        }
    }

    fn already_closed(run_id: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            cancel: None,
            registry: None,
            closed: AtomicBool::new(true),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let (Some(cancel), Some(registry)) = (&self.cancel, &self.registry) {
            cancel.store(true, Ordering::SeqCst);
            registry.remove_matching(&self.run_id, cancel);
        }
    }
}

/// Owns at most one live connection per run id, across both transport
/// strategies, and the process-wide non-running cache.
#[derive(Clone)]
pub struct TransportManager {
    backend: Arc<dyn AgentBackend>,
    kind: TransportKind,
    connect_timeout: Duration,
    non_running: NonRunningCache,
    registry: ConnectionRegistry,
}

impl TransportManager {
    pub fn new(backend: Arc<dyn AgentBackend>, kind: TransportKind) -> Self {
        Self {
            backend,
            kind,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            non_running: NonRunningCache::new(),
            registry: ConnectionRegistry::default(),
        }
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn backend(&self) -> Arc<dyn AgentBackend> {
        Arc::clone(&self.backend)
    }

    pub fn non_running(&self) -> &NonRunningCache {
        &self.non_running
    }

    pub fn is_connected(&self, run_id: &str) -> bool {
        self.registry.is_live(run_id)
    }

    pub fn live_connections(&self) -> usize {
        self.registry.live_count()
    }

    /// Open a connection for `run_id`, replacing any live one first.
    ///
    /// Ids already known to be non-running report an error and close
    /// immediately without opening a transport. Must be called from
    /// within a tokio runtime.
    pub fn connect(&self, run_id: &str, mut handlers: TransportHandlers) -> StreamDisposer {
        if self.non_running.contains(run_id) {
            tracing::debug!(run_id, "refusing connect for non-running run");
            (handlers.on_error)(StreamError::RunNotRunning {
                run_id: run_id.to_string(),
            });
            (handlers.on_close)(TransportClose::AgentNotRunning);
            return StreamDisposer::already_closed(run_id);
        }

        // At most one live transport per run id: the previous connection
        // goes down before the new one comes up.
        self.registry.close(run_id);

        let cancel = Arc::new(AtomicBool::new(false));
        let context = ConnectionContext {
            backend: Arc::clone(&self.backend),
            kind: self.kind,
            connect_timeout: self.connect_timeout,
            run_id: run_id.to_string(),
            cancel: Arc::clone(&cancel),
            non_running: self.non_running.clone(),
            registry: self.registry.clone(),
            handlers,
        };
        let task = tokio::spawn(run_connection(context));
        self.registry.insert(
            run_id.to_string(),
            ActiveConnection {
                cancel: Arc::clone(&cancel),
                task,
            },
        );

        StreamDisposer::live(run_id, cancel, self.registry.clone())
    }
}

struct ConnectionContext {
    backend: Arc<dyn AgentBackend>,
    kind: TransportKind,
    connect_timeout: Duration,
    run_id: String,
    cancel: Arc<AtomicBool>,
    non_running: NonRunningCache,
    registry: ConnectionRegistry,
    handlers: TransportHandlers,
}

enum Recheck {
    Ended(TransportClose),
    Retry,
}

impl ConnectionContext {
    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    fn error(&mut self, error: StreamError) {
        if !self.cancelled() {
            (self.handlers.on_error)(error);
        }
    }

    fn close(&mut self, close: TransportClose) {
        if !self.cancelled() {
            (self.handlers.on_close)(close);
        }
    }

    fn finish_not_running(&mut self) {
        self.non_running.mark(&self.run_id);
        self.error(StreamError::RunNotRunning {
            run_id: self.run_id.clone(),
        });
        self.close(TransportClose::AgentNotRunning);
    }

    /// Transport-level failure: decide between confirmed termination and
    /// a retryable hiccup by re-checking the run status.
    async fn recheck(&mut self, cause: &AgentApiError) -> Recheck {
        match self.backend.run_status(&self.run_id).await {
            Ok(status) if !status.is_active() => {
                self.non_running.mark(&self.run_id);
                Recheck::Ended(TransportClose::RunEnded(status))
            }
            Err(AgentApiError::RunNotFound { .. }) => {
                self.non_running.mark(&self.run_id);
                Recheck::Ended(TransportClose::AgentNotRunning)
            }
            Ok(_) | Err(_) => {
                self.error(StreamError::Transport {
                    run_id: self.run_id.clone(),
                    message: cause.to_string(),
                });
                Recheck::Retry
            }
        }
    }
}

async fn run_connection(mut ctx: ConnectionContext) {
    let run_id = ctx.run_id.clone();

    // Preflight: never open a stream for a run that already ended.
    match ctx.backend.run_status(&run_id).await {
        Ok(status) if status.is_active() => {}
        Ok(_) | Err(AgentApiError::RunNotFound { .. }) => {
            ctx.finish_not_running();
            ctx.registry.remove_matching(&run_id, &ctx.cancel);
            return;
        }
        Err(error) => {
            if error.is_auth() {
                ctx.error(StreamError::Unauthorized {
                    run_id: run_id.clone(),
                    message: error.to_string(),
                });
            } else {
                ctx.error(StreamError::Transport {
                    run_id: run_id.clone(),
                    message: error.to_string(),
                });
            }
            ctx.close(TransportClose::ConnectFailed);
            ctx.registry.remove_matching(&run_id, &ctx.cancel);
            return;
        }
    }

    let mut reopens = 0u32;
    'connect: loop {
        if ctx.cancelled() {
            break;
        }

        let opened =
            tokio::time::timeout(ctx.connect_timeout, ctx.backend.open_stream(&run_id, ctx.kind))
                .await;
        let mut stream = match opened {
            Err(_) => {
                tracing::warn!(run_id, "stream connect timed out");
                ctx.error(StreamError::ConnectTimeout {
                    run_id: run_id.clone(),
                });
                ctx.close(TransportClose::ConnectFailed);
                break;
            }
            Ok(Err(error)) if error.is_auth() => {
                ctx.error(StreamError::Unauthorized {
                    run_id: run_id.clone(),
                    message: error.to_string(),
                });
                ctx.close(TransportClose::ConnectFailed);
                break;
            }
            Ok(Err(error)) => match ctx.recheck(&error).await {
                Recheck::Ended(close) => {
                    ctx.close(close);
                    break;
                }
                Recheck::Retry => {
                    reopens += 1;
                    if reopens > MAX_STREAM_REOPENS {
                        ctx.close(TransportClose::ConnectFailed);
                        break;
                    }
                    tokio::time::sleep(STREAM_RETRY_DELAY).await;
                    continue;
                }
            },
            Ok(Ok(stream)) => stream,
        };

        let mut parser = SseFrameParser::default();
        while let Some(chunk) = stream.next().await {
            if ctx.cancelled() {
                break 'connect;
            }
            match chunk {
                Ok(bytes) => {
                    for frame in parser.feed(&bytes) {
                        if ctx.cancelled() {
                            break 'connect;
                        }
                        (ctx.handlers.on_frame)(frame);
                    }
                }
                Err(error) => match ctx.recheck(&error).await {
                    Recheck::Ended(close) => {
                        ctx.close(close);
                        break 'connect;
                    }
                    Recheck::Retry => {
                        reopens += 1;
                        if reopens > MAX_STREAM_REOPENS {
                            ctx.close(TransportClose::ConnectFailed);
                            break 'connect;
                        }
                        tokio::time::sleep(STREAM_RETRY_DELAY).await;
                        continue 'connect;
                    }
                },
            }
        }

        if !ctx.cancelled() {
            // Server closed the stream cleanly.
            ctx.close(TransportClose::StreamEnded);
        }
        break;
    }

    ctx.registry.remove_matching(&run_id, &ctx.cancel);
}
