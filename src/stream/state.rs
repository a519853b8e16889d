use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use agent_api::{has_completion_marker, Frame, FrameKind, MessageRecord, RunStatus};

use crate::error::StreamError;
use crate::stream::assemble::{AssembleEffect, ContentAssembler, ToolCallState};
use crate::stream::registry::lock_unpoisoned;
use crate::stream::transport::{
    StreamDisposer, TransportClose, TransportHandlers, TransportManager,
};

/// Lifecycle of one streaming session. Terminal states have no
/// outgoing transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamStatus {
    #[default]
    Idle,
    Connecting,
    Streaming,
    Completed,
    Stopped,
    Failed,
    Error,
    AgentNotRunning,
}

impl StreamStatus {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Stopped | Self::Failed | Self::Error | Self::AgentNotRunning
        )
    }

    fn from_run_status(status: RunStatus) -> Self {
        match status {
            RunStatus::Running => Self::Streaming,
            RunStatus::Completed => Self::Completed,
            RunStatus::Stopped => Self::Stopped,
            RunStatus::Failed => Self::Failed,
            RunStatus::Error => Self::Error,
        }
    }
}

/// Consumer-facing callbacks. Invoked serially, in delivery order, from
/// a dedicated dispatch task; never while internal locks are held.
pub struct StreamCallbacks {
    pub on_message: Box<dyn FnMut(MessageRecord) + Send>,
    pub on_status_change: Box<dyn FnMut(StreamStatus) + Send>,
    pub on_error: Box<dyn FnMut(StreamError) + Send>,
    pub on_close: Box<dyn FnMut(StreamStatus) + Send>,
}

impl StreamCallbacks {
    #[must_use]
    pub fn noop() -> Self {
        Self {
            on_message: Box::new(|_| {}),
            on_status_change: Box::new(|_| {}),
            on_error: Box::new(|_| {}),
            on_close: Box::new(|_| {}),
        }
    }
}

/// Read-only view of the current session.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSnapshot {
    pub status: StreamStatus,
    pub text_content: String,
    pub tool_call: Option<ToolCallState>,
    pub error: Option<StreamError>,
    pub agent_run_id: Option<String>,
}

enum StreamEvent {
    Message(MessageRecord),
    StatusChange(StreamStatus),
    Error(StreamError),
    Close(StreamStatus),
}

#[derive(Default)]
struct SessionState {
    status: StreamStatus,
    assembler: ContentAssembler,
    error: Option<StreamError>,
    run_id: Option<String>,
    disposer: Option<StreamDisposer>,
}

struct Inner {
    state: Mutex<SessionState>,
    events: mpsc::UnboundedSender<StreamEvent>,
    // Bumped on every start/stop so late transport continuations from a
    // superseded session cannot mutate the current one.
    epoch: AtomicU64,
}

impl Inner {
    fn emit(&self, event: StreamEvent) {
        let _ = self.events.send(event);
    }
}

/// Drives the transport for one run at a time and folds its frames into
/// an observable session. The UI-facing surface of the crate.
pub struct RunStream {
    manager: TransportManager,
    inner: Arc<Inner>,
}

impl RunStream {
    /// Build a stream bound to `manager`, delivering events through
    /// `callbacks`. Must be called from within a tokio runtime.
    pub fn new(manager: TransportManager, mut callbacks: StreamCallbacks) -> Self {
        let (events, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    StreamEvent::Message(message) => (callbacks.on_message)(message),
                    StreamEvent::StatusChange(status) => (callbacks.on_status_change)(status),
                    StreamEvent::Error(error) => (callbacks.on_error)(error),
                    StreamEvent::Close(status) => (callbacks.on_close)(status),
                }
            }
        });

        Self {
            manager,
            inner: Arc::new(Inner {
                state: Mutex::new(SessionState::default()),
                events,
                epoch: AtomicU64::new(0),
            }),
        }
    }

    pub fn manager(&self) -> &TransportManager {
        &self.manager
    }

    pub fn snapshot(&self) -> StreamSnapshot {
        let state = lock_unpoisoned(&self.inner.state);
        StreamSnapshot {
            status: state.status,
            text_content: state.assembler.text().to_string(),
            tool_call: state.assembler.active_tool().cloned(),
            error: state.error.clone(),
            agent_run_id: state.run_id.clone(),
        }
    }

    /// Begin streaming `run_id`, superseding any previous session.
    pub fn start_streaming(&self, run_id: &str) {
        let epoch = self.inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut state = lock_unpoisoned(&self.inner.state);
            if let Some(disposer) = state.disposer.take() {
                disposer.close();
            }
            state.assembler.reset();
            state.error = None;
            state.run_id = Some(run_id.to_string());
            state.status = StreamStatus::Connecting;
            self.inner.emit(StreamEvent::StatusChange(StreamStatus::Connecting));
        }

        let handlers = self.handlers(epoch);
        let disposer = self.manager.connect(run_id, handlers);

        let mut state = lock_unpoisoned(&self.inner.state);
        if self.inner.epoch.load(Ordering::SeqCst) == epoch && !state.status.is_terminal() {
            state.disposer = Some(disposer);
        } else {
            disposer.close();
        }
    }

    /// Stop the current session. Safe from any state; a no-op on status
    /// when already terminal, but the transport is always torn down.
    pub fn stop_streaming(&self) {
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);

        let (disposer, run_id, was_terminal) = {
            let mut state = lock_unpoisoned(&self.inner.state);
            let was_terminal = state.status.is_terminal();
            if !was_terminal {
                state.assembler.reset();
                state.status = StreamStatus::Stopped;
            }
            (state.disposer.take(), state.run_id.clone(), was_terminal)
        };

        if let Some(disposer) = disposer {
            disposer.close();
        }
        if !was_terminal {
            self.inner.emit(StreamEvent::StatusChange(StreamStatus::Stopped));
            self.inner.emit(StreamEvent::Close(StreamStatus::Stopped));
            if let Some(run_id) = run_id {
                // Best effort. The run may already be gone server-side.
                let backend = self.manager.backend();
                tokio::spawn(async move {
                    if let Err(error) = backend.stop_run(&run_id).await {
                        tracing::debug!(%run_id, %error, "stop request failed");
                    }
                });
            }
        }
    }

    fn handlers(&self, epoch: u64) -> TransportHandlers {
        let on_frame = {
            let inner = Arc::clone(&self.inner);
            Box::new(move |frame: Frame| handle_frame(&inner, epoch, frame))
        };
        let on_error = {
            let inner = Arc::clone(&self.inner);
            Box::new(move |error: StreamError| handle_transport_error(&inner, epoch, error))
        };
        let on_close = {
            let inner = Arc::clone(&self.inner);
            Box::new(move |close: TransportClose| handle_transport_close(&inner, epoch, close))
        };
        TransportHandlers {
            on_frame,
            on_error,
            on_close,
        }
    }
}

fn current(inner: &Inner, epoch: u64, state: &SessionState) -> bool {
    inner.epoch.load(Ordering::SeqCst) == epoch && !state.status.is_terminal()
}

fn handle_frame(inner: &Inner, epoch: u64, frame: Frame) {
    let mut state = lock_unpoisoned(&inner.state);
    if !current(inner, epoch, &state) {
        return;
    }

    if state.status == StreamStatus::Connecting {
        state.status = StreamStatus::Streaming;
        inner.emit(StreamEvent::StatusChange(StreamStatus::Streaming));
    }

    // Structured terminal signals take precedence over legacy text
    // markers, which take precedence over transport-level closes.
    if let FrameKind::Status(status) = &frame.kind {
        match status.status.as_deref() {
            Some("completed") => {
                enter_terminal(inner, &mut state, StreamStatus::Completed);
                return;
            }
            Some("error") => {
                let message = status
                    .message
                    .clone()
                    .unwrap_or_else(|| "agent reported an error".to_string());
                let error = StreamError::Agent { message };
                state.error = Some(error.clone());
                inner.emit(StreamEvent::Error(error));
                enter_terminal(inner, &mut state, StreamStatus::Error);
                return;
            }
            _ => {}
        }
    }
    if has_completion_marker(&frame.raw) {
        enter_terminal(inner, &mut state, StreamStatus::Completed);
        return;
    }

    if let Some(effect) = state.assembler.fold(&frame) {
        if let AssembleEffect::MessageComplete(message) = effect {
            inner.emit(StreamEvent::Message(message));
        }
    }
}

fn handle_transport_error(inner: &Inner, epoch: u64, error: StreamError) {
    let mut state = lock_unpoisoned(&inner.state);
    if !current(inner, epoch, &state) {
        return;
    }
    state.error = Some(error.clone());
    inner.emit(StreamEvent::Error(error));
}

fn handle_transport_close(inner: &Inner, epoch: u64, close: TransportClose) {
    let mut state = lock_unpoisoned(&inner.state);
    if !current(inner, epoch, &state) {
        return;
    }

    let final_status = match close {
        // A clean close resolves to completed unless an agent error was
        // already surfaced on this session.
        TransportClose::StreamEnded => match &state.error {
            Some(StreamError::Agent { .. }) => StreamStatus::Error,
            _ => StreamStatus::Completed,
        },
        TransportClose::RunEnded(status) => StreamStatus::from_run_status(status),
        TransportClose::AgentNotRunning => StreamStatus::AgentNotRunning,
        TransportClose::ConnectFailed => StreamStatus::Error,
    };
    enter_terminal(inner, &mut state, final_status);
}

fn enter_terminal(inner: &Inner, state: &mut SessionState, final_status: StreamStatus) {
    if state.status.is_terminal() {
        return;
    }
    if let Some(disposer) = state.disposer.take() {
        disposer.close();
    }
    state.assembler.reset();
    state.status = final_status;
    inner.emit(StreamEvent::StatusChange(final_status));
    inner.emit(StreamEvent::Close(final_status));
}
