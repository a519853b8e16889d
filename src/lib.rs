//! Streaming client for agent runs.
//!
//! Invariant: at most one live transport per run id — a new connect for
//! an id always closes the previous connection first.
//!
//! # Public API Overview
//! - Drive a run with [`RunStream`]: `start_streaming`, `stop_streaming`,
//!   [`RunStream::snapshot`], plus [`StreamCallbacks`] delivery.
//! - Choose a transport with [`TransportKind`] (push stream or polling
//!   fallback) via [`TransportManager`].
//! - Plug in a backend through the [`AgentBackend`] trait; the
//!   `agent_api` client implements it out of the box.
//! - Configure from the environment with [`EnvConfig`].

pub mod config;
pub mod error;
pub mod stream;

pub use crate::config::EnvConfig;
pub use crate::error::StreamError;

/// Frame folding into displayable state.
pub use crate::stream::assemble::{AssembleEffect, ContentAssembler, ToolCallState};

/// Backend seam the transport layer talks through.
pub use crate::stream::backend::AgentBackend;

/// Process-wide cache of run ids confirmed not to be running.
pub use crate::stream::registry::NonRunningCache;

/// Session state machine and its observable surface.
pub use crate::stream::state::{RunStream, StreamCallbacks, StreamSnapshot, StreamStatus};

/// Connection management over interchangeable transports.
pub use crate::stream::transport::{
    StreamDisposer, TransportClose, TransportHandlers, TransportKind, TransportManager,
    DEFAULT_CONNECT_TIMEOUT,
};
