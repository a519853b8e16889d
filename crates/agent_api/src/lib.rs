//! Transport-only client primitives for the agent-run backend.
//!
//! This crate owns request building, endpoint contracts, and event-frame
//! decoding for the agent backend only. It intentionally contains no
//! run orchestration, no connection bookkeeping, and no UI coupling;
//! those live in the `agent_stream` core.
//!
//! Frame decoding normalizes the loosely-typed wire payloads into the
//! [`FrameKind`] tagged union so downstream logic pattern-matches
//! exhaustively instead of probing fields defensively.

pub mod client;
pub mod config;
pub mod error;
pub mod frames;
pub mod records;
pub mod retry;
pub mod sse;
pub mod url;

pub use client::{AgentApiClient, ByteStream};
pub use config::AgentApiConfig;
pub use error::AgentApiError;
pub use frames::{
    classify, decode_layer, has_completion_marker, ContentFrame, Frame, FrameKind, StatusFrame,
};
pub use records::{MessageKind, MessageRecord, RunStatus};
pub use sse::SseFrameParser;
pub use url::normalize_base_url;
