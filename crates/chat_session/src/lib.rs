//! Conversation orchestration over the streaming core: optimistic
//! sends, id-keyed upserts from the live stream, and durable-list
//! reconciliation once a run ends.

mod error;
mod orchestrator;

pub use error::SessionError;
pub use orchestrator::{ChatSession, SessionBackend, OPTIMISTIC_ID_PREFIX};
