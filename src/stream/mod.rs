//! Streaming core: transport management, frame assembly, and the run
//! state machine.

pub mod assemble;
pub mod backend;
pub mod registry;
pub mod state;
pub mod transport;
