#![allow(unused_imports)]

use agent_stream::{
    AgentBackend, AssembleEffect, ContentAssembler, EnvConfig, NonRunningCache, RunStream,
    StreamCallbacks, StreamDisposer, StreamError, StreamSnapshot, StreamStatus, ToolCallState,
    TransportClose, TransportHandlers, TransportKind, TransportManager, DEFAULT_CONNECT_TIMEOUT,
};

use agent_api::{
    classify, decode_layer, has_completion_marker, normalize_base_url, AgentApiClient, AgentApiConfig,
    AgentApiError, ByteStream, ContentFrame, Frame, FrameKind, MessageKind, MessageRecord,
    RunStatus, SseFrameParser, StatusFrame,
};

#[test]
fn public_api_exports_compile() {}
