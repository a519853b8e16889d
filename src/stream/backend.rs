use async_trait::async_trait;

use agent_api::{AgentApiClient, AgentApiError, ByteStream, RunStatus};

use crate::stream::transport::TransportKind;

/// Backend operations the streaming core needs from the agent service.
///
/// A seam rather than a concrete client so tests can substitute scripted
/// fakes for the transport without any network.
#[async_trait]
pub trait AgentBackend: Send + Sync + 'static {
    /// Current lifecycle status of a run; `RunNotFound` is permanent.
    async fn run_status(&self, run_id: &str) -> Result<RunStatus, AgentApiError>;

    /// Open the raw byte stream for a run on the requested transport.
    async fn open_stream(
        &self,
        run_id: &str,
        transport: TransportKind,
    ) -> Result<ByteStream, AgentApiError>;

    /// Ask the backend to stop a run.
    async fn stop_run(&self, run_id: &str) -> Result<(), AgentApiError>;
}

#[async_trait]
impl AgentBackend for AgentApiClient {
    async fn run_status(&self, run_id: &str) -> Result<RunStatus, AgentApiError> {
        AgentApiClient::run_status(self, run_id).await
    }

    async fn open_stream(
        &self,
        run_id: &str,
        transport: TransportKind,
    ) -> Result<ByteStream, AgentApiError> {
        match transport {
            TransportKind::Push => self.open_run_stream(run_id).await,
            TransportKind::LongPoll => self.open_poll_stream(run_id).await,
        }
    }

    async fn stop_run(&self, run_id: &str) -> Result<(), AgentApiError> {
        AgentApiClient::stop_run(self, run_id).await
    }
}
