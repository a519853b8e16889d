use thiserror::Error;

use agent_api::AgentApiError;

#[derive(Debug, Error)]
pub enum SessionError {
    /// The backend refused to start a run for billing reasons. The
    /// caller should surface a payment prompt, not a generic failure.
    #[error("payment required: {message}")]
    Billing { message: String },

    #[error("failed to persist user message: {0}")]
    Persistence(#[source] AgentApiError),

    #[error("failed to start agent run: {0}")]
    JobStart(#[source] AgentApiError),

    #[error(transparent)]
    Api(#[from] AgentApiError),
}

impl SessionError {
    /// Classify a failed job-start call.
    #[must_use]
    pub fn from_job_start(error: AgentApiError) -> Self {
        match error {
            AgentApiError::Billing { message } => Self::Billing { message },
            other => Self::JobStart(other),
        }
    }

    #[must_use]
    pub fn is_billing(&self) -> bool {
        matches!(self, Self::Billing { .. })
    }
}
