use std::time::Duration;

use crate::url::DEFAULT_BASE_URL;

/// Transport configuration for agent backend requests.
#[derive(Debug, Clone)]
pub struct AgentApiConfig {
    /// Bearer token attached to every request.
    pub token: String,
    /// Base URL for backend endpoints.
    pub base_url: String,
    /// Optional `User-Agent` override.
    pub user_agent: Option<String>,
    /// Optional timeout applied to one-shot REST requests.
    ///
    /// Never applied to the live stream request; stream liveness is
    /// governed by the caller's connection timeout and status re-checks.
    pub timeout: Option<Duration>,
    /// Delay between reads of the growing body on the polling transport.
    pub poll_interval: Duration,
}

impl Default for AgentApiConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            user_agent: None,
            timeout: None,
            poll_interval: Duration::from_millis(500),
        }
    }
}

impl AgentApiConfig {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            ..Self::default()
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}
