//! Environment configuration.

use std::env;
use std::time::Duration;

use crate::stream::transport::{TransportKind, DEFAULT_CONNECT_TIMEOUT};

#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub base_url: Option<String>,
    pub token: Option<String>,
    pub transport: TransportKind,
    pub connect_timeout: Duration,
}

impl EnvConfig {
    pub fn from_env() -> Self {
        Self {
            base_url: env_string_opt("AGENT_STREAM_BASE_URL"),
            token: env_string_opt("AGENT_STREAM_TOKEN"),
            transport: if env_flag("AGENT_STREAM_POLL_TRANSPORT") {
                TransportKind::LongPoll
            } else {
                TransportKind::Push
            },
            connect_timeout: env_string_opt("AGENT_STREAM_CONNECT_TIMEOUT_SECS")
                .and_then(|value| value.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_CONNECT_TIMEOUT),
        }
    }
}

fn env_flag(key: &str) -> bool {
    env::var(key).map(|value| value == "1").unwrap_or(false)
}

fn env_string_opt(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        if value.trim().is_empty() {
            None
        } else {
            Some(value)
        }
    })
}
