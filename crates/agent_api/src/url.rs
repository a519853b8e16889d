/// Default base URL for agent backend requests.
pub const DEFAULT_BASE_URL: &str = "https://api.agentstream.dev/api";

/// Normalize a base URL for endpoint building.
///
/// Empty input falls back to the default base; trailing slashes are
/// stripped so endpoint joins stay canonical.
pub fn normalize_base_url(input: &str) -> String {
    let base = if input.trim().is_empty() {
        DEFAULT_BASE_URL
    } else {
        input.trim()
    };

    base.trim_end_matches('/').to_string()
}

pub fn threads_url(base: &str) -> String {
    format!("{}/threads", normalize_base_url(base))
}

pub fn thread_messages_url(base: &str, thread_id: &str) -> String {
    format!("{}/threads/{thread_id}/messages", normalize_base_url(base))
}

pub fn agent_start_url(base: &str, thread_id: &str) -> String {
    format!(
        "{}/threads/{thread_id}/agent/start",
        normalize_base_url(base)
    )
}

pub fn run_stop_url(base: &str, run_id: &str) -> String {
    format!("{}/agent-runs/{run_id}/stop", normalize_base_url(base))
}

pub fn run_status_url(base: &str, run_id: &str) -> String {
    format!("{}/agent-runs/{run_id}/status", normalize_base_url(base))
}

pub fn run_stream_url(base: &str, run_id: &str) -> String {
    format!("{}/agent-runs/{run_id}/stream", normalize_base_url(base))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_base_falls_back_to_default() {
        assert_eq!(normalize_base_url(""), DEFAULT_BASE_URL);
        assert_eq!(normalize_base_url("   "), DEFAULT_BASE_URL);
    }

    #[test]
    fn trailing_slashes_are_stripped() {
        assert_eq!(
            normalize_base_url("https://backend.example/api///"),
            "https://backend.example/api"
        );
    }

    #[test]
    fn endpoint_builders_join_ids_onto_normalized_base() {
        let base = "https://backend.example/api/";
        assert_eq!(
            thread_messages_url(base, "t1"),
            "https://backend.example/api/threads/t1/messages"
        );
        assert_eq!(
            agent_start_url(base, "t1"),
            "https://backend.example/api/threads/t1/agent/start"
        );
        assert_eq!(
            run_status_url(base, "r1"),
            "https://backend.example/api/agent-runs/r1/status"
        );
        assert_eq!(
            run_stream_url(base, "r1"),
            "https://backend.example/api/agent-runs/r1/stream"
        );
        assert_eq!(
            run_stop_url(base, "r1"),
            "https://backend.example/api/agent-runs/r1/stop"
        );
    }
}
