use serde_json::Value;

/// Literal substrings some backends emit as plain text instead of a
/// structured completion status. Treated equivalently to
/// `status: "completed"`.
pub const LEGACY_COMPLETION_MARKERS: &[&str] = &[
    "Stream ended with status: completed",
    "Run data not available for streaming",
];

/// True when a raw payload carries a legacy completion marker.
#[must_use]
pub fn has_completion_marker(text: &str) -> bool {
    LEGACY_COMPLETION_MARKERS
        .iter()
        .any(|marker| text.contains(marker))
}

/// One decoded unit from the event stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Original payload after the `data: ` prefix was stripped.
    pub raw: String,
    pub kind: FrameKind,
}

/// Classified frame payload. Ping frames never surface here; they are
/// consumed inside the decoder.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameKind {
    Status(StatusFrame),
    Assistant(ContentFrame),
    Tool(ContentFrame),
    User(ContentFrame),
    System(ContentFrame),
    /// Payload was not valid JSON; `Frame::raw` keeps the original text
    /// so callers can apply fallback extraction.
    Malformed,
}

/// Status-kind frame fields, folded from the outer object and the
/// decoded `content` layer.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusFrame {
    /// Run-level status signal (`completed`, `error`, ...), when present.
    pub status: Option<String>,
    /// Sub-status discriminator, e.g. tool lifecycle signals.
    pub status_type: Option<String>,
    pub message: Option<String>,
    pub tool_name: Option<String>,
    pub arguments: Value,
    pub tool_index: Option<u64>,
}

/// Content-bearing frame fields. `content` and `metadata` are kept as
/// delivered; either layer may still be a JSON-encoded string (see
/// [`decode_layer`]).
#[derive(Debug, Clone, PartialEq)]
pub struct ContentFrame {
    pub message_id: Option<String>,
    pub thread_id: Option<String>,
    pub content: Value,
    pub metadata: Value,
}

/// Decode one wrapping layer: a JSON-encoded string becomes its parsed
/// value, anything else passes through unchanged. Malformed inner
/// payloads degrade to the original value rather than failing.
#[must_use]
pub fn decode_layer(value: &Value) -> Value {
    match value {
        Value::String(text) => serde_json::from_str(text).unwrap_or_else(|_| value.clone()),
        other => other.clone(),
    }
}

/// Classify one raw payload into a frame.
///
/// Returns `None` for frames that must never be delivered upward: ping
/// keepalives and objects with an unrecognized `type`.
#[must_use]
pub fn classify(raw: &str) -> Option<Frame> {
    let value: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(_) => {
            return Some(Frame {
                raw: raw.to_string(),
                kind: FrameKind::Malformed,
            })
        }
    };

    let frame_type = value.get("type").and_then(Value::as_str).unwrap_or("");
    let kind = match frame_type {
        "ping" => return None,
        "status" => FrameKind::Status(status_frame(&value)),
        "assistant" => FrameKind::Assistant(content_frame(&value)),
        "tool" => FrameKind::Tool(content_frame(&value)),
        "user" => FrameKind::User(content_frame(&value)),
        "system" => FrameKind::System(content_frame(&value)),
        _ => return None,
    };

    Some(Frame {
        raw: raw.to_string(),
        kind,
    })
}

fn status_frame(value: &Value) -> StatusFrame {
    let content = decode_layer(value.get("content").unwrap_or(&Value::Null));
    let outer_or_content = |field: &str| -> Option<String> {
        value
            .get(field)
            .or_else(|| content.get(field))
            .and_then(Value::as_str)
            .map(ToString::to_string)
    };

    StatusFrame {
        status: outer_or_content("status"),
        status_type: outer_or_content("status_type"),
        message: outer_or_content("message"),
        tool_name: outer_or_content("tool_name")
            .or_else(|| outer_or_content("function_name")),
        arguments: content
            .get("arguments")
            .cloned()
            .unwrap_or(Value::Null),
        tool_index: value
            .get("tool_index")
            .or_else(|| content.get("tool_index"))
            .and_then(Value::as_u64),
    }
}

fn content_frame(value: &Value) -> ContentFrame {
    ContentFrame {
        message_id: value
            .get("message_id")
            .and_then(Value::as_str)
            .map(ToString::to_string),
        thread_id: value
            .get("thread_id")
            .and_then(Value::as_str)
            .map(ToString::to_string),
        content: value.get("content").cloned().unwrap_or(Value::Null),
        metadata: value.get("metadata").cloned().unwrap_or(Value::Null),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn ping_frames_are_consumed() {
        assert!(classify(r#"{"type":"ping"}"#).is_none());
    }

    #[test]
    fn unknown_types_are_dropped() {
        assert!(classify(r#"{"type":"telemetry","content":"x"}"#).is_none());
        assert!(classify(r#"{"content":"no type at all"}"#).is_none());
    }

    #[test]
    fn invalid_json_is_preserved_as_malformed() {
        let frame = classify("{not json").expect("malformed frames must surface");
        assert_eq!(frame.kind, FrameKind::Malformed);
        assert_eq!(frame.raw, "{not json");
    }

    #[test]
    fn assistant_frames_keep_both_layers_untouched() {
        let raw = r#"{"type":"assistant","message_id":"m1","content":"{\"content\":\"Hi\"}","metadata":"{\"stream_status\":\"chunk\"}"}"#;
        let frame = classify(raw).expect("assistant frame");
        let FrameKind::Assistant(content) = frame.kind else {
            panic!("expected assistant kind");
        };

        assert_eq!(content.message_id.as_deref(), Some("m1"));
        // Layers stay encoded until the assembler decodes them.
        assert!(content.content.is_string());
        assert_eq!(
            decode_layer(&content.metadata),
            json!({"stream_status": "chunk"})
        );
    }

    #[test]
    fn status_frame_fields_fold_outer_and_content_layers() {
        let raw = r#"{"type":"status","status":"error","content":"{\"message\":\"boom\"}"}"#;
        let frame = classify(raw).expect("status frame");
        let FrameKind::Status(status) = frame.kind else {
            panic!("expected status kind");
        };

        assert_eq!(status.status.as_deref(), Some("error"));
        assert_eq!(status.message.as_deref(), Some("boom"));
    }

    #[test]
    fn tool_lifecycle_status_carries_slot_fields() {
        let raw = r#"{"type":"status","content":{"status_type":"tool_started","tool_name":"web_search","arguments":{"query":"rust"},"tool_index":2}}"#;
        let frame = classify(raw).expect("status frame");
        let FrameKind::Status(status) = frame.kind else {
            panic!("expected status kind");
        };

        assert_eq!(status.status_type.as_deref(), Some("tool_started"));
        assert_eq!(status.tool_name.as_deref(), Some("web_search"));
        assert_eq!(status.arguments, json!({"query": "rust"}));
        assert_eq!(status.tool_index, Some(2));
    }

    #[test]
    fn decode_layer_tolerates_already_decoded_and_malformed_inner() {
        assert_eq!(decode_layer(&json!({"a": 1})), json!({"a": 1}));
        assert_eq!(decode_layer(&json!("{\"a\":1}")), json!({"a": 1}));
        // Non-JSON strings pass through as the original string.
        assert_eq!(decode_layer(&json!("plain text")), json!("plain text"));
    }

    #[test]
    fn completion_markers_match_legacy_literals() {
        assert!(has_completion_marker(
            "xx Stream ended with status: completed"
        ));
        assert!(has_completion_marker("Run data not available for streaming"));
        assert!(!has_completion_marker("still running"));
    }
}
