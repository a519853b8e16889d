use serde_json::Value;

use agent_api::{
    decode_layer, ContentFrame, Frame, FrameKind, MessageKind, MessageRecord, StatusFrame,
};

/// In-flight tool invocation surfaced to the UI while it executes.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallState {
    pub name: String,
    pub arguments: Value,
    pub index: u64,
}

/// Observable outcome of folding one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum AssembleEffect {
    /// New text was appended to the in-flight buffer.
    TextDelta(String),
    /// A turn finished and produced a durable message.
    MessageComplete(MessageRecord),
    ToolStarted(ToolCallState),
    ToolCleared,
}

/// Folds decoded frames into displayable state for one stream session.
///
/// Owns the partial-turn text buffer and the active tool slot. Buffers
/// belong to exactly one run at a time; [`ContentAssembler::reset`]
/// must run before the assembler is reused for another run.
#[derive(Debug, Default)]
pub struct ContentAssembler {
    text_buffer: String,
    active_tool: Option<ToolCallState>,
}

impl ContentAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accumulated partial-turn text.
    pub fn text(&self) -> &str {
        &self.text_buffer
    }

    pub fn active_tool(&self) -> Option<&ToolCallState> {
        self.active_tool.as_ref()
    }

    /// Drop all in-flight state. Invoked on terminal transitions.
    pub fn reset(&mut self) {
        self.text_buffer.clear();
        self.active_tool = None;
    }

    /// Interpret one frame, mutating buffers and reporting at most one
    /// observable effect. Frames that carry nothing displayable (and
    /// malformed payloads with no recoverable text) fold to `None`.
    pub fn fold(&mut self, frame: &Frame) -> Option<AssembleEffect> {
        match &frame.kind {
            FrameKind::Assistant(content) => self.fold_assistant(content),
            FrameKind::Tool(content) => self.finalize_direct(content, MessageKind::Tool),
            FrameKind::User(content) => self.finalize_direct(content, MessageKind::User),
            FrameKind::System(content) => self.finalize_direct(content, MessageKind::System),
            FrameKind::Status(status) => self.fold_status(status),
            FrameKind::Malformed => self.fold_fallback(&frame.raw),
        }
    }

    fn fold_assistant(&mut self, content: &ContentFrame) -> Option<AssembleEffect> {
        let metadata = decode_layer(&content.metadata);
        let stream_status = metadata
            .get("stream_status")
            .and_then(Value::as_str)
            .unwrap_or("");
        let inner = decode_layer(&content.content);

        match stream_status {
            "chunk" => {
                let delta = text_of(&inner)?;
                if delta.is_empty() {
                    return None;
                }
                self.text_buffer.push_str(&delta);
                Some(AssembleEffect::TextDelta(delta))
            }
            "complete" => {
                let full = text_of(&inner).unwrap_or_else(|| self.text_buffer.clone());
                self.reset();
                let message_id = content.message_id.clone()?;
                Some(AssembleEffect::MessageComplete(MessageRecord {
                    message_id,
                    thread_id: content.thread_id.clone().unwrap_or_default(),
                    kind: MessageKind::Assistant,
                    content: Value::String(full),
                    created_at: String::new(),
                }))
            }
            // No partial-turn indicator: treat a stable id as a whole
            // message, anything else as a plain delta.
            _ => match &content.message_id {
                Some(_) => self.finalize_direct(content, MessageKind::Assistant),
                None => {
                    let delta = text_of(&inner)?;
                    if delta.is_empty() {
                        return None;
                    }
                    self.text_buffer.push_str(&delta);
                    Some(AssembleEffect::TextDelta(delta))
                }
            },
        }
    }

    fn finalize_direct(
        &mut self,
        content: &ContentFrame,
        kind: MessageKind,
    ) -> Option<AssembleEffect> {
        let message_id = content.message_id.clone()?;
        // Turn completion clears the whole in-flight slate, tool slot
        // included, not just the text buffer.
        self.reset();
        Some(AssembleEffect::MessageComplete(MessageRecord {
            message_id,
            thread_id: content.thread_id.clone().unwrap_or_default(),
            kind,
            content: decode_layer(&content.content),
            created_at: String::new(),
        }))
    }

    fn fold_status(&mut self, status: &StatusFrame) -> Option<AssembleEffect> {
        match status.status_type.as_deref() {
            Some("tool_started") => {
                let tool = ToolCallState {
                    name: status.tool_name.clone().unwrap_or_default(),
                    arguments: status.arguments.clone(),
                    index: status.tool_index.unwrap_or(0),
                };
                self.active_tool = Some(tool.clone());
                Some(AssembleEffect::ToolStarted(tool))
            }
            Some("tool_completed" | "tool_failed" | "tool_error") => {
                let slot = status.tool_index.unwrap_or(0);
                match &self.active_tool {
                    Some(active) if active.index == slot => {
                        self.active_tool = None;
                        Some(AssembleEffect::ToolCleared)
                    }
                    _ => None,
                }
            }
            _ => None,
        }
    }

    /// Best-effort recovery for payloads that were not valid JSON. Text
    /// that looks like a broken JSON document stays dropped; free text
    /// is appended as a delta.
    fn fold_fallback(&mut self, raw: &str) -> Option<AssembleEffect> {
        let text = raw.trim();
        if text.is_empty() || text.starts_with('{') || text.starts_with('[') {
            return None;
        }
        self.text_buffer.push_str(text);
        Some(AssembleEffect::TextDelta(text.to_string()))
    }
}

/// Extract displayable text from a decoded content layer.
fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Object(map) => map
            .get("content")
            .or_else(|| map.get("text"))
            .and_then(Value::as_str)
            .map(ToString::to_string),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use agent_api::classify;
    use serde_json::json;

    use super::*;

    fn frame(raw: &str) -> Frame {
        classify(raw).expect("frame must classify")
    }

    #[test]
    fn chunks_accumulate_then_complete_finalizes_once() {
        let mut assembler = ContentAssembler::new();

        let effect = assembler.fold(&frame(
            r#"{"type":"assistant","metadata":{"stream_status":"chunk"},"content":{"content":"Hel"}}"#,
        ));
        assert_eq!(effect, Some(AssembleEffect::TextDelta("Hel".into())));
        assert_eq!(assembler.text(), "Hel");

        let effect = assembler.fold(&frame(
            r#"{"type":"assistant","metadata":{"stream_status":"chunk"},"content":{"content":"lo"}}"#,
        ));
        assert_eq!(effect, Some(AssembleEffect::TextDelta("lo".into())));
        assert_eq!(assembler.text(), "Hello");

        let effect = assembler.fold(&frame(
            r#"{"type":"assistant","metadata":{"stream_status":"complete"},"message_id":"m1","content":{"content":"Hello"}}"#,
        ));
        let Some(AssembleEffect::MessageComplete(message)) = effect else {
            panic!("complete frame must finalize a message");
        };
        assert_eq!(message.message_id, "m1");
        assert_eq!(message.kind, MessageKind::Assistant);
        assert_eq!(message.content, json!("Hello"));
        // Buffer is cleared for the next turn.
        assert_eq!(assembler.text(), "");
    }

    #[test]
    fn complete_without_message_id_clears_but_emits_nothing() {
        let mut assembler = ContentAssembler::new();
        assembler.fold(&frame(
            r#"{"type":"assistant","metadata":{"stream_status":"chunk"},"content":{"content":"partial"}}"#,
        ));

        let effect = assembler.fold(&frame(
            r#"{"type":"assistant","metadata":{"stream_status":"complete"},"content":{"content":"partial"}}"#,
        ));
        assert_eq!(effect, None);
        assert_eq!(assembler.text(), "");
    }

    #[test]
    fn double_encoded_layers_are_decoded() {
        let mut assembler = ContentAssembler::new();
        let effect = assembler.fold(&frame(
            r#"{"type":"assistant","metadata":"{\"stream_status\":\"chunk\"}","content":"{\"content\":\"Hi\"}"}"#,
        ));
        assert_eq!(effect, Some(AssembleEffect::TextDelta("Hi".into())));
    }

    #[test]
    fn garbled_inner_layers_are_a_no_op() {
        let mut assembler = ContentAssembler::new();
        let effect = assembler.fold(&frame(
            r#"{"type":"assistant","metadata":{"stream_status":"chunk"},"content":{"blob":123}}"#,
        ));
        assert_eq!(effect, None);
        assert_eq!(assembler.text(), "");
    }

    #[test]
    fn tool_frames_with_stable_ids_finalize_directly() {
        let mut assembler = ContentAssembler::new();
        let effect = assembler.fold(&frame(
            r#"{"type":"tool","message_id":"t7","thread_id":"th1","content":{"result":"ok"}}"#,
        ));
        let Some(AssembleEffect::MessageComplete(message)) = effect else {
            panic!("tool frame with id must finalize");
        };
        assert_eq!(message.message_id, "t7");
        assert_eq!(message.kind, MessageKind::Tool);
        assert_eq!(message.thread_id, "th1");
    }

    #[test]
    fn turn_completing_tool_frame_clears_active_tool() {
        let mut assembler = ContentAssembler::new();
        assembler.fold(&frame(
            r#"{"type":"status","content":{"status_type":"tool_started","tool_name":"calc","arguments":{"expr":"2+2"},"tool_index":1}}"#,
        ));
        assert!(assembler.active_tool().is_some());

        let effect = assembler.fold(&frame(
            r#"{"type":"tool","message_id":"t1","content":{"result":"4"}}"#,
        ));
        assert!(matches!(effect, Some(AssembleEffect::MessageComplete(_))));
        assert!(assembler.active_tool().is_none());
        assert_eq!(assembler.text(), "");
    }

    #[test]
    fn tool_frames_without_ids_are_dropped() {
        let mut assembler = ContentAssembler::new();
        let effect = assembler.fold(&frame(r#"{"type":"tool","content":{"result":"ok"}}"#));
        assert_eq!(effect, None);
    }

    #[test]
    fn tool_lifecycle_sets_and_clears_by_slot() {
        let mut assembler = ContentAssembler::new();

        let effect = assembler.fold(&frame(
            r#"{"type":"status","content":{"status_type":"tool_started","tool_name":"web_search","arguments":{"q":"rust"},"tool_index":3}}"#,
        ));
        let Some(AssembleEffect::ToolStarted(tool)) = effect else {
            panic!("tool start must surface");
        };
        assert_eq!(tool.name, "web_search");
        assert_eq!(tool.index, 3);
        assert!(assembler.active_tool().is_some());

        // A completion for a different slot leaves the active tool alone.
        let effect = assembler.fold(&frame(
            r#"{"type":"status","content":{"status_type":"tool_completed","tool_index":9}}"#,
        ));
        assert_eq!(effect, None);
        assert!(assembler.active_tool().is_some());

        let effect = assembler.fold(&frame(
            r#"{"type":"status","content":{"status_type":"tool_completed","tool_index":3}}"#,
        ));
        assert_eq!(effect, Some(AssembleEffect::ToolCleared));
        assert!(assembler.active_tool().is_none());
    }

    #[test]
    fn malformed_free_text_recovers_as_delta() {
        let mut assembler = ContentAssembler::new();
        let effect = assembler.fold(&Frame {
            raw: "legacy plain text".into(),
            kind: FrameKind::Malformed,
        });
        assert_eq!(
            effect,
            Some(AssembleEffect::TextDelta("legacy plain text".into()))
        );
    }

    #[test]
    fn malformed_broken_json_stays_dropped() {
        let mut assembler = ContentAssembler::new();
        let effect = assembler.fold(&Frame {
            raw: "{not json".into(),
            kind: FrameKind::Malformed,
        });
        assert_eq!(effect, None);
        assert_eq!(assembler.text(), "");
    }

    #[test]
    fn reset_drops_text_and_tool_state() {
        let mut assembler = ContentAssembler::new();
        assembler.fold(&frame(
            r#"{"type":"assistant","metadata":{"stream_status":"chunk"},"content":{"content":"half"}}"#,
        ));
        assembler.fold(&frame(
            r#"{"type":"status","content":{"status_type":"tool_started","tool_name":"calc","tool_index":0}}"#,
        ));

        assembler.reset();
        assert_eq!(assembler.text(), "");
        assert!(assembler.active_tool().is_none());
    }
}
