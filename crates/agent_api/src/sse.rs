use crate::frames::{classify, Frame};

/// Incremental parser for the line-oriented event stream.
///
/// The transport is byte oriented, not frame oriented: one event may
/// arrive split across chunks, and one chunk may carry many events.
/// Incomplete trailing lines stay buffered until the rest arrives.
#[derive(Debug, Default)]
pub struct SseFrameParser {
    buffer: String,
}

impl SseFrameParser {
    /// Feed arbitrary bytes into the parser and drain complete frames.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Frame> {
        self.buffer.push_str(&String::from_utf8_lossy(bytes));
        let mut frames = Vec::new();

        while let Some(split) = self.buffer.find('\n') {
            let line = self.buffer[..split].trim_end_matches('\r').to_string();
            self.buffer.drain(0..split + 1);

            let Some(payload) = extract_data_payload(&line) else {
                continue;
            };
            if let Some(frame) = classify(&payload) {
                frames.push(frame);
            }
        }

        frames
    }

    /// Parse a complete stream payload in one shot.
    pub fn parse_lines(input: &str) -> Vec<Frame> {
        let mut parser = Self::default();
        parser.feed(input.as_bytes())
    }

    pub fn is_empty_buffer(&self) -> bool {
        self.buffer.trim().is_empty()
    }
}

fn extract_data_payload(line: &str) -> Option<String> {
    let payload = line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:"))?;
    let payload = payload.trim();
    // Empty payloads after prefix stripping are discarded, not malformed.
    if payload.is_empty() {
        None
    } else {
        Some(payload.to_string())
    }
}
