//! Line-oriented frame decoder for `text/event-stream` bodies.

use bytes::{Buf, BytesMut};

use crate::metrics::StreamMetrics;

const DATA_PREFIX: &str = "data:";
const EVENT_PREFIX: &str = "event:";
const ID_PREFIX: &str = "id:";

/// One complete protocol message extracted from the byte stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Joined `data:` payload (multiple data lines are joined with `\n`)
    pub data: String,
    /// Value of the last `event:` line in this frame, if any
    pub event: Option<String>,
    /// Value of the last `id:` line in this frame, if any
    pub id: Option<String>,
}

/// Longest unterminated line kept before it is discarded
pub const DEFAULT_MAX_LINE_BYTES: usize = 1024 * 1024;

/// Incremental decoder that turns arbitrary chunks into [`Frame`]s.
///
/// Chunks may split lines (and multi-byte UTF-8 sequences) anywhere; the
/// unterminated tail is carried over to the next [`push`](Self::push). A
/// line longer than the configured limit is dropped along with the frame it
/// belongs to.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: BytesMut,
    /// Prefix of `buffer` already searched for a newline
    scanned: usize,
    max_line_bytes: usize,
    /// Skipping the rest of an oversized line
    discarding: bool,
    data: Option<String>,
    event: Option<String>,
    id: Option<String>,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::with_max_line_bytes(DEFAULT_MAX_LINE_BYTES)
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_line_bytes(max_line_bytes: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            scanned: 0,
            max_line_bytes,
            discarding: false,
            data: None,
            event: None,
            id: None,
        }
    }

    /// Feed a chunk and return every frame it completed, in arrival order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        loop {
            let newline = self.buffer[self.scanned..].iter().position(|b| *b == b'\n');
            let Some(offset) = newline else {
                break;
            };
            let mut line = self.buffer.split_to(self.scanned + offset);
            self.buffer.advance(1);
            self.scanned = 0;

            if self.discarding {
                self.discarding = false;
                continue;
            }
            if line.last() == Some(&b'\r') {
                line.truncate(line.len() - 1);
            }

            let line = String::from_utf8_lossy(&line);
            if let Some(frame) = self.process_line(&line) {
                frames.push(frame);
            }
        }
        self.scanned = self.buffer.len();

        if self.pending_bytes() > self.max_line_bytes {
            tracing::warn!(
                pending_bytes = self.pending_bytes(),
                limit = self.max_line_bytes,
                "Discarding oversized stream line"
            );
            StreamMetrics::record_malformed();
            self.reset();
            self.discarding = true;
        }

        frames
    }

    /// Bytes received but not yet terminated by a newline.
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }

    /// Drop any partially received line and frame.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.scanned = 0;
        self.discarding = false;
        self.data = None;
        self.event = None;
        self.id = None;
    }

    fn process_line(&mut self, line: &str) -> Option<Frame> {
        if line.is_empty() {
            return self.take_frame();
        }

        // Comment lines keep proxies from idling the connection
        if line.starts_with(':') {
            return None;
        }

        if let Some(value) = field_value(line, DATA_PREFIX) {
            match self.data.as_mut() {
                Some(data) => {
                    data.push('\n');
                    data.push_str(value);
                }
                None => self.data = Some(value.to_string()),
            }
        } else if let Some(value) = field_value(line, EVENT_PREFIX) {
            self.event = Some(value.to_string());
        } else if let Some(value) = field_value(line, ID_PREFIX) {
            self.id = Some(value.to_string());
        } else {
            tracing::trace!(line = %line, "Ignoring unrecognised stream line");
        }

        None
    }

    fn take_frame(&mut self) -> Option<Frame> {
        let event = self.event.take();
        let id = self.id.take();
        let data = self.data.take()?;
        Some(Frame { data, event, id })
    }
}

fn field_value<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    line.strip_prefix(prefix)
        .map(|rest| rest.strip_prefix(' ').unwrap_or(rest))
}
