use tracing::{debug, warn};

use crate::error::TluiError;

const DELIMITER: u8 = b'\n';

/// A complete line, or the error that took a line's place in the stream.
#[derive(Debug)]
pub enum Frame {
    Line(String),
    Error(TluiError),
}

/// Frames in stream order.
#[derive(Debug, Default)]
pub struct FrameReport {
    pub frames: Vec<Frame>,
}

impl FrameReport {
    fn push_line(&mut self, line: String) {
        self.frames.push(Frame::Line(line));
    }

    fn push_error(&mut self, error: TluiError) {
        self.frames.push(Frame::Error(error));
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn lines(&self) -> Vec<&str> {
        self.frames
            .iter()
            .filter_map(|frame| match frame {
                Frame::Line(line) => Some(line.as_str()),
                Frame::Error(_) => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<&TluiError> {
        self.frames
            .iter()
            .filter_map(|frame| match frame {
                Frame::Error(error) => Some(error),
                Frame::Line(_) => None,
            })
            .collect()
    }

    pub fn into_lines(self) -> Vec<String> {
        self.frames
            .into_iter()
            .filter_map(|frame| match frame {
                Frame::Line(line) => Some(line),
                Frame::Error(_) => None,
            })
            .collect()
    }
}

/// Splits a streamed payload into newline-terminated lines.
///
/// Input is buffered as bytes so a chunk boundary may fall inside a UTF-8
/// sequence; each line is decoded only once its terminator has arrived.
/// Lines come out in terminator order with only the `\n` removed.
#[derive(Debug, Default)]
pub struct LineFramer {
    pending: Vec<u8>,
    /// Prefix of `pending` already known to hold no newline.
    scanned: usize,
    max_line_bytes: Option<usize>,
    discarding: bool,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Caps the length of a single line. Past the cap the partial line is
    /// dropped and input is skipped up to the next newline.
    pub fn with_max_line_bytes(max_line_bytes: usize) -> Self {
        Self {
            max_line_bytes: Some(max_line_bytes),
            ..Self::default()
        }
    }

    pub fn max_line_bytes(&self) -> Option<usize> {
        self.max_line_bytes
    }

    pub fn pending(&self) -> &[u8] {
        &self.pending
    }

    pub fn feed(&mut self, chunk: impl AsRef<[u8]>) -> FrameReport {
        let mut report = FrameReport::default();
        let mut chunk = chunk.as_ref();

        if self.discarding {
            let Some(newline_idx) = chunk.iter().position(|byte| *byte == DELIMITER) else {
                return report;
            };
            debug!(event = "frame_resync", skipped = newline_idx);
            self.discarding = false;
            chunk = &chunk[newline_idx + 1..];
        }

        if !chunk.is_empty() {
            self.pending.extend_from_slice(chunk);
        }

        let mut start = 0;
        let mut search_from = self.scanned;
        while let Some(offset) = self.pending[search_from..]
            .iter()
            .position(|byte| *byte == DELIMITER)
        {
            let end = search_from + offset;
            self.decode_line(start, end, &mut report);
            start = end + 1;
            search_from = start;
        }
        self.pending.drain(..start);
        self.scanned = self.pending.len();

        if let Some(max) = self.max_line_bytes
            && self.pending.len() > max
        {
            warn!(event = "frame_too_large", size = self.pending.len(), max);
            report.push_error(TluiError::FrameTooLarge {
                size: self.pending.len(),
                max,
            });
            self.pending.clear();
            self.scanned = 0;
            self.discarding = true;
        }

        report
    }

    /// Hands back whatever unterminated text is left at end of stream.
    pub fn finish(&mut self) -> Option<String> {
        self.discarding = false;
        self.scanned = 0;
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }

    fn decode_line(&self, start: usize, end: usize, report: &mut FrameReport) {
        let raw = &self.pending[start..end];
        if let Some(max) = self.max_line_bytes
            && raw.len() > max
        {
            warn!(event = "frame_too_large", size = raw.len(), max);
            report.push_error(TluiError::FrameTooLarge {
                size: raw.len(),
                max,
            });
            return;
        }

        match std::str::from_utf8(raw) {
            Ok(line) => report.push_line(line.to_string()),
            Err(_) => {
                warn!(event = "frame_non_utf8", size = raw.len());
                report.push_error(TluiError::NonUtf8Line { len: raw.len() });
            }
        }
    }
}
