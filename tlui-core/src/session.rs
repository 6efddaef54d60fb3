use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use tracing::{debug, warn};

use crate::error::{Result, TluiError};
use crate::framer::{Frame, LineFramer};
use crate::message::MessageKind;
use crate::router::{ErrorSink, Router};
use crate::state::{UiState, ui_router};

/// What one `feed` call did to the session. `errors` is in stream order:
/// framing errors sit between the dispatch errors of the lines around them.
#[derive(Debug, Default)]
pub struct FeedReport {
    pub lines: usize,
    pub changed: BTreeSet<MessageKind>,
    pub errors: Vec<TluiError>,
}

impl FeedReport {
    pub fn is_quiet(&self) -> bool {
        self.changed.is_empty() && self.errors.is_empty()
    }

    pub fn touched_tree(&self) -> bool {
        self.changed.contains(&MessageKind::Pool) || self.changed.contains(&MessageKind::Tree)
    }
}

/// Framer, router and UI state for one backend connection.
pub struct Session {
    framer: LineFramer,
    router: Router<UiState>,
    state: UiState,
}

impl Default for Session {
    fn default() -> Self {
        Self::new(None)
    }
}

impl Session {
    pub fn new(max_line_bytes: Option<usize>) -> Self {
        let framer = match max_line_bytes {
            Some(max) => LineFramer::with_max_line_bytes(max),
            None => LineFramer::new(),
        };
        Self {
            framer,
            router: ui_router(),
            state: UiState::new(),
        }
    }

    pub fn state(&self) -> &UiState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut UiState {
        &mut self.state
    }

    /// Extra handlers run after the built-in state handlers.
    pub fn router_mut(&mut self) -> &mut Router<UiState> {
        &mut self.router
    }

    pub fn feed(&mut self, chunk: impl AsRef<[u8]>) -> FeedReport {
        let framed = self.framer.feed(chunk);
        let mut report = FeedReport::default();
        for frame in framed.frames {
            match frame {
                Frame::Line(line) => self.dispatch_line(&line, &mut report),
                Frame::Error(error) => report.errors.push(error),
            }
        }
        report
    }

    /// Ends the stream. A trailing line without its newline is not
    /// dispatched; it is handed back instead.
    pub fn finish(&mut self) -> Option<String> {
        let rest = self.framer.finish()?;
        if rest.trim().is_empty() {
            return None;
        }
        warn!(event = "stream_truncated", pending = rest.len());
        Some(rest)
    }

    fn dispatch_line(&mut self, line: &str, report: &mut FeedReport) {
        if line.trim().is_empty() {
            return;
        }
        report.lines += 1;
        let mut errors = Vec::new();
        let outcome = self
            .router
            .dispatch(&mut self.state, line, &mut errors as &mut dyn ErrorSink);
        report.changed.extend(outcome.handled);
        for error in errors {
            debug!(event = "message_error", error = %error);
            report.errors.push(error);
        }
        debug!(
            event = "line_dispatched",
            ignored = outcome.ignored.len(),
            failed = outcome.failed
        );
    }
}

/// Reads a recorded backend stream from disk.
pub fn read_stream_file(path: &Path) -> Result<Vec<u8>> {
    let bytes = fs::read(path).map_err(|source| TluiError::Io {
        target: path.display().to_string(),
        source,
    })?;

    if bytes.is_empty() {
        return Err(TluiError::EmptyStreamFile {
            path: path.to_path_buf(),
        });
    }

    Ok(bytes)
}
