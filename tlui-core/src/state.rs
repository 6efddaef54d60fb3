use std::collections::VecDeque;

use serde_json::Value;
use tracing::{debug, info};

use crate::error::{Result, TluiError};
use crate::message::{EmbeddedEdit, Inbound, MessageKind};
use crate::model::Pool;
use crate::prompt::build_prompt;
use crate::router::Router;

pub const DEFAULT_NOTIFICATION_LIMIT: usize = 32;

/// Everything the client knows about the backend, rebuilt from messages.
#[derive(Debug, Clone, PartialEq)]
pub struct UiState {
    pub pool: Option<Pool>,
    pub prompt: Vec<String>,
    pub prompt_ids: Vec<String>,
    pub prompt_dangling: usize,
    pub status: Option<String>,
    pub display: bool,
    pub max_width: Option<f64>,
    pub quit_requested: bool,
    pub notifications: VecDeque<String>,
    pub notification_limit: usize,
    pub editor_running: bool,
    pub error: Option<String>,
    pub input: String,
    pub command_preview: Option<Value>,
    pub embedded_edit: Option<EmbeddedEdit>,
    pub event_queue: Vec<String>,
    pub suggestions: Vec<String>,
    pub messages: Vec<String>,
    pub context: Vec<String>,
}

impl Default for UiState {
    fn default() -> Self {
        Self {
            pool: None,
            prompt: Vec::new(),
            prompt_ids: Vec::new(),
            prompt_dangling: 0,
            status: None,
            display: false,
            max_width: None,
            quit_requested: false,
            notifications: VecDeque::new(),
            notification_limit: DEFAULT_NOTIFICATION_LIMIT,
            editor_running: false,
            error: None,
            input: String::new(),
            command_preview: None,
            embedded_edit: None,
            event_queue: Vec::new(),
            suggestions: Vec::new(),
            messages: Vec::new(),
            context: Vec::new(),
        }
    }
}

impl UiState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, message: &Inbound) -> Result<()> {
        match message {
            Inbound::Tree(forest) => {
                self.pool = Some(Pool::from_forest(forest.clone()));
                self.refresh_prompt();
            }
            Inbound::Pool(pool) => {
                debug!(event = "pool_replaced", nodes = pool.len());
                self.pool = Some(pool.clone());
                self.refresh_prompt();
            }
            Inbound::PromptNodes(ids) => {
                // `promptnodes` usually precedes `pool` in the same message;
                // the prompt is rebuilt again once the pool lands.
                self.prompt_ids.clone_from(ids);
                if ids.is_empty() {
                    self.prompt.clear();
                    self.prompt_dangling = 0;
                } else {
                    self.refresh_prompt();
                }
            }
            Inbound::Prompt(lines) => {
                self.prompt_ids.clear();
                self.prompt_dangling = 0;
                self.prompt.clone_from(lines);
            }
            Inbound::Status(status) => self.status = Some(status.clone()),
            Inbound::Display(shown) => self.display = *shown,
            Inbound::MaxWidth(width) => {
                if !width.is_finite() || *width <= 0.0 {
                    return Err(TluiError::handler(
                        MessageKind::MaxWidth.key(),
                        format!("width must be a positive number, got {width}"),
                    ));
                }
                self.max_width = Some(*width);
            }
            Inbound::ShouldQuit(quit) => {
                if *quit {
                    info!(event = "quit_requested");
                    self.quit_requested = true;
                }
            }
            Inbound::Notification(text) => self.push_notification(text.clone()),
            Inbound::EditorRunning(running) => self.editor_running = *running,
            Inbound::Error(text) => self.error = Some(text.clone()),
            Inbound::Input(text) => self.input.clone_from(text),
            Inbound::CommandPreview(preview) => self.command_preview.clone_from(preview),
            Inbound::EmbeddedEdit(edit) => self.embedded_edit.clone_from(edit),
            Inbound::EventQueue(ids) => self.event_queue.clone_from(ids),
            Inbound::Suggestions(items) => self.suggestions.clone_from(items),
            Inbound::Messages(items) => self.messages.clone_from(items),
            Inbound::Context(items) => self.context.clone_from(items),
            Inbound::Unknown { key, .. } => {
                debug!(event = "unknown_message", key = %key);
            }
        }
        Ok(())
    }

    /// The error banner is transient: reading it clears it.
    pub fn take_error(&mut self) -> Option<String> {
        self.error.take()
    }

    pub fn drain_notifications(&mut self) -> Vec<String> {
        self.notifications.drain(..).collect()
    }

    fn push_notification(&mut self, text: String) {
        if self.notification_limit == 0 {
            return;
        }
        while self.notifications.len() >= self.notification_limit {
            self.notifications.pop_front();
        }
        self.notifications.push_back(text);
    }

    fn refresh_prompt(&mut self) {
        // No ids: the prompt is literal (or already cleared).
        if self.prompt_ids.is_empty() {
            return;
        }
        let Some(pool) = self.pool.as_ref() else {
            return;
        };
        let prompt = build_prompt(pool, &self.prompt_ids);
        self.prompt_dangling = prompt.dangling.len();
        self.prompt = prompt.lines;
    }
}

/// A router whose handlers apply every known message kind to a `UiState`.
pub fn ui_router() -> Router<UiState> {
    let mut router = Router::new();
    for kind in MessageKind::KNOWN {
        router.register(kind, UiState::apply);
    }
    router
}
