use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, TluiError};
use crate::model::{Node, Pool, de_id_list};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Tree,
    Pool,
    PromptNodes,
    Prompt,
    Status,
    Display,
    MaxWidth,
    ShouldQuit,
    Notification,
    EditorRunning,
    Error,
    Input,
    CommandPreview,
    EmbeddedEdit,
    EventQueue,
    Suggestions,
    Messages,
    Context,
    Unknown,
}

impl MessageKind {
    pub const KNOWN: [Self; 18] = [
        Self::Tree,
        Self::Pool,
        Self::PromptNodes,
        Self::Prompt,
        Self::Status,
        Self::Display,
        Self::MaxWidth,
        Self::ShouldQuit,
        Self::Notification,
        Self::EditorRunning,
        Self::Error,
        Self::Input,
        Self::CommandPreview,
        Self::EmbeddedEdit,
        Self::EventQueue,
        Self::Suggestions,
        Self::Messages,
        Self::Context,
    ];

    pub fn from_key(key: &str) -> Self {
        match key {
            "tree" => Self::Tree,
            "pool" => Self::Pool,
            "promptnodes" => Self::PromptNodes,
            "prompt" => Self::Prompt,
            "status" => Self::Status,
            "display" => Self::Display,
            "max_width" => Self::MaxWidth,
            "should_quit" => Self::ShouldQuit,
            "notification" => Self::Notification,
            "editor_running" => Self::EditorRunning,
            "error" => Self::Error,
            "input" => Self::Input,
            "command_preview" => Self::CommandPreview,
            "embedded_edit" => Self::EmbeddedEdit,
            "event_queue" => Self::EventQueue,
            "suggestions" => Self::Suggestions,
            "messages" => Self::Messages,
            "context" => Self::Context,
            _ => Self::Unknown,
        }
    }

    pub fn key(self) -> &'static str {
        match self {
            Self::Tree => "tree",
            Self::Pool => "pool",
            Self::PromptNodes => "promptnodes",
            Self::Prompt => "prompt",
            Self::Status => "status",
            Self::Display => "display",
            Self::MaxWidth => "max_width",
            Self::ShouldQuit => "should_quit",
            Self::Notification => "notification",
            Self::EditorRunning => "editor_running",
            Self::Error => "error",
            Self::Input => "input",
            Self::CommandPreview => "command_preview",
            Self::EmbeddedEdit => "embedded_edit",
            Self::EventQueue => "event_queue",
            Self::Suggestions => "suggestions",
            Self::Messages => "messages",
            Self::Context => "context",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Edit request the backend hands to an embedded editor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddedEdit {
    pub identifier: String,
    #[serde(default)]
    pub data: String,
}

impl EmbeddedEdit {
    /// `None` cancels the edit.
    pub fn finish(&self, data: Option<String>) -> Outbound {
        Outbound::EmbeddedEditorFinished(EditorResult {
            identifier: self.identifier.clone(),
            data,
        })
    }
}

/// One top-level key of a backend message, decoded.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Tree(Vec<Node>),
    Pool(Pool),
    PromptNodes(Vec<String>),
    Prompt(Vec<String>),
    Status(String),
    Display(bool),
    MaxWidth(f64),
    ShouldQuit(bool),
    Notification(String),
    EditorRunning(bool),
    Error(String),
    Input(String),
    CommandPreview(Option<Value>),
    EmbeddedEdit(Option<EmbeddedEdit>),
    EventQueue(Vec<String>),
    Suggestions(Vec<String>),
    Messages(Vec<String>),
    Context(Vec<String>),
    Unknown { key: String, value: Value },
}

#[derive(Deserialize)]
struct IdList(#[serde(deserialize_with = "de_id_list")] Vec<String>);

impl Inbound {
    pub fn decode(key: &str, value: Value) -> Result<Self> {
        let kind = MessageKind::from_key(key);
        let decoded = match kind {
            MessageKind::Tree => serde_json::from_value(value).map(Self::Tree),
            MessageKind::Pool => serde_json::from_value(value).map(Self::Pool),
            MessageKind::PromptNodes => {
                serde_json::from_value::<IdList>(value).map(|ids| Self::PromptNodes(ids.0))
            }
            MessageKind::Prompt => serde_json::from_value(value).map(Self::Prompt),
            MessageKind::Status => serde_json::from_value(value).map(Self::Status),
            MessageKind::Display => serde_json::from_value(value).map(Self::Display),
            MessageKind::MaxWidth => serde_json::from_value(value).map(Self::MaxWidth),
            MessageKind::ShouldQuit => serde_json::from_value(value).map(Self::ShouldQuit),
            MessageKind::Notification => serde_json::from_value(value).map(Self::Notification),
            MessageKind::EditorRunning => serde_json::from_value(value).map(Self::EditorRunning),
            MessageKind::Error => serde_json::from_value(value).map(Self::Error),
            MessageKind::Input => serde_json::from_value(value).map(Self::Input),
            MessageKind::CommandPreview => Ok(Self::CommandPreview(match value {
                Value::Null => None,
                other => Some(other),
            })),
            MessageKind::EmbeddedEdit => serde_json::from_value(value).map(Self::EmbeddedEdit),
            MessageKind::EventQueue => {
                serde_json::from_value::<IdList>(value).map(|ids| Self::EventQueue(ids.0))
            }
            MessageKind::Suggestions => serde_json::from_value(value).map(Self::Suggestions),
            MessageKind::Messages => serde_json::from_value(value).map(Self::Messages),
            MessageKind::Context => serde_json::from_value(value).map(Self::Context),
            MessageKind::Unknown => Ok(Self::Unknown {
                key: key.to_string(),
                value,
            }),
        };

        decoded.map_err(|source| TluiError::InvalidPayload {
            key: key.to_string(),
            source,
        })
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Tree(_) => MessageKind::Tree,
            Self::Pool(_) => MessageKind::Pool,
            Self::PromptNodes(_) => MessageKind::PromptNodes,
            Self::Prompt(_) => MessageKind::Prompt,
            Self::Status(_) => MessageKind::Status,
            Self::Display(_) => MessageKind::Display,
            Self::MaxWidth(_) => MessageKind::MaxWidth,
            Self::ShouldQuit(_) => MessageKind::ShouldQuit,
            Self::Notification(_) => MessageKind::Notification,
            Self::EditorRunning(_) => MessageKind::EditorRunning,
            Self::Error(_) => MessageKind::Error,
            Self::Input(_) => MessageKind::Input,
            Self::CommandPreview(_) => MessageKind::CommandPreview,
            Self::EmbeddedEdit(_) => MessageKind::EmbeddedEdit,
            Self::EventQueue(_) => MessageKind::EventQueue,
            Self::Suggestions(_) => MessageKind::Suggestions,
            Self::Messages(_) => MessageKind::Messages,
            Self::Context(_) => MessageKind::Context,
            Self::Unknown { .. } => MessageKind::Unknown,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Self::Unknown { key, .. } => key,
            other => other.kind().key(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditorResult {
    pub identifier: String,
    pub data: Option<String>,
}

/// Messages the client sends back, one JSON object per line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outbound {
    Command(String),
    Input(String),
    Navigate(Direction),
    UiConnected(bool),
    EmbeddedEditorFinished(EditorResult),
}

impl Outbound {
    pub fn handshake() -> Self {
        Self::UiConnected(true)
    }

    pub fn encode_line(&self) -> Result<String> {
        let mut line =
            serde_json::to_string(self).map_err(|err| TluiError::Serialization(err.to_string()))?;
        line.push('\n');
        Ok(line)
    }
}
