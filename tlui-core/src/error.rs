use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TluiError {
    #[error("malformed message: {source}")]
    MalformedMessage {
        line: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("malformed message: expected a json object, got {found}")]
    NotAnObject { line: String, found: &'static str },

    #[error("invalid payload for `{key}`: {source}")]
    InvalidPayload {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("handler for `{key}` failed: {message}")]
    HandlerFailed { key: String, message: String },

    #[error("frame too large: {size} > {max} bytes")]
    FrameTooLarge { size: usize, max: usize },

    #[error("line is not valid UTF-8 ({len} bytes)")]
    NonUtf8Line { len: usize },

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid config value for {name}: {value}")]
    InvalidConfig { name: &'static str, value: String },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("stream file is empty: {path}")]
    EmptyStreamFile { path: PathBuf },

    #[error("i/o error on {target}: {source}")]
    Io {
        target: String,
        #[source]
        source: std::io::Error,
    },
}

impl TluiError {
    pub fn handler(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::HandlerFailed {
            key: key.into(),
            message: message.into(),
        }
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::MalformedMessage { .. } | Self::NotAnObject { .. })
    }
}

pub type Result<T> = std::result::Result<T, TluiError>;
