pub mod client;
pub mod error;
pub mod framer;
pub mod message;
pub mod model;
pub mod projector;
pub mod prompt;
pub mod render;
pub mod router;
pub mod session;
pub mod state;

pub use client::{Client, ClientConfig, Sender};
pub use error::{Result, TluiError};
pub use framer::{Frame, FrameReport, LineFramer};
pub use message::{Direction, EditorResult, EmbeddedEdit, Inbound, MessageKind, Outbound};
pub use model::{
    ChildRef, DanglingRef, Node, NodeOption, NodeStatus, Pool, PoolIds, ProjectedNode, Projection,
    RefKind,
};
pub use projector::{ProjectOptions, project, project_snapshot};
pub use prompt::{Prompt, build_prompt};
pub use render::{projection_to_raw_json, render_outline, render_screen};
pub use router::{DispatchOutcome, ErrorSink, LogSink, Router};
pub use session::{FeedReport, Session, read_stream_file};
pub use state::{UiState, ui_router};
