use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Result, TluiError};
use crate::model::{NodeStatus, Projection};
use crate::projector::{ProjectOptions, project_snapshot};
use crate::state::UiState;

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("valid regex"));

const INDENT: &str = "  ";
const NO_SNAPSHOT: &str = "(no snapshot yet)";

fn marker(status: NodeStatus) -> char {
    if status.active {
        '>'
    } else if status.activeref || status.activewithref {
        '~'
    } else {
        ' '
    }
}

fn progress_suffix(status: NodeStatus) -> &'static str {
    if status.finished {
        " [done]"
    } else if status.started {
        " [started]"
    } else {
        ""
    }
}

/// One line per projected node: marker column, indentation by depth, label.
pub fn render_outline(projection: &Projection<'_>) -> String {
    let mut output = String::new();
    for entry in &projection.entries {
        output.push(marker(entry.status));
        output.push(' ');
        output.push_str(&INDENT.repeat(entry.depth));
        output.push_str(&entry.node.label());
        output.push_str(progress_suffix(entry.status));
        output.push('\n');
    }
    output
}

/// Status text arrives as HTML fragments.
pub fn strip_tags(text: &str) -> String {
    TAG_RE.replace_all(text, "").trim().to_string()
}

pub fn render_screen(state: &UiState, options: &ProjectOptions) -> String {
    let mut output = String::new();

    for line in &state.prompt {
        output.push_str(line);
        output.push('\n');
    }
    if !state.input.is_empty() {
        output.push_str(&format!("> {}\n", state.input));
    }
    if let Some(status) = state.status.as_deref() {
        let status = strip_tags(status);
        if !status.is_empty() {
            output.push_str(&format!("-- {status}\n"));
        }
    }
    if let Some(error) = state.error.as_deref() {
        output.push_str(&format!("!! {error}\n"));
    }
    for notification in &state.notifications {
        output.push_str(&format!("* {notification}\n"));
    }
    if !output.is_empty() {
        output.push('\n');
    }

    let Some(pool) = state.pool.as_ref() else {
        output.push_str(NO_SNAPSHOT);
        output.push('\n');
        return output;
    };

    let projection = project_snapshot(pool, options);
    output.push_str(&render_outline(&projection));
    if !projection.dangling.is_empty() {
        output.push_str(&format!(
            "\n({} dangling reference{})\n",
            projection.dangling.len(),
            if projection.dangling.len() == 1 { "" } else { "s" }
        ));
    }
    output
}

pub fn projection_to_raw_json(projection: &Projection<'_>) -> Result<String> {
    serde_json::to_string_pretty(projection).map_err(|err| TluiError::Serialization(err.to_string()))
}
