use std::io::{self, BufRead, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use std::thread;

use clap::{Args, Parser, Subcommand};
use tlui_core::{
    Client, ClientConfig, Direction, EmbeddedEdit, MessageKind, Outbound, ProjectOptions, Sender,
    Session, TluiError, project_snapshot, projection_to_raw_json, read_stream_file, render_screen,
};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "TLUI_LOG";
const DEFAULT_LOG_LEVEL: &str = "warn";

#[derive(Debug, Parser)]
#[command(name = "tlui", version, about = "Terminal client for the tree-of-life backend")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Connect, print the outline after each update and forward stdin lines as commands
    /// (`:up` / `:down` navigate, `:input <text>` sets the input box,
    /// `:edit <text>` / `:edit-cancel` finish a pending embedded edit, `:quit` disconnects)
    Watch(ConnectArgs),

    /// Send a single command and disconnect
    Send {
        #[command(flatten)]
        connect: ConnectArgs,

        /// Command text, e.g. `done` or `+task: write report`
        #[arg(required = true, num_args = 1..)]
        command: Vec<String>,
    },

    /// Replay a recorded stream and print the final screen
    Render {
        /// Stream file with one JSON message per line, or `-` for stdin
        path: PathBuf,

        /// Output the projection as JSON instead of text
        #[arg(long)]
        raw: bool,

        /// Keep every top-level node, not just the days node
        #[arg(long)]
        all: bool,
    },
}

#[derive(Debug, Args)]
struct ConnectArgs {
    /// Backend line server address (default: $TLUI_ADDR or 127.0.0.1:18081)
    #[arg(long)]
    addr: Option<String>,
}

impl ConnectArgs {
    fn config(&self) -> tlui_core::Result<ClientConfig> {
        let config = ClientConfig::from_env()?;
        Ok(match &self.addr {
            Some(addr) => config.with_addr(addr.clone()),
            None => config,
        })
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(1)
        }
    }
}

fn init_tracing() {
    // Precedence:
    // 1) TLUI_LOG
    // 2) RUST_LOG
    // 3) warn
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn run(cli: Cli) -> tlui_core::Result<()> {
    match cli.command {
        Command::Watch(connect) => watch(&connect.config()?),
        Command::Send { connect, command } => send(&connect.config()?, command.join(" ")),
        Command::Render { path, raw, all } => render(&path, raw, all),
    }
}

fn watch(config: &ClientConfig) -> tlui_core::Result<()> {
    let mut client = Client::connect(config)?;
    let sender = client.sender()?;
    let pending_edit = PendingEdit::default();
    let stdin_edit = Arc::clone(&pending_edit);
    thread::spawn(move || forward_stdin(sender, &stdin_edit));

    let options = ProjectOptions::default();
    let mut failure = None;
    client.run(|session, report| {
        for err in &report.errors {
            eprintln!("warning: {err}");
        }
        if report.changed.contains(&MessageKind::EmbeddedEdit)
            && let Ok(mut slot) = pending_edit.lock()
        {
            slot.clone_from(&session.state().embedded_edit);
        }
        if report.changed.is_empty() || failure.is_some() {
            return;
        }
        if let Err(err) = print_screen(session, &options) {
            failure = Some(err);
        }
    })?;

    match failure {
        Some(err) => Err(err),
        None => client.close(),
    }
}

fn print_screen(session: &mut Session, options: &ProjectOptions) -> tlui_core::Result<()> {
    let screen = render_screen(session.state(), options);
    // Notifications and the error banner show once.
    let state = session.state_mut();
    state.drain_notifications();
    state.take_error();

    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{screen}")
        .and_then(|()| stdout.flush())
        .map_err(|source| TluiError::Io {
            target: "stdout".to_string(),
            source,
        })
}

/// The backend's latest `embedded_edit`, shared with the stdin thread.
type PendingEdit = Arc<Mutex<Option<EmbeddedEdit>>>;

#[derive(Debug, PartialEq)]
enum StdinAction {
    Skip,
    Quit,
    NoPendingEdit,
    Send(Outbound),
}

fn stdin_action(line: &str, pending: Option<&EmbeddedEdit>) -> StdinAction {
    let line = line.trim();
    let (word, rest) = line.split_once(' ').unwrap_or((line, ""));
    match word {
        "" => StdinAction::Skip,
        ":quit" => StdinAction::Quit,
        ":up" => StdinAction::Send(Outbound::Navigate(Direction::Up)),
        ":down" => StdinAction::Send(Outbound::Navigate(Direction::Down)),
        ":input" => StdinAction::Send(Outbound::Input(rest.to_string())),
        ":edit" | ":edit-cancel" => match pending {
            None => StdinAction::NoPendingEdit,
            Some(edit) if word == ":edit" => {
                StdinAction::Send(edit.finish(Some(rest.to_string())))
            }
            Some(edit) => StdinAction::Send(edit.finish(None)),
        },
        _ => StdinAction::Send(Outbound::Command(line.to_string())),
    }
}

fn forward_stdin(mut sender: Sender, pending_edit: &PendingEdit) {
    for line in io::stdin().lock().lines() {
        let Ok(line) = line else {
            break;
        };
        let pending = pending_edit.lock().ok().and_then(|slot| slot.clone());
        let message = match stdin_action(&line, pending.as_ref()) {
            StdinAction::Skip => continue,
            StdinAction::Quit => {
                sender.disconnect();
                return;
            }
            StdinAction::NoPendingEdit => {
                eprintln!("warning: no embedded edit is pending");
                continue;
            }
            StdinAction::Send(message) => message,
        };
        if matches!(message, Outbound::EmbeddedEditorFinished(_))
            && let Ok(mut slot) = pending_edit.lock()
        {
            // Each edit is answered once.
            *slot = None;
        }
        if let Err(err) = sender.send(&message) {
            warn!(event = "stdin_forward_failed", error = %err);
            break;
        }
    }
    debug!(event = "stdin_closed");
}

fn send(config: &ClientConfig, command: String) -> tlui_core::Result<()> {
    let mut client = Client::connect(config)?;
    client.send(&Outbound::Command(command))?;
    client.close()
}

fn render(path: &Path, raw: bool, all: bool) -> tlui_core::Result<()> {
    let bytes = if path == Path::new("-") {
        let mut bytes = Vec::new();
        io::stdin()
            .read_to_end(&mut bytes)
            .map_err(|source| TluiError::Io {
                target: "stdin".to_string(),
                source,
            })?;
        bytes
    } else {
        read_stream_file(path)?
    };

    let mut session = Session::default();
    let report = session.feed(&bytes);
    for err in &report.errors {
        eprintln!("warning: {err}");
    }
    if let Some(rest) = session.finish() {
        eprintln!("warning: ignoring unterminated line ({} bytes)", rest.len());
    }

    let options = if all {
        ProjectOptions::unfiltered()
    } else {
        ProjectOptions::default()
    };

    if raw {
        let projection = match session.state().pool.as_ref() {
            Some(pool) => project_snapshot(pool, &options),
            None => tlui_core::Projection::default(),
        };
        let raw_json = projection_to_raw_json(&projection)?;
        println!("{raw_json}");
    } else {
        print!("{}", render_screen(session.state(), &options));
    }

    Ok(())
}
