//! `todosync` -- categorized to-do list with live sync.
//!
//! Runs a line-oriented shell over the local task cache and, when a relay
//! is configured and an email is signed in, keeps the list in sync with
//! every other device using the same email.
//!
//! ```bash
//! # Local-only
//! cargo run --bin todosync
//!
//! # Sync through a relay
//! cargo run --bin todosync -- --relay-url ws://127.0.0.1:9100/ws --email me@example.com
//! ```

use std::io::{self, Write};
use std::path::Path;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing_appender::non_blocking::WorkerGuard;

use todosync::auth::{AuthProvider, TrustedEmailAuth};
use todosync::backend::RelayBackend;
use todosync::config::{CliArgs, ClientConfig};
use todosync::shell::{self, Command};
use todosync::store::{FileStore, LocalCache};
use todosync::sync::{DispatchError, SyncEngine, SyncEvent};
use todosync::tasks::TaskError;

type Engine = SyncEngine<RelayBackend, FileStore>;
type Input = Lines<BufReader<Stdin>>;

#[tokio::main]
async fn main() -> io::Result<()> {
    let cli = CliArgs::parse();

    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Warning: failed to load config file: {e}");
            ClientConfig::default()
        }
    };

    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());
    tracing::info!(data_dir = %config.data_dir.display(), "todosync starting");

    let backend = connect_backend(&config).await;
    let cache = LocalCache::with_key(FileStore::new(&config.data_dir), config.storage_key.clone());
    let mut engine = SyncEngine::new(backend, cache).with_update_buffer(config.update_buffer);

    let auth = TrustedEmailAuth::new();
    let mut identity = auth.identity();
    if let Some(email) = config.email.as_deref()
        && let Err(e) = auth.sign_in_with_email(email).await
    {
        println!("{e}");
    }
    engine.follow_identity(identity.borrow_and_update().clone());

    println!("{}", shell::HELP);
    show(&engine);

    let mut input = BufReader::new(tokio::io::stdin()).lines();
    loop {
        prompt()?;
        tokio::select! {
            line = input.next_line() => {
                let Some(line) = line? else { break };
                if handle_line(&line, &mut engine, &auth, &mut input).await? {
                    break;
                }
            }
            changed = identity.changed() => {
                if changed.is_err() {
                    break;
                }
                engine.follow_identity(identity.borrow_and_update().clone());
                show(&engine);
            }
            event = engine.next_event() => {
                tracing::debug!(?event, "sync event");
                if !matches!(event, SyncEvent::EchoIgnored { .. } | SyncEvent::Subscribed) {
                    println!();
                    show(&engine);
                }
            }
        }
    }

    engine.stop();
    tracing::info!("todosync exiting");
    Ok(())
}

/// Initialize file-based logging so the shell's stdout stays clean.
///
/// Returns a [`WorkerGuard`] that must be held until shutdown to flush
/// buffered log entries.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("todosync.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

/// Connects to the configured relay, or returns `None` to run local-only.
async fn connect_backend(config: &ClientConfig) -> Option<RelayBackend> {
    let url = match config.relay_endpoint() {
        Ok(Some(url)) => url,
        Ok(None) => return None,
        Err(e) => {
            tracing::warn!(error = %e, "ignoring relay URL");
            println!("Ignoring relay URL, working offline ({e})");
            return None;
        }
    };
    match RelayBackend::connect(url.as_str(), config.connect_timeout).await {
        Ok(backend) => Some(backend),
        Err(e) => {
            println!("Could not reach the sync server, working offline ({e})");
            None
        }
    }
}

fn prompt() -> io::Result<()> {
    let mut stdout = io::stdout();
    write!(stdout, "> ")?;
    stdout.flush()
}

fn show(engine: &Engine) {
    let status = match (engine.identity(), engine.has_backend()) {
        (Some(id), true) => format!("signed in as {id} ({})", engine.state()),
        (Some(id), false) => format!("signed in as {id} (offline)"),
        (None, _) => "not signed in (local only)".to_string(),
    };
    println!("[{status}]");
    print!(
        "{}",
        shell::render(
            engine.view(),
            engine.board().selected_category(),
            engine.sync_error()
        )
    );
}

/// Handles one input line. Returns `Ok(true)` when the user asked to quit.
async fn handle_line(
    line: &str,
    engine: &mut Engine,
    auth: &TrustedEmailAuth,
    input: &mut Input,
) -> io::Result<bool> {
    let command = match shell::parse(line) {
        Ok(Some(command)) => command,
        Ok(None) => return Ok(false),
        Err(e) => {
            println!("{e}");
            return Ok(false);
        }
    };

    match &command {
        Command::Quit => return Ok(true),
        Command::Help => println!("{}", shell::HELP),
        Command::List => show(engine),
        Command::Use(category) => {
            engine.select_category(*category);
            println!("New tasks go to {category}");
        }
        Command::SignIn(email) => {
            if let Err(e) = auth.sign_in_with_email(email).await {
                println!("{e}");
            }
        }
        Command::SignOut => {
            if let Err(e) = auth.sign_out().await {
                println!("{e}");
            }
        }
        Command::Clear => {
            print!("Delete every task? This cannot be undone. [yes/no] ");
            io::stdout().flush()?;
            let answer = input.next_line().await?.unwrap_or_default();
            if shell::is_confirmation(&answer) {
                apply(&command, engine).await;
            } else {
                println!("Nothing deleted.");
            }
        }
        Command::Add { .. } | Command::Remove(_) | Command::Done(_) | Command::Move { .. } => {
            apply(&command, engine).await;
        }
    }
    Ok(false)
}

async fn apply(command: &Command, engine: &mut Engine) {
    let action = match command.to_action(engine.board()) {
        Ok(Some(action)) => action,
        Ok(None) => return,
        Err(e) => {
            println!("{e}");
            return;
        }
    };
    match engine.dispatch(action).await {
        Ok(_) => show(engine),
        // Blank input is dropped without comment.
        Err(DispatchError::Task(TaskError::TextEmpty)) => {}
        Err(e) => println!("{e}"),
    }
}
