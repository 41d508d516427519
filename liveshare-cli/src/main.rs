//! Terminal front end for the live collaboration client.
//!
//! Hosts or joins a session with an in-memory editor. Files passed with
//! `--share` are loaded and shared; lines typed on stdin go to the chat,
//! and a few slash commands drive the rest:
//!
//! ```text
//! /who              list members
//! /follow <name>    follow a member
//! /unfollow         stop following
//! /run <file>       run a local file on the relay
//! /export <path>    write the session log as JSON
//! /quit             end the session
//! ```

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::{self, error::RecvError};

use liveshare_core::DocumentKey;
use liveshare_sync::{Client, ClientHandle, LogEntry, MemoryHost, SyncConfig, SyncError};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Parser, Debug)]
#[command(name = "liveshare")]
#[command(about = "Share and edit files live with other people")]
#[command(version)]
struct Cli {
    /// Relay server URL (overrides LIVESHARE_SERVER_URL)
    #[arg(short, long, value_name = "URL")]
    server: Option<String>,

    /// Name shown to other participants
    #[arg(short, long)]
    name: Option<String>,

    /// JSON settings file; environment variables still apply on top
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Files to share once the session is up
    #[arg(long, value_name = "FILE")]
    share: Vec<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Host a new session
    Start,
    /// Join a session by its code
    Join { code: String },
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), BoxError> {
    let config = load_config(&cli)?;
    log::info!("Using relay {}", config.server_url);

    let editor = Arc::new(MemoryHost::new());
    let (handle, task) = Client::spawn(config, editor.clone());
    editor.attach(handle.change_sink());
    tokio::spawn(print_log(handle.subscribe_log()));

    let summary = match &cli.command {
        Command::Start => handle.start_session().await?,
        Command::Join { code } => handle.join_session(code).await?,
    };
    if summary.is_host {
        println!("Hosting session {}. Share this code with your collaborators.", summary.id);
    } else {
        println!("Joined session {} ({} member(s))", summary.id, summary.members.len());
    }

    for path in &cli.share {
        share_file(&handle, &editor, path).await?;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => match line? {
                Some(line) => {
                    if !handle_line(&handle, line.trim()).await? {
                        break;
                    }
                }
                None => break,
            },
        }
    }

    match handle.end_session().await {
        Ok(()) | Err(SyncError::Session(_)) => {}
        Err(e) => log::warn!("Could not end the session cleanly: {e}"),
    }
    handle.shutdown();
    task.await?;
    Ok(())
}

fn load_config(cli: &Cli) -> Result<SyncConfig, BoxError> {
    let base = match &cli.config {
        Some(path) => SyncConfig::from_json_str(&std::fs::read_to_string(path)?)?,
        None => SyncConfig::default(),
    };
    let mut config = base.with_overrides(|key| std::env::var(key).ok())?;
    if let Some(server) = &cli.server {
        config.server_url = server.clone();
    }
    if let Some(name) = &cli.name {
        config.display_name = name.clone();
    }
    Ok(config)
}

async fn share_file(handle: &ClientHandle, editor: &MemoryHost, path: &Path) -> Result<(), BoxError> {
    let content = tokio::fs::read_to_string(path).await?;
    let absolute = std::fs::canonicalize(path)?;
    let key = DocumentKey::new(format!("file://{}", absolute.display()));
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| key.file_name().to_string());
    let language = path.extension().and_then(|e| e.to_str()).map(language_for);

    editor.open_local(&key, &filename, &content);
    handle
        .share_document(&key, &filename, &content, language)
        .await?;
    println!("Shared {filename}");
    Ok(())
}

fn language_for(extension: &str) -> &'static str {
    match extension {
        "py" => "python",
        "js" | "mjs" => "javascript",
        "ts" => "typescript",
        "rs" => "rust",
        "go" => "go",
        "java" => "java",
        "c" | "h" => "c",
        "cpp" | "cc" | "hpp" => "cpp",
        _ => "plaintext",
    }
}

/// Returns false when the user asked to quit.
async fn handle_line(handle: &ClientHandle, line: &str) -> Result<bool, BoxError> {
    let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();
    let result = match command {
        "" => Ok(()),
        "/quit" => return Ok(false),
        "/who" => {
            if let Some(summary) = handle.summary().await? {
                for member in &summary.members {
                    let marker = if member.id == summary.host_id { " (host)" } else { "" };
                    let active = member
                        .active_document
                        .as_ref()
                        .map(|d| format!(" editing {}", d.file_name()))
                        .unwrap_or_default();
                    println!("  {} [{}]{marker}{active}", member.display_name, member.color);
                }
            }
            Ok(())
        }
        "/follow" => match handle.summary().await?.and_then(|s| s.member_named(rest).map(|m| m.id.clone())) {
            Some(id) => handle.follow(&id).await,
            None => {
                println!("No member named '{rest}'");
                Ok(())
            }
        },
        "/unfollow" => handle.stop_following().await.map(|_| ()),
        "/run" => run_file(handle, rest).await,
        "/export" => export(handle, rest).await,
        _ => handle.send_chat(line).await.map(|_| ()),
    };
    if let Err(e) = result {
        println!("! {e}");
    }
    Ok(true)
}

async fn run_file(handle: &ClientHandle, path: &str) -> Result<(), SyncError> {
    let code = match tokio::fs::read_to_string(path).await {
        Ok(code) => code,
        Err(e) => {
            println!("! Could not read {path}: {e}");
            return Ok(());
        }
    };
    let path = Path::new(path);
    let language = path.extension().and_then(|e| e.to_str()).map_or("plaintext", language_for);
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    handle.execute_code(&code, language, &filename).await
}

async fn export(handle: &ClientHandle, path: &str) -> Result<(), SyncError> {
    let file = match std::fs::File::create(path) {
        Ok(file) => file,
        Err(e) => {
            println!("! Could not create {path}: {e}");
            return Ok(());
        }
    };
    handle.export_log(file).await?;
    println!("Log written to {path}");
    Ok(())
}

async fn print_log(mut entries: broadcast::Receiver<LogEntry>) {
    loop {
        match entries.recv().await {
            Ok(LogEntry::Chat(message)) => println!("<{}> {}", message.author_name, message.body),
            Ok(LogEntry::System(event)) => println!("* {}", event.text),
            Err(RecvError::Lagged(skipped)) => log::warn!("Skipped {skipped} log entries"),
            Err(RecvError::Closed) => break,
        }
    }
}
