//! Portside CLI
//!
//! Thin terminal frontend over `portside-client`: one-shot file, git
//! and worktree commands plus live follows of the session list,
//! settings, and file watches.

mod config;
mod logging;

use std::future::Future;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use comfy_table::Table;
use console::style;

use portside_client::resources::{FsWatch, SessionList, SessionListState, SettingsHandle};
use portside_client::{Client, ClientError, Config};
use portside_protocol::methods::FileGetKind;
use portside_protocol::types::{Encoding, FileStatus, FileStatusCode};

const CONNECT_DEADLINE: Duration = Duration::from_secs(10);
const RPC_DEADLINE: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "portside")]
#[command(about = "Inspect and follow a Portside workspace server from the terminal")]
struct Cli {
    /// Server WebSocket URL (also PORTSIDE_URL or ~/.portside/config.toml)
    #[arg(long, env = "PORTSIDE_URL", global = true)]
    url: Option<String>,

    /// Auth token (also PORTSIDE_TOKEN or ~/.portside/config.toml)
    #[arg(long, env = "PORTSIDE_TOKEN", global = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Follow the session list live
    Sessions,
    /// Follow server settings live
    Settings,
    /// List a directory (or show what a path is)
    Ls {
        #[arg(default_value = "")]
        path: String,
    },
    /// Print a file's content
    Cat { path: String },
    /// Write stdin to a file on the server
    Write { path: String },
    /// Follow change events for a file or directory
    Watch { path: String },
    /// Git state
    #[command(subcommand)]
    Git(GitCommands),
    /// Worktree management
    #[command(subcommand)]
    Worktree(WorktreeCommands),
    /// Session management
    #[command(subcommand)]
    Session(SessionCommands),
}

#[derive(Subcommand)]
enum SessionCommands {
    /// Create a new session
    New,
    /// Delete a session
    Rm { session_id: String },
    /// Rename a session
    Rename { session_id: String, title: String },
}

#[derive(Subcommand)]
enum GitCommands {
    /// Staged and unstaged changes
    Status,
    /// Diff for one path
    Diff {
        path: String,
        #[arg(long)]
        staged: bool,
    },
}

#[derive(Subcommand)]
enum WorktreeCommands {
    List,
    Create { name: String, branch: String },
    Delete {
        name: String,
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _logging = logging::init_logging()?;

    let (url, token) = config::resolve(cli.url, cli.token)?;
    let mut client_config = Config::new(url.clone());
    if let Some(token) = token {
        client_config = client_config.with_token(token);
    }

    let client = Client::new(client_config);
    client.connect().await?;
    tokio::time::timeout(CONNECT_DEADLINE, client.wait_until_connected())
        .await
        .with_context(|| format!("timed out connecting to {url}"))??;

    match cli.command {
        Commands::Sessions => cmd_sessions(&client).await,
        Commands::Settings => cmd_settings(&client).await,
        Commands::Ls { path } => cmd_ls(&client, path).await,
        Commands::Cat { path } => cmd_cat(&client, path).await,
        Commands::Write { path } => cmd_write(&client, path).await,
        Commands::Watch { path } => cmd_watch(&client, path).await,
        Commands::Git(git) => match git {
            GitCommands::Status => cmd_git_status(&client).await,
            GitCommands::Diff { path, staged } => cmd_git_diff(&client, path, staged).await,
        },
        Commands::Worktree(worktree) => match worktree {
            WorktreeCommands::List => cmd_worktree_list(&client).await,
            WorktreeCommands::Create { name, branch } => {
                cmd_worktree_create(&client, name, branch).await
            }
            WorktreeCommands::Delete { name, force } => {
                cmd_worktree_delete(&client, name, force).await
            }
        },
        Commands::Session(session) => {
            let list = SessionList::subscribe(&client);
            match session {
                SessionCommands::New => {
                    let meta = deadline(list.create()).await?;
                    println!("{}  {}", meta.id, meta.title);
                    Ok(())
                }
                SessionCommands::Rm { session_id } => {
                    deadline(list.delete(&session_id)).await?;
                    eprintln!("deleted {session_id}");
                    Ok(())
                }
                SessionCommands::Rename { session_id, title } => {
                    deadline(list.rename(&session_id, &title)).await?;
                    eprintln!("renamed {session_id}");
                    Ok(())
                }
            }
        }
    }
}

/// Bound a unary call with the CLI's request deadline.
async fn deadline<T>(fut: impl Future<Output = Result<T, ClientError>>) -> anyhow::Result<T> {
    match tokio::time::timeout(RPC_DEADLINE, fut).await {
        Ok(result) => Ok(result?),
        Err(_) => bail!("request timed out after {}s", RPC_DEADLINE.as_secs()),
    }
}

async fn cmd_sessions(client: &Client) -> anyhow::Result<()> {
    let list = SessionList::subscribe(client);
    let mut state = list.state();
    eprintln!("{}", style("Following sessions — ctrl-c to exit").dim());

    loop {
        render_sessions(&state.borrow_and_update().clone());
        tokio::select! {
            changed = state.changed() => {
                if changed.is_err() {
                    bail!("session subscription ended unexpectedly");
                }
            }
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
    }
}

fn render_sessions(state: &SessionListState) {
    if !state.ready {
        eprintln!("{}", style("(not ready — waiting for the server)").dim());
        return;
    }
    let mut table = Table::new();
    table.set_header(["ID", "Title", "Updated"]);
    for session in &state.sessions {
        table.add_row([
            session.id.as_str(),
            session.title.as_str(),
            session.updated_at.as_str(),
        ]);
    }
    println!("{table}");
}

async fn cmd_settings(client: &Client) -> anyhow::Result<()> {
    let settings = SettingsHandle::subscribe(client);
    let mut changes = settings.changes();
    eprintln!("{}", style("Following settings — ctrl-c to exit").dim());

    loop {
        let current = settings.current();
        if current.ready {
            match current.settings {
                Some(value) => println!("sandbox: {}", value.sandbox),
                None => println!("(no settings)"),
            }
        } else {
            eprintln!("{}", style("(not ready — waiting for the server)").dim());
        }
        tokio::select! {
            changed = changes.changed() => {
                if changed.is_err() {
                    bail!("settings subscription ended unexpectedly");
                }
            }
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
    }
}

async fn cmd_ls(client: &Client, path: String) -> anyhow::Result<()> {
    let result = deadline(client.file_get(path)).await?;
    match result.kind {
        FileGetKind::Directory => {
            let entries = result.entries.unwrap_or_default();
            let mut table = Table::new();
            table.set_header(["Name", "Type", "Path"]);
            for entry in entries {
                let kind = match entry.entry_type {
                    portside_protocol::types::EntryType::Dir => "dir",
                    portside_protocol::types::EntryType::File => "file",
                };
                table.add_row([entry.name.as_str(), kind, entry.path.as_str()]);
            }
            println!("{table}");
        }
        FileGetKind::File => {
            let file = result
                .file
                .context("server said file but sent no content")?;
            println!("{} ({} bytes)", file.path, file.content.len());
        }
    }
    Ok(())
}

async fn cmd_cat(client: &Client, path: String) -> anyhow::Result<()> {
    let result = deadline(client.file_get(path.clone())).await?;
    let file = match result.kind {
        FileGetKind::File => result
            .file
            .context("server said file but sent no content")?,
        FileGetKind::Directory => bail!("{path} is a directory"),
    };
    match file.encoding {
        Encoding::Text => print!("{}", file.content),
        Encoding::Base64 => bail!("{path} is binary; refusing to print"),
    }
    Ok(())
}

async fn cmd_write(client: &Client, path: String) -> anyhow::Result<()> {
    use tokio::io::AsyncReadExt;
    let mut content = String::new();
    tokio::io::stdin()
        .read_to_string(&mut content)
        .await
        .context("failed to read stdin")?;
    deadline(client.file_write(path.clone(), content)).await?;
    eprintln!("wrote {path}");
    Ok(())
}

async fn cmd_watch(client: &Client, path: String) -> anyhow::Result<()> {
    eprintln!(
        "{}",
        style(format!("Watching {path} — ctrl-c to exit")).dim()
    );
    let _watch = FsWatch::subscribe(client, path, |changed| {
        println!("{changed}");
    });
    tokio::signal::ctrl_c().await?;
    Ok(())
}

fn status_letter(status: FileStatusCode) -> &'static str {
    match status {
        FileStatusCode::Modified => "M",
        FileStatusCode::Added => "A",
        FileStatusCode::Deleted => "D",
        FileStatusCode::Renamed => "R",
        FileStatusCode::Untracked => "?",
    }
}

fn print_file_statuses(label: &str, files: &[FileStatus]) {
    if files.is_empty() {
        return;
    }
    println!("{}", style(label).bold());
    for file in files {
        println!("  {} {}", status_letter(file.status), file.path);
    }
}

async fn cmd_git_status(client: &Client) -> anyhow::Result<()> {
    let status = deadline(client.git_status()).await?;
    if status.staged.is_empty() && status.unstaged.is_empty() {
        println!("clean");
        return Ok(());
    }
    print_file_statuses("Staged", &status.staged);
    print_file_statuses("Unstaged", &status.unstaged);
    Ok(())
}

async fn cmd_git_diff(client: &Client, path: String, staged: bool) -> anyhow::Result<()> {
    let diff = deadline(client.git_diff(path, staged)).await?;
    print!("{}", diff.diff);
    Ok(())
}

async fn cmd_worktree_list(client: &Client) -> anyhow::Result<()> {
    let worktrees = deadline(client.worktree_list()).await?;
    let mut table = Table::new();
    table.set_header(["Name", "Branch", "Path", "Main"]);
    for worktree in worktrees {
        table.add_row([
            worktree.name.as_str(),
            worktree.branch.as_str(),
            worktree.path.as_str(),
            if worktree.is_main { "*" } else { "" },
        ]);
    }
    println!("{table}");
    Ok(())
}

async fn cmd_worktree_create(client: &Client, name: String, branch: String) -> anyhow::Result<()> {
    let worktree = deadline(client.worktree_create(name, branch)).await?;
    eprintln!("created {} on {}", worktree.name, worktree.branch);
    Ok(())
}

async fn cmd_worktree_delete(client: &Client, name: String, force: bool) -> anyhow::Result<()> {
    deadline(client.worktree_delete(name.clone(), force)).await?;
    eprintln!("deleted {name}");
    Ok(())
}
