//! warmchat CLI
//!
//! Thin client over the daemon socket. Query commands send one request
//! and print the result as JSON; daemon commands manage the warmchatd
//! process (spawn, signal, probe).
//!
//! Commands:
//! - warmchat health | unread-count | unread | recent
//! - warmchat search "query" [--since ...]
//! - warmchat messages --phone <handle>
//! - warmchat bundle [--query ...] [--phone ...] [--include ...]
//! - warmchat daemon start|stop|status

use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::{json, Map, Value};

use warmchat_core::ipc::{default_pid_path, default_socket_path, default_state_dir};
use warmchat_core::{ClientError, DaemonClient, Response};

#[derive(Parser)]
#[command(name = "warmchat")]
#[command(about = "Query the Messages store through a warm local daemon")]
#[command(version)]
struct Cli {
    /// Daemon socket path
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    /// Daemon pidfile path
    #[arg(long, global = true)]
    pidfile: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Daemon liveness and store readability
    Health,

    /// Number of unread messages
    UnreadCount,

    /// Unread messages, newest first
    Unread {
        #[arg(long, default_value = "20")]
        limit: usize,

        #[command(flatten)]
        shape: ShapeArgs,
    },

    /// Most recent messages across conversations
    Recent {
        #[arg(long, default_value = "10")]
        limit: usize,

        #[command(flatten)]
        shape: ShapeArgs,
    },

    /// Substring search over message text
    Search {
        /// Search query
        query: String,

        #[arg(long, default_value = "20")]
        limit: usize,

        /// Only messages at or after this time (ISO date or datetime)
        #[arg(long)]
        since: Option<String>,

        #[command(flatten)]
        shape: ShapeArgs,
    },

    /// Message history with one contact
    Messages {
        /// Phone number or handle
        #[arg(long)]
        phone: String,

        #[arg(long, default_value = "20")]
        limit: usize,

        #[command(flatten)]
        shape: ShapeArgs,
    },

    /// Combined snapshot: unread, recent, optional search and contact history
    Bundle {
        #[arg(long)]
        query: Option<String>,

        #[arg(long)]
        phone: Option<String>,

        #[arg(long, default_value = "20")]
        unread_limit: usize,

        #[arg(long, default_value = "10")]
        recent_limit: usize,

        #[arg(long, default_value = "20")]
        search_limit: usize,

        #[arg(long, default_value = "20")]
        messages_limit: usize,

        /// Comma-separated section names to include
        #[arg(long)]
        include: Option<String>,

        #[command(flatten)]
        shape: ShapeArgs,
    },

    /// Daemon management
    Daemon {
        #[command(subcommand)]
        command: DaemonCommands,
    },
}

#[derive(Subcommand)]
enum DaemonCommands {
    /// Start the daemon
    Start {
        /// Stay attached instead of detaching into the background
        #[arg(long)]
        foreground: bool,

        /// Path to the Messages store (chat.db)
        #[arg(long)]
        store: Option<PathBuf>,
    },

    /// Stop the daemon
    Stop,

    /// Check daemon status
    Status,
}

/// Output shaping flags shared by all query commands.
#[derive(Args)]
struct ShapeArgs {
    /// Default field subset with empty values removed
    #[arg(long)]
    compact: bool,

    /// Smallest useful field set with tighter truncation
    #[arg(long)]
    minimal: bool,

    /// Comma-separated field names to keep, in order
    #[arg(long)]
    fields: Option<String>,

    /// Truncate text fields to this many characters
    #[arg(long)]
    max_text_chars: Option<usize>,
}

impl ShapeArgs {
    fn apply(&self, params: &mut Map<String, Value>) {
        if self.compact {
            params.insert("compact".to_string(), json!(true));
        }
        if self.minimal {
            params.insert("minimal".to_string(), json!(true));
        }
        if let Some(fields) = &self.fields {
            params.insert("fields".to_string(), json!(fields));
        }
        if let Some(max) = self.max_text_chars {
            params.insert("max_text_chars".to_string(), json!(max));
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let socket_path = cli.socket.clone().unwrap_or_else(default_socket_path);
    let pid_path = cli.pidfile.clone().unwrap_or_else(default_pid_path);
    let client = DaemonClient::with_socket_path(socket_path.clone());

    match cli.command {
        Commands::Health => run_query(&client, "health", json!({})),

        Commands::UnreadCount => run_query(&client, "unread_count", json!({})),

        Commands::Unread { limit, shape } => {
            let mut params = Map::new();
            params.insert("limit".to_string(), json!(limit));
            shape.apply(&mut params);
            run_query(&client, "unread_messages", Value::Object(params))
        }

        Commands::Recent { limit, shape } => {
            let mut params = Map::new();
            params.insert("limit".to_string(), json!(limit));
            shape.apply(&mut params);
            run_query(&client, "recent", Value::Object(params))
        }

        Commands::Search {
            query,
            limit,
            since,
            shape,
        } => {
            let mut params = Map::new();
            params.insert("query".to_string(), json!(query));
            params.insert("limit".to_string(), json!(limit));
            if let Some(since) = since {
                params.insert("since".to_string(), json!(since));
            }
            shape.apply(&mut params);
            run_query(&client, "text_search", Value::Object(params))
        }

        Commands::Messages {
            phone,
            limit,
            shape,
        } => {
            let mut params = Map::new();
            params.insert("phone".to_string(), json!(phone));
            params.insert("limit".to_string(), json!(limit));
            shape.apply(&mut params);
            run_query(&client, "messages_by_phone", Value::Object(params))
        }

        Commands::Bundle {
            query,
            phone,
            unread_limit,
            recent_limit,
            search_limit,
            messages_limit,
            include,
            shape,
        } => {
            let mut params = Map::new();
            params.insert("unread_limit".to_string(), json!(unread_limit));
            params.insert("recent_limit".to_string(), json!(recent_limit));
            params.insert("search_limit".to_string(), json!(search_limit));
            params.insert("messages_limit".to_string(), json!(messages_limit));
            if let Some(query) = query {
                params.insert("query".to_string(), json!(query));
            }
            if let Some(phone) = phone {
                params.insert("phone".to_string(), json!(phone));
            }
            if let Some(include) = include {
                params.insert("include".to_string(), json!(include));
            }
            shape.apply(&mut params);
            run_query(&client, "bundle", Value::Object(params))
        }

        Commands::Daemon { command } => match command {
            DaemonCommands::Start { foreground, store } => {
                daemon_start(&client, &socket_path, &pid_path, foreground, store)
            }
            DaemonCommands::Stop => daemon_stop(&client, &socket_path, &pid_path),
            DaemonCommands::Status => daemon_status(&client),
        },
    }
}

/// Send one request and print the result (or the error) as JSON.
fn run_query(client: &DaemonClient, method: &str, params: Value) -> Result<()> {
    match client.call(method, params) {
        Ok(Response {
            ok: true,
            result: Some(result),
            ..
        }) => {
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Ok(response) => {
            let (code, message) = response
                .error
                .map(|e| (e.code.as_str(), e.message))
                .unwrap_or(("ERROR", "empty response".to_string()));
            eprintln!("Error ({}): {}", code, message);
            std::process::exit(1);
        }
        Err(ClientError::DaemonNotRunning) => {
            eprintln!("Daemon is not running. Try: warmchat daemon start");
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("Failed to communicate with daemon: {}", e);
            std::process::exit(1);
        }
    }
}

fn daemon_start(
    client: &DaemonClient,
    socket_path: &PathBuf,
    pid_path: &PathBuf,
    foreground: bool,
    store: Option<PathBuf>,
) -> Result<()> {
    if client.daemon_available() {
        println!("Daemon is already running");
        return Ok(());
    }

    // Daemon binary lives next to the CLI.
    let daemon_path = std::env::current_exe()?
        .parent()
        .map(|p| p.join("warmchatd"))
        .context("could not determine executable directory")?;
    if !daemon_path.exists() {
        eprintln!("Daemon binary not found at {}", daemon_path.display());
        std::process::exit(1);
    }

    let mut command = Command::new(&daemon_path);
    command
        .arg("--socket")
        .arg(socket_path)
        .arg("--pidfile")
        .arg(pid_path);
    if let Some(store) = &store {
        command.arg("--store").arg(store);
    }

    if foreground {
        let status = command.status().context("failed to run daemon")?;
        std::process::exit(status.code().unwrap_or(1));
    }

    let logs_dir = default_state_dir().join("logs");
    std::fs::create_dir_all(&logs_dir)
        .with_context(|| format!("creating {}", logs_dir.display()))?;
    let log_file = std::fs::File::create(logs_dir.join("daemon.log"))?;
    let err_file = std::fs::File::create(logs_dir.join("daemon.err"))?;

    let child = command
        .stdin(Stdio::null())
        .stdout(Stdio::from(log_file))
        .stderr(Stdio::from(err_file))
        .spawn()
        .context("failed to start daemon")?;

    println!("Daemon started with PID {}", child.id());
    println!("Logs: {}", logs_dir.display());

    std::thread::sleep(Duration::from_millis(500));
    if client.daemon_available() {
        println!("Daemon is running and responding");
    } else {
        eprintln!("Warning: daemon started but not responding yet");
        eprintln!("Check logs: {}", logs_dir.join("daemon.err").display());
    }
    Ok(())
}

/// Exit codes: 0 stopped, 1 not running, 2 unreadable pidfile.
fn daemon_stop(client: &DaemonClient, socket_path: &PathBuf, pid_path: &PathBuf) -> Result<()> {
    if !pid_path.exists() {
        let _ = std::fs::remove_file(socket_path);
        println!("Daemon is not running");
        std::process::exit(1);
    }

    let contents = std::fs::read_to_string(pid_path)
        .with_context(|| format!("reading {}", pid_path.display()))?;
    let pid: i32 = match contents.trim().parse() {
        Ok(pid) => pid,
        Err(_) => {
            eprintln!("Unreadable pidfile at {}", pid_path.display());
            std::process::exit(2);
        }
    };

    let killed = unsafe { libc::kill(pid, libc::SIGTERM) } == 0;
    if !killed {
        // Process already gone; clean up what it left behind.
        let _ = std::fs::remove_file(pid_path);
        let _ = std::fs::remove_file(socket_path);
        println!("Daemon is not running");
        std::process::exit(1);
    }

    // Give the daemon a moment to unlink its socket and pidfile.
    for _ in 0..10 {
        if !client.daemon_available() {
            break;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    let _ = std::fs::remove_file(pid_path);
    let _ = std::fs::remove_file(socket_path);

    println!("Daemon stopped");
    Ok(())
}

fn daemon_status(client: &DaemonClient) -> Result<()> {
    if client.daemon_available() {
        match client.call("health", json!({})) {
            Ok(response) if response.ok => {
                println!("Daemon: Running");
                if let Some(result) = response.result {
                    if let Some(pid) = result.get("pid") {
                        println!("PID: {}", pid);
                    }
                    if let Some(started) = result.get("started_at").and_then(Value::as_str) {
                        println!("Started: {}", started);
                    }
                    if let Some(readable) = result.get("can_read_store") {
                        println!("Store readable: {}", readable);
                    }
                }
                Ok(())
            }
            _ => {
                println!("Daemon: Running (health check failed)");
                Ok(())
            }
        }
    } else {
        println!("Daemon: Not running");
        std::process::exit(1);
    }
}
