mod config;
mod error;
mod host;

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bus::{OutboundMessage, StateBus, Topic};
use chrono::{Local, TimeZone};
use clap::{Parser, Subcommand};
use parking_lot::Mutex;
use policy::{GroupKind, GroupReport, Status, ToolStatus};
use runtime::tools::{McpServerConfig, builtin, mcp};
use runtime::{
    AnthropicBackend, Message, ModelHandle, Orchestrator, OrchestratorConfig, SessionEnd,
    SessionEvent, ToolRegistry,
};
use storage::{Event, EventKind, EventStore, Role, SessionId};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use config::{Config, ConfigError};
use error::{Error, Result};
use host::Host;

const CONFIG_FILE: &str = "steward.toml";
const DEFAULT_LOG_FILTER: &str = "warn,cli=info,runtime=info,policy=info,bus=info,storage=info";
const PREVIEW_CHARS: usize = 200;

#[derive(Parser)]
#[command(name = "steward")]
#[command(about = "Policy-gated conversational sessions over pluggable model backends", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true, default_value = CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an interactive chat session
    Chat {
        /// Append every push update to this file, one JSON object per line
        #[arg(short, long)]
        updates: Option<PathBuf>,
    },
    /// Show every tool and its effective status
    Tools,
    /// List all sessions
    Sessions {
        /// Show only the last N sessions
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
    /// Show event logs for a session
    Logs {
        /// Session ID (prefix match supported)
        #[arg(short, long)]
        session: String,
        /// Filter by event kind (message, tool_call, tool_result, tool_repair)
        #[arg(short, long)]
        kind: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::load_or_default(&cli.config)?;
    config.apply_env();

    match cli.command {
        Some(Commands::Chat { updates }) => cmd_chat(config, updates.as_deref()).await,
        None => cmd_chat(config, None).await,
        Some(Commands::Tools) => cmd_tools(&config).await,
        Some(Commands::Sessions { limit }) => cmd_sessions(&config, limit),
        Some(Commands::Logs { session, kind }) => cmd_logs(&config, &session, kind.as_deref()),
    }
}

async fn cmd_chat(config: Config, updates: Option<&Path>) -> Result<()> {
    println!("steward v{}", env!("CARGO_PKG_VERSION"));

    if config.backend.provider != "anthropic" {
        return Err(ConfigError::UnsupportedProvider(config.backend.provider).into());
    }
    let backend = AnthropicBackend::new(config.auth()?, &config.backend.model);
    let mut model = ModelHandle::new(&config.backend.provider, &config.backend.model, backend);
    if !config.backend.enabled {
        model = model.disabled();
    }

    let data_dir = data_dir(&config);
    std::fs::create_dir_all(&data_dir)?;
    let db_path = data_dir.join("events.db");
    let store = Arc::new(EventStore::open(&db_path)?);
    println!("Session log: {}", db_path.display());

    let registry = build_registry(&config).await;

    let orchestrator = Orchestrator::new(OrchestratorConfig {
        max_steps: config.session.max_steps,
    })
    .with_store(store);
    let host = Host::new(
        model,
        config.session.custom_instructions,
        registry,
        config.tools,
        orchestrator,
        Arc::new(StateBus::new()),
    );

    let session_id = SessionId::new();
    if let Some(path) = updates {
        let bus = host.bus();
        install_update_log(bus, path)?;
        bus.subscribe(Topic::tool_status());
        bus.subscribe(Topic::active_session());
        bus.subscribe(Topic::session(session_id.to_string()));
        bus.subscribe(Topic::session_output(session_id.to_string()));
        println!("Updates: {}", path.display());
    }
    host.publish_tool_status().await;

    println!("Session ID: {session_id}");
    println!("Model: {}", config.backend.model);
    println!("Type 'quit' or Ctrl+D to exit, '/help' for commands.\n");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut history: Vec<Message> = Vec::new();

    loop {
        print!("> ");
        io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            break;
        };

        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input == "quit" || input == "exit" {
            break;
        }
        if let Some(command) = input.strip_prefix('/') {
            run_command(&host, &config.mcp_servers, command).await;
            continue;
        }

        history.push(Message::user(input));
        let turn = host.run_session(session_id, history.clone(), print_session_event);
        tokio::pin!(turn);
        let end = loop {
            tokio::select! {
                end = &mut turn => break end,
                _ = tokio::signal::ctrl_c() => {
                    host.abort_active("interrupted");
                }
            }
        };
        println!();

        match end {
            Ok(SessionEnd::Cancelled { reason }) => {
                println!("[cancelled: {reason}]\n");
                history.pop();
            }
            Ok(end) => {
                if let SessionEnd::StepLimit(_) = end {
                    println!("[step limit reached]");
                }
                if let Some(summary) = end.summary() {
                    // Instructions are prepended again on every turn.
                    history = summary
                        .history
                        .iter()
                        .filter(|m| m.role != Role::System)
                        .cloned()
                        .collect();
                }
                println!();
            }
            Err(e) => {
                eprintln!("Error: {e}\n");
                history.pop();
            }
        }
    }

    println!("\nSession ended.");
    Ok(())
}

fn print_session_event(event: &SessionEvent) {
    match event {
        SessionEvent::TextDelta(delta) => {
            print!("{delta}");
            let _ = io::stdout().flush();
        }
        SessionEvent::ToolCall(call) => {
            println!("\n[tool] {} {}", call.name, call.input);
        }
        SessionEvent::ToolRepair { name, repaired } => {
            let outcome = if *repaired { "repaired" } else { "not repaired" };
            println!("[tool] {name}: malformed arguments {outcome}");
        }
        SessionEvent::ToolResult { name, result } if result.is_error() => {
            println!("[tool] {name} failed: {}", result.payload());
        }
        SessionEvent::ToolResult { .. } | SessionEvent::StepFinished { .. } => {}
    }
}

/// Chat commands: `/tools`, `/rediscover` and
/// `/set <category|source|tool> <id> <status>`.
async fn run_command<B: runtime::Backend + 'static>(
    host: &Host<B>,
    servers: &[McpServerConfig],
    command: &str,
) {
    let words: Vec<&str> = command.split_whitespace().collect();
    match words.as_slice() {
        ["tools"] => print_report(&host.status_report()),
        ["rediscover"] => {
            for server in servers {
                match mcp::discover(server).await {
                    Ok(tools) => {
                        println!("{}: {} tools", server.name, tools.len());
                        host.set_source_tools(&server.name, tools).await;
                    }
                    Err(e) => println!("{}: {e}", server.name),
                }
            }
        }
        ["set", scope, id, status] => match set_status(host, scope, id, status).await {
            Ok(true) => println!("Updated {scope} '{id}' to {status}."),
            Ok(false) => println!("No change."),
            Err(e) => println!("{e}"),
        },
        _ => {
            println!("Commands:");
            println!("  /tools                               show tool status");
            println!("  /rediscover                          reload tools from MCP servers");
            println!("  /set category <id> <status>          always_available | requires_authorization | disabled");
            println!("  /set source <id> <status>");
            println!("  /set tool <id> <status>              the above, or inherited");
        }
    }
}

async fn set_status<B: runtime::Backend + 'static>(
    host: &Host<B>,
    scope: &str,
    id: &str,
    status: &str,
) -> std::result::Result<bool, String> {
    let value = serde_json::Value::String(status.to_string());
    let invalid = |e: serde_json::Error| format!("invalid status '{status}': {e}");
    match scope {
        "category" | "source" => {
            let status: Status = serde_json::from_value(value).map_err(invalid)?;
            let is_category = scope == "category";
            Ok(host
                .update_policy(|policy| {
                    if is_category {
                        policy.set_category_status(id, status)
                    } else {
                        policy.set_source_status(id, status)
                    }
                })
                .await)
        }
        "tool" => {
            let status: ToolStatus = serde_json::from_value(value).map_err(invalid)?;
            Ok(host
                .update_policy(|policy| policy.set_tool_status(id, status))
                .await)
        }
        other => Err(format!("unknown scope '{other}'")),
    }
}

/// Write every outbound message to `path` as one JSON line.
fn install_update_log(bus: &StateBus, path: &Path) -> Result<()> {
    let file = Mutex::new(File::create(path)?);
    bus.set_transport(Arc::new(move |message: OutboundMessage| {
        let line = match serde_json::to_string(&message) {
            Ok(line) => line,
            Err(e) => {
                warn!(topic = %message.topic(), error = %e, "failed to encode update");
                return;
            }
        };
        if let Err(e) = writeln!(file.lock(), "{line}") {
            warn!(topic = %message.topic(), error = %e, "failed to write update");
        }
    }))?;
    Ok(())
}

async fn build_registry(config: &Config) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    builtin::register_all(&mut registry);
    mcp::discover_into(&mut registry, &config.mcp_servers).await;
    registry
}

async fn cmd_tools(config: &Config) -> Result<()> {
    let registry = build_registry(config).await;
    let report = policy::Resolver::new(&config.tools).compute_status_report(registry.iter());
    print_report(&report);
    Ok(())
}

fn print_report(report: &[GroupReport]) {
    if report.is_empty() {
        println!("No tools registered.");
        return;
    }
    for group in report {
        let kind = match group.kind {
            GroupKind::Category => "category",
            GroupKind::Source => "source",
        };
        println!("{} ({kind} '{}'): {}", group.name, group.id, group.status);
        if group.tools.is_empty() {
            println!("  (no tools)");
        }
        for tool in &group.tools {
            let configured = match tool.configured_status {
                ToolStatus::Inherited => String::new(),
                status => format!("  [override: {status}]"),
            };
            println!(
                "  {:<24} {:<24}{configured}",
                tool.id,
                tool.resolved_status.to_string()
            );
        }
    }
}

fn cmd_sessions(config: &Config, limit: usize) -> Result<()> {
    let store = open_store(config)?;
    let sessions = store.list_sessions()?;

    if sessions.is_empty() {
        println!("No sessions found.");
        return Ok(());
    }

    println!(
        "{:<36}  {:<20}  {:<8}  STATUS",
        "SESSION ID", "STARTED", "MSGS"
    );
    println!("{}", "-".repeat(80));

    for summary in sessions.into_iter().take(limit) {
        let started = Local
            .from_utc_datetime(&summary.started_at.naive_utc())
            .format("%Y-%m-%d %H:%M");
        let status = match summary.end_status {
            Some(status) => status.to_string(),
            None => "active".to_string(),
        };
        println!(
            "{:<36}  {:<20}  {:<8}  {status}",
            summary.id, started, summary.message_count
        );
    }

    Ok(())
}

fn cmd_logs(config: &Config, session_prefix: &str, kind_filter: Option<&str>) -> Result<()> {
    let store = open_store(config)?;

    // Find session by prefix
    let sessions = store.list_sessions()?;
    let matching: Vec<_> = sessions
        .iter()
        .filter(|s| s.id.to_string().starts_with(session_prefix))
        .collect();

    let session_id = match matching.as_slice() {
        [] => {
            return Err(Error::SessionNotFound {
                prefix: session_prefix.to_string(),
            });
        }
        [only] => only.id,
        _ => {
            return Err(Error::AmbiguousSession {
                prefix: session_prefix.to_string(),
                matches: matching.iter().map(|s| s.id.to_string()).collect(),
            });
        }
    };

    let events = store.load_events(session_id, kind_filter)?;

    if events.is_empty() {
        println!("No events found for session {session_id}");
        return Ok(());
    }

    println!("Session: {session_id}\n");

    for event in events {
        print_event(&event);
    }

    Ok(())
}

fn print_event(event: &Event) {
    let time = Local
        .from_utc_datetime(&event.timestamp.naive_utc())
        .format("%H:%M:%S");

    match &event.kind {
        EventKind::SessionStart => {
            println!("[{time}] === Session started ===");
        }
        EventKind::SessionEnd { status } => {
            println!("[{time}] === Session ended ({status}) ===");
        }
        EventKind::Message { role, content } => {
            let role_str = role.to_string().to_uppercase();
            println!("[{time}] {role_str}: {}", preview(content));
        }
        EventKind::ToolCall { name, input } => {
            println!("[{time}] TOOL CALL: {name} {}", preview(&input.to_string()));
        }
        EventKind::ToolResult {
            name,
            output,
            is_error,
        } => {
            let label = if *is_error { "TOOL ERROR" } else { "TOOL RESULT" };
            println!("[{time}] {label}: {name} {}", preview(&output.to_string()));
        }
        EventKind::ToolRepair { name, repaired } => {
            let outcome = if *repaired { "repaired" } else { "failed" };
            println!("[{time}] TOOL REPAIR: {name} {outcome}");
        }
    }
}

/// Truncate long text for display.
fn preview(text: &str) -> String {
    if text.chars().count() > PREVIEW_CHARS {
        let head: String = text.chars().take(PREVIEW_CHARS).collect();
        format!("{head}...")
    } else {
        text.to_string()
    }
}

fn open_store(config: &Config) -> Result<EventStore> {
    let db_path = data_dir(config).join("events.db");

    if !db_path.exists() {
        return Err(Error::DatabaseNotFound { path: db_path });
    }

    Ok(EventStore::open(&db_path)?)
}

fn data_dir(config: &Config) -> PathBuf {
    config
        .data_dir
        .clone()
        .or_else(dirs_data_dir)
        .unwrap_or_else(|| ".steward".into())
}

fn dirs_data_dir() -> Option<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".local/share/steward"))
    }
    #[cfg(target_os = "linux")]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".local/share")))
            .map(|p| p.join("steward"))
    }
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|h| PathBuf::from(h).join("steward"))
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
    {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_truncates_on_char_boundaries() {
        let text = "é".repeat(PREVIEW_CHARS + 5);
        let shown = preview(&text);
        assert!(shown.ends_with("..."));
        assert_eq!(shown.chars().count(), PREVIEW_CHARS + 3);
        assert_eq!(preview("short"), "short");
    }

    #[test]
    fn configured_data_dir_wins() {
        let mut config = Config::default();
        config.data_dir = Some(PathBuf::from("/tmp/steward-test"));
        assert_eq!(data_dir(&config), PathBuf::from("/tmp/steward-test"));
    }

    #[test]
    fn cli_parses_subcommands() {
        let cli = Cli::parse_from(["steward", "--config", "other.toml", "logs", "-s", "abc"]);
        assert_eq!(cli.config, PathBuf::from("other.toml"));
        assert!(matches!(
            cli.command,
            Some(Commands::Logs { ref session, kind: None }) if session == "abc"
        ));

        let cli = Cli::parse_from(["steward", "chat", "--updates", "updates.ndjson"]);
        assert!(matches!(
            cli.command,
            Some(Commands::Chat { updates: Some(ref path) }) if path == Path::new("updates.ndjson")
        ));
    }
}
