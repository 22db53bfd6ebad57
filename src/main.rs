// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Colloquy main entry point - CLI, commands, and REPL.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use colloquy::config::{load_app_config, AppConfig, SessionConfig};
use colloquy::delivery::{Deliverer, PlaceholderId, Transport};
use colloquy::error::{StorageError, TransportError, TurnError};
use colloquy::inline_cache::InlineCache;
use colloquy::session::{IncomingTurn, MemoryStorage, SessionRegistry, SqliteStorage, Storage};
use colloquy::telemetry::{init_telemetry, TelemetryConfig, GLOBAL_METRICS};

/// Colloquy version string.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Colloquy - conversational sessions over LLM vendors.
#[derive(Parser)]
#[command(name = "colloquy")]
#[command(author, version, about = "Conversational sessions over LLM vendors", long_about = None)]
struct Cli {
    /// Show debug output
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Application config file
    #[arg(short, long, global = true, env = "COLLOQUY_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with a session interactively
    Chat {
        /// Session to talk to
        #[arg(short, long, default_value = "console")]
        session: String,

        /// Keep everything in memory
        #[arg(long)]
        ephemeral: bool,
    },

    /// Show or edit session configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show a session's configuration
    Show {
        /// Session to show; without one the session defaults are shown
        #[arg(short, long)]
        session: Option<String>,
    },
    /// Set one session parameter
    Set {
        #[arg(short, long)]
        session: String,
        key: String,
        value: String,
    },
}

/// Prints chunks to the terminal.
#[derive(Default)]
struct ConsoleTransport {
    next_placeholder: AtomicU64,
}

#[async_trait]
impl Transport for ConsoleTransport {
    async fn send_chunk(
        &self,
        _session_id: &str,
        text: &str,
        _formatted: bool,
    ) -> Result<(), TransportError> {
        println!("{} {}", "◆".bright_cyan(), text);
        Ok(())
    }

    async fn send_placeholder(
        &self,
        _session_id: &str,
        text: &str,
    ) -> Result<PlaceholderId, TransportError> {
        let id = self.next_placeholder.fetch_add(1, Ordering::Relaxed).to_string();
        println!("{} {}", format!("[{}]", id).dimmed(), text.dimmed());
        Ok(id)
    }

    async fn edit_placeholder(
        &self,
        id: &PlaceholderId,
        text: &str,
    ) -> Result<(), TransportError> {
        println!("{} {}", format!("[{}]", id).bright_cyan(), text);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let telemetry = if cli.verbose {
        TelemetryConfig::development()
    } else {
        TelemetryConfig::default()
    };
    let _guard = init_telemetry(&telemetry)?;

    let workspace_root = std::env::current_dir()?;
    let app = load_app_config(cli.config.as_deref(), &workspace_root)?;

    match cli.command {
        Commands::Chat { session, ephemeral } => run_chat(app, &session, ephemeral).await,
        Commands::Config { action } => handle_config(app, action).await,
        Commands::Version => {
            println!("colloquy {}", VERSION);
            Ok(())
        }
    }
}

fn open_storage(app: &AppConfig, ephemeral: bool) -> anyhow::Result<Arc<dyn Storage>> {
    if ephemeral {
        return Ok(Arc::new(MemoryStorage::new()));
    }
    Ok(Arc::new(SqliteStorage::open(&app.database_path())?))
}

fn config_yaml(config: &SessionConfig) -> anyhow::Result<String> {
    let mut mapping = serde_yaml::Mapping::new();
    for (key, value) in config.redacted(false) {
        mapping.insert(key.into(), value.into());
    }
    Ok(serde_yaml::to_string(&mapping)?)
}

async fn handle_config(app: AppConfig, action: ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show { session: None } => {
            print!("{}", config_yaml(&app.session_defaults)?);
        }
        ConfigAction::Show {
            session: Some(session),
        } => {
            let storage = open_storage(&app, false)?;
            let (config, _) = storage.load(&session, &app.session_defaults).await?;
            print!("{}", config_yaml(&config)?);
        }
        ConfigAction::Set {
            session,
            key,
            value,
        } => {
            let storage = open_storage(&app, false)?;
            let registry = SessionRegistry::new(storage, Arc::new(app));
            registry
                .update_config(&session, |c| c.set_param(&key, &value))
                .await?;
            println!("{} {} updated", "✓".green(), key);
        }
    }
    Ok(())
}

/// Result of a `/template` command.
#[derive(Debug, PartialEq)]
enum TemplateReply {
    Listed(Vec<String>),
    Saved(String),
    Removed(String),
    /// Template text to submit as the next turn.
    Use(String),
    Usage,
}

async fn handle_template(
    storage: &dyn Storage,
    session_id: &str,
    args: &str,
) -> Result<TemplateReply, StorageError> {
    let (action, rest) = args.trim().split_once(' ').unwrap_or((args.trim(), ""));
    let rest = rest.trim();
    match action {
        "" | "list" => Ok(TemplateReply::Listed(storage.list_templates(session_id).await?)),
        "add" => match rest.split_once(' ') {
            Some((name, text)) if !text.trim().is_empty() => {
                storage.add_template(session_id, name, text.trim()).await?;
                Ok(TemplateReply::Saved(name.to_string()))
            }
            _ => Ok(TemplateReply::Usage),
        },
        "use" if !rest.is_empty() => storage
            .get_template(session_id, rest)
            .await?
            .map(TemplateReply::Use)
            .ok_or_else(|| StorageError::TemplateNotFound(rest.to_string())),
        "del" if !rest.is_empty() => {
            if storage.delete_template(session_id, rest).await? {
                Ok(TemplateReply::Removed(rest.to_string()))
            } else {
                Err(StorageError::TemplateNotFound(rest.to_string()))
            }
        }
        _ => Ok(TemplateReply::Usage),
    }
}

async fn answer_turn(
    session: &colloquy::Session,
    deliverer: &Deliverer,
    turn: IncomingTurn,
) -> anyhow::Result<()> {
    match session.submit_turn(turn).await {
        Ok(outcome) => {
            for warning in &outcome.warnings {
                println!("{} {}", "!".yellow(), warning);
            }
            deliverer.deliver(session, &outcome.chunks).await?;
        }
        Err(e) => println!("{} {}", "✗".red(), e),
    }
    Ok(())
}

fn print_help() {
    println!("{}", "Commands:".bold());
    println!("  /reset              clear the conversation");
    println!("  /set <key> <value>  change a session parameter");
    println!("  /config             show the session configuration");
    println!("  /inline <query>     answer in a single editable message");
    println!("  /template [list]    list saved prompt templates");
    println!("  /template add <name> <text>");
    println!("  /template use <name>");
    println!("  /template del <name>");
    println!("  /metrics            show vendor call statistics");
    println!("  /quit               leave");
}

async fn run_chat(app: AppConfig, session_id: &str, ephemeral: bool) -> anyhow::Result<()> {
    let storage = open_storage(&app, ephemeral)?;
    let deliverer = Deliverer::new(Arc::new(ConsoleTransport::default()), Duration::ZERO);
    let inline = Arc::new(InlineCache::<String>::new(Duration::from_secs(
        app.inline_cache_ttl_secs,
    )));
    let sweeper = inline.spawn_sweeper(Duration::from_secs(app.inline_sweep_interval_secs.max(1)));

    let registry = SessionRegistry::new(storage, Arc::new(app));
    let session = registry.get_or_create(session_id).await?;

    let missing = session.config().await.missing_params();
    if !missing.is_empty() {
        println!(
            "{} set {} with /set before chatting",
            "!".yellow(),
            missing.join(", ")
        );
    }
    println!(
        "{} session {} (type /help for commands)",
        "colloquy".bright_cyan().bold(),
        session_id.bright_white()
    );

    let mut editor = DefaultEditor::new()?;
    loop {
        let line = match editor.readline("> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let _ = editor.add_history_entry(line);

        let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
        match command {
            "/quit" | "/exit" => break,
            "/help" => print_help(),
            "/reset" => {
                registry.reset(session_id).await?;
                println!("{} conversation cleared", "✓".green());
            }
            "/config" => print!("{}", config_yaml(&session.config().await)?),
            "/metrics" => println!("{}", GLOBAL_METRICS.snapshot().format_report()),
            "/set" => {
                let Some((key, value)) = rest.trim().split_once(' ') else {
                    println!("{} usage: /set <key> <value>", "!".yellow());
                    continue;
                };
                match registry
                    .update_config(session_id, |c| c.set_param(key, value))
                    .await
                {
                    Ok(_) => println!("{} {} updated", "✓".green(), key),
                    Err(e) => println!("{} {}", "✗".red(), e),
                }
            }
            "/inline" => {
                let query = rest.trim();
                if let Some(answer) = inline.get(query) {
                    println!("{} {}", "◆".bright_cyan(), answer);
                    continue;
                }
                let cache = Arc::clone(&inline);
                let turn_session = Arc::clone(&session);
                let key = query.to_string();
                let turn = async move {
                    let outcome = turn_session.submit_turn(IncomingTurn::text(key.as_str())).await?;
                    cache.insert(key, outcome.answer());
                    Ok::<_, TurnError>(outcome)
                };
                deliverer.deliver_inline(&session, query, turn).await?;
            }
            "/template" => {
                match handle_template(registry.storage().as_ref(), session_id, rest).await {
                    Ok(TemplateReply::Listed(names)) if names.is_empty() => {
                        println!("{} no templates saved", "·".dimmed())
                    }
                    Ok(TemplateReply::Listed(names)) => {
                        for name in names {
                            println!("  {}", name.bright_white());
                        }
                    }
                    Ok(TemplateReply::Saved(name)) => {
                        println!("{} template {} saved", "✓".green(), name)
                    }
                    Ok(TemplateReply::Removed(name)) => {
                        println!("{} template {} removed", "✓".green(), name)
                    }
                    Ok(TemplateReply::Use(text)) => {
                        answer_turn(&session, &deliverer, IncomingTurn::text(text)).await?
                    }
                    Ok(TemplateReply::Usage) => println!(
                        "{} usage: /template [list | add <name> <text> | use <name> | del <name>]",
                        "!".yellow()
                    ),
                    Err(e) => println!("{} {}", "✗".red(), e),
                }
            }
            _ => answer_turn(&session, &deliverer, IncomingTurn::text(line)).await?,
        }
    }

    sweeper.abort();
    registry.clear().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_template_commands() {
        let storage = MemoryStorage::new();

        assert_eq!(
            handle_template(&storage, "chat", "").await.unwrap(),
            TemplateReply::Listed(vec![])
        );
        assert_eq!(
            handle_template(&storage, "chat", "add haiku Write a haiku about rust")
                .await
                .unwrap(),
            TemplateReply::Saved("haiku".to_string())
        );
        assert_eq!(
            handle_template(&storage, "chat", "list").await.unwrap(),
            TemplateReply::Listed(vec!["haiku".to_string()])
        );
        assert_eq!(
            handle_template(&storage, "chat", "use haiku").await.unwrap(),
            TemplateReply::Use("Write a haiku about rust".to_string())
        );
        assert_eq!(
            handle_template(&storage, "chat", "del haiku").await.unwrap(),
            TemplateReply::Removed("haiku".to_string())
        );
        assert!(matches!(
            handle_template(&storage, "chat", "use haiku").await,
            Err(StorageError::TemplateNotFound(name)) if name == "haiku"
        ));
    }

    #[tokio::test]
    async fn test_template_usage() {
        let storage = MemoryStorage::new();
        for args in ["add", "add lonely", "use", "del", "rename a b"] {
            assert_eq!(
                handle_template(&storage, "chat", args).await.unwrap(),
                TemplateReply::Usage,
                "args: {:?}",
                args
            );
        }
    }

    #[tokio::test]
    async fn test_template_limit_is_reported() {
        let storage = MemoryStorage::new();
        for i in 0..colloquy::session::TEMPLATE_LIMIT {
            handle_template(&storage, "chat", &format!("add t{} text", i))
                .await
                .unwrap();
        }
        assert!(matches!(
            handle_template(&storage, "chat", "add extra text").await,
            Err(StorageError::TemplateLimit { .. })
        ));
    }
}
