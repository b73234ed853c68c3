//! Hook execution runtime entrypoint: dual-mode binary. With no subcommand it
//! reads a single hook event envelope from stdin and writes the aggregated
//! response to stdout (the hot path, invoked once per event by the host CLI).
//! With a subcommand it is the admin CLI for circuit-breaker state and config.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hookguard_config::{GuardrailsConfig, HooksRegistry};
use hookguard_core::breaker::CircuitBreaker;
use hookguard_core::knowledge::{validate_import_path, KnowledgeDb, NewKnowledgeEntry};
use hookguard_core::state::StateStore;
use std::path::PathBuf;
use std::process::ExitCode;

mod event_handlers;

#[derive(Parser)]
#[command(name = "hookguard", about = "Hook execution runtime for an agentic-coding sidecar")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Print circuit breaker and knowledge pipeline health.
    Health {
        #[arg(long)]
        json: bool,
    },
    /// List registered handlers and their circuit breaker state.
    List {
        #[arg(long)]
        json: bool,
    },
    /// Reset circuit breaker state for a handler, or every handler with --all.
    Reset {
        pattern: Option<String>,
        #[arg(long)]
        all: bool,
        #[arg(long)]
        json: bool,
    },
    /// Re-enable a handler disabled via the `disable` subcommand.
    Enable {
        pattern: String,
        #[arg(long)]
        json: bool,
    },
    /// Administratively disable a handler regardless of circuit breaker state.
    Disable {
        pattern: String,
        #[arg(long)]
        json: bool,
    },
    /// Print the effective merged configuration.
    Config {
        #[arg(long)]
        json: bool,
    },
    /// Export the knowledge database to a JSON file under the data root or cwd.
    Export {
        path: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Import knowledge entries from a JSON file under the data root or cwd.
    Import {
        path: PathBuf,
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    tokio::select! {
        result = run(cli) => match result {
            Ok(code) => code,
            Err(error) => {
                tracing::error!(%error, "hookguard runtime error");
                eprintln!("hookguard: {error:?}");
                ExitCode::from(1)
            }
        },
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("interrupted, shutting down");
            ExitCode::from(130)
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let data_root = resolve_data_root();
    let store = StateStore::new(&data_root).context("failed to initialise state store")?;

    let config = hookguard_config::load_config(&store.guardrails_config_path())
        .context("failed to load guardrails.yaml")?;
    init_tracing(&config.logging.level);

    let registry = hookguard_config::load_hooks_registry(&store.hooks_registry_path())
        .context("failed to load hooks.yaml")?;

    match cli.command {
        None => event_handlers::handle_stdin_event(&store, &config, &registry).await,
        Some(Command::Health { json }) => cmd_health(&store, &config, json),
        Some(Command::List { json }) => cmd_list(&store, &registry, json),
        Some(Command::Reset { pattern, all, json }) => cmd_reset(&store, &config, pattern, all, json),
        Some(Command::Enable { pattern, json }) => cmd_set_enabled(&store, &config, &pattern, true, json),
        Some(Command::Disable { pattern, json }) => cmd_set_enabled(&store, &config, &pattern, false, json),
        Some(Command::Config { json }) => cmd_config(&config, json),
        Some(Command::Export { path, json }) => cmd_export(&store, &path, json).await,
        Some(Command::Import { path, json }) => cmd_import(&store, &path, json).await,
    }
}

// guardrails.yaml's own `data_root` override can't apply here: it lives
// inside the directory we're trying to locate. Only the env var can.
fn resolve_data_root() -> PathBuf {
    if let Ok(override_path) = std::env::var("GUARDRAILS_DATA_ROOT") {
        return PathBuf::from(override_path);
    }
    dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".claude")
}

fn init_tracing(configured_level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    // stdout is the hook response channel, never a log sink, so every log
    // line goes to stderr instead. RUST_LOG wins over guardrails.yaml's
    // logging.level when both are set.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(configured_level));
    let fmt_layer = fmt::layer().with_writer(std::io::stderr).with_ansi(false);
    let _ = tracing_subscriber::registry().with(filter).with(fmt_layer).try_init();
}

fn cmd_health(store: &StateStore, config: &GuardrailsConfig, json: bool) -> Result<ExitCode> {
    let breaker = CircuitBreaker::new(store, &config.circuit_breaker);
    let snapshot = breaker.snapshot().context("failed to read circuit breaker state")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        println!("executions: {}", snapshot.global.executions);
        println!("failures: {}", snapshot.global.failures);
        println!("open handlers: {}", snapshot.global.open_handlers);
        for (name, handler) in &snapshot.handlers {
            println!("  {name}: {:?} (failures={})", handler.state, handler.consecutive_failures);
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_list(store: &StateStore, registry: &HooksRegistry, json: bool) -> Result<ExitCode> {
    let breaker_config = hookguard_config::CircuitBreakerConfig::default();
    let breaker = CircuitBreaker::new(store, &breaker_config);
    let snapshot = breaker.snapshot().context("failed to read circuit breaker state")?;

    if json {
        let rows: Vec<_> = registry
            .handlers
            .iter()
            .map(|handler| {
                serde_json::json!({
                    "name": handler.name,
                    "events": handler.events,
                    "state": snapshot.handlers.get(&handler.name).map(|h| h.state),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else {
        for handler in &registry.handlers {
            let state = snapshot.handlers.get(&handler.name).map(|h| h.state).unwrap_or_default();
            println!("{} [{}] {:?}", handler.name, handler.events.join(","), state);
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_reset(
    store: &StateStore,
    config: &GuardrailsConfig,
    pattern: Option<String>,
    all: bool,
    json: bool,
) -> Result<ExitCode> {
    let breaker = CircuitBreaker::new(store, &config.circuit_breaker);
    if all {
        breaker.reset_all().context("failed to reset all handlers")?;
    } else {
        let Some(pattern) = pattern else {
            eprintln!("hookguard reset: requires a handler name or --all");
            return Ok(ExitCode::from(1));
        };
        breaker.reset(&pattern).context("failed to reset handler")?;
    }
    if json {
        println!("{}", serde_json::json!({"ok": true}));
    } else {
        println!("reset ok");
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_set_enabled(
    store: &StateStore,
    config: &GuardrailsConfig,
    pattern: &str,
    enabled: bool,
    json: bool,
) -> Result<ExitCode> {
    let breaker = CircuitBreaker::new(store, &config.circuit_breaker);
    breaker
        .set_manually_disabled(pattern, !enabled)
        .context("failed to update handler state")?;
    if json {
        println!("{}", serde_json::json!({"ok": true, "handler": pattern, "enabled": enabled}));
    } else {
        println!("{pattern}: {}", if enabled { "enabled" } else { "disabled" });
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_config(config: &GuardrailsConfig, json: bool) -> Result<ExitCode> {
    if json {
        println!("{}", serde_json::to_string_pretty(config)?);
    } else {
        let value = serde_json::to_value(config)?;
        for (key, val) in hookguard_config::flatten(&value) {
            println!("{key} = {val}");
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn cmd_export(store: &StateStore, path: &std::path::Path, json: bool) -> Result<ExitCode> {
    let cwd = std::env::current_dir().context("failed to resolve current directory")?;
    let resolved = match validate_import_path(path, store.root(), &cwd) {
        Ok(resolved) => resolved,
        Err(error) => {
            eprintln!("hookguard export: {error}");
            return Ok(ExitCode::from(1));
        }
    };

    let db = KnowledgeDb::open(&store.knowledge_db_path()).context("failed to open knowledge database")?;
    let entries = db.export_all().await.context("failed to export knowledge entries")?;
    std::fs::write(&resolved, serde_json::to_vec_pretty(&entries)?).context("failed to write export file")?;

    if json {
        println!("{}", serde_json::json!({"ok": true, "exported": entries.len(), "path": resolved}));
    } else {
        println!("exported {} entries to {}", entries.len(), resolved.display());
    }
    Ok(ExitCode::SUCCESS)
}

async fn cmd_import(store: &StateStore, path: &std::path::Path, json: bool) -> Result<ExitCode> {
    let cwd = std::env::current_dir().context("failed to resolve current directory")?;
    let resolved = match validate_import_path(path, store.root(), &cwd) {
        Ok(resolved) => resolved,
        Err(error) => {
            eprintln!("hookguard import: {error}");
            return Ok(ExitCode::from(1));
        }
    };

    let raw = std::fs::read(&resolved).context("failed to read import file")?;
    let entries: Vec<NewKnowledgeEntry> =
        serde_json::from_slice(&raw).context("import file is not a valid knowledge export")?;

    let db = KnowledgeDb::open(&store.knowledge_db_path()).context("failed to open knowledge database")?;
    let imported = db.import_entries(entries).await.context("failed to import knowledge entries")?;

    if json {
        println!("{}", serde_json::json!({"ok": true, "imported": imported}));
    } else {
        println!("imported {imported} entries");
    }
    Ok(ExitCode::SUCCESS)
}

