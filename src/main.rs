use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use arena::backend::http::HttpBackend;
use arena::config::{Config, KNOWN_KEYS};
use arena::consts::{DEFAULT_BASE_URL, default_db_path};
use arena::definition::{Definition, InteractionPattern, Params};
use arena::engine::{Engine, EngineConfig, SlotId};
use arena::events::Event;
use arena::report::{BannerInfo, print_banner, print_completion};
use arena::spinner::Spinner;

#[derive(Parser)]
#[command(name = "arena", version, about = "Run AI endpoints and compare them side by side.")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Playground proxy address (overrides the stored `base_url`)
    #[arg(long)]
    base_url: Option<String>,

    /// API key forwarded to the provider
    #[arg(long, env = "ARENA_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// SQLite database path for settings (default: ~/.arena/arena.db)
    #[arg(short, long)]
    db: Option<PathBuf>,

    /// Debug logging on stderr
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Run one definition in the solo slot
    Run {
        /// Definition id
        definition: String,

        /// Request parameter as key=value (repeatable)
        #[arg(short, long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,
    },
    /// Run two definitions side by side
    Compare {
        left: String,
        right: String,

        /// Parameter sent to both sides, as key=value (repeatable)
        #[arg(short, long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,

        /// Parameter for the left side only
        #[arg(long = "left-param", value_parser = parse_param)]
        left_params: Vec<(String, String)>,

        /// Parameter for the right side only
        #[arg(long = "right-param", value_parser = parse_param)]
        right_params: Vec<(String, String)>,
    },
    /// Read or change stored settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Get { key: String },
    Set { key: String, value: String },
    Unset { key: String },
}

fn parse_param(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{s}'"))?;
    if key.is_empty() {
        return Err(format!("empty parameter name in '{s}'"));
    }
    Ok((key.to_string(), value.to_string()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG overrides; --verbose => debug; else warnings only
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if cli.verbose { "arena=debug" } else { "arena=warn" })
    });
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    let db_path = cli.db.clone().unwrap_or_else(default_db_path);
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let db = db_path.to_str().context("database path is not valid UTF-8")?;
    let config = Config::open(db)?;

    let (base_url, engine) = match &cli.command {
        Command::Config { action } => return handle_config(&config, action),
        _ => build_engine(&cli, &config)?,
    };

    match cli.command {
        Command::Run { definition, params } => run(&engine, &base_url, &definition, params).await,
        Command::Compare {
            left,
            right,
            params,
            left_params,
            right_params,
        } => {
            let shared: Params = params.into_iter().collect();
            let mut left_all = shared.clone();
            left_all.extend(left_params);
            let mut right_all = shared;
            right_all.extend(right_params);
            compare(&engine, &base_url, (left.as_str(), left_all), (right.as_str(), right_all)).await
        }
        Command::Config { .. } => Ok(()),
    }
}

fn build_engine(cli: &Cli, config: &Config) -> anyhow::Result<(String, Engine)> {
    let base_url = match &cli.base_url {
        Some(url) => url.clone(),
        None => config
            .base_url()?
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
    };
    let mut engine_config = EngineConfig::default();
    if let Some(interval) = config.poll_interval()? {
        engine_config.default_poll_interval = interval;
    }
    let backend = HttpBackend::new(base_url.as_str(), cli.api_key.clone());
    Ok((base_url, Engine::new(Arc::new(backend), engine_config)))
}

fn handle_config(config: &Config, action: &ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => match config.get(key)? {
            Some(value) => println!("{value}"),
            None => println!("{key} is not set"),
        },
        ConfigAction::Set { key, value } => {
            config.set(key, value)?;
            println!("✓ {key} = {value}");
        }
        ConfigAction::Unset { key } => {
            if !KNOWN_KEYS.contains(&key.as_str()) {
                bail!("unknown config key '{key}' (known: {})", KNOWN_KEYS.join(", "));
            }
            config.remove(key)?;
            println!("✓ {key} unset");
        }
    }
    Ok(())
}

fn check_params(definition: &Definition, params: &Params) -> anyhow::Result<()> {
    if let Some(name) = definition.missing_required(params) {
        bail!(
            "missing required parameter '{name}' for {} (pass -p {name}=...)",
            definition.id
        );
    }
    Ok(())
}

async fn run(
    engine: &Engine,
    base_url: &str,
    definition_id: &str,
    params: Vec<(String, String)>,
) -> anyhow::Result<()> {
    let params: Params = params.into_iter().collect();
    let definition = engine.load(SlotId::Solo, definition_id).await?;
    check_params(&definition, &params)?;

    let pattern = definition.pattern();
    print_banner(&BannerInfo {
        base_url,
        definitions: &definition.id,
        pattern: &pattern.to_string(),
    });

    let streaming = pattern == InteractionPattern::Streaming;
    let spinner = (!streaming).then(|| Spinner::start("submitting"));
    let watcher = watch_slot(engine, SlotId::Solo, spinner);

    let dispatch = engine.dispatch(SlotId::Solo, params);
    tokio::pin!(dispatch);
    let completion = tokio::select! {
        completion = &mut dispatch => completion,
        _ = tokio::signal::ctrl_c() => {
            engine.cancel(SlotId::Solo);
            dispatch.await
        }
    };
    if let Err(e) = watcher.await {
        warn!(error = %e, "event watcher task failed");
    }

    print_completion(&completion, streaming);
    Ok(())
}

async fn compare(
    engine: &Engine,
    base_url: &str,
    (left_id, left_params): (&str, Params),
    (right_id, right_params): (&str, Params),
) -> anyhow::Result<()> {
    let (left, right) = tokio::try_join!(
        engine.load(SlotId::Left, left_id),
        engine.load(SlotId::Right, right_id),
    )?;
    check_params(&left, &left_params)?;
    check_params(&right, &right_params)?;
    if !left.compatible_with(&right) {
        eprintln!(
            "warning: {} produces {} but {} produces {}",
            left.id,
            left.output_kind(),
            right.id,
            right.output_kind()
        );
    }

    print_banner(&BannerInfo {
        base_url,
        definitions: &format!("{} vs {}", left.id, right.id),
        pattern: &format!("{} / {}", left.pattern(), right.pattern()),
    });

    let spinner = Spinner::start("comparing");
    let run = engine.compare(left_params, right_params);
    tokio::pin!(run);
    let outcome = tokio::select! {
        outcome = &mut run => outcome,
        _ = tokio::signal::ctrl_c() => {
            engine.cancel_compare();
            run.await
        }
    };
    spinner.stop().await;

    println!("\n── {} (left)", left.id);
    print_completion(&outcome.left, false);
    println!("\n── {} (right)", right.id);
    print_completion(&outcome.right, false);
    Ok(())
}

/// Echo a slot's progress until it settles: tokens go to stdout, poll
/// statuses to the spinner.
fn watch_slot(engine: &Engine, slot: SlotId, spinner: Option<Spinner>) -> JoinHandle<()> {
    let mut rx = engine.events().subscribe();
    tokio::spawn(async move {
        loop {
            let event = match rx.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            };
            if event.slot() != Some(slot) {
                continue;
            }
            match &event {
                Event::Token { text, .. } => {
                    print!("{text}");
                    let _ = std::io::stdout().flush();
                }
                Event::JobQueued { request_id, .. } => {
                    if let Some(spinner) = &spinner {
                        spinner.update(format!("queued {request_id}"));
                    }
                }
                Event::PollStatus {
                    status, poll_count, ..
                } => {
                    if let Some(spinner) = &spinner {
                        spinner.update(format!("polling: {status} (#{poll_count})"));
                    }
                }
                _ => {}
            }
            if event.is_terminal() {
                break;
            }
        }
        if let Some(spinner) = spinner {
            spinner.stop().await;
        }
    })
}
