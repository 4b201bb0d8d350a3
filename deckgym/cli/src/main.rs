use std::path::{Path, PathBuf};

use anyhow::{bail, ensure, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use deckgym_session::{
    ActionBounds, ConsolePresenter, DeckCatalog, SessionConfig, SessionState, SimulationSession,
    TextDeckCatalog,
};
use rand::{rngs::SmallRng, SeedableRng};
use serde::Serialize;
use serde_json::{json, Value};
use shared_logging::{JsonLogger, LogLevel, LogRecord};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "deckgym", version, about = "Drive deck-configured simulators as control environments")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Prints the control factors, tracked variables and session layout of a config.
    Inspect {
        /// Session configuration (TOML).
        #[arg(long)]
        config: PathBuf,
    },
    /// Rolls out episodes with a built-in controller.
    Run(RunArgs),
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Session configuration (TOML).
    #[arg(long)]
    config: PathBuf,
    /// Number of episodes to roll out.
    #[arg(long, default_value_t = 1)]
    episodes: usize,
    /// Action source.
    #[arg(long, value_enum, default_value_t = Controller::Random)]
    controller: Controller,
    /// Action value used by the constant controller.
    #[arg(long, default_value_t = 1.0)]
    value: f64,
    /// Step limit per episode.
    #[arg(long, default_value_t = 100)]
    max_steps: usize,
    /// Print the latest record after each step.
    #[arg(long)]
    render: bool,
    /// Seed for the random controller.
    #[arg(long)]
    seed: Option<u64>,
    /// JSONL run log; defaults to a timestamped file under the output root.
    #[arg(long)]
    log: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
enum Controller {
    /// Uniform samples from the action bounds.
    Random,
    /// The same value for every control factor.
    Constant,
}

#[derive(Debug, Serialize)]
struct EpisodeSummary {
    episode: usize,
    steps: usize,
    total_reward: f64,
    final_state: SessionState,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Inspect { config } => handle_inspect(&config),
        Commands::Run(args) => handle_run(&args),
    }
}

fn handle_inspect(path: &Path) -> Result<()> {
    let config = SessionConfig::load(path)?;
    let catalog = TextDeckCatalog::load(&config.session.deck, config.deck_format.record_suffix.as_str())
        .with_context(|| format!("reading deck {}", config.session.deck.display()))?;
    let report = json!({
        "deck": config.session.deck,
        "control_factors": catalog.control_factors(),
        "controlled": config.session.control_factors,
        "tracked_variables": catalog.tracked_variables(),
        "layout": {
            "output_root": config.session.output_root,
            "session_id": config.session.session_id,
            "deck_file": config.session.deck_file,
            "simulator_log": config.session.simulator_log,
            "output_file": config.output.file_name,
            "output_extension": config.output.extension,
            "retain_suffixes": config.output.retain_suffixes,
        },
        "executables": {
            "initialize": config.executables.initialize.path,
            "advance": config.executables.advance.path,
        },
        "control_horizon": config.session.control_horizon,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn handle_run(args: &RunArgs) -> Result<()> {
    ensure!(args.episodes > 0, "--episodes must be at least 1");
    ensure!(args.max_steps > 0, "--max-steps must be at least 1");
    let config = SessionConfig::load(&args.config)?;
    let log_path = match &args.log {
        Some(path) => path.clone(),
        None => default_log_path(&config.session.output_root),
    };
    let run_log = JsonLogger::new(&log_path)?;
    let bounds = config.actions;

    let mut builder = SimulationSession::builder(config);
    if args.render {
        builder = builder.presenter(ConsolePresenter::new(std::io::stdout()));
    }
    let mut env = builder.build().context("building simulation session")?;
    let width = env.control_factors().len();
    let mut rng = args
        .seed
        .map_or_else(SmallRng::from_entropy, SmallRng::seed_from_u64);

    log_run_event(
        &run_log,
        env.id(),
        LogLevel::Info,
        "run.started",
        json!({
            "config": args.config,
            "controller": args.controller,
            "episodes": args.episodes,
            "max_steps": args.max_steps,
        }),
    )?;

    let mut summaries = Vec::with_capacity(args.episodes);
    for episode in 1..=args.episodes {
        let outcome = env
            .reset()
            .with_context(|| format!("resetting episode {episode}"))?;
        println!(
            "episode {episode}: session {} horizon {} baseline {:?}",
            env.id(),
            outcome.info.horizon,
            outcome.info.record
        );

        let mut total_reward = 0.0;
        let mut steps = 0;
        while steps < args.max_steps {
            let action = choose_action(args.controller, args.value, &bounds, &mut rng, width);
            let step = match env.step(&action) {
                Ok(step) => step,
                Err(err) => {
                    tracing::error!(episode, error = %err, "step failed");
                    log_run_event(
                        &run_log,
                        env.id(),
                        LogLevel::Error,
                        "run.step.failed",
                        json!({ "episode": episode, "error": err.to_string() }),
                    )?;
                    bail!("episode {episode} step {}: {err}", steps + 1);
                }
            };
            steps += 1;
            total_reward += step.reward;
            println!(
                "  step {:>4} t={:<10} reward={:<12.4} action={:?}{}",
                step.info.step,
                step.info.time,
                step.reward,
                step.info.action,
                end_marker(step.terminated, step.truncated)
            );
            log_run_event(
                &run_log,
                env.id(),
                LogLevel::Info,
                "run.step",
                json!({ "episode": episode, "outcome": step }),
            )?;
            if args.render {
                env.render();
            }
            if step.terminated || step.truncated {
                break;
            }
        }

        let summary = EpisodeSummary {
            episode,
            steps,
            total_reward,
            final_state: env.state(),
        };
        log_run_event(
            &run_log,
            env.id(),
            LogLevel::Info,
            "run.episode",
            serde_json::to_value(&summary)?,
        )?;
        // reset() is rejected while Ready.
        if env.state() == SessionState::Ready && episode < args.episodes {
            env.close()?;
        }
        summaries.push(summary);
    }

    let closed = env.close()?;
    log_run_event(
        &run_log,
        env.id(),
        LogLevel::Info,
        "run.completed",
        json!({ "retained": closed.retained, "removed": closed.removed.len() }),
    )?;
    println!("{}", serde_json::to_string_pretty(&summaries)?);
    println!("run log: {}", log_path.display());
    Ok(())
}

fn choose_action(
    controller: Controller,
    value: f64,
    bounds: &ActionBounds,
    rng: &mut SmallRng,
    width: usize,
) -> Vec<f64> {
    match controller {
        Controller::Random => bounds.sample(rng, width),
        Controller::Constant => vec![value; width],
    }
}

const fn end_marker(terminated: bool, truncated: bool) -> &'static str {
    match (terminated, truncated) {
        (true, _) => " [terminated]",
        (false, true) => " [truncated]",
        _ => "",
    }
}

fn default_log_path(output_root: &Path) -> PathBuf {
    output_root
        .join("logs")
        .join(format!("run-{}.log.jsonl", Utc::now().format("%Y%m%d-%H%M%S")))
}

fn log_run_event(
    logger: &JsonLogger,
    session: &str,
    level: LogLevel,
    event: &str,
    metadata: Value,
) -> Result<()> {
    tracing::debug!(session, event, %metadata, "run event");
    logger.log(
        &LogRecord::new("cli", level, event)
            .with_session(session)
            .with_metadata(metadata),
    )
}
