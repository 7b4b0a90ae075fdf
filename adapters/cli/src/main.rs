#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Command-line adapter that packs, inspects and replays Tank Arena matches.

mod battle;
mod config;

use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tank_arena_core::{AiDescription, MatchDescription, DEFAULT_EXECUTION_LIMIT};
use tracing::info;

use crate::{battle::Battle, config::EngineConfig};

#[derive(Debug, Parser)]
#[command(name = "tank-arena", about = "Headless Tank Arena match runner")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the roster of a match description
    Inspect {
        /// Path to the match description (.json)
        ubd: PathBuf,
    },

    /// Bundle AI scripts into a match description
    Pack {
        /// Match-wide random seed
        #[arg(long, default_value_t = 0.5)]
        seed: f64,

        /// Let AIs fight in named teams
        #[arg(long)]
        team_mode: bool,

        /// AI entry in the form `name[@team]=path`
        #[arg(long = "ai", required = true)]
        ais: Vec<AiEntry>,

        /// Run every AI in an isolated worker
        #[arg(long)]
        sandbox: bool,

        /// Soft per-tick budget of every AI in milliseconds
        #[arg(long, default_value_t = DEFAULT_EXECUTION_LIMIT.as_millis() as u64)]
        execution_limit: u64,

        /// Where to write the description; stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Replay a match description headlessly and print the outcome
    Run {
        /// Path to the match description (.json)
        ubd: PathBuf,

        /// Engine configuration (.toml)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Override the tick budget of the configuration
        #[arg(long)]
        ticks: Option<u64>,
    },
}

/// AI entry given on the command line.
#[derive(Clone, Debug, PartialEq)]
struct AiEntry {
    name: String,
    team: Option<String>,
    path: PathBuf,
}

impl FromStr for AiEntry {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (label, path) = value
            .split_once('=')
            .ok_or_else(|| format!("expected name[@team]=path, got '{value}'"))?;
        let (name, team) = match label.split_once('@') {
            Some((name, team)) => (name, Some(team.to_owned())),
            None => (label, None),
        };
        if name.is_empty() || path.is_empty() {
            return Err(format!("expected name[@team]=path, got '{value}'"));
        }
        Ok(Self {
            name: name.to_owned(),
            team,
            path: PathBuf::from(path),
        })
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Inspect { ubd } => inspect(ubd),
        Command::Pack {
            seed,
            team_mode,
            ais,
            sandbox,
            execution_limit,
            output,
        } => pack(seed, team_mode, &ais, sandbox, execution_limit, output),
        Command::Run { ubd, config, ticks } => run(ubd, config, ticks),
    }
}

fn load_description(path: &Path) -> Result<MatchDescription> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read match description {}", path.display()))?;
    MatchDescription::from_json(&text)
        .with_context(|| format!("invalid match description {}", path.display()))
}

fn inspect(path: PathBuf) -> Result<()> {
    let description = load_description(&path)?;
    println!("version: {}", description.version);
    println!("seed: {}", description.rng_seed);
    println!("team mode: {}", description.team_mode);
    for (index, ai) in description.ai_list.iter().enumerate() {
        println!(
            "#{} {} team={} sandbox={} limit={}ms code={}B",
            index + 1,
            ai.name,
            ai.team.as_deref().unwrap_or("-"),
            ai.use_sandbox,
            ai.execution_limit,
            ai.code.len()
        );
    }
    Ok(())
}

fn pack(
    seed: f64,
    team_mode: bool,
    ais: &[AiEntry],
    sandbox: bool,
    execution_limit: u64,
    output: Option<PathBuf>,
) -> Result<()> {
    let ai_list = ais
        .iter()
        .map(|entry| {
            let code = fs::read_to_string(&entry.path)
                .with_context(|| format!("failed to read AI script {}", entry.path.display()))?;
            Ok(AiDescription {
                name: entry.name.clone(),
                team: entry.team.clone(),
                init_data: None,
                use_sandbox: sandbox,
                code,
                execution_limit,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let description = MatchDescription {
        version: 2,
        rng_seed: seed,
        team_mode,
        ai_list,
    };
    description.validate().context("refusing to pack an invalid match")?;
    let json = description.to_json_pretty()?;

    match output {
        Some(path) => {
            fs::write(&path, json)
                .with_context(|| format!("failed to write {}", path.display()))?;
            info!(path = %path.display(), "match description written");
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn run(path: PathBuf, config: Option<PathBuf>, ticks: Option<u64>) -> Result<()> {
    let description = load_description(&path)?;
    let mut config = EngineConfig::load(config.as_deref())?;
    if let Some(ticks) = ticks {
        config.max_ticks = ticks;
    }

    let report = Battle::new(&description, config)
        .context("failed to start the match")?
        .run()?;
    print!("{report}");
    Ok(())
}
