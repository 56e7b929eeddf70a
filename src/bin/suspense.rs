//! Command-line entry point
//!
//! `run` prints one challenge per tier; `save` also records each one in
//! a directory store. Set `SUSPENSE_LOG` (an `EnvFilter` directive such
//! as `debug` or `suspense=trace`) to watch generation and rejection
//! activity on stderr.

use std::error::Error;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use suspense::challenge::{build, Challenge};
use suspense::difficulty::Difficulty;
use suspense::format::{narrated_view, raw_view};
use suspense::persistence::{ChallengeStore, DirectoryStore};

#[derive(Parser)]
#[command(
    name = "suspense",
    about = "Coroutine output-prediction challenges",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build and print one challenge per tier
    Run {
        /// Seed for the random supply (random when omitted)
        #[arg(long)]
        seed: Option<u64>,

        /// Build only this tier instead of all three
        #[arg(long, value_enum)]
        tier: Option<TierArg>,
    },

    /// Build challenges and record them in a directory store
    Save {
        /// Directory holding the stored challenges
        #[arg(value_name = "DIR")]
        directory: PathBuf,

        /// Seed for the random supply (random when omitted)
        #[arg(long)]
        seed: Option<u64>,

        /// Build only this tier instead of all three
        #[arg(long, value_enum)]
        tier: Option<TierArg>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum TierArg {
    Simple,
    Synchronization,
    Exceptions,
}

impl From<TierArg> for Difficulty {
    fn from(tier: TierArg) -> Self {
        match tier {
            TierArg::Simple => Difficulty::Simple,
            TierArg::Synchronization => Difficulty::Synchronization,
            TierArg::Exceptions => Difficulty::Exceptions,
        }
    }
}

fn main() -> ExitCode {
    if let Ok(filter) = EnvFilter::try_from_env("SUSPENSE_LOG") {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    let cli = Cli::parse();
    let outcome = match cli.command {
        Commands::Run { seed, tier } => run(seed, tier),
        Commands::Save {
            directory,
            seed,
            tier,
        } => save(&directory, seed, tier),
    };
    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {}", error);
            ExitCode::FAILURE
        }
    }
}

fn run(seed: Option<u64>, tier: Option<TierArg>) -> Result<(), Box<dyn Error>> {
    let seed = seed.unwrap_or_else(rand::random);
    for tier in selected(tier) {
        let challenge = build(tier, seed)?;
        print_challenge(&challenge);
    }
    Ok(())
}

fn save(
    directory: &Path,
    seed: Option<u64>,
    tier: Option<TierArg>,
) -> Result<(), Box<dyn Error>> {
    let seed = seed.unwrap_or_else(rand::random);
    let mut store = DirectoryStore::new(directory)?;
    for tier in selected(tier) {
        let challenge = build(tier, seed)?;
        print_challenge(&challenge);
        store.save(&challenge)?;
    }
    println!("saved under {}", directory.display());
    Ok(())
}

fn selected(tier: Option<TierArg>) -> Vec<Difficulty> {
    match tier {
        Some(tier) => vec![tier.into()],
        None => Difficulty::ALL.to_vec(),
    }
}

fn print_challenge(challenge: &Challenge) {
    println!("=== {} (seed {}) ===", challenge.tier, challenge.seed);
    println!("{}", challenge.source);
    println!();
    println!("--- output ---");
    println!("{}", raw_view(&challenge.trace));
    println!();
    println!("--- narrated ---");
    println!("{}", narrated_view(&challenge.trace));
    println!();
}
