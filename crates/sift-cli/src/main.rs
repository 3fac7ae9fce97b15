//! Sift CLI - interactive front end for the live indexer
//!
//! Watches the directories given on the command line, then reads commands
//! from stdin until `exit` or end of input.

use clap::Parser;
use colored::Colorize;
use sift_core::CaseInsensitiveWordTokenizer;
use sift_engine::Engine;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod config;

use commands::{Command, SiftEngine};
use config::SiftConfig;

#[derive(Parser)]
#[command(name = "sift")]
#[command(author = "Sift Contributors")]
#[command(version)]
#[command(about = "Live full-text index over watched directories", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON settings file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directories to watch on startup
    paths: Vec<PathBuf>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(tracing_subscriber::EnvFilter::new(filter))
        .init();

    if let Err(e) = run(cli).await {
        eprintln!("{} {}", "error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = SiftConfig::load(cli.config.as_deref())?;
    debug!("Loaded config: {:?}", config);
    let tokenizer = CaseInsensitiveWordTokenizer::new(config.tokenizer);
    let engine = Engine::start(tokenizer, config.engine)?;

    for path in &cli.paths {
        report(commands::add(&engine, path).await);
    }

    println!("Type {} for a list of commands", "help".cyan());
    let result = repl(&engine).await;
    engine.shutdown().await;
    result
}

async fn repl(engine: &SiftEngine) -> Result<(), Box<dyn std::error::Error>> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let command = match commands::parse_line(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                report(Err(e.into()));
                continue;
            }
        };

        let result = match command {
            Command::Search(query) => commands::search(engine, &query).await,
            Command::Add(path) => commands::add(engine, &path).await,
            Command::Remove(path) => commands::remove(engine, &path).await,
            Command::Stats => commands::stats(engine).await,
            Command::Help => {
                commands::help();
                Ok(())
            }
            Command::Exit => break,
        };
        report(result);
    }

    Ok(())
}

fn report(result: Result<(), Box<dyn std::error::Error>>) {
    if let Err(e) = result {
        eprintln!("{} {}", "error:".red().bold(), e);
    }
}
