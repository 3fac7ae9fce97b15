//! Interactive command implementations.

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use sift_core::CaseInsensitiveWordTokenizer;
use sift_engine::{Engine, Settled};
use sift_watcher::{RegisterOutcome, UnregisterOutcome};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

pub type SiftEngine = Engine<CaseInsensitiveWordTokenizer>;

/// One line of input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Search(String),
    Add(PathBuf),
    Remove(PathBuf),
    Stats,
    Help,
    Exit,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseError {
    #[error("'{0}' needs an argument")]
    MissingArgument(&'static str),

    #[error("Unknown command '{0}', try 'help'")]
    Unknown(String),
}

/// Parses a line. Blank lines yield `None`.
pub fn parse_line(line: &str) -> std::result::Result<Option<Command>, ParseError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let (verb, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();
    let argument = |name: &'static str| {
        if rest.is_empty() {
            Err(ParseError::MissingArgument(name))
        } else {
            Ok(rest)
        }
    };

    let command = match verb {
        "search" | "s" => Command::Search(argument("search")?.to_string()),
        "add" => Command::Add(PathBuf::from(argument("add")?)),
        "remove" | "rm" => Command::Remove(PathBuf::from(argument("remove")?)),
        "stats" => Command::Stats,
        "help" | "?" => Command::Help,
        "exit" | "quit" => Command::Exit,
        other => return Err(ParseError::Unknown(other.to_string())),
    };
    Ok(Some(command))
}

pub async fn search(engine: &SiftEngine, query: &str) -> Result<()> {
    let postings = engine.query(query).await?;
    if postings.is_empty() {
        println!("No matches found for \"{}\"", query);
        return Ok(());
    }

    let mut documents: Vec<_> = postings.into_iter().collect();
    documents.sort_by(|a, b| a.0.cmp(&b.0));

    println!("Found \"{}\" in {} documents:\n", query, documents.len());
    for (document, positions) in documents {
        let rendered: Vec<String> = positions.iter().map(ToString::to_string).collect();
        println!(
            "  {} {}",
            document.display().to_string().cyan(),
            format!("({} hits)", positions.len()).dimmed()
        );
        println!("    {}", rendered.join(", "));
    }
    Ok(())
}

pub async fn add(engine: &SiftEngine, path: &Path) -> Result<()> {
    let (outcome, settled) = engine.add_watch(path).await?;
    match outcome {
        RegisterOutcome::Ok => {
            wait_for_settle(settled, format!("Indexing {}...", path.display())).await?;
            println!("{} Watching {}", "✓".green(), path.display());
        }
        RegisterOutcome::AlreadyWatched => {
            println!("{} {} is already watched", "⚠".yellow(), path.display());
        }
        RegisterOutcome::Error(e) => return Err(e.into()),
    }
    Ok(())
}

pub async fn remove(engine: &SiftEngine, path: &Path) -> Result<()> {
    let (outcome, settled) = engine.remove_watch(path).await?;
    match outcome {
        UnregisterOutcome::Ok => {
            wait_for_settle(settled, format!("Forgetting {}...", path.display())).await?;
            println!("{} Stopped watching {}", "✓".green(), path.display());
        }
        UnregisterOutcome::WasNotWatched => {
            println!("{} {} is not watched", "⚠".yellow(), path.display());
        }
        UnregisterOutcome::ParentAlreadyWatched => {
            println!(
                "{} {} is inside a watched tree, remove the tree root instead",
                "⚠".yellow(),
                path.display()
            );
        }
        UnregisterOutcome::Error(e) => return Err(e.into()),
    }
    Ok(())
}

pub async fn stats(engine: &SiftEngine) -> Result<()> {
    let stats = engine.stats().await?;
    println!("{}", "Sift Index".cyan().bold());
    println!("  {} {}", "Documents:".dimmed(), stats.documents);
    println!("  {} {}", "Tokens:".dimmed(), stats.tokens);
    println!("  {} {}", "Shards:".dimmed(), stats.shards);
    Ok(())
}

pub fn help() {
    println!("{}", "Commands".cyan().bold());
    println!("  {}   find every position of a word", "search <word>".green());
    println!("  {}      watch and index a directory tree", "add <dir>".green());
    println!("  {}   stop watching a directory tree", "remove <dir>".green());
    println!("  {}          show index size", "stats".green());
    println!("  {}           quit", "exit".green());
}

async fn wait_for_settle(settled: Settled, message: String) -> Result<()> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}")?);
    spinner.enable_steady_tick(Duration::from_millis(80));
    spinner.set_message(message);

    let result = settled.wait().await;
    spinner.finish_and_clear();
    Ok(result?)
}
