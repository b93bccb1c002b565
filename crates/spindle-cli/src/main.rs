use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::warn;
use spindle_markup::output::OutputSink;
use spindle_markup::testing::story_runtime;
use spindle_markup::wikifier::Options;

#[derive(Parser)]
#[command(name = "spindle", about = "Story passage markup renderer")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Render a passage file and print the output tree as JSON.
    Render {
        /// Path to the passage source file.
        file: PathBuf,
        /// Directory of `.tw` passage files made available to
        /// <<include>> and <<goto>>, keyed by file stem.
        #[arg(long)]
        passages: Option<PathBuf>,
        /// Parser profile to render with.
        #[arg(long, default_value = "all")]
        profile: String,
        /// Skip the output cleanup pass.
        #[arg(long)]
        no_cleanup: bool,
        /// Emit compact JSON instead of pretty-printed.
        #[arg(long)]
        compact: bool,
    },
    /// List registered parsers and profiles.
    Profiles,
}

fn load_passages(dir: &Path) -> Result<Vec<(String, String)>> {
    let mut passages = Vec::new();
    let entries = fs::read_dir(dir)
        .with_context(|| format!("failed to read passage directory: {}", dir.display()))?;
    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("tw") {
            continue;
        }
        let Some(title) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let text = fs::read_to_string(&path)
            .with_context(|| format!("failed to read passage: {}", path.display()))?;
        passages.push((title.to_string(), text));
    }
    passages.sort();
    Ok(passages)
}

fn cmd_render(
    file: &Path,
    passages: Option<&Path>,
    profile: &str,
    no_cleanup: bool,
    compact: bool,
) -> Result<()> {
    let source = fs::read_to_string(file)
        .with_context(|| format!("failed to read passage file: {}", file.display()))?;
    let passages = match passages {
        Some(dir) => load_passages(dir)?,
        None => Vec::new(),
    };
    let borrowed: Vec<(&str, &str)> = passages
        .iter()
        .map(|(t, s)| (t.as_str(), s.as_str()))
        .collect();
    let rt = story_runtime(&borrowed);
    if !rt.parsers().profile_names().iter().any(|p| p == profile) {
        bail!("unknown parser profile: {profile}");
    }

    let sink = OutputSink::new();
    let mut options = Options::with_profile(profile);
    options.no_cleanup = no_cleanup;
    rt.interpret(&sink, &source, options)?;
    if sink.has_error_markers() {
        warn!("render of {} produced error markers", file.display());
    }

    let nodes = sink.take();
    let json = if compact {
        serde_json::to_string(&nodes)?
    } else {
        serde_json::to_string_pretty(&nodes)?
    };
    println!("{json}");
    Ok(())
}

fn cmd_profiles() -> Result<()> {
    let rt = story_runtime(&[]);
    println!("parsers:");
    for name in rt.parsers().parser_names() {
        println!("  {name}");
    }
    println!("profiles:");
    for name in rt.parsers().profile_names() {
        println!("  {name}");
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    match &cli.command {
        Command::Render {
            file,
            passages,
            profile,
            no_cleanup,
            compact,
        } => cmd_render(file, passages.as_deref(), profile, *no_cleanup, *compact),
        Command::Profiles => cmd_profiles(),
    }
}
