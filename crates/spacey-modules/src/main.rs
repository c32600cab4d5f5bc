// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! spacey-modules CLI - inspect module resolution and loading

use clap::{Parser, Subcommand};
use owo_colors::OwoColorize;
use spacey_modules::{Host, LoaderConfig, ModuleLoader, VERSION};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(
    name = "spacey-modules",
    about = "Inspect Spacey module resolution and loading",
    version = VERSION,
    author = "Pegasus Heavy Industries"
)]
struct Cli {
    /// Additional search root, ahead of the configured ones (repeatable)
    #[arg(long = "path", global = true)]
    paths: Vec<PathBuf>,

    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the search roots in priority order
    Paths,

    /// Print the candidate locations for an identifier, in search order
    Candidates {
        /// Module identifier
        id: String,

        /// Resolve relative identifiers against this file's directory
        #[arg(long)]
        from: Option<PathBuf>,
    },

    /// Print the location an identifier resolves to
    Resolve {
        /// Module identifier
        id: String,

        /// Resolve relative identifiers against this file's directory
        #[arg(long)]
        from: Option<PathBuf>,
    },

    /// Load a module and print its interface as JSON
    Load {
        /// Module identifier
        id: String,

        /// Resolve relative identifiers against this file's directory
        #[arg(long)]
        from: Option<PathBuf>,
    },
}

impl Command {
    fn requester_file(&self) -> Option<&Path> {
        match self {
            Command::Paths => None,
            Command::Candidates { from, .. }
            | Command::Resolve { from, .. }
            | Command::Load { from, .. } => from.as_deref(),
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("spacey_modules=debug")
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter("spacey_modules=warn")
            .with_writer(std::io::stderr)
            .init();
    }

    let loader = ModuleLoader::new(loader_config(&cli)?, Host::default())?;
    for root in cli.paths.iter().rev() {
        loader.prepend_path(root.clone());
    }

    if let Err(e) = run(&loader, &cli.command) {
        eprintln!("{}: {}", "Error".red().bold(), e);
        std::process::exit(1);
    }
    Ok(())
}

/// Configuration from `--config` or the environment. `--from` only moves
/// the base directory; the loader sees a top-level request either way.
fn loader_config(cli: &Cli) -> anyhow::Result<LoaderConfig> {
    let mut config = match &cli.config {
        Some(path) => LoaderConfig::from_file(path)?,
        None => LoaderConfig::from_env(),
    };
    if let Some(dir) = cli.command.requester_file().and_then(Path::parent) {
        config.base_dir = Some(dir.to_path_buf());
    }
    Ok(config)
}

fn run(loader: &ModuleLoader, command: &Command) -> anyhow::Result<()> {
    match command {
        Command::Paths => {
            for root in loader.paths() {
                println!("{}", root.display());
            }
        }
        Command::Candidates { id, from } => {
            for candidate in loader.candidates(id, from.as_deref())? {
                let marker = if candidate.is_file() {
                    "found".green().to_string()
                } else {
                    "-".dimmed().to_string()
                };
                println!("{} {}", marker, candidate.display());
            }
        }
        Command::Resolve { id, .. } => {
            println!("{}", loader.resolve(id)?);
        }
        Command::Load { id, .. } => {
            let exports = loader.import(id)?;
            println!("{}", serde_json::to_string_pretty(&exports)?);
        }
    }
    Ok(())
}
