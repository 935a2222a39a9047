// Command-line interface

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

pub mod commands;

#[derive(Parser)]
#[command(name = "magpie", version, about = "LLM-assisted qualitative coding for chat archives")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run a codebook through the merge-and-refine pipeline
    Consolidate {
        /// Input codebook JSON
        #[arg(long)]
        codebook: PathBuf,

        /// Where to write the consolidated codebook (defaults to the input)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Dry-run: serve LLM responses from cache only
        #[arg(long)]
        fake: bool,

        /// Ask the model to rename merged categories
        #[arg(long)]
        rename_categories: bool,
    },

    /// Combine independently coded codebooks by exact label match
    Merge {
        /// Input codebook JSON files
        #[arg(long, num_args = 1..)]
        inputs: Vec<PathBuf>,

        #[arg(long)]
        output: PathBuf,
    },

    /// Compare codebooks against a reference and build the network payload
    Evaluate {
        /// Reference codebook JSON
        #[arg(long)]
        reference: PathBuf,

        /// Codebooks to compare
        #[arg(long, num_args = 1..)]
        codebooks: Vec<PathBuf>,

        #[arg(long)]
        output: PathBuf,
    },

    /// Write a codebook as a spreadsheet (CSV)
    Export {
        #[arg(long)]
        codebook: PathBuf,

        #[arg(long)]
        output: PathBuf,
    },

    /// Read a codebook back from a spreadsheet (CSV)
    Import {
        #[arg(long)]
        spreadsheet: PathBuf,

        #[arg(long)]
        output: PathBuf,
    },
}

pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Consolidate {
            codebook,
            output,
            fake,
            rename_categories,
        } => {
            let config = crate::config::load_config()?;
            let output = output.unwrap_or_else(|| codebook.clone());
            commands::consolidate(&config, &codebook, &output, fake, rename_categories).await
        }
        Command::Merge { inputs, output } => commands::merge(&inputs, &output),
        Command::Evaluate {
            reference,
            codebooks,
            output,
        } => {
            let config = crate::config::load_config()?;
            commands::evaluate(&config, &reference, &codebooks, &output).await
        }
        Command::Export { codebook, output } => commands::export(&codebook, &output),
        Command::Import {
            spreadsheet,
            output,
        } => commands::import(&spreadsheet, &output),
    }
}
