//! tabwire - inspect and convert columnar IPC streams and files

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tabwire")]
#[command(about = "Inspect and convert tabwire IPC streams and files")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Container {
    Stream,
    File,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the messages or footer blocks of an input
    Inspect {
        /// Input path (stream or file, detected from the leading bytes)
        input: PathBuf,

        /// Footer offset for a file followed by other data
        #[arg(long)]
        footer_offset: Option<u64>,
    },

    /// Print the rows of an input
    Cat {
        input: PathBuf,

        /// Stop after this many rows
        #[arg(short, long)]
        limit: Option<usize>,

        /// One JSON object per row
        #[arg(long)]
        json: bool,

        #[arg(long)]
        footer_offset: Option<u64>,
    },

    /// Rewrite an input as a stream or file
    Convert {
        input: PathBuf,

        output: PathBuf,

        /// Output container
        #[arg(long, value_enum, default_value = "file")]
        to: Container,

        /// Write legacy framing
        #[arg(long, conflicts_with = "metadata_version")]
        legacy_format: bool,

        /// Metadata version to write (4 or 5)
        #[arg(long, value_parser = clap::value_parser!(u8).range(4..=5))]
        metadata_version: Option<u8>,

        /// Send changed dictionaries as replacements instead of deltas
        #[arg(long)]
        no_deltas: bool,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match commands::execute(cli.command) {
        Ok(output) => {
            if !output.is_empty() {
                println!("{}", output);
            }
        }
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            std::process::exit(1);
        }
    }
}
