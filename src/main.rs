// SPDX-License-Identifier: GPL-3.0-only

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "filtercam")]
#[command(about = "Live camera preview with shader filters and recording")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available filters
    Filters,

    /// List available cameras
    List {
        /// Use the built-in test pattern camera
        #[arg(long)]
        synthetic: bool,
    },

    /// Run the preview pipeline without a display
    Preview {
        /// Filter id (from 'filtercam filters')
        #[arg(short, long)]
        filter: Option<String>,

        /// How long to run, in seconds
        #[arg(short, long, default_value = "5")]
        seconds: u64,

        /// Save the last composited frame as a PNG
        #[arg(long)]
        snapshot: Option<PathBuf>,

        /// Use the built-in test pattern camera
        #[arg(long)]
        synthetic: bool,
    },

    /// Record the filtered preview
    Record {
        /// Filter id (from 'filtercam filters')
        #[arg(short, long)]
        filter: Option<String>,

        /// Recording duration in seconds
        #[arg(short, long, default_value = "10")]
        seconds: u64,

        /// Output file path (default: ~/Videos/filtercam/video_TIMESTAMP.y4m)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Use the built-in test pattern camera
        #[arg(long)]
        synthetic: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set RUST_LOG to control the log level, e.g. RUST_LOG=filtercam=debug
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Filters => cli::list_filters(),
        Commands::List { synthetic } => cli::list_cameras(synthetic),
        Commands::Preview {
            filter,
            seconds,
            snapshot,
            synthetic,
        } => cli::run_preview(filter.as_deref(), seconds, snapshot, synthetic),
        Commands::Record {
            filter,
            seconds,
            output,
            synthetic,
        } => cli::record_video(filter.as_deref(), seconds, output, synthetic),
    }
}
