#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Command-line entry point for location feature aggregation.
//!
//! Without a subcommand, an interactive `dialoguer` menu is shown. Log
//! output is routed through `indicatif-log-bridge` so that log lines and
//! progress bars never fight for the terminal.

mod commands;
mod context;
mod interactive;
mod progress;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::commands::{CandidatesArgs, FeaturesArgs};
use crate::context::Context;

#[derive(Parser)]
#[command(name = "sitescore", about = "Location feature aggregation toolkit")]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Aggregate features around a named location and print them as JSON
    Features {
        /// Place name or address to geocode
        #[arg(long)]
        location: String,
        /// Neighborhood radius in meters
        #[arg(long)]
        radius: Option<f64>,
        /// Sub-sample radius in meters
        #[arg(long)]
        sub_radius: Option<f64>,
        /// Maximum number of sample points
        #[arg(long)]
        max_points: Option<usize>,
    },
    /// Grid a city boundary into candidate locations
    Candidates {
        /// City or region name
        #[arg(long)]
        city: String,
        /// Grid spacing in meters
        #[arg(long)]
        spacing: Option<f64>,
        /// Maximum number of candidates
        #[arg(long)]
        cap: Option<usize>,
    },
    /// Collect labeled feature rows for a city into a CSV file
    Collect {
        /// City or region name
        #[arg(long)]
        city: String,
        /// Output CSV path (resumed if it already exists)
        #[arg(long, default_value = "data/features.csv")]
        output: PathBuf,
        /// Grid spacing in meters
        #[arg(long)]
        spacing: Option<f64>,
        /// Maximum number of candidates
        #[arg(long)]
        cap: Option<usize>,
    },
    /// Show cache location and entry counts
    CacheStats,
    /// Persist the cache, rewriting legacy entries
    CacheFlush,
    /// List registered provider services
    Services,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = progress::init_logger();
    let cli = Cli::parse();

    let Some(command) = cli.command else {
        return interactive::run(cli.config.as_deref(), &multi).await;
    };

    if matches!(command, Commands::Services) {
        commands::services();
        return Ok(());
    }

    let mut ctx = Context::load(cli.config.as_deref())?;

    match command {
        Commands::Features {
            location,
            radius,
            sub_radius,
            max_points,
        } => {
            if let Some(max_points) = max_points {
                ctx.config.sampling.max_sample_points = max_points;
            }
            let args = FeaturesArgs {
                location,
                radius,
                sub_radius,
            };
            commands::features(&ctx, &args).await?;
        }
        Commands::Candidates { city, spacing, cap } => {
            let args = CandidatesArgs { city, spacing, cap };
            commands::print_candidates(&ctx, &args).await?;
        }
        Commands::Collect {
            city,
            output,
            spacing,
            cap,
        } => {
            let args = CandidatesArgs { city, spacing, cap };
            commands::collect_city(&ctx, &args, output, &multi).await?;
        }
        Commands::CacheStats => commands::cache_stats(&ctx),
        Commands::CacheFlush => commands::cache_flush(&ctx)?,
        Commands::Services => {}
    }

    Ok(())
}
