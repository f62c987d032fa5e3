//! Interactive menu for running commands without memorizing flags.

use std::path::{Path, PathBuf};

use dialoguer::{Input, Select};
use indicatif::MultiProgress;

use crate::commands::{self, CandidatesArgs, FeaturesArgs};
use crate::context::Context;

/// Top-level actions available in the interactive menu.
enum Action {
    Features,
    Candidates,
    Collect,
    CacheStats,
    CacheFlush,
    Services,
}

impl Action {
    const ALL: &[Self] = &[
        Self::Features,
        Self::Candidates,
        Self::Collect,
        Self::CacheStats,
        Self::CacheFlush,
        Self::Services,
    ];

    #[must_use]
    const fn label(&self) -> &'static str {
        match self {
            Self::Features => "Aggregate features for a location",
            Self::Candidates => "Generate city candidates",
            Self::Collect => "Collect labeled training rows",
            Self::CacheStats => "Show cache statistics",
            Self::CacheFlush => "Flush cache to disk",
            Self::Services => "List provider services",
        }
    }
}

/// Prompts for an action and its parameters, then runs it.
///
/// # Errors
///
/// Returns an error if a prompt fails or the selected command fails.
pub async fn run(
    config_path: Option<&Path>,
    multi: &MultiProgress,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("sitescore");
    println!();

    let labels: Vec<&str> = Action::ALL.iter().map(Action::label).collect();

    let idx = Select::new()
        .with_prompt("What would you like to do?")
        .items(&labels)
        .default(0)
        .interact()?;

    let action = &Action::ALL[idx];
    if matches!(action, Action::Services) {
        commands::services();
        return Ok(());
    }

    let ctx = Context::load(config_path)?;

    match action {
        Action::Features => {
            let location: String = Input::new()
                .with_prompt("Location (place name or address)")
                .interact_text()?;
            let radius = prompt_optional("Neighborhood radius in meters (empty for default)")?;
            let sub_radius = prompt_optional("Sub-sample radius in meters (empty for default)")?;
            let args = FeaturesArgs {
                location,
                radius,
                sub_radius,
            };
            commands::features(&ctx, &args).await?;
        }
        Action::Candidates => {
            let args = prompt_candidates()?;
            commands::print_candidates(&ctx, &args).await?;
        }
        Action::Collect => {
            let args = prompt_candidates()?;
            let output: String = Input::new()
                .with_prompt("Output CSV")
                .default("data/features.csv".to_string())
                .interact_text()?;
            commands::collect_city(&ctx, &args, PathBuf::from(output), multi).await?;
        }
        Action::CacheStats => commands::cache_stats(&ctx),
        Action::CacheFlush => commands::cache_flush(&ctx)?,
        Action::Services => {}
    }

    Ok(())
}

fn prompt_candidates() -> Result<CandidatesArgs, Box<dyn std::error::Error>> {
    let city: String = Input::new().with_prompt("City").interact_text()?;
    let spacing = prompt_optional("Grid spacing in meters (empty for default)")?;
    let cap = prompt_optional("Maximum candidates (empty for default)")?;
    Ok(CandidatesArgs { city, spacing, cap })
}

fn prompt_optional<T>(prompt: &str) -> Result<Option<T>, Box<dyn std::error::Error>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + 'static,
{
    let input: String = Input::new()
        .with_prompt(prompt)
        .allow_empty(true)
        .interact_text()?;

    if input.trim().is_empty() {
        Ok(None)
    } else {
        Ok(Some(input.trim().parse()?))
    }
}
