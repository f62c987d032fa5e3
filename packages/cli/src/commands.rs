//! Command implementations shared by the flag-driven and interactive
//! entry points.

use std::path::PathBuf;

use indicatif::MultiProgress;
use sitescore_features::candidates::generate_city_candidates;
use sitescore_features::collect::{CollectOptions, collect};
use sitescore_features::reduce::to_feature_row;
use sitescore_location_models::{Coordinate, SampleRegion};
use sitescore_provider::pluto::PlutoClient;
use sitescore_provider::service_registry::all_services;

use crate::context::Context;
use crate::progress::IndicatifProgress;

/// Parameters of the `features` command.
pub struct FeaturesArgs {
    pub location: String,
    pub radius: Option<f64>,
    pub sub_radius: Option<f64>,
}

/// Parameters of the `candidates` command.
pub struct CandidatesArgs {
    pub city: String,
    pub spacing: Option<f64>,
    pub cap: Option<usize>,
}

/// Geocodes a location, aggregates its neighborhood, and prints the
/// reduced row as JSON.
pub async fn features(
    ctx: &Context,
    args: &FeaturesArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let center = ctx.snapper.geocode(&args.location).await?;
    let radius = args
        .radius
        .unwrap_or(ctx.config.sampling.neighborhood_radius_m);
    let sub_radius = args.sub_radius.unwrap_or(ctx.config.sampling.sub_radius_m);
    log::info!(
        "'{}' is at {center}; sampling {radius} m around it",
        args.location
    );

    let aggregator = ctx.aggregator()?;
    let region = SampleRegion::Circle {
        center,
        radius_meters: radius,
    };
    let features = aggregator.build_features(&region, sub_radius).await?;
    let row = to_feature_row(&features, None);

    println!("{}", serde_json::to_string_pretty(&row)?);
    flush_cache(ctx);
    Ok(())
}

/// Grids a city boundary into candidates.
pub async fn candidates(
    ctx: &Context,
    args: &CandidatesArgs,
) -> Result<Vec<Coordinate>, Box<dyn std::error::Error>> {
    let spacing = args
        .spacing
        .unwrap_or(ctx.config.sampling.candidate_spacing_m);
    let cap = args.cap.unwrap_or(ctx.config.sampling.candidate_cap);
    Ok(generate_city_candidates(ctx.nominatim.as_ref(), &args.city, spacing, cap).await?)
}

/// Prints candidates as `lat,lon` lines.
pub async fn print_candidates(
    ctx: &Context,
    args: &CandidatesArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    for c in candidates(ctx, args).await? {
        println!("{:.6},{:.6}", c.lat(), c.lon());
    }
    Ok(())
}

/// Generates candidates for a city and collects labeled rows into
/// `output`, resuming a previous run.
pub async fn collect_city(
    ctx: &Context,
    args: &CandidatesArgs,
    output: PathBuf,
    multi: &MultiProgress,
) -> Result<(), Box<dyn std::error::Error>> {
    let candidates = candidates(ctx, args).await?;
    let aggregator = ctx.aggregator()?;
    let labels = PlutoClient::from_registry()?;
    let options = CollectOptions {
        neighborhood_radius_m: ctx.config.sampling.neighborhood_radius_m,
        sub_radius_m: ctx.config.sampling.sub_radius_m,
        output,
    };

    let progress = IndicatifProgress::candidates_bar(multi, "Collecting");
    let summary = collect(&aggregator, &labels, &candidates, &options, &progress).await;
    flush_cache(ctx);
    let summary = summary?;

    log::info!(
        "Collection finished: {} candidates, {} written, {} resumed, {} unlabeled",
        summary.candidates,
        summary.written,
        summary.resumed,
        summary.unlabeled
    );
    Ok(())
}

/// Prints cache location and entry counts.
pub fn cache_stats(ctx: &Context) {
    let path = ctx.config.cache_path();
    println!("Path:     {}", path.display());
    println!("TTL:      {} days", ctx.cache.ttl().num_days());
    println!("Entries:  {}", ctx.cache.len());
    println!("Live:     {}", ctx.cache.live_count());
}

/// Writes the cache to disk, rewriting any legacy entries.
pub fn cache_flush(ctx: &Context) -> Result<(), Box<dyn std::error::Error>> {
    ctx.cache.flush()?;
    println!(
        "Flushed {} entries to {}",
        ctx.cache.len(),
        ctx.config.cache_path().display()
    );
    Ok(())
}

/// Lists every registered provider service.
pub fn services() {
    println!("{:<12} {:<20} {:<8} {:<4} NAME", "ID", "TYPE", "ENABLED", "PRI");
    println!("{}", "-".repeat(70));
    for service in all_services() {
        println!(
            "{:<12} {:<20} {:<8} {:<4} {}",
            service.id,
            service.kind(),
            service.enabled,
            service.priority,
            service.name
        );
    }
}

fn flush_cache(ctx: &Context) {
    if let Err(e) = ctx.cache.flush() {
        log::warn!("Failed to persist cache: {e}");
    }
}
