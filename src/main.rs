use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod client;
mod config;
mod error;
mod models;
mod playlist;


use crate::client::{PlaylistPublisher, ScannedLibrary, SubsonicClient};
use crate::config::load_config;
use crate::playlist::candidates::{combine_history, load_play_events};
use crate::playlist::selector::HistoryBehaviorTracker;
use crate::playlist::similarity::{CachedSimilarity, GenreFamilyOracle};
use crate::playlist::strategy::StrategyRegistry;
use crate::playlist::{BatchRunner, GenerationContext, GenerationProgress, Playlist, PlaylistConfig, RecentListening};

#[derive(Parser)]
#[command(name = "playlist-curator")]
#[command(about = "Scores and curates playlists for OpenSubsonic servers")]
#[command(version)]
struct Args {
    /// Path to the playlist configuration JSON file
    #[arg(short = 'c', long = "config", default_value = "playlists.json")]
    config_file: String,

    /// Print playlist details to stdout instead of uploading
    #[arg(short = 'd', long = "debug")]
    debug: bool,

    /// Only log warnings and errors
    #[arg(short = 'q', long = "quiet")]
    quiet: bool,

    /// Seed for exploration and naming, for reproducible runs
    #[arg(long)]
    seed: Option<u64>,

    /// List the scoring strategies and exit
    #[arg(long)]
    list_strategies: bool,
}

fn init_logging(quiet: bool) {
    let default_level = if quiet { "warn" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn print_playlist(playlist: &Playlist) {
    println!("\n{}", playlist.name);
    println!("{}", "=".repeat(playlist.name.len()));
    println!(
        "   Strategy: {} | Songs: {}/{} | Duration: {}m{}s | Artists: {}",
        playlist.run.strategy,
        playlist.len(),
        playlist.run.target_count,
        playlist.metadata.total_duration / 60,
        playlist.metadata.total_duration % 60,
        playlist.metadata.artist_count
    );
    if let (Some(avg), Some((min, max))) = (playlist.metadata.average_bpm, playlist.metadata.bpm_range) {
        println!("   Avg BPM: {avg:.1} | BPM Range: {min}-{max}");
    }
    let sources: Vec<String> = playlist
        .run
        .counts_by_source
        .iter()
        .map(|(source, count)| format!("{} {count}", source.label()))
        .collect();
    println!(
        "   Pool: {} candidates ({}) | Exploration: {} at rate {:.2}",
        playlist.run.candidate_pool_size,
        sources.join(", "),
        playlist.run.exploration_count,
        playlist.run.exploration_rate
    );

    for entry in &playlist.entries {
        println!(
            "     {}. \"{}\" by {} [{:.3}] ({}, {})",
            entry.position,
            entry.title,
            entry.artist,
            entry.final_score,
            entry.source.label(),
            entry.pass.label()
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.quiet);

    let config = load_config().context("Failed to load configuration")?;
    let registry = StrategyRegistry::new(config.scoring).context("Invalid scoring settings")?;

    if args.list_strategies {
        for info in registry.strategies() {
            println!("{:<10} {}", info.label, info.description);
            println!("           {}", info.formula);
        }
        return Ok(());
    }

    if !std::path::Path::new(&args.config_file).exists() {
        anyhow::bail!(
            "Playlist configuration file '{}' not found; specify another with --config",
            args.config_file
        );
    }
    let playlist_configs = PlaylistConfig::load_all_from_file(&args.config_file)
        .with_context(|| format!("Failed to load playlist configurations from {}", args.config_file))?;
    info!("Loaded {} playlist configurations", playlist_configs.len());

    let client = SubsonicClient::new(&config);
    client.ping().context("API connection failed")?;
    info!("API connection successful");

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = Arc::clone(&cancel);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, finishing the current step");
                cancel.store(true, Ordering::Relaxed);
            }
        });
    }

    let songs = client.fetch_songs(config.library_scan_size, &cancel)?;
    info!("Scanned {} songs", songs.len());

    let now = Utc::now();
    let library = ScannedLibrary::new(&songs, &client);
    if library.is_empty() {
        warn!("Library scan returned no songs; playlists will be empty");
    }

    // The server reports play totals only; skips come from an exported event log
    let events = match &config.play_history_file {
        Some(path) => load_play_events(path)
            .with_context(|| format!("Failed to load listening events from {path}"))?,
        None => Vec::new(),
    };
    let history = combine_history(&events, &songs);
    let tracker = HistoryBehaviorTracker::new(events, Some(library.len()), now);
    let similarity = CachedSimilarity::new(GenreFamilyOracle::new());

    let context = GenerationContext {
        registry: &registry,
        catalog: &library,
        similarity: Some(&similarity),
        tracker: &tracker,
        history: &history,
        recent: RecentListening::from_songs(&songs, now),
        discovery_playlist_enabled: config.discovery_playlist_enabled,
        library_scan_limit: library.len(),
        now,
    };

    let (progress_tx, progress_rx) = mpsc::channel();
    let observer = std::thread::spawn(move || {
        for event in progress_rx {
            match event {
                GenerationProgress::Started { index, total, name } => {
                    info!("[{}/{total}] Generating '{name}'", index + 1);
                }
                GenerationProgress::Finished {
                    name,
                    tracks,
                    underfilled: true,
                    ..
                } => warn!("'{name}' finished short with {tracks} tracks"),
                GenerationProgress::Finished { .. } => {}
                GenerationProgress::Failed { name, reason, .. } => warn!("'{name}' failed: {reason}"),
                GenerationProgress::Cancelled { completed, total } => {
                    warn!("Cancelled after {completed} of {total} playlists");
                }
            }
        }
    });

    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let runner = BatchRunner::new(context)
        .with_cancellation(&cancel)
        .with_progress(progress_tx);
    let report = runner.run(&playlist_configs, &mut rng).await;
    drop(runner);
    if observer.join().is_err() {
        warn!("Progress observer panicked");
    }

    let mut published = 0;
    for playlist in report.playlists() {
        if args.debug {
            print_playlist(playlist);
            continue;
        }
        if playlist.is_empty() {
            warn!("No tracks for '{}', skipping upload", playlist.name);
            continue;
        }
        match client.publish(&playlist.name, &playlist.base_name_pattern, &playlist.track_ids()) {
            Ok(id) => {
                info!("Published '{}' ({} tracks, ID {id})", playlist.name, playlist.len());
                published += 1;
            }
            Err(e) => warn!("Failed to publish '{}': {e}", playlist.name),
        }
    }

    println!("\n=== PLAYLIST SUMMARY ===");
    for outcome in &report.outcomes {
        match &outcome.result {
            Ok(playlist) => println!("✓ {}: {} tracks", playlist.name, playlist.len()),
            Err(e) => println!("✗ {}: {e}", outcome.name),
        }
    }
    if !args.debug {
        println!("Published {published}/{} playlists", report.outcomes.len());
    }
    if report.cancelled {
        println!("Run was cancelled before all playlists were generated");
    }

    report.ensure_success()?;
    Ok(())
}
