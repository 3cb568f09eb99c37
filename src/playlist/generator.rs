//! Playlist generation: one window at a time, or a whole batch.
//!
//! A window builds its primary candidate pool, selects, and widens the pool
//! (library fallback, then similar tracks) while the selection is short.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use tracing::{debug, info, warn};

use super::candidates::{AggregatedPlay, CandidatePoolBuilder, CandidateSource, CandidateTrack, merge_candidates};
use super::filters::SongFilters;
use super::metadata::{Playlist, PlaylistMetadata, RunMetadata, entries_from_selection};
use super::selector::{BehaviorTracker, SelectionResult, Selector, dynamic_exploration_rate};
use super::similarity::GenreSimilarity;
use super::strategy::{Strategy, StrategyRegistry};
use super::utils::PlaylistNaming;
use super::PlaylistConfig;
use crate::client::{MediaCatalog, TrackQuery, TrackSort};
use crate::error::{Error, Result};
use crate::models::Song;

/// Selected tracks used to seed similarity expansion
const EXPANSION_SEEDS: usize = 5;
const SIMILAR_PER_SEED: usize = 10;
const SIMILARITY_MAX_DISTANCE: f64 = 0.5;
const RECENT_LISTENING_HOURS: i64 = 24;

/// Artists and genres heard in the last day, used for spacing penalties
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecentListening {
    pub artists: Vec<String>,
    pub genres: Vec<String>,
}

impl RecentListening {
    pub fn from_songs(songs: &[Song], now: DateTime<Utc>) -> Self {
        let cutoff = now - Duration::hours(RECENT_LISTENING_HOURS);
        let mut recent = RecentListening::default();
        let heard = songs
            .iter()
            .filter(|song| song.last_played_at().is_some_and(|played| played >= cutoff && played <= now));
        for song in heard {
            let artist = song.artist.trim().to_lowercase();
            if !artist.is_empty() && !recent.artists.contains(&artist) {
                recent.artists.push(artist);
            }
            for genre in song.get_all_genres() {
                if !recent.genres.contains(&genre) {
                    recent.genres.push(genre);
                }
            }
        }
        recent
    }
}

/// Shared collaborators and inputs for every window of a run
pub struct GenerationContext<'a> {
    pub registry: &'a StrategyRegistry,
    pub catalog: &'a dyn MediaCatalog,
    pub similarity: Option<&'a dyn GenreSimilarity>,
    pub tracker: &'a dyn BehaviorTracker,
    pub history: &'a [AggregatedPlay],
    pub recent: RecentListening,
    pub discovery_playlist_enabled: bool,
    /// Largest number of tracks requested per library scan
    pub library_scan_limit: usize,
    pub now: DateTime<Utc>,
}

/// Generates a single playlist window
pub struct PlaylistGenerator {
    config: PlaylistConfig,
}

impl PlaylistGenerator {
    pub fn new(config: PlaylistConfig) -> Self {
        Self { config }
    }

    pub async fn generate<R: Rng + ?Sized>(
        &self,
        ctx: &GenerationContext<'_>,
        excluded_track_ids: HashSet<String>,
        rng: &mut R,
    ) -> Result<Playlist> {
        self.config.validate()?;
        let strategy = self.config.strategy()?;
        let builder = self.pool_builder(ctx, strategy);

        let mut constraints = self.config.constraints(excluded_track_ids);
        if constraints.exploration_rate.is_none() {
            constraints.exploration_rate = Some(dynamic_exploration_rate(ctx.tracker, ctx.discovery_playlist_enabled));
        }

        let query = TrackQuery {
            genre: self.config.genre_filter.clone(),
            ..Default::default()
        };
        let primary_scan = match strategy {
            Strategy::Discovery => Some(TrackSort::Random),
            Strategy::Throwback => Some(TrackSort::MostPlayed),
            Strategy::Balanced | Strategy::Quality => None,
        };
        let library_first = primary_scan.is_some();

        let mut pool = if let Some(sort) = primary_scan {
            let songs = self.scan(ctx, &query, sort);
            builder.from_library(&songs, CandidateSource::Library).await?
        } else {
            builder.from_history(ctx.history, ctx.catalog).await?
        };
        let mut selection = Selector::select(&pool, &constraints, rng)?;

        if selection.is_underfilled() && !library_first {
            debug!(
                "'{}' has {} of {} tracks from history, scanning library",
                self.config.name,
                selection.len(),
                constraints.target_count
            );
            let songs = self.scan(ctx, &query, TrackSort::HighestRated);
            let fallback = builder.from_library(&songs, CandidateSource::Fallback).await?;
            pool = merge_candidates(pool, fallback);
            selection = Selector::select(&pool, &constraints, rng)?;
        }

        if selection.is_underfilled() && self.config.similarity_expansion && !selection.is_empty() {
            let seeds: Vec<CandidateTrack> = selection
                .selected
                .iter()
                .take(EXPANSION_SEEDS)
                .map(|s| s.track.clone())
                .collect();
            let expanded = builder
                .expand_similar(&seeds, ctx.catalog, SIMILAR_PER_SEED, SIMILARITY_MAX_DISTANCE)
                .await?;
            if !expanded.is_empty() {
                pool = merge_candidates(pool, expanded);
                selection = Selector::select(&pool, &constraints, rng)?;
            }
        }

        if selection.is_underfilled() {
            warn!(
                "Playlist '{}' is under-filled: {} of {} tracks from {} candidates",
                self.config.name,
                selection.len(),
                selection.target_count,
                pool.len()
            );
        }

        Ok(self.assemble(strategy, &pool, &selection, ctx.now, rng))
    }

    fn pool_builder<'b>(&'b self, ctx: &'b GenerationContext<'b>, strategy: Strategy) -> CandidatePoolBuilder<'b> {
        let config = &self.config;
        let mut target = config.target_context();
        target.recent_artists = ctx.recent.artists.clone();
        target.recent_genres = ctx.recent.genres.clone();

        let mut builder = CandidatePoolBuilder::new(ctx.registry, strategy, ctx.now)
            .with_target(target)
            .with_song_filter(move |song| SongFilters::should_include_song(song, config));
        if let Some(oracle) = ctx.similarity {
            builder = builder.with_similarity(oracle);
        }
        if let Some(filter) = &config.genre_filter {
            builder = builder.with_genre_filter(filter.clone());
        }
        if strategy == Strategy::Throwback {
            builder = builder.with_lookback(config.lookback.unwrap_or_default());
        }
        builder
    }

    /// Library scan; a failed scan yields no tracks
    fn scan(&self, ctx: &GenerationContext<'_>, query: &TrackQuery, sort: TrackSort) -> Vec<Song> {
        match ctx.catalog.search_tracks(query, sort, ctx.library_scan_limit) {
            Ok(songs) => songs,
            Err(e) => {
                warn!("Library scan for '{}' failed: {e}", self.config.name);
                Vec::new()
            }
        }
    }

    fn assemble<R: Rng + ?Sized>(
        &self,
        strategy: Strategy,
        pool: &[CandidateTrack],
        selection: &SelectionResult,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> Playlist {
        let metadata = PlaylistMetadata::from_tracks(selection.selected.iter().map(|s| &s.track));
        let name = PlaylistNaming::generate_playlist_name(&self.config.name, &metadata, now, rng);
        Playlist {
            name,
            base_name_pattern: self.config.name.clone(),
            entries: entries_from_selection(selection),
            metadata,
            run: RunMetadata::new(strategy, pool, selection),
        }
    }
}

/// Batch progress, sent to an optional observer
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationProgress {
    Started {
        index: usize,
        total: usize,
        name: String,
    },
    Finished {
        index: usize,
        total: usize,
        name: String,
        tracks: usize,
        underfilled: bool,
    },
    Failed {
        index: usize,
        total: usize,
        name: String,
        reason: String,
    },
    /// The batch stopped before `completed` reached `total`
    Cancelled { completed: usize, total: usize },
}

#[derive(Debug)]
pub struct WindowOutcome {
    pub name: String,
    pub result: Result<Playlist>,
}

/// Per-window results of a batch run
#[derive(Debug, Default)]
pub struct BatchReport {
    pub outcomes: Vec<WindowOutcome>,
    pub cancelled: bool,
}

impl BatchReport {
    pub fn playlists(&self) -> impl Iterator<Item = &Playlist> {
        self.outcomes.iter().filter_map(|o| o.result.as_ref().ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &Error)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (o.name.as_str(), e)))
    }

    /// Summary error naming every failed window
    pub fn ensure_success(&self) -> Result<()> {
        let failures: Vec<String> = self
            .failures()
            .map(|(name, e)| format!("'{name}': {e}"))
            .collect();
        if failures.is_empty() {
            return Ok(());
        }
        Err(Error::BatchFailed {
            failed: failures.len(),
            total: self.outcomes.len(),
            summary: failures.join("; "),
        })
    }
}

/// Runs several windows in order, isolating failures and sharing exclusions
pub struct BatchRunner<'a> {
    context: GenerationContext<'a>,
    cancel: Option<&'a AtomicBool>,
    progress: Option<Sender<GenerationProgress>>,
}

impl<'a> BatchRunner<'a> {
    pub fn new(context: GenerationContext<'a>) -> Self {
        Self {
            context,
            cancel: None,
            progress: None,
        }
    }

    /// Checked before each window starts
    pub fn with_cancellation(mut self, flag: &'a AtomicBool) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn with_progress(mut self, sender: Sender<GenerationProgress>) -> Self {
        self.progress = Some(sender);
        self
    }

    fn emit(&self, event: GenerationProgress) {
        if let Some(sender) = &self.progress {
            if sender.send(event).is_err() {
                debug!("Progress observer disconnected");
            }
        }
    }

    fn cancelled(&self) -> bool {
        self.cancel.is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    /// Generate every window. Tracks picked by earlier windows are excluded
    /// from later ones, and cached genre answers are dropped after each.
    pub async fn run<R: Rng + ?Sized>(&self, configs: &[PlaylistConfig], rng: &mut R) -> BatchReport {
        let total = configs.len();
        let mut report = BatchReport::default();
        let mut excluded: HashSet<String> = HashSet::new();

        for (index, config) in configs.iter().enumerate() {
            if self.cancelled() {
                info!("Generation cancelled after {index} of {total} playlists");
                self.emit(GenerationProgress::Cancelled { completed: index, total });
                report.cancelled = true;
                break;
            }

            let name = config.name.clone();
            self.emit(GenerationProgress::Started {
                index,
                total,
                name: name.clone(),
            });

            let generator = PlaylistGenerator::new(config.clone());
            let result = generator.generate(&self.context, excluded.clone(), rng).await;
            if let Some(oracle) = self.context.similarity {
                oracle.clear_cache();
            }
            match &result {
                Ok(playlist) => {
                    excluded.extend(playlist.track_ids());
                    info!(
                        "Generated '{}' with {} tracks ({})",
                        playlist.name,
                        playlist.len(),
                        playlist.run.strategy
                    );
                    self.emit(GenerationProgress::Finished {
                        index,
                        total,
                        name: name.clone(),
                        tracks: playlist.len(),
                        underfilled: playlist.run.underfilled,
                    });
                }
                Err(e) => {
                    warn!("Playlist '{name}' failed: {e}");
                    self.emit(GenerationProgress::Failed {
                        index,
                        total,
                        name: name.clone(),
                        reason: e.to_string(),
                    });
                }
            }
            report.outcomes.push(WindowOutcome { name, result });
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockMediaCatalog;
    use crate::models::Genre;
    use crate::playlist::selector::{BASELINE_EXPLORATION_RATE, HistoryBehaviorTracker};
    use crate::playlist::similarity::MockGenreSimilarity;
    use crate::playlist::weights::ScoringSettings;
    use chrono::TimeZone;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::collections::HashMap;
    use std::sync::mpsc;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn song(id: &str, artist: &str, genre: &str, plays: u32, rating: u32, days_ago: i64) -> Song {
        Song {
            id: id.to_string(),
            title: format!("Northern Lights {id}"),
            artist: artist.to_string(),
            album: "Album".to_string(),
            genre: Some(genre.to_string()),
            genres: Some(vec![Genre { name: genre.to_string() }]),
            duration: Some(200),
            play_count: Some(plays),
            user_rating: Some(rating),
            played: Some((now() - Duration::days(days_ago)).to_rfc3339()),
            ..Default::default()
        }
    }

    /// Six artists with two tracks each across three genres
    fn library() -> Vec<Song> {
        let genres = ["rock", "jazz", "pop"];
        (0..12)
            .map(|i| {
                song(
                    &format!("s{i}"),
                    &format!("Artist {}", i / 2),
                    genres[i % 3],
                    (i % 5) as u32 + 1,
                    (i % 5) as u32 + 1,
                    (i as i64) * 3 + 2,
                )
            })
            .collect()
    }

    fn history(ids: &[&str]) -> Vec<AggregatedPlay> {
        let library = library();
        ids.iter()
            .filter_map(|id| library.iter().find(|s| s.id == *id))
            .filter_map(AggregatedPlay::from_song)
            .collect()
    }

    fn catalog_over(library: Vec<Song>) -> MockMediaCatalog {
        let by_id: HashMap<String, Song> = library.iter().map(|s| (s.id.clone(), s.clone())).collect();
        let mut catalog = MockMediaCatalog::new();
        catalog.expect_fetch_tracks_by_ids().returning(move |ids| {
            Ok(ids
                .iter()
                .filter_map(|id| by_id.get(id).map(|s| (id.clone(), s.clone())))
                .collect())
        });
        catalog
            .expect_search_tracks()
            .returning(move |_, _, limit| Ok(library.iter().take(limit).cloned().collect()));
        catalog
    }

    fn config(name: &str, target: usize) -> PlaylistConfig {
        PlaylistConfig {
            name: name.to_string(),
            target_length: target,
            exploration_rate: Some(0.0),
            similarity_expansion: false,
            ..Default::default()
        }
    }

    fn context<'a>(
        registry: &'a StrategyRegistry,
        catalog: &'a MockMediaCatalog,
        tracker: &'a HistoryBehaviorTracker,
        history: &'a [AggregatedPlay],
    ) -> GenerationContext<'a> {
        GenerationContext {
            registry,
            catalog,
            similarity: None,
            tracker,
            history,
            recent: RecentListening::default(),
            discovery_playlist_enabled: false,
            library_scan_limit: 100,
            now: now(),
        }
    }

    fn fixtures() -> (StrategyRegistry, HistoryBehaviorTracker) {
        (
            StrategyRegistry::new(ScoringSettings::default()).unwrap(),
            HistoryBehaviorTracker::new(Vec::new(), Some(12), now()),
        )
    }

    fn source_count(playlist: &Playlist, source: CandidateSource) -> usize {
        playlist.entries.iter().filter(|e| e.source == source).count()
    }

    #[tokio::test]
    async fn test_history_is_topped_up_from_library() {
        let (registry, tracker) = fixtures();
        let catalog = catalog_over(library());
        let plays = history(&["s0", "s3", "s6"]);
        let ctx = context(&registry, &catalog, &tracker, &plays);

        let playlist = PlaylistGenerator::new(config("Daily", 6))
            .generate(&ctx, HashSet::new(), &mut StdRng::seed_from_u64(1))
            .await
            .unwrap();

        assert_eq!(playlist.len(), 6);
        assert!(source_count(&playlist, CandidateSource::Fallback) >= 3);
        assert_eq!(playlist.run.counts_by_source.get(&CandidateSource::History), Some(&3));
        assert_eq!(playlist.run.counts_by_source.get(&CandidateSource::Fallback), Some(&9));
        assert_eq!(playlist.run.candidate_pool_size, 12);
        assert!(!playlist.run.underfilled);
        assert_eq!(playlist.base_name_pattern, "Daily");
        let positions: Vec<usize> = playlist.entries.iter().map(|e| e.position).collect();
        assert_eq!(positions, vec![1, 2, 3, 4, 5, 6]);
    }

    #[tokio::test]
    async fn test_history_lookup_failure_falls_back_to_library() {
        let (registry, tracker) = fixtures();
        let mut catalog = MockMediaCatalog::new();
        catalog
            .expect_fetch_tracks_by_ids()
            .returning(|_| Err(Error::Catalog("503".to_string())));
        catalog
            .expect_search_tracks()
            .returning(|_, _, _| Ok(library()));
        let plays = history(&["s0", "s1"]);
        let ctx = context(&registry, &catalog, &tracker, &plays);

        let playlist = PlaylistGenerator::new(config("Daily", 5))
            .generate(&ctx, HashSet::new(), &mut StdRng::seed_from_u64(1))
            .await
            .unwrap();
        assert_eq!(playlist.len(), 5);
        assert_eq!(source_count(&playlist, CandidateSource::Fallback), 5);
    }

    #[tokio::test]
    async fn test_similarity_expansion_fills_short_selection() {
        let (registry, tracker) = fixtures();
        let mut catalog = MockMediaCatalog::new();
        let known: HashMap<String, Song> = library().into_iter().map(|s| (s.id.clone(), s)).collect();
        catalog.expect_fetch_tracks_by_ids().returning(move |ids| {
            Ok(ids
                .iter()
                .filter_map(|id| known.get(id).map(|s| (id.clone(), s.clone())))
                .collect())
        });
        catalog
            .expect_search_tracks()
            .returning(|_, _, _| Err(Error::Catalog("scan timed out".to_string())));
        catalog.expect_get_similar_tracks().returning(|_, _, _| {
            Ok(vec![
                song("x1", "Other 1", "rock", 1, 4, 20),
                song("x2", "Other 2", "jazz", 1, 4, 20),
                song("x3", "Other 3", "pop", 1, 4, 20),
            ])
        });
        let plays = history(&["s0", "s2"]);
        let ctx = context(&registry, &catalog, &tracker, &plays);

        let mut definition = config("Daily", 4);
        definition.similarity_expansion = true;
        let playlist = PlaylistGenerator::new(definition)
            .generate(&ctx, HashSet::new(), &mut StdRng::seed_from_u64(1))
            .await
            .unwrap();

        assert_eq!(playlist.len(), 4);
        assert!(source_count(&playlist, CandidateSource::Similar) >= 2);
        assert_eq!(playlist.run.counts_by_source.get(&CandidateSource::Similar), Some(&3));
        assert_eq!(playlist.run.candidate_pool_size, 5);
    }

    #[tokio::test]
    async fn test_discovery_scans_library_first() {
        let (registry, tracker) = fixtures();
        let mut catalog = MockMediaCatalog::new();
        catalog.expect_fetch_tracks_by_ids().never();
        catalog
            .expect_search_tracks()
            .withf(|_, sort, _| *sort == TrackSort::Random)
            .returning(|_, _, _| Ok(library()));
        let plays = history(&["s0"]);
        let ctx = context(&registry, &catalog, &tracker, &plays);

        let mut definition = config("Deep Cuts", 4);
        definition.strategy = Some("discovery".to_string());
        let playlist = PlaylistGenerator::new(definition)
            .generate(&ctx, HashSet::new(), &mut StdRng::seed_from_u64(1))
            .await
            .unwrap();
        assert_eq!(playlist.run.strategy, Strategy::Discovery);
        assert_eq!(source_count(&playlist, CandidateSource::Library), 4);
    }

    #[tokio::test]
    async fn test_dynamic_rate_used_without_override() {
        let (registry, tracker) = fixtures();
        let catalog = catalog_over(library());
        let ctx = context(&registry, &catalog, &tracker, &[]);

        let mut definition = config("Daily", 10);
        definition.exploration_rate = None;
        let playlist = PlaylistGenerator::new(definition)
            .generate(&ctx, HashSet::new(), &mut StdRng::seed_from_u64(3))
            .await
            .unwrap();
        // Small library without recent skips: baseline rate
        assert_eq!(playlist.run.exploration_rate, BASELINE_EXPLORATION_RATE);
        assert_eq!(playlist.len(), 10);
    }

    #[tokio::test]
    async fn test_discovery_playlist_setting_lowers_dynamic_rate() {
        let (registry, tracker) = fixtures();
        let catalog = catalog_over(library());
        let mut ctx = context(&registry, &catalog, &tracker, &[]);
        ctx.discovery_playlist_enabled = true;

        let mut definition = config("Daily", 10);
        definition.exploration_rate = None;
        let playlist = PlaylistGenerator::new(definition)
            .generate(&ctx, HashSet::new(), &mut StdRng::seed_from_u64(3))
            .await
            .unwrap();
        approx::assert_relative_eq!(playlist.run.exploration_rate, 0.12, epsilon = 1e-9);
    }

    #[tokio::test]
    async fn test_throwback_scans_most_played_first() {
        let (registry, tracker) = fixtures();
        let mut catalog = MockMediaCatalog::new();
        catalog.expect_fetch_tracks_by_ids().never();
        catalog
            .expect_search_tracks()
            .withf(|_, sort, _| *sort == TrackSort::MostPlayed)
            .returning(|_, _, _| Ok(library()));
        let ctx = context(&registry, &catalog, &tracker, &[]);

        let mut definition = config("Back Then", 4);
        definition.strategy = Some("throwback".to_string());
        let playlist = PlaylistGenerator::new(definition)
            .generate(&ctx, HashSet::new(), &mut StdRng::seed_from_u64(1))
            .await
            .unwrap();
        assert_eq!(playlist.run.strategy, Strategy::Throwback);
        assert_eq!(source_count(&playlist, CandidateSource::Library), playlist.len());
    }

    #[tokio::test]
    async fn test_same_seed_same_playlist() {
        let (registry, tracker) = fixtures();
        let catalog = catalog_over(library());
        let ctx = context(&registry, &catalog, &tracker, &[]);
        let mut definition = config("Daily", 8);
        definition.exploration_rate = Some(0.5);
        let generator = PlaylistGenerator::new(definition);

        let first = generator
            .generate(&ctx, HashSet::new(), &mut StdRng::seed_from_u64(11))
            .await
            .unwrap();
        let second = generator
            .generate(&ctx, HashSet::new(), &mut StdRng::seed_from_u64(11))
            .await
            .unwrap();
        assert_eq!(first.track_ids(), second.track_ids());
        assert_eq!(first.name, second.name);
    }

    #[tokio::test]
    async fn test_batch_excludes_tracks_used_by_earlier_windows() {
        let (registry, tracker) = fixtures();
        let catalog = catalog_over(library());
        let ctx = context(&registry, &catalog, &tracker, &[]);
        let (tx, rx) = mpsc::channel();

        let runner = BatchRunner::new(ctx).with_progress(tx);
        let report = runner
            .run(&[config("Morning", 4), config("Evening", 4)], &mut StdRng::seed_from_u64(5))
            .await;
        drop(runner);

        assert!(report.ensure_success().is_ok());
        let playlists: Vec<&Playlist> = report.playlists().collect();
        assert_eq!(playlists.len(), 2);
        let first: HashSet<String> = playlists[0].track_ids().into_iter().collect();
        assert!(playlists[1].track_ids().iter().all(|id| !first.contains(id)));

        let events: Vec<GenerationProgress> = rx.iter().collect();
        assert_eq!(events.len(), 4);
        assert!(matches!(&events[0], GenerationProgress::Started { index: 0, total: 2, .. }));
        assert!(matches!(&events[3], GenerationProgress::Finished { index: 1, tracks: 4, .. }));
    }

    #[tokio::test]
    async fn test_batch_clears_genre_cache_after_each_window() {
        let (registry, tracker) = fixtures();
        let catalog = catalog_over(library());
        let mut oracle = MockGenreSimilarity::new();
        oracle.expect_are_similar().returning(|_, _| Ok(false));
        oracle.expect_clear_cache().times(2).return_const(());
        let mut ctx = context(&registry, &catalog, &tracker, &[]);
        ctx.similarity = Some(&oracle);

        let mut focus = config("Focus", 4);
        focus.target_genres = vec!["indie".to_string()];
        let report = BatchRunner::new(ctx)
            .run(&[focus, config("Evening", 4)], &mut StdRng::seed_from_u64(5))
            .await;
        assert_eq!(report.playlists().count(), 2);
    }

    #[tokio::test]
    async fn test_batch_continues_past_failed_window() {
        let (registry, tracker) = fixtures();
        let catalog = catalog_over(library());
        let ctx = context(&registry, &catalog, &tracker, &[]);

        let mut broken = config("Broken", 4);
        broken.strategy = Some("shuffle".to_string());
        let report = BatchRunner::new(ctx)
            .run(&[broken, config("Working", 4)], &mut StdRng::seed_from_u64(5))
            .await;

        assert_eq!(report.outcomes.len(), 2);
        assert_eq!(report.playlists().count(), 1);
        let failures: Vec<(&str, &Error)> = report.failures().collect();
        assert_eq!(failures[0].0, "Broken");
        assert!(matches!(failures[0].1, Error::UnknownStrategy(_)));
        assert!(matches!(
            report.ensure_success(),
            Err(Error::BatchFailed { failed: 1, total: 2, .. })
        ));
    }

    #[tokio::test]
    async fn test_batch_stops_when_cancelled() {
        let (registry, tracker) = fixtures();
        let catalog = MockMediaCatalog::new();
        let ctx = context(&registry, &catalog, &tracker, &[]);
        let cancel = AtomicBool::new(true);
        let (tx, rx) = mpsc::channel();

        let runner = BatchRunner::new(ctx).with_cancellation(&cancel).with_progress(tx);
        let report = runner.run(&[config("Daily", 4)], &mut StdRng::seed_from_u64(5)).await;
        drop(runner);

        assert!(report.cancelled);
        assert!(report.outcomes.is_empty());
        let events: Vec<GenerationProgress> = rx.iter().collect();
        assert_eq!(events, vec![GenerationProgress::Cancelled { completed: 0, total: 1 }]);
    }

    #[test]
    fn test_recent_listening_covers_last_day() {
        let mut fresh = song("a", "Massive Attack", "trip-hop", 3, 4, 0);
        fresh.played = Some((now() - Duration::hours(3)).to_rfc3339());
        let mut fresh_same_artist = song("b", "massive attack ", "electronic", 3, 4, 0);
        fresh_same_artist.played = Some((now() - Duration::hours(20)).to_rfc3339());
        let stale = song("c", "Portishead", "trip-hop", 3, 4, 3);

        let recent = RecentListening::from_songs(&[fresh, fresh_same_artist, stale], now());
        assert_eq!(recent.artists, vec!["massive attack"]);
        assert_eq!(recent.genres, vec!["trip-hop", "electronic"]);
    }
}
