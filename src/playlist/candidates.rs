//! Candidate pool construction.
//!
//! Turns listening history and library scans into scored
//! [`CandidateTrack`]s, and merges pools from several sources.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::filters::SongFilters;
use super::similarity::GenreSimilarity;
use super::strategy::{ContextualFactors, LookbackWindow, ScoringContext, Strategy, StrategyRegistry};
use super::weights::{self, MAX_EXPLORATION_BOOST, TimeWindow};
use crate::client::MediaCatalog;
use crate::error::Result;
use crate::models::Song;

pub const UNKNOWN_ARTIST: &str = "Unknown Artist";
pub const UNTITLED_TRACK: &str = "Untitled Track";

/// Day count assumed for never-played tracks in discovery scans
pub const UNPLAYED_DISCOVERY_DAYS: f64 = 365.0;

/// Where a candidate entered the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateSource {
    History,
    Library,
    Fallback,
    Similar,
}

impl CandidateSource {
    pub fn label(&self) -> &'static str {
        match self {
            Self::History => "history",
            Self::Library => "library",
            Self::Fallback => "fallback",
            Self::Similar => "similar",
        }
    }
}

/// A scored track under consideration for a playlist
#[derive(Debug, Clone, Serialize)]
pub struct CandidateTrack {
    pub track_id: String,
    pub title: String,
    pub artist: String,
    pub album: String,
    /// Lowercased, primary genre first
    pub genres: Vec<String>,
    pub moods: Vec<String>,
    pub play_count: u32,
    pub skip_count: u32,
    pub last_played_at: Option<DateTime<Utc>>,
    /// Star rating on a 0-5 scale
    pub user_rating: Option<f64>,
    pub bpm: Option<u32>,
    pub duration: Option<u32>,
    pub recency_weight: f64,
    pub fallback_score: f64,
    pub final_score: f64,
    pub source: CandidateSource,
}

impl CandidateTrack {
    pub fn primary_genre(&self) -> Option<&str> {
        self.genres.first().map(String::as_str)
    }
}

/// One raw listening event. A skipped event still counts as a play.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PlayEvent {
    pub track_id: String,
    pub played_at: DateTime<Utc>,
    pub skipped: bool,
}

/// Per-track listening totals
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedPlay {
    pub track_id: String,
    pub play_count: u32,
    pub skip_count: u32,
    pub last_played_at: Option<DateTime<Utc>>,
}

impl AggregatedPlay {
    /// Totals reported by the server for a scanned song; `None` if never played
    pub fn from_song(song: &Song) -> Option<Self> {
        let play_count = song.play_count.unwrap_or(0);
        let last_played_at = song.last_played_at();
        if play_count == 0 && last_played_at.is_none() {
            return None;
        }
        Some(Self {
            track_id: song.id.clone(),
            play_count,
            skip_count: 0,
            last_played_at,
        })
    }
}

/// Read a JSON array of listening events, such as a scrobble export
pub fn load_play_events<P: AsRef<Path>>(path: P) -> Result<Vec<PlayEvent>> {
    let content = fs::read_to_string(path)?;
    let events: Vec<PlayEvent> = serde_json::from_str(&content)?;
    info!("Loaded {} listening events", events.len());
    Ok(events)
}

/// Group raw events per track. The result is sorted by track id and does
/// not depend on event order; `skip_count <= play_count` always holds.
pub fn aggregate_history(events: &[PlayEvent]) -> Vec<AggregatedPlay> {
    let mut totals: BTreeMap<&str, AggregatedPlay> = BTreeMap::new();
    for event in events {
        let entry = totals
            .entry(event.track_id.as_str())
            .or_insert_with(|| AggregatedPlay {
                track_id: event.track_id.clone(),
                play_count: 0,
                skip_count: 0,
                last_played_at: None,
            });
        entry.play_count += 1;
        if event.skipped {
            entry.skip_count += 1;
        }
        entry.last_played_at = entry.last_played_at.max(Some(event.played_at));
    }
    totals.into_values().collect()
}

/// History for a run: aggregated events plus the play totals carried by
/// scanned songs.
///
/// Where both know a track, the larger play count and the later play win,
/// and skips come from the events. Sorted by track id.
pub fn combine_history(events: &[PlayEvent], songs: &[Song]) -> Vec<AggregatedPlay> {
    let mut combined: BTreeMap<String, AggregatedPlay> = aggregate_history(events)
        .into_iter()
        .map(|play| (play.track_id.clone(), play))
        .collect();

    for scanned in songs.iter().filter_map(AggregatedPlay::from_song) {
        match combined.get_mut(&scanned.track_id) {
            Some(entry) => {
                entry.play_count = entry.play_count.max(scanned.play_count);
                entry.last_played_at = entry.last_played_at.max(scanned.last_played_at);
            }
            None => {
                combined.insert(scanned.track_id.clone(), scanned);
            }
        }
    }
    combined.into_values().collect()
}

/// Stable sort by `final_score`, highest first
pub fn sort_by_score(candidates: &mut [CandidateTrack]) {
    candidates.sort_by(|a, b| b.final_score.total_cmp(&a.final_score));
}

/// Add `secondary` entries whose track id is absent from `primary`.
///
/// The first instance of an id wins; the result is sorted by score.
pub fn merge_candidates(primary: Vec<CandidateTrack>, secondary: Vec<CandidateTrack>) -> Vec<CandidateTrack> {
    let mut seen: HashSet<String> = HashSet::with_capacity(primary.len() + secondary.len());
    let mut merged: Vec<CandidateTrack> = primary
        .into_iter()
        .chain(secondary)
        .filter(|candidate| seen.insert(candidate.track_id.clone()))
        .collect();
    sort_by_score(&mut merged);
    merged
}

/// What the playlist is aiming for; enables the contextual scoring variant
#[derive(Debug, Clone, Default)]
pub struct TargetContext {
    pub genres: Vec<String>,
    pub moods: HashMap<String, f64>,
    pub time_window: Option<TimeWindow>,
    /// Genre weights learned for the current hour
    pub learned_genre_weights: Option<HashMap<String, f64>>,
    pub target_energy: Option<f64>,
    pub target_bpm: Option<u32>,
    pub recent_artists: Vec<String>,
    pub recent_genres: Vec<String>,
}

impl TargetContext {
    pub fn is_empty(&self) -> bool {
        self.genres.is_empty()
            && self.moods.is_empty()
            && self.time_window.is_none()
            && self.learned_genre_weights.is_none()
            && self.target_energy.is_none()
            && self.target_bpm.is_none()
            && self.recent_artists.is_empty()
            && self.recent_genres.is_empty()
    }
}

/// Listening figures fed into one scoring call
struct PlayStats {
    play_count: u32,
    skip_count: u32,
    last_played_at: Option<DateTime<Utc>>,
    days_since_play: Option<f64>,
}

/// Builds scored candidate pools for a single strategy
pub struct CandidatePoolBuilder<'a> {
    registry: &'a StrategyRegistry,
    strategy: Strategy,
    now: DateTime<Utc>,
    similarity: Option<&'a dyn GenreSimilarity>,
    target: Option<TargetContext>,
    lookback: Option<LookbackWindow>,
    genre_filter: Option<String>,
    song_filter: Option<Box<dyn Fn(&Song) -> bool + Send + Sync + 'a>>,
}

impl<'a> CandidatePoolBuilder<'a> {
    pub fn new(registry: &'a StrategyRegistry, strategy: Strategy, now: DateTime<Utc>) -> Self {
        Self {
            registry,
            strategy,
            now,
            similarity: None,
            target: None,
            lookback: None,
            genre_filter: None,
            song_filter: None,
        }
    }

    pub fn with_similarity(mut self, oracle: &'a dyn GenreSimilarity) -> Self {
        self.similarity = Some(oracle);
        self
    }

    /// Empty targets keep the baseline formula
    pub fn with_target(mut self, target: TargetContext) -> Self {
        self.target = (!target.is_empty()).then_some(target);
        self
    }

    pub fn with_lookback(mut self, window: LookbackWindow) -> Self {
        self.lookback = Some(window);
        self
    }

    /// Case-insensitive substring match against the primary genre
    pub fn with_genre_filter(mut self, filter: impl Into<String>) -> Self {
        let filter = filter.into();
        self.genre_filter = (!filter.trim().is_empty()).then_some(filter);
        self
    }

    /// Extra eligibility check applied to every source
    pub fn with_song_filter(mut self, filter: impl Fn(&Song) -> bool + Send + Sync + 'a) -> Self {
        self.song_filter = Some(Box::new(filter));
        self
    }

    /// Score tracks from aggregated history.
    ///
    /// Tracks the catalog cannot resolve are skipped. A failed catalog
    /// lookup yields an empty pool so that fallback sources can take over.
    pub async fn from_history(&self, plays: &[AggregatedPlay], catalog: &dyn MediaCatalog) -> Result<Vec<CandidateTrack>> {
        if plays.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = plays.iter().map(|p| p.track_id.clone()).collect();
        let resolved = match catalog.fetch_tracks_by_ids(&ids) {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!("History lookup failed, continuing without history candidates: {e}");
                return Ok(Vec::new());
            }
        };

        let mut candidates = Vec::with_capacity(plays.len());
        for play in plays {
            let Some(song) = resolved.get(&play.track_id) else {
                debug!("Skipping unresolvable track {}", play.track_id);
                continue;
            };
            if !self.admits(song) {
                continue;
            }
            let stats = PlayStats {
                play_count: play.play_count,
                skip_count: play.skip_count,
                last_played_at: play.last_played_at,
                days_since_play: None,
            };
            candidates.push(self.score_song(song, stats, CandidateSource::History).await?);
        }

        sort_by_score(&mut candidates);
        Ok(candidates)
    }

    /// Score scanned library records using the play figures they carry
    pub async fn from_library(&self, songs: &[Song], source: CandidateSource) -> Result<Vec<CandidateTrack>> {
        let mut candidates = Vec::with_capacity(songs.len());
        for song in songs {
            if !self.admits(song) {
                continue;
            }
            let last_played_at = song.last_played_at();
            let days_since_play = match (self.strategy, last_played_at) {
                (Strategy::Discovery, None) => Some(UNPLAYED_DISCOVERY_DAYS),
                _ => None,
            };
            let stats = PlayStats {
                play_count: song.play_count.unwrap_or(0),
                skip_count: 0,
                last_played_at,
                days_since_play,
            };
            candidates.push(self.score_song(song, stats, source).await?);
        }

        sort_by_score(&mut candidates);
        Ok(candidates)
    }

    /// Pull similar tracks for each seed from the catalog and score them.
    ///
    /// A failing seed is logged and skipped.
    pub async fn expand_similar(
        &self,
        seeds: &[CandidateTrack],
        catalog: &dyn MediaCatalog,
        per_seed: usize,
        max_distance: f64,
    ) -> Result<Vec<CandidateTrack>> {
        let mut expanded = Vec::new();
        for seed in seeds {
            match catalog.get_similar_tracks(&seed.track_id, per_seed, max_distance) {
                Ok(songs) => {
                    let scored = self.from_library(&songs, CandidateSource::Similar).await?;
                    expanded = merge_candidates(expanded, scored);
                }
                Err(e) => warn!("Similar-track lookup failed for seed {}: {e}", seed.track_id),
            }
        }
        Ok(expanded)
    }

    fn admits(&self, song: &Song) -> bool {
        let genre_ok = self
            .genre_filter
            .as_deref()
            .is_none_or(|filter| SongFilters::matches_primary_genre(song, filter));
        genre_ok && self.song_filter.as_ref().is_none_or(|filter| filter(song))
    }

    async fn score_song(&self, song: &Song, stats: PlayStats, source: CandidateSource) -> Result<CandidateTrack> {
        let genres = song.get_all_genres();
        let moods = song.get_moods();

        let contextual = match &self.target {
            Some(target) if self.strategy.supports_context() => {
                Some(self.contextual_factors(song, &genres, &moods, target, stats.play_count).await?)
            }
            _ => None,
        };

        let ctx = ScoringContext {
            rating: song.star_rating(),
            play_count: stats.play_count,
            last_played_at: stats.last_played_at,
            skip_count: stats.skip_count,
            days_since_play: stats.days_since_play,
            lookback: self.lookback,
            play_count_in_window: self.plays_in_window(&stats),
            contextual,
            ..ScoringContext::at(self.now)
        };
        let components = self.registry.score(self.strategy, &ctx)?;

        Ok(CandidateTrack {
            track_id: song.id.clone(),
            title: non_empty_or(&song.title, UNTITLED_TRACK),
            artist: non_empty_or(&song.artist, UNKNOWN_ARTIST),
            album: song.album.trim().to_string(),
            genres,
            moods,
            play_count: stats.play_count,
            skip_count: stats.skip_count,
            last_played_at: stats.last_played_at,
            user_rating: ctx.rating,
            bpm: song.bpm,
            duration: song.duration,
            recency_weight: components.recency_weight,
            fallback_score: components.fallback_score,
            final_score: components.final_score,
            source,
        })
    }

    /// Server totals carry no per-window breakdown; all plays count toward
    /// the window when the last play falls inside it.
    fn plays_in_window(&self, stats: &PlayStats) -> Option<u32> {
        let window = self.lookback?;
        let days = stats
            .last_played_at
            .map(|played| weights::days_between(self.now, played))?;
        Some(if window.contains(days) { stats.play_count } else { 0 })
    }

    async fn contextual_factors(
        &self,
        song: &Song,
        genres: &[String],
        moods: &[String],
        target: &TargetContext,
        play_count: u32,
    ) -> Result<ContextualFactors> {
        let multipliers = self.registry.weights(self.strategy)?.multipliers;

        let genre_match = weights::genre_match_score(genres, &target.genres, self.similarity).await;
        let mood_vector: HashMap<String, f64> = moods.iter().map(|m| (m.clone(), 1.0)).collect();
        let target_moods: HashMap<String, f64> = target
            .moods
            .iter()
            .map(|(mood, weight)| (mood.trim().to_lowercase(), *weight))
            .collect();

        let time_of_day = target.time_window.map_or(0.0, |window| {
            let boost = weights::time_of_day_boost(
                genres,
                moods,
                None,
                window,
                target.learned_genre_weights.as_ref(),
            );
            boost / window.profile().boost
        });

        Ok(ContextualFactors {
            genre_match,
            mood_similarity: weights::mood_similarity(&mood_vector, &target_moods),
            time_of_day,
            energy_tempo: weights::energy_tempo_alignment(None, song.bpm, target.target_energy, target.target_bpm),
            exploration: weights::exploration_boost(Some(play_count), song.added_at(), self.now)
                / MAX_EXPLORATION_BOOST,
            artist_spacing: weights::artist_spacing_penalty(
                &song.artist,
                &target.recent_artists,
                multipliers.artist_spacing,
            ),
            genre_spacing: weights::genre_spacing_penalty(genres, &target.recent_genres, multipliers.genre_spacing),
        })
    }
}

fn non_empty_or(value: &str, default: &str) -> String {
    let value = value.trim();
    if value.is_empty() { default.to_string() } else { value.to_string() }
}
