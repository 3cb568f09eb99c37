//! Constrained selection over a scored candidate pool.
//!
//! Exploitation fills most of the playlist in three passes that relax the
//! diversity constraints step by step; exploration fills the rest by
//! weighted random choice biased toward artists and genres not yet picked.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use rand::Rng;
use rand::distributions::{Distribution, WeightedIndex};
use serde::Serialize;
use tracing::{debug, warn};

use super::candidates::{CandidateTrack, PlayEvent, sort_by_score};
use super::weights;
use crate::error::{Error, Result};

pub const DEFAULT_MAX_PER_ARTIST: usize = 2;
pub const DEFAULT_GENRE_SHARE_CAP: f64 = 0.40;

pub const BASELINE_EXPLORATION_RATE: f64 = 0.15;
const EXPLORATION_RATE_STEP: f64 = 0.03;
const MIN_EXPLORATION_RATE: f64 = 0.10;
const MAX_EXPLORATION_RATE: f64 = 0.20;
const LARGE_LIBRARY_THRESHOLD: usize = 10_000;
const HIGH_SKIP_RATE: f64 = 0.30;
pub const SKIP_RATE_WINDOW_DAYS: u32 = 7;

/// Floor added to exploration weights so zero-score tracks stay reachable
const EXPLORATION_WEIGHT_FLOOR: f64 = 0.01;

/// Listening behaviour consulted for the exploration rate
#[cfg_attr(test, mockall::automock)]
pub trait BehaviorTracker: Send + Sync {
    /// Share of plays in the last `window_days` that were skipped, in [0, 1].
    /// A window without plays has a skip rate of 0.
    fn recent_skip_rate(&self, window_days: u32) -> Result<f64>;
    fn total_library_size(&self) -> Result<usize>;
}

/// Tracker backed by raw play events and the size of the last library scan
pub struct HistoryBehaviorTracker {
    events: Vec<PlayEvent>,
    library_size: Option<usize>,
    now: DateTime<Utc>,
}

impl HistoryBehaviorTracker {
    pub fn new(events: Vec<PlayEvent>, library_size: Option<usize>, now: DateTime<Utc>) -> Self {
        Self {
            events,
            library_size,
            now,
        }
    }
}

impl BehaviorTracker for HistoryBehaviorTracker {
    fn recent_skip_rate(&self, window_days: u32) -> Result<f64> {
        let window = f64::from(window_days);
        let (total, skipped) = self
            .events
            .iter()
            .filter(|e| (0.0..=window).contains(&weights::days_between(self.now, e.played_at)))
            .fold((0usize, 0usize), |(total, skipped), e| {
                (total + 1, skipped + usize::from(e.skipped))
            });

        if total == 0 {
            debug!("No listening events in the last {window_days} days");
            return Ok(0.0);
        }
        Ok(skipped as f64 / total as f64)
    }

    fn total_library_size(&self) -> Result<usize> {
        self.library_size
            .ok_or_else(|| Error::Unavailable("library size has not been scanned".to_string()))
    }
}

/// Exploration rate for a run without an explicit override.
///
/// Any tracker failure falls back to the baseline rate.
pub fn dynamic_exploration_rate(tracker: &dyn BehaviorTracker, discovery_playlist_enabled: bool) -> f64 {
    let library_size = match tracker.total_library_size() {
        Ok(size) => size,
        Err(e) => {
            warn!("Library size unavailable, using baseline exploration rate: {e}");
            return BASELINE_EXPLORATION_RATE;
        }
    };
    let skip_rate = match tracker.recent_skip_rate(SKIP_RATE_WINDOW_DAYS) {
        Ok(rate) => rate,
        Err(e) => {
            warn!("Skip rate unavailable, using baseline exploration rate: {e}");
            return BASELINE_EXPLORATION_RATE;
        }
    };

    let mut rate = BASELINE_EXPLORATION_RATE;
    if library_size > LARGE_LIBRARY_THRESHOLD {
        rate += EXPLORATION_RATE_STEP;
    }
    if skip_rate > HIGH_SKIP_RATE {
        rate += EXPLORATION_RATE_STEP;
    }
    if discovery_playlist_enabled {
        rate -= EXPLORATION_RATE_STEP;
    }

    let rate = rate.clamp(MIN_EXPLORATION_RATE, MAX_EXPLORATION_RATE);
    debug!("Exploration rate {rate:.2} (library {library_size}, skip rate {skip_rate:.2})");
    rate
}

/// Per-run selection parameters
#[derive(Debug, Clone)]
pub struct SelectionConstraints {
    pub target_count: usize,
    pub max_per_artist: usize,
    /// Largest share of `target_count` a single genre may take in pass 1
    pub genre_share_cap: f64,
    pub excluded_track_ids: HashSet<String>,
    /// `None` means the baseline rate
    pub exploration_rate: Option<f64>,
}

impl SelectionConstraints {
    pub fn new(target_count: usize) -> Self {
        Self {
            target_count,
            max_per_artist: DEFAULT_MAX_PER_ARTIST,
            genre_share_cap: DEFAULT_GENRE_SHARE_CAP,
            excluded_track_ids: HashSet::new(),
            exploration_rate: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_per_artist == 0 {
            return Err(Error::InvalidConstraints(
                "max_per_artist must be at least 1".to_string(),
            ));
        }
        if !self.genre_share_cap.is_finite() || !(0.0..=1.0).contains(&self.genre_share_cap) {
            return Err(Error::InvalidConstraints(format!(
                "genre_share_cap must lie in [0, 1], got {}",
                self.genre_share_cap
            )));
        }
        if let Some(rate) = self.exploration_rate {
            if !rate.is_finite() || !(0.0..=1.0).contains(&rate) {
                return Err(Error::InvalidConstraints(format!(
                    "exploration_rate must lie in [0, 1], got {rate}"
                )));
            }
        }
        Ok(())
    }
}

/// Which step of the selection admitted a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPass {
    /// Artist cap and genre share cap
    Diverse,
    ArtistCapped,
    Unconstrained,
    Exploration,
}

impl SelectionPass {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Diverse => "diverse",
            Self::ArtistCapped => "artist-capped",
            Self::Unconstrained => "unconstrained",
            Self::Exploration => "exploration",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SelectedTrack {
    pub track: CandidateTrack,
    pub pass: SelectionPass,
}

/// Outcome of one selection run, in playlist order
#[derive(Debug, Clone)]
pub struct SelectionResult {
    pub selected: Vec<SelectedTrack>,
    pub exploration_count: usize,
    pub target_count: usize,
    pub exploration_rate: f64,
}

impl SelectionResult {
    pub fn len(&self) -> usize {
        self.selected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }

    pub fn is_underfilled(&self) -> bool {
        self.selected.len() < self.target_count
    }

    pub fn track_ids(&self) -> Vec<String> {
        self.selected.iter().map(|s| s.track.track_id.clone()).collect()
    }

    pub fn count_by_pass(&self, pass: SelectionPass) -> usize {
        self.selected.iter().filter(|s| s.pass == pass).count()
    }
}

fn artist_key(track: &CandidateTrack) -> String {
    track.artist.trim().to_lowercase()
}

/// Every genre a track carries, normalised and deduplicated
fn genre_keys(track: &CandidateTrack) -> Vec<String> {
    let mut keys: Vec<String> = Vec::with_capacity(track.genres.len());
    for genre in &track.genres {
        let key = genre.trim().to_lowercase();
        if !key.is_empty() && !keys.contains(&key) {
            keys.push(key);
        }
    }
    keys
}

/// Running tallies of what has been accepted so far
struct SelectionState<'a> {
    constraints: &'a SelectionConstraints,
    pool: Vec<CandidateTrack>,
    taken: Vec<bool>,
    selected: Vec<SelectedTrack>,
    artist_counts: HashMap<String, usize>,
    genre_counts: HashMap<String, usize>,
}

impl<'a> SelectionState<'a> {
    fn new(pool: Vec<CandidateTrack>, constraints: &'a SelectionConstraints) -> Self {
        let taken = vec![false; pool.len()];
        Self {
            constraints,
            pool,
            taken,
            selected: Vec::new(),
            artist_counts: HashMap::new(),
            genre_counts: HashMap::new(),
        }
    }

    fn within_artist_cap(&self, track: &CandidateTrack) -> bool {
        self.artist_counts.get(&artist_key(track)).copied().unwrap_or(0) < self.constraints.max_per_artist
    }

    /// No genre of `track` may exceed the share cap once it is accepted
    fn within_genre_cap(&self, track: &CandidateTrack) -> bool {
        let genres = genre_keys(track);
        if genres.is_empty() {
            return true;
        }
        if self.constraints.target_count == 0 {
            return false;
        }
        let target = self.constraints.target_count as f64;
        genres.iter().all(|genre| {
            let count = self.genre_counts.get(genre).copied().unwrap_or(0);
            (count + 1) as f64 / target <= self.constraints.genre_share_cap
        })
    }

    fn admits(&self, pass: SelectionPass, track: &CandidateTrack) -> bool {
        match pass {
            SelectionPass::Diverse => self.within_artist_cap(track) && self.within_genre_cap(track),
            SelectionPass::ArtistCapped => self.within_artist_cap(track),
            SelectionPass::Unconstrained | SelectionPass::Exploration => true,
        }
    }

    fn accept(&mut self, index: usize, pass: SelectionPass) {
        let track = self.pool[index].clone();
        *self.artist_counts.entry(artist_key(&track)).or_insert(0) += 1;
        for genre in genre_keys(&track) {
            *self.genre_counts.entry(genre).or_insert(0) += 1;
        }
        self.taken[index] = true;
        self.selected.push(SelectedTrack { track, pass });
    }

    fn remaining(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.pool.len()).filter(|&i| !self.taken[i])
    }

    /// Greedy scan in score order
    fn run_pass(&mut self, pass: SelectionPass, limit: usize) {
        for index in 0..self.pool.len() {
            if self.selected.len() >= limit {
                break;
            }
            if !self.taken[index] && self.admits(pass, &self.pool[index]) {
                self.accept(index, pass);
            }
        }
    }

    fn explore<R: Rng + ?Sized>(&mut self, limit: usize, rng: &mut R) -> usize {
        let seen_artists: HashSet<String> = self.selected.iter().map(|s| artist_key(&s.track)).collect();
        let seen_genres: HashSet<String> = self.genre_counts.keys().cloned().collect();

        let mut picks = 0;
        while self.selected.len() < limit {
            let remaining: Vec<usize> = self.remaining().collect();
            if remaining.is_empty() {
                break;
            }

            // Stay under the artist cap while any such candidate is left
            let capped: Vec<usize> = remaining
                .iter()
                .copied()
                .filter(|&i| self.within_artist_cap(&self.pool[i]))
                .collect();
            let eligible = if capped.is_empty() { remaining } else { capped };

            let novel: Vec<usize> = eligible
                .iter()
                .copied()
                .filter(|&i| {
                    let track = &self.pool[i];
                    !seen_artists.contains(&artist_key(track))
                        || genre_keys(track).iter().any(|g| !seen_genres.contains(g))
                })
                .collect();

            let choice = if novel.is_empty() {
                eligible[rng.gen_range(0..eligible.len())]
            } else {
                self.weighted_pick(&novel, rng)
            };
            self.accept(choice, SelectionPass::Exploration);
            picks += 1;
        }
        picks
    }

    fn weighted_pick<R: Rng + ?Sized>(&self, indices: &[usize], rng: &mut R) -> usize {
        let bias = indices
            .iter()
            .map(|&i| self.pool[i].final_score.max(0.0) + EXPLORATION_WEIGHT_FLOOR);
        match WeightedIndex::new(bias) {
            Ok(dist) => indices[dist.sample(rng)],
            Err(_) => indices[rng.gen_range(0..indices.len())],
        }
    }
}

/// Constrained playlist selection
pub struct Selector;

impl Selector {
    /// Select up to `constraints.target_count` tracks from `pool`.
    ///
    /// The result is shorter than the target when the pool runs out; only
    /// malformed constraints are errors. Identical inputs and RNG state
    /// produce identical output.
    pub fn select<R: Rng + ?Sized>(
        pool: &[CandidateTrack],
        constraints: &SelectionConstraints,
        rng: &mut R,
    ) -> Result<SelectionResult> {
        constraints.validate()?;
        let exploration_rate = constraints.exploration_rate.unwrap_or(BASELINE_EXPLORATION_RATE);
        let target = constraints.target_count;

        let mut seen = HashSet::new();
        let mut eligible: Vec<CandidateTrack> = pool
            .iter()
            .filter(|c| !constraints.excluded_track_ids.contains(&c.track_id))
            .filter(|c| seen.insert(c.track_id.as_str()))
            .cloned()
            .collect();
        sort_by_score(&mut eligible);

        let exploit_target = ((target as f64 * (1.0 - exploration_rate)).round() as usize).min(target);
        let mut state = SelectionState::new(eligible, constraints);

        for pass in [
            SelectionPass::Diverse,
            SelectionPass::ArtistCapped,
            SelectionPass::Unconstrained,
        ] {
            state.run_pass(pass, exploit_target);
        }
        let exploration_count = state.explore(target, rng);

        debug!(
            "Selected {} of {} requested ({} exploration) from {} candidates",
            state.selected.len(),
            target,
            exploration_count,
            state.pool.len()
        );

        Ok(SelectionResult {
            selected: state.selected,
            exploration_count,
            target_count: target,
            exploration_rate,
        })
    }
}
