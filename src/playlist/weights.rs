//! Numeric building blocks for track scoring.
//!
//! Every function here is total: missing inputs map to documented neutral
//! values and results are clamped to their stated ranges.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::similarity::GenreSimilarity;
use crate::error::{Error, Result};

pub const DEFAULT_RECENCY_HALF_LIFE_DAYS: f64 = 7.0;
pub const DEFAULT_PLAY_COUNT_SATURATION: u32 = 25;

/// Normalized rating used when a track has never been rated
pub const NEUTRAL_RATING: f64 = 0.5;
pub const DEFAULT_MAX_SKIP_PENALTY: f64 = 0.5;
pub const DEFAULT_ARTIST_SPACING_PENALTY: f64 = 0.30;
pub const DEFAULT_GENRE_SPACING_PENALTY: f64 = 0.15;

pub const MAX_EXPLORATION_BOOST: f64 = 0.20;
const UNPLAYED_EXPLORATION_BOOST: f64 = 0.15;
const LIGHTLY_PLAYED_EXPLORATION_BOOST: f64 = 0.10;
const LIGHTLY_PLAYED_MAX_PLAYS: u32 = 5;
const FRESHNESS_BOOST: f64 = 0.05;
const FRESHNESS_WINDOW_DAYS: f64 = 30.0;

/// Energy distance over which the energy proximity score falls to zero
const ENERGY_FALLOFF_BAND: f64 = 0.2;
/// BPM distance over which tempo alignment falls to zero
const TEMPO_TOLERANCE_BPM: f64 = 40.0;

const MILLIS_PER_DAY: f64 = 86_400_000.0;

/// Tunables shared by all strategies
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringSettings {
    pub recency_half_life_days: f64,
    pub play_count_saturation: u32,
}

impl Default for ScoringSettings {
    fn default() -> Self {
        Self {
            recency_half_life_days: DEFAULT_RECENCY_HALF_LIFE_DAYS,
            play_count_saturation: DEFAULT_PLAY_COUNT_SATURATION,
        }
    }
}

impl ScoringSettings {
    pub fn validate(&self) -> Result<()> {
        if !self.recency_half_life_days.is_finite() || self.recency_half_life_days <= 0.0 {
            return Err(Error::Config(format!(
                "recency half-life must be a positive number of days, got {}",
                self.recency_half_life_days
            )));
        }
        if self.play_count_saturation == 0 {
            return Err(Error::Config(
                "play count saturation must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Fractional days from `then` until `now` (negative when `then` is in the future)
pub fn days_between(now: DateTime<Utc>, then: DateTime<Utc>) -> f64 {
    now.signed_duration_since(then).num_milliseconds() as f64 / MILLIS_PER_DAY
}

/// Exponential recency decay with the given half-life.
///
/// Never-played tracks get full credit.
pub fn recency_weight(
    last_played: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    half_life_days: f64,
) -> f64 {
    let Some(last_played) = last_played else {
        return 1.0;
    };
    let days = days_between(now, last_played).max(0.0);

    if half_life_days <= 0.0 {
        return if days == 0.0 { 0.0 } else { 1.0 };
    }

    (-std::f64::consts::LN_2 * days / half_life_days)
        .exp()
        .clamp(0.0, 1.0)
}

/// Map a 0-5 star rating onto [0, 1]
pub fn normalize_star_rating(rating: Option<f64>) -> f64 {
    match rating {
        Some(stars) if stars.is_finite() => stars.clamp(0.0, 5.0) / 5.0,
        _ => NEUTRAL_RATING,
    }
}

pub fn normalize_play_count(count: Option<u32>, saturation: u32) -> f64 {
    match count {
        Some(plays) if plays > 0 && saturation > 0 => {
            f64::from(plays.min(saturation)) / f64::from(saturation)
        }
        _ => 0.0,
    }
}

/// Score used to rank tracks that have no listening history in the window
pub fn fallback_score(rating: Option<f64>, count: Option<u32>, saturation: u32) -> f64 {
    0.6 * normalize_star_rating(rating) + 0.4 * normalize_play_count(count, saturation)
}

/// Multiplier in `[1 - max_penalty, 1]` driven by the skip rate
pub fn skip_penalty(skip_count: Option<u32>, play_count: Option<u32>, max_penalty: f64) -> f64 {
    let (Some(skips), Some(plays)) = (skip_count, play_count) else {
        return 1.0;
    };
    if skips == 0 || plays == 0 {
        return 1.0;
    }
    let skip_rate = (f64::from(skips) / f64::from(plays)).min(1.0);
    1.0 - skip_rate * max_penalty.clamp(0.0, 1.0)
}

/// Additive boost in `[0, MAX_EXPLORATION_BOOST]` for unplayed or newly added tracks
pub fn exploration_boost(
    view_count: Option<u32>,
    added_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> f64 {
    let play_boost = match view_count {
        None | Some(0) => UNPLAYED_EXPLORATION_BOOST,
        Some(plays) if plays <= LIGHTLY_PLAYED_MAX_PLAYS => LIGHTLY_PLAYED_EXPLORATION_BOOST,
        Some(_) => 0.0,
    };

    let freshness = added_at.map_or(0.0, |added| {
        let days = days_between(now, added).max(0.0);
        if days < FRESHNESS_WINDOW_DAYS {
            FRESHNESS_BOOST * (1.0 - days / FRESHNESS_WINDOW_DAYS)
        } else {
            0.0
        }
    });

    (play_boost + freshness).clamp(0.0, MAX_EXPLORATION_BOOST)
}

pub fn artist_spacing_penalty(artist: &str, recent_artists: &[String], penalty_amount: f64) -> f64 {
    let artist = artist.trim().to_lowercase();
    let recent = recent_artists
        .iter()
        .any(|recent| recent.trim().to_lowercase() == artist);
    if recent {
        1.0 - penalty_amount.clamp(0.0, 1.0)
    } else {
        1.0
    }
}

pub fn genre_spacing_penalty(genres: &[String], recent_genres: &[String], penalty_amount: f64) -> f64 {
    let recent: HashSet<String> = recent_genres.iter().map(|g| g.trim().to_lowercase()).collect();
    if genres.iter().any(|g| recent.contains(&g.trim().to_lowercase())) {
        1.0 - penalty_amount.clamp(0.0, 1.0)
    } else {
        1.0
    }
}

/// Part of the day a playlist is generated for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeWindow {
    Morning,
    Afternoon,
    Evening,
    Night,
}

/// Static taste profile for a [`TimeWindow`]
#[derive(Debug, Clone, Copy)]
pub struct TimeWindowProfile {
    pub genres: &'static [&'static str],
    pub moods: &'static [&'static str],
    pub target_energy: f64,
    /// Largest boost this window can award
    pub boost: f64,
}

impl TimeWindow {
    pub fn profile(&self) -> TimeWindowProfile {
        match self {
            Self::Morning => TimeWindowProfile {
                genres: &["acoustic", "folk", "indie", "jazz", "pop", "singer-songwriter"],
                moods: &["calm", "uplifting", "bright", "peaceful"],
                target_energy: 0.5,
                boost: 0.10,
            },
            Self::Afternoon => TimeWindowProfile {
                genres: &["pop", "rock", "electronic", "hip-hop", "funk"],
                moods: &["energetic", "upbeat", "happy", "confident"],
                target_energy: 0.7,
                boost: 0.15,
            },
            Self::Evening => TimeWindowProfile {
                genres: &["rock", "electronic", "dance", "r&b", "soul", "house"],
                moods: &["party", "energetic", "romantic", "groovy"],
                target_energy: 0.65,
                boost: 0.15,
            },
            Self::Night => TimeWindowProfile {
                genres: &["ambient", "jazz", "classical", "lo-fi", "downtempo"],
                moods: &["mellow", "chill", "dreamy", "melancholic"],
                target_energy: 0.3,
                boost: 0.10,
            },
        }
    }
}

fn energy_proximity(energy: Option<f64>, target: f64) -> f64 {
    energy.map_or(0.0, |e| {
        (1.0 - (e - target).abs() / ENERGY_FALLOFF_BAND).clamp(0.0, 1.0)
    })
}

fn mood_overlap(moods: &[String], profile_moods: &[&str]) -> f64 {
    let hit = moods
        .iter()
        .any(|m| profile_moods.contains(&m.trim().to_lowercase().as_str()));
    if hit { 1.0 } else { 0.0 }
}

/// Boost in `[0, profile.boost]` for tracks that suit the time window.
///
/// `learned_genre_weights` are genre weights learned for the current hour;
/// when present they drive most of the boost instead of the static profile.
pub fn time_of_day_boost(
    genres: &[String],
    moods: &[String],
    energy: Option<f64>,
    window: TimeWindow,
    learned_genre_weights: Option<&HashMap<String, f64>>,
) -> f64 {
    let profile = window.profile();
    let energy_score = energy_proximity(energy, profile.target_energy);
    let mood_score = mood_overlap(moods, profile.moods);

    let blended = match learned_genre_weights {
        Some(learned) => {
            let learned_weight = genres
                .iter()
                .filter_map(|g| learned.get(&g.trim().to_lowercase()))
                .copied()
                .filter(|w| w.is_finite())
                .fold(0.0_f64, f64::max)
                .clamp(0.0, 1.0);
            0.7 * learned_weight + 0.2 * energy_score + 0.1 * mood_score
        }
        None => {
            let genre_hit = genres.iter().any(|g| {
                let g = g.to_lowercase();
                profile.genres.iter().any(|p| g.contains(p))
            });
            let genre_score = if genre_hit { 1.0 } else { 0.0 };
            0.5 * genre_score + 0.3 * energy_score + 0.2 * mood_score
        }
    };

    (profile.boost * blended).clamp(0.0, profile.boost)
}

/// How well a track's genres match the target genres, in `[0.3, 1.0]`.
///
/// Tiers: exact match, substring overlap, oracle-confirmed relation, none.
/// An oracle failure degrades to the neutral 0.5.
pub async fn genre_match_score(
    track_genres: &[String],
    target_genres: &[String],
    oracle: Option<&dyn GenreSimilarity>,
) -> f64 {
    if track_genres.is_empty() || target_genres.is_empty() {
        return 0.5;
    }

    let track: Vec<String> = track_genres.iter().map(|g| g.trim().to_lowercase()).collect();
    let target: Vec<String> = target_genres.iter().map(|g| g.trim().to_lowercase()).collect();
    let total = track.len() as f64;

    let exact = track.iter().filter(|g| target.contains(g)).count();
    if exact > 0 {
        return 0.7 + 0.3 * (exact as f64 / total).min(1.0);
    }

    let partial = track
        .iter()
        .filter(|g| target.iter().any(|t| g.contains(t.as_str()) || t.contains(g.as_str())))
        .count();
    if partial > 0 {
        return 0.5 + 0.2 * (partial as f64 / total).min(1.0);
    }

    let Some(oracle) = oracle else {
        return 0.3;
    };

    let mut similar = 0usize;
    for genre in &track {
        for wanted in &target {
            match oracle.are_similar(genre, wanted).await {
                Ok(true) => {
                    similar += 1;
                    break;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!("Genre similarity lookup failed for '{genre}' / '{wanted}': {e}");
                    return 0.5;
                }
            }
        }
    }

    if similar > 0 {
        0.4 + 0.2 * (similar as f64 / total).min(1.0)
    } else {
        0.3
    }
}

/// Cosine similarity of two mood vectors remapped onto [0, 1]
pub fn mood_similarity(track: &HashMap<String, f64>, target: &HashMap<String, f64>) -> f64 {
    if track.is_empty() || target.is_empty() {
        return 0.5;
    }

    let keys: HashSet<&String> = track.keys().chain(target.keys()).collect();
    let mut dot = 0.0;
    let mut norm_track = 0.0;
    let mut norm_target = 0.0;
    for key in keys {
        let a = track.get(key).copied().unwrap_or(0.0);
        let b = target.get(key).copied().unwrap_or(0.0);
        dot += a * b;
        norm_track += a * a;
        norm_target += b * b;
    }

    if norm_track == 0.0 || norm_target == 0.0 {
        return 0.5;
    }

    let cosine = (dot / (norm_track.sqrt() * norm_target.sqrt())).clamp(-1.0, 1.0);
    (cosine + 1.0) / 2.0
}

/// Closeness of a track's energy and tempo to the targets, 0.5 when nothing is comparable
pub fn energy_tempo_alignment(
    energy: Option<f64>,
    bpm: Option<u32>,
    target_energy: Option<f64>,
    target_bpm: Option<u32>,
) -> f64 {
    let mut parts = Vec::with_capacity(2);
    if let (Some(e), Some(t)) = (energy, target_energy) {
        parts.push((1.0 - (e - t).abs()).clamp(0.0, 1.0));
    }
    if let (Some(b), Some(t)) = (bpm, target_bpm) {
        let distance = (f64::from(b) - f64::from(t)).abs();
        parts.push((1.0 - distance / TEMPO_TOLERANCE_BPM).clamp(0.0, 1.0));
    }
    if parts.is_empty() {
        0.5
    } else {
        parts.iter().sum::<f64>() / parts.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playlist::similarity::{GenreFamilyOracle, MockGenreSimilarity};
    use approx::assert_relative_eq;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_settings_validation() {
        assert!(ScoringSettings::default().validate().is_ok());
        let zero_saturation = ScoringSettings {
            play_count_saturation: 0,
            ..Default::default()
        };
        assert!(zero_saturation.validate().is_err());
        let negative_half_life = ScoringSettings {
            recency_half_life_days: -1.0,
            ..Default::default()
        };
        assert!(negative_half_life.validate().is_err());
    }

    #[test]
    fn test_recency_weight_never_played_is_full_credit() {
        assert_eq!(recency_weight(None, now(), 7.0), 1.0);
        assert_eq!(recency_weight(None, now(), 0.0), 1.0);
    }

    #[test]
    fn test_recency_weight_decays_by_half_life() {
        assert_relative_eq!(recency_weight(Some(now()), now(), 7.0), 1.0);
        let week_ago = now() - Duration::days(7);
        assert_relative_eq!(recency_weight(Some(week_ago), now(), 7.0), 0.5, epsilon = 1e-9);
        let two_weeks_ago = now() - Duration::days(14);
        assert_relative_eq!(recency_weight(Some(two_weeks_ago), now(), 7.0), 0.25, epsilon = 1e-9);
    }

    #[test]
    fn test_recency_weight_is_monotonic() {
        let mut previous = f64::INFINITY;
        for days in 0..120 {
            let weight = recency_weight(Some(now() - Duration::days(days)), now(), 7.0);
            assert!(weight <= previous);
            assert!((0.0..=1.0).contains(&weight));
            previous = weight;
        }
    }

    #[test]
    fn test_recency_weight_future_timestamp_clamps_to_today() {
        let tomorrow = now() + Duration::days(1);
        assert_relative_eq!(recency_weight(Some(tomorrow), now(), 7.0), 1.0);
    }

    #[test]
    fn test_recency_weight_degenerate_half_life() {
        assert_eq!(recency_weight(Some(now()), now(), 0.0), 0.0);
        assert_eq!(recency_weight(Some(now() - Duration::days(3)), now(), 0.0), 1.0);
    }

    #[test]
    fn test_rating_and_play_count_normalization() {
        assert_eq!(normalize_star_rating(None), 0.5);
        assert_eq!(normalize_star_rating(Some(5.0)), 1.0);
        assert_eq!(normalize_star_rating(Some(9.0)), 1.0);
        assert_eq!(normalize_star_rating(Some(-2.0)), 0.0);
        assert_relative_eq!(normalize_star_rating(Some(3.0)), 0.6);

        assert_eq!(normalize_play_count(Some(0), 25), 0.0);
        assert_eq!(normalize_play_count(None, 25), 0.0);
        assert_relative_eq!(normalize_play_count(Some(5), 25), 0.2);
        assert_eq!(normalize_play_count(Some(100), 25), 1.0);
    }

    #[test]
    fn test_fallback_score_blend() {
        assert_eq!(fallback_score(Some(5.0), Some(25), 25), 1.0);
        assert_relative_eq!(fallback_score(None, None, 25), 0.3);
    }

    #[test]
    fn test_skip_penalty() {
        assert_eq!(skip_penalty(None, Some(10), 0.5), 1.0);
        assert_eq!(skip_penalty(Some(3), Some(0), 0.5), 1.0);
        assert_relative_eq!(skip_penalty(Some(5), Some(10), 0.5), 0.75);
        assert_relative_eq!(skip_penalty(Some(20), Some(10), 0.5), 0.5);
    }

    #[test]
    fn test_exploration_boost() {
        assert_relative_eq!(exploration_boost(None, None, now()), 0.15);
        assert_relative_eq!(exploration_boost(Some(3), None, now()), 0.10);
        assert_eq!(exploration_boost(Some(40), None, now()), 0.0);
        // Added today and never played hits the cap
        assert_relative_eq!(exploration_boost(Some(0), Some(now()), now()), 0.20);
        let half_window = now() - Duration::days(15);
        assert_relative_eq!(exploration_boost(Some(40), Some(half_window), now()), 0.025, epsilon = 1e-9);
        let old = now() - Duration::days(45);
        assert_eq!(exploration_boost(Some(40), Some(old), now()), 0.0);
    }

    #[test]
    fn test_spacing_penalties() {
        let recent = strings(&["Radiohead", "Bjork"]);
        assert_relative_eq!(artist_spacing_penalty("radiohead", &recent, 0.30), 0.7);
        assert_eq!(artist_spacing_penalty("Portishead", &recent, 0.30), 1.0);

        let recent_genres = strings(&["Trip-Hop"]);
        assert_relative_eq!(
            genre_spacing_penalty(&strings(&["electronic", "trip-hop"]), &recent_genres, 0.15),
            0.85
        );
        assert_eq!(genre_spacing_penalty(&[], &recent_genres, 0.15), 1.0);
    }

    #[test]
    fn test_time_of_day_boost_static_profile() {
        let genres = strings(&["Ambient"]);
        let moods = strings(&["chill"]);
        let full = time_of_day_boost(&genres, &moods, Some(0.3), TimeWindow::Night, None);
        assert_relative_eq!(full, 0.10);

        let genre_only = time_of_day_boost(&genres, &[], None, TimeWindow::Night, None);
        assert_relative_eq!(genre_only, 0.05);

        let nothing = time_of_day_boost(&strings(&["metal"]), &[], None, TimeWindow::Night, None);
        assert_eq!(nothing, 0.0);
    }

    #[test]
    fn test_time_of_day_boost_learned_patterns() {
        let mut learned = HashMap::new();
        learned.insert("rock".to_string(), 0.5);
        learned.insert("pop".to_string(), 1.0);

        let boost = time_of_day_boost(
            &strings(&["Rock", "Pop"]),
            &[],
            None,
            TimeWindow::Afternoon,
            Some(&learned),
        );
        assert_relative_eq!(boost, 0.15 * 0.7);

        // Energy 0.1 away from the 0.7 target keeps half of its share
        let with_energy = time_of_day_boost(
            &strings(&["Rock"]),
            &[],
            Some(0.8),
            TimeWindow::Afternoon,
            Some(&learned),
        );
        assert_relative_eq!(with_energy, 0.15 * (0.7 * 0.5 + 0.2 * 0.5), epsilon = 1e-9);
    }

    #[tokio::test]
    async fn test_genre_match_tiers() {
        let oracle = GenreFamilyOracle::new();
        let target = strings(&["Rock"]);

        assert_eq!(genre_match_score(&[], &target, Some(&oracle)).await, 0.5);
        assert_eq!(genre_match_score(&strings(&["rock"]), &target, Some(&oracle)).await, 1.0);
        assert_relative_eq!(
            genre_match_score(&strings(&["rock", "jazz"]), &target, Some(&oracle)).await,
            0.85
        );
        assert_relative_eq!(
            genre_match_score(&strings(&["Indie Rock"]), &target, Some(&oracle)).await,
            0.7
        );
        assert_relative_eq!(
            genre_match_score(&strings(&["grunge"]), &target, Some(&oracle)).await,
            0.6
        );
        assert_relative_eq!(
            genre_match_score(&strings(&["opera"]), &target, Some(&oracle)).await,
            0.3
        );
        assert_relative_eq!(genre_match_score(&strings(&["grunge"]), &target, None).await, 0.3);
    }

    #[tokio::test]
    async fn test_genre_match_oracle_failure_is_neutral() {
        let mut oracle = MockGenreSimilarity::new();
        oracle
            .expect_are_similar()
            .returning(|_, _| Err(Error::Similarity("timed out".to_string())));

        let score = genre_match_score(&strings(&["grunge"]), &strings(&["rock"]), Some(&oracle)).await;
        assert_eq!(score, 0.5);
    }

    #[test]
    fn test_mood_similarity() {
        let mut a = HashMap::new();
        a.insert("happy".to_string(), 1.0);
        let mut b = HashMap::new();
        b.insert("happy".to_string(), 2.0);
        assert_relative_eq!(mood_similarity(&a, &b), 1.0);

        let mut c = HashMap::new();
        c.insert("sad".to_string(), 1.0);
        assert_relative_eq!(mood_similarity(&a, &c), 0.5);

        let mut opposite = HashMap::new();
        opposite.insert("happy".to_string(), -1.0);
        assert_relative_eq!(mood_similarity(&a, &opposite), 0.0);

        assert_eq!(mood_similarity(&HashMap::new(), &a), 0.5);
    }

    #[test]
    fn test_energy_tempo_alignment() {
        assert_eq!(energy_tempo_alignment(None, None, Some(0.5), Some(120)), 0.5);
        assert_relative_eq!(energy_tempo_alignment(None, Some(120), None, Some(120)), 1.0);
        assert_relative_eq!(energy_tempo_alignment(None, Some(100), None, Some(120)), 0.5);
        assert_relative_eq!(
            energy_tempo_alignment(Some(0.6), Some(160), Some(0.5), Some(120)),
            0.45,
            epsilon = 1e-9
        );
    }
}
