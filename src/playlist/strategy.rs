//! Scoring strategies and the registry that dispatches them.
//!
//! `balanced` and `quality` have two formula variants: the baseline
//! three-factor blend, and a contextual variant that adds genre, mood,
//! time-of-day, energy/tempo and exploration terms when those inputs exist.
//! `discovery` and `throwback` are multiplicative and ignore contextual input.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::weights::{
    self, DEFAULT_ARTIST_SPACING_PENALTY, DEFAULT_GENRE_SPACING_PENALTY, DEFAULT_MAX_SKIP_PENALTY,
    ScoringSettings,
};
use crate::error::{Error, Result};

const DAYS_PER_YEAR: f64 = 365.0;
const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Balanced,
    Quality,
    Discovery,
    Throwback,
}

impl Strategy {
    pub const ALL: [Strategy; 4] = [
        Strategy::Balanced,
        Strategy::Quality,
        Strategy::Discovery,
        Strategy::Throwback,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Balanced => "balanced",
            Self::Quality => "quality",
            Self::Discovery => "discovery",
            Self::Throwback => "throwback",
        }
    }

    /// Whether the strategy has the additive contextual variant
    pub fn supports_context(&self) -> bool {
        matches!(self, Self::Balanced | Self::Quality)
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|strategy| strategy.as_str() == wanted)
            .ok_or_else(|| Error::UnknownStrategy(s.to_string()))
    }
}

/// Lookback bounds in days for nostalgia scoring; the older end scores highest
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LookbackWindow {
    pub start_days: f64,
    pub end_days: f64,
}

impl Default for LookbackWindow {
    fn default() -> Self {
        Self {
            start_days: 180.0,
            end_days: 1095.0,
        }
    }
}

impl LookbackWindow {
    pub fn new(start_days: f64, end_days: f64) -> Result<Self> {
        let window = Self {
            start_days,
            end_days,
        };
        window.validate()?;
        Ok(window)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.start_days.is_finite() || !self.end_days.is_finite() || self.start_days < 0.0 {
            return Err(Error::Config(format!(
                "lookback window bounds must be non-negative day counts, got [{}, {}]",
                self.start_days, self.end_days
            )));
        }
        if self.end_days <= self.start_days {
            return Err(Error::Config(format!(
                "lookback window [{}, {}] has no width",
                self.start_days, self.end_days
            )));
        }
        Ok(())
    }

    pub fn width(&self) -> f64 {
        self.end_days - self.start_days
    }

    pub fn contains(&self, days: f64) -> bool {
        days >= self.start_days && days <= self.end_days
    }
}

/// Precomputed contextual terms, each in [0, 1].
///
/// `artist_spacing` and `genre_spacing` are multipliers (1.0 = no penalty).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContextualFactors {
    pub genre_match: f64,
    pub mood_similarity: f64,
    pub time_of_day: f64,
    pub energy_tempo: f64,
    pub exploration: f64,
    pub artist_spacing: f64,
    pub genre_spacing: f64,
}

impl Default for ContextualFactors {
    fn default() -> Self {
        Self {
            genre_match: 0.5,
            mood_similarity: 0.5,
            time_of_day: 0.0,
            energy_tempo: 0.5,
            exploration: 0.0,
            artist_spacing: 1.0,
            genre_spacing: 1.0,
        }
    }
}

/// Inputs for scoring one track
#[derive(Debug, Clone)]
pub struct ScoringContext {
    /// Star rating on a 0-5 scale
    pub rating: Option<f64>,
    pub play_count: u32,
    pub last_played_at: Option<DateTime<Utc>>,
    pub skip_count: u32,
    /// Overrides the value derived from `last_played_at`
    pub days_since_play: Option<f64>,
    pub lookback: Option<LookbackWindow>,
    /// Plays inside the lookback window; falls back to `play_count`
    pub play_count_in_window: Option<u32>,
    pub now: DateTime<Utc>,
    pub contextual: Option<ContextualFactors>,
}

impl ScoringContext {
    /// An unrated, never played track evaluated at `now`
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            rating: None,
            play_count: 0,
            last_played_at: None,
            skip_count: 0,
            days_since_play: None,
            lookback: None,
            play_count_in_window: None,
            now,
            contextual: None,
        }
    }

    fn days_since_play(&self) -> f64 {
        self.days_since_play
            .or_else(|| {
                self.last_played_at
                    .map(|played| weights::days_between(self.now, played))
            })
            .unwrap_or(0.0)
            .max(0.0)
    }
}

/// Additive boosts and multiplicative penalty amounts of a strategy
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Multipliers {
    pub genre_match: f64,
    pub mood_similarity: f64,
    pub time_of_day: f64,
    pub energy_tempo: f64,
    pub exploration: f64,
    /// Largest fraction removed at a 100% skip rate
    pub skip_penalty: f64,
    pub artist_spacing: f64,
    pub genre_spacing: f64,
}

impl Multipliers {
    const fn penalties_only() -> Self {
        Self {
            genre_match: 0.0,
            mood_similarity: 0.0,
            time_of_day: 0.0,
            energy_tempo: 0.0,
            exploration: 0.0,
            skip_penalty: DEFAULT_MAX_SKIP_PENALTY,
            artist_spacing: DEFAULT_ARTIST_SPACING_PENALTY,
            genre_spacing: DEFAULT_GENRE_SPACING_PENALTY,
        }
    }

    /// Share of the contextual score taken by the additive terms
    pub fn additive_share(&self) -> f64 {
        self.genre_match + self.mood_similarity + self.time_of_day + self.energy_tempo + self.exploration
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoringWeights {
    pub recency: f64,
    pub rating: f64,
    pub play_count: f64,
    pub multipliers: Multipliers,
}

impl ScoringWeights {
    fn base_sum(&self) -> f64 {
        self.recency + self.rating + self.play_count
    }

    fn validate(&self, strategy: Strategy) -> Result<()> {
        let m = &self.multipliers;
        let all = [
            self.recency,
            self.rating,
            self.play_count,
            m.genre_match,
            m.mood_similarity,
            m.time_of_day,
            m.energy_tempo,
            m.exploration,
            m.skip_penalty,
            m.artist_spacing,
            m.genre_spacing,
        ];
        if all.iter().any(|w| !w.is_finite() || !(0.0..=1.0).contains(w)) {
            return Err(Error::Config(format!(
                "{strategy}: every weight must lie in [0, 1]"
            )));
        }

        if strategy.supports_context() {
            if (self.base_sum() - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
                return Err(Error::Config(format!(
                    "{strategy}: recency, rating and play count weights must sum to 1, got {}",
                    self.base_sum()
                )));
            }
            if m.additive_share() >= 1.0 {
                return Err(Error::Config(format!(
                    "{strategy}: contextual weights must leave room for the base score, got {}",
                    m.additive_share()
                )));
            }
        } else if m.additive_share() > 0.0 {
            return Err(Error::Config(format!(
                "{strategy}: contextual weights are not supported by this formula"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FormulaVariant {
    Baseline,
    Contextual,
}

/// Breakdown of one scoring call
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoringComponents {
    pub recency_weight: f64,
    pub rating_norm: f64,
    pub play_count_norm: f64,
    pub skip_penalty: f64,
    pub fallback_score: f64,
    /// Weighted sum of contextual terms (zero for the baseline variant)
    pub contextual_boost: f64,
    pub final_score: f64,
    pub variant: FormulaVariant,
}

/// Human-readable description of a registered strategy
#[derive(Debug, Clone, Copy, Serialize)]
pub struct StrategyInfo {
    pub strategy: Strategy,
    pub label: &'static str,
    pub description: &'static str,
    pub formula: &'static str,
}

type ScoreFn = fn(&ScoringSettings, &ScoringWeights, &ScoringContext) -> ScoringComponents;

#[derive(Debug, Clone)]
pub struct StrategyDefinition {
    pub weights: ScoringWeights,
    pub info: StrategyInfo,
    score: ScoreFn,
}

/// Immutable lookup from strategy to weights, metadata and formula.
///
/// Built once at startup; construction validates every table so that
/// scoring itself can never hit a configuration error.
#[derive(Debug, Clone)]
pub struct StrategyRegistry {
    settings: ScoringSettings,
    definitions: HashMap<Strategy, StrategyDefinition>,
}

impl StrategyRegistry {
    pub fn new(settings: ScoringSettings) -> Result<Self> {
        Self::with_definitions(settings, default_definitions())
    }

    pub fn with_definitions(
        settings: ScoringSettings,
        definitions: Vec<StrategyDefinition>,
    ) -> Result<Self> {
        settings.validate()?;

        let mut table = HashMap::new();
        for definition in definitions {
            definition.weights.validate(definition.info.strategy)?;
            table.insert(definition.info.strategy, definition);
        }
        if let Some(missing) = Strategy::ALL.iter().find(|s| !table.contains_key(s)) {
            return Err(Error::Config(format!("no definition registered for {missing}")));
        }

        Ok(Self {
            settings,
            definitions: table,
        })
    }

    pub fn definition(&self, strategy: Strategy) -> Result<&StrategyDefinition> {
        self.definitions
            .get(&strategy)
            .ok_or_else(|| Error::UnknownStrategy(strategy.to_string()))
    }

    pub fn weights(&self, strategy: Strategy) -> Result<&ScoringWeights> {
        self.definition(strategy).map(|d| &d.weights)
    }

    /// Registered strategies in declaration order
    pub fn strategies(&self) -> Vec<&StrategyInfo> {
        Strategy::ALL
            .iter()
            .filter_map(|s| self.definitions.get(s))
            .map(|d| &d.info)
            .collect()
    }

    pub fn score(&self, strategy: Strategy, ctx: &ScoringContext) -> Result<ScoringComponents> {
        let definition = self.definition(strategy)?;
        Ok((definition.score)(&self.settings, &definition.weights, ctx))
    }
}

fn default_definitions() -> Vec<StrategyDefinition> {
    vec![
        StrategyDefinition {
            weights: ScoringWeights {
                recency: 0.6,
                rating: 0.3,
                play_count: 0.1,
                multipliers: Multipliers {
                    genre_match: 0.10,
                    mood_similarity: 0.05,
                    time_of_day: 0.10,
                    energy_tempo: 0.05,
                    exploration: 0.05,
                    ..Multipliers::penalties_only()
                },
            },
            info: StrategyInfo {
                strategy: Strategy::Balanced,
                label: "Balanced",
                description: "Favors what was played recently; default for time-of-day playlists",
                formula: "(0.6*recency + 0.3*rating + 0.1*plays) * skip; \
                          contextual: [R + P + G + M + T + E + D] * A",
            },
            score: score_weighted,
        },
        StrategyDefinition {
            weights: ScoringWeights {
                recency: 0.1,
                rating: 0.6,
                play_count: 0.3,
                multipliers: Multipliers {
                    genre_match: 0.15,
                    mood_similarity: 0.10,
                    time_of_day: 0.05,
                    energy_tempo: 0.05,
                    exploration: 0.05,
                    ..Multipliers::penalties_only()
                },
            },
            info: StrategyInfo {
                strategy: Strategy::Quality,
                label: "Quality",
                description: "Favors proven favourites over recency; default for genre and mood playlists",
                formula: "(0.6*rating + 0.3*plays + 0.1*recency) * skip; \
                          contextual: [R + P + G + M + T + E + D] * A",
            },
            score: score_weighted,
        },
        StrategyDefinition {
            weights: ScoringWeights {
                recency: 0.0,
                rating: 0.0,
                play_count: 0.0,
                multipliers: Multipliers::penalties_only(),
            },
            info: StrategyInfo {
                strategy: Strategy::Discovery,
                label: "Discovery",
                description: "Surfaces good tracks that are under-played or long forgotten",
                formula: "quality * (1 - min(plays, sat)/sat) * min(days/365, 1)",
            },
            score: score_discovery,
        },
        StrategyDefinition {
            weights: ScoringWeights {
                recency: 0.0,
                rating: 0.0,
                play_count: 0.0,
                multipliers: Multipliers::penalties_only(),
            },
            info: StrategyInfo {
                strategy: Strategy::Throwback,
                label: "Throwback",
                description: "Brings back tracks that were popular inside a past window",
                formula: "nostalgia * min(window_plays/sat, 1) * quality",
            },
            score: score_throwback,
        },
    ]
}

fn saturation_ratio(count: u32, saturation: u32) -> f64 {
    if saturation == 0 {
        return 0.0;
    }
    (f64::from(count) / f64::from(saturation)).min(1.0)
}

/// Components every strategy reports regardless of its formula
fn common_components(settings: &ScoringSettings, table: &ScoringWeights, ctx: &ScoringContext) -> ScoringComponents {
    let plays = Some(ctx.play_count);
    ScoringComponents {
        recency_weight: weights::recency_weight(ctx.last_played_at, ctx.now, settings.recency_half_life_days),
        rating_norm: weights::normalize_star_rating(ctx.rating),
        play_count_norm: weights::normalize_play_count(plays, settings.play_count_saturation),
        skip_penalty: weights::skip_penalty(
            Some(ctx.skip_count),
            plays,
            table.multipliers.skip_penalty,
        ),
        fallback_score: weights::fallback_score(ctx.rating, plays, settings.play_count_saturation),
        contextual_boost: 0.0,
        final_score: 0.0,
        variant: FormulaVariant::Baseline,
    }
}

fn score_weighted(settings: &ScoringSettings, table: &ScoringWeights, ctx: &ScoringContext) -> ScoringComponents {
    let mut components = common_components(settings, table, ctx);

    // Dividing by the weight sum keeps saturated inputs at exactly 1.0
    let weighted = table.recency * components.recency_weight
        + table.rating * components.rating_norm
        + table.play_count * components.play_count_norm;
    let total_weight = table.base_sum();
    let base = if total_weight > 0.0 { weighted / total_weight } else { 0.0 };

    match ctx.contextual {
        None => {
            components.final_score = (base * components.skip_penalty).clamp(0.0, 1.0);
        }
        Some(factors) => {
            let m = &table.multipliers;
            let boost = m.genre_match * factors.genre_match.clamp(0.0, 1.0)
                + m.mood_similarity * factors.mood_similarity.clamp(0.0, 1.0)
                + m.time_of_day * factors.time_of_day.clamp(0.0, 1.0)
                + m.energy_tempo * factors.energy_tempo.clamp(0.0, 1.0)
                + m.exploration * factors.exploration.clamp(0.0, 1.0);
            let adjustment = components.skip_penalty
                * factors.artist_spacing.clamp(0.0, 1.0)
                * factors.genre_spacing.clamp(0.0, 1.0);

            components.contextual_boost = boost;
            components.final_score =
                (((1.0 - m.additive_share()) * base + boost) * adjustment).clamp(0.0, 1.0);
            components.variant = FormulaVariant::Contextual;
        }
    }
    components
}

fn score_discovery(settings: &ScoringSettings, table: &ScoringWeights, ctx: &ScoringContext) -> ScoringComponents {
    let mut components = common_components(settings, table, ctx);
    let saturation = settings.play_count_saturation;

    let quality = if ctx.rating.is_some() {
        components.rating_norm
    } else {
        saturation_ratio(ctx.play_count, saturation) * 0.5
    };
    let play_count_penalty = 1.0 - saturation_ratio(ctx.play_count, saturation);
    let recency_penalty = (ctx.days_since_play() / DAYS_PER_YEAR).min(1.0);

    components.final_score = (quality * play_count_penalty * recency_penalty).clamp(0.0, 1.0);
    components
}

fn score_throwback(settings: &ScoringSettings, table: &ScoringWeights, ctx: &ScoringContext) -> ScoringComponents {
    let mut components = common_components(settings, table, ctx);
    let saturation = settings.play_count_saturation;
    let window = ctx.lookback.unwrap_or_default();

    let nostalgia = if window.width() > 0.0 {
        ((ctx.days_since_play() - window.start_days) / window.width()).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let window_plays = ctx.play_count_in_window.unwrap_or(ctx.play_count);
    let play_count_weight = saturation_ratio(window_plays, saturation);
    let quality = if ctx.rating.is_some() {
        components.rating_norm
    } else {
        play_count_weight * 0.6
    };

    components.final_score = (nostalgia * play_count_weight * quality).clamp(0.0, 1.0);
    components
}
