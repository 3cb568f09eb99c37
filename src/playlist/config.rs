use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::candidates::TargetContext;
use super::selector::{DEFAULT_GENRE_SHARE_CAP, DEFAULT_MAX_PER_ARTIST, SelectionConstraints};
use super::strategy::{LookbackWindow, Strategy};
use super::weights::TimeWindow;
use crate::error::{Error, Result};

fn default_target_length() -> usize {
    20
}

fn default_max_per_artist() -> usize {
    DEFAULT_MAX_PER_ARTIST
}

fn default_genre_share_cap() -> f64 {
    DEFAULT_GENRE_SHARE_CAP
}

fn default_true() -> bool {
    true
}

/// One playlist definition from the JSON configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaylistConfig {
    pub name: String, // Base name, also used to find the playlist to replace
    /// Scoring strategy identifier; defaults by playlist kind when absent
    pub strategy: Option<String>,
    pub genre_filter: Option<String>, // Substring of the primary genre
    pub acceptable_genres: Option<Vec<String>>,
    pub unacceptable_genres: Option<Vec<String>>,
    pub bpm_thresholds: Option<BpmThresholds>,
    #[serde(default = "default_target_length")]
    pub target_length: usize,
    #[serde(default = "default_max_per_artist")]
    pub max_per_artist: usize,
    #[serde(default = "default_genre_share_cap")]
    pub genre_share_cap: f64,
    pub exploration_rate: Option<f64>, // Overrides the dynamic rate
    pub time_window: Option<TimeWindow>,
    #[serde(default)]
    pub target_genres: Vec<String>,
    #[serde(default)]
    pub target_moods: HashMap<String, f64>,
    pub target_energy: Option<f64>,
    pub target_bpm: Option<u32>,
    pub lookback: Option<LookbackWindow>,
    #[serde(default = "default_true")]
    pub similarity_expansion: bool,
}

/// BPM range for playlist filtering
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BpmThresholds {
    pub min_bpm: u32,
    pub max_bpm: u32,
}

impl Default for PlaylistConfig {
    fn default() -> Self {
        Self {
            name: "Default Playlist".to_string(),
            strategy: None,
            genre_filter: None,
            acceptable_genres: None,
            unacceptable_genres: None,
            bpm_thresholds: None,
            target_length: default_target_length(),
            max_per_artist: DEFAULT_MAX_PER_ARTIST,
            genre_share_cap: DEFAULT_GENRE_SHARE_CAP,
            exploration_rate: None,
            time_window: None,
            target_genres: Vec::new(),
            target_moods: HashMap::new(),
            target_energy: None,
            target_bpm: None,
            lookback: None,
            similarity_expansion: true,
        }
    }
}

impl PlaylistConfig {
    /// Load and validate playlist definitions from a JSON array file
    pub fn load_all_from_file(path: impl AsRef<Path>) -> Result<Vec<PlaylistConfig>> {
        let content = std::fs::read_to_string(path)?;
        let configs: Vec<PlaylistConfig> = serde_json::from_str(&content)?;
        for config in &configs {
            config.validate()?;
        }
        Ok(configs)
    }

    /// Time-of-day playlists favour recency, everything else favours quality
    pub fn strategy(&self) -> Result<Strategy> {
        match &self.strategy {
            Some(identifier) => identifier.parse(),
            None if self.time_window.is_some() => Ok(Strategy::Balanced),
            None => Ok(Strategy::Quality),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| Error::Config(format!("playlist '{}': {reason}", self.name));

        if self.name.trim().is_empty() {
            return Err(Error::Config("playlist name must not be empty".to_string()));
        }
        self.strategy()?;
        if let Some(window) = &self.lookback {
            window.validate().map_err(|e| invalid(e.to_string()))?;
        }
        if let Some(bpm) = &self.bpm_thresholds {
            if bpm.min_bpm > bpm.max_bpm {
                return Err(invalid(format!(
                    "bpm range {}-{} is inverted",
                    bpm.min_bpm, bpm.max_bpm
                )));
            }
        }
        if let Some(energy) = self.target_energy {
            if !(0.0..=1.0).contains(&energy) {
                return Err(invalid(format!("target_energy must lie in [0, 1], got {energy}")));
            }
        }
        if self.target_moods.values().any(|w| !w.is_finite()) {
            return Err(invalid("target mood weights must be finite".to_string()));
        }
        self.constraints(HashSet::new())
            .validate()
            .map_err(|e| invalid(e.to_string()))
    }

    pub fn constraints(&self, excluded_track_ids: HashSet<String>) -> SelectionConstraints {
        SelectionConstraints {
            max_per_artist: self.max_per_artist,
            genre_share_cap: self.genre_share_cap,
            excluded_track_ids,
            exploration_rate: self.exploration_rate,
            ..SelectionConstraints::new(self.target_length)
        }
    }

    /// Targeting inputs for contextual scoring; recent listening is filled in by the generator
    pub fn target_context(&self) -> TargetContext {
        TargetContext {
            genres: self.target_genres.clone(),
            moods: self.target_moods.clone(),
            time_window: self.time_window,
            target_energy: self
                .target_energy
                .or_else(|| self.time_window.map(|w| w.profile().target_energy)),
            target_bpm: self.target_bpm,
            ..Default::default()
        }
    }
}
