use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;

use super::candidates::{CandidateSource, CandidateTrack};
use super::selector::{SelectionPass, SelectionResult};
use super::strategy::Strategy;

/// One track of a generated playlist, as handed to publication
#[derive(Debug, Clone, Serialize)]
pub struct PlaylistEntry {
    pub track_id: String,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub final_score: f64,
    /// 1-based playlist position
    pub position: usize,
    pub pass: SelectionPass,
    pub source: CandidateSource,
}

/// Represents a generated playlist with metadata
#[derive(Debug, Clone, Serialize)]
pub struct Playlist {
    pub name: String,
    pub base_name_pattern: String,
    pub entries: Vec<PlaylistEntry>,
    pub metadata: PlaylistMetadata,
    pub run: RunMetadata,
}

impl Playlist {
    pub fn track_ids(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.track_id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Metadata about the playlist composition
#[derive(Debug, Clone, Default, Serialize)]
pub struct PlaylistMetadata {
    pub total_duration: u32, // in seconds
    pub total_songs: usize,
    pub average_bpm: Option<f64>,
    pub bpm_range: Option<(u32, u32)>,
    /// Primary genre counts
    pub genre_distribution: HashMap<String, usize>,
    pub artist_count: usize,
    pub average_score: f64,
}

impl PlaylistMetadata {
    pub fn from_tracks<'a>(tracks: impl IntoIterator<Item = &'a CandidateTrack>) -> Self {
        let mut metadata = PlaylistMetadata::default();
        let mut artists = HashSet::new();
        let mut bpms = Vec::new();
        let mut score_sum = 0.0;

        for track in tracks {
            metadata.total_songs += 1;
            metadata.total_duration += track.duration.unwrap_or(0);
            score_sum += track.final_score;
            artists.insert(track.artist.to_lowercase());
            if let Some(genre) = track.primary_genre() {
                *metadata.genre_distribution.entry(genre.to_string()).or_insert(0) += 1;
            }
            if let Some(bpm) = track.bpm.filter(|&b| b > 0) {
                bpms.push(bpm);
            }
        }

        metadata.artist_count = artists.len();
        if metadata.total_songs > 0 {
            metadata.average_score = score_sum / metadata.total_songs as f64;
        }
        if let (Some(&min), Some(&max)) = (bpms.iter().min(), bpms.iter().max()) {
            metadata.bpm_range = Some((min, max));
            metadata.average_bpm = Some(bpms.iter().map(|&b| f64::from(b)).sum::<f64>() / bpms.len() as f64);
        }
        metadata
    }

    /// Most common primary genre with its share of the playlist.
    ///
    /// Ties go to the alphabetically first genre.
    pub fn dominant_genre(&self) -> Option<(&str, f64)> {
        if self.total_songs == 0 {
            return None;
        }
        self.genre_distribution
            .iter()
            .max_by(|(ga, ca), (gb, cb)| ca.cmp(cb).then_with(|| gb.cmp(ga)))
            .map(|(genre, &count)| (genre.as_str(), count as f64 / self.total_songs as f64))
    }
}

/// Observability figures for one generation run
#[derive(Debug, Clone, Serialize)]
pub struct RunMetadata {
    pub strategy: Strategy,
    pub candidate_pool_size: usize,
    pub counts_by_source: BTreeMap<CandidateSource, usize>,
    pub exploration_count: usize,
    pub exploration_rate: f64,
    pub target_count: usize,
    pub underfilled: bool,
}

impl RunMetadata {
    pub fn new(strategy: Strategy, pool: &[CandidateTrack], selection: &SelectionResult) -> Self {
        let mut counts_by_source = BTreeMap::new();
        for candidate in pool {
            *counts_by_source.entry(candidate.source).or_insert(0) += 1;
        }
        Self {
            strategy,
            candidate_pool_size: pool.len(),
            counts_by_source,
            exploration_count: selection.exploration_count,
            exploration_rate: selection.exploration_rate,
            target_count: selection.target_count,
            underfilled: selection.is_underfilled(),
        }
    }
}

/// Entries in selection order with 1-based positions
pub fn entries_from_selection(selection: &SelectionResult) -> Vec<PlaylistEntry> {
    selection
        .selected
        .iter()
        .enumerate()
        .map(|(i, selected)| PlaylistEntry {
            track_id: selected.track.track_id.clone(),
            title: selected.track.title.clone(),
            artist: selected.track.artist.clone(),
            album: selected.track.album.clone(),
            final_score: selected.track.final_score,
            position: i + 1,
            pass: selected.pass,
            source: selected.track.source,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playlist::selector::SelectedTrack;
    use approx::assert_relative_eq;

    fn track(id: &str, artist: &str, genre: &str, bpm: Option<u32>, score: f64, source: CandidateSource) -> CandidateTrack {
        CandidateTrack {
            track_id: id.to_string(),
            title: id.to_uppercase(),
            artist: artist.to_string(),
            album: "LP".to_string(),
            genres: vec![genre.to_string()],
            moods: Vec::new(),
            play_count: 0,
            skip_count: 0,
            last_played_at: None,
            user_rating: None,
            bpm,
            duration: Some(200),
            recency_weight: 1.0,
            fallback_score: 0.0,
            final_score: score,
            source,
        }
    }

    #[test]
    fn test_metadata_from_tracks() {
        let tracks = vec![
            track("a", "Air", "electronic", Some(90), 0.9, CandidateSource::History),
            track("b", "air", "electronic", None, 0.5, CandidateSource::History),
            track("c", "Low", "slowcore", Some(70), 0.4, CandidateSource::Fallback),
        ];
        let metadata = PlaylistMetadata::from_tracks(&tracks);
        assert_eq!(metadata.total_songs, 3);
        assert_eq!(metadata.total_duration, 600);
        assert_eq!(metadata.artist_count, 2);
        assert_eq!(metadata.bpm_range, Some((70, 90)));
        assert_relative_eq!(metadata.average_bpm.unwrap(), 80.0);
        assert_relative_eq!(metadata.average_score, 0.6, epsilon = 1e-9);

        let (genre, share) = metadata.dominant_genre().unwrap();
        assert_eq!(genre, "electronic");
        assert_relative_eq!(share, 2.0 / 3.0);
    }

    #[test]
    fn test_empty_metadata() {
        let metadata = PlaylistMetadata::from_tracks(&Vec::<CandidateTrack>::new());
        assert_eq!(metadata.total_songs, 0);
        assert_eq!(metadata.average_bpm, None);
        assert!(metadata.dominant_genre().is_none());
    }

    #[test]
    fn test_entries_and_run_metadata() {
        let pool = vec![
            track("a", "A", "rock", None, 0.9, CandidateSource::History),
            track("b", "B", "rock", None, 0.7, CandidateSource::Fallback),
            track("c", "C", "pop", None, 0.2, CandidateSource::Fallback),
        ];
        let selection = SelectionResult {
            selected: vec![
                SelectedTrack { track: pool[0].clone(), pass: SelectionPass::Diverse },
                SelectedTrack { track: pool[2].clone(), pass: SelectionPass::Exploration },
            ],
            exploration_count: 1,
            target_count: 3,
            exploration_rate: 0.15,
        };

        let entries = entries_from_selection(&selection);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].position, 1);
        assert_eq!(entries[1].track_id, "c");
        assert_eq!(entries[1].pass, SelectionPass::Exploration);

        let run = RunMetadata::new(Strategy::Quality, &pool, &selection);
        assert_eq!(run.candidate_pool_size, 3);
        assert_eq!(run.counts_by_source.get(&CandidateSource::Fallback), Some(&2));
        assert_eq!(run.exploration_count, 1);
        assert!(run.underfilled);
    }
}
