use super::PlaylistConfig;
use crate::models::Song;

/// Title words that mark interludes, skits, spoken word and other non-songs
const NON_SONG_WORDS: &[&str] = &[
    "interlude", "intro", "outro", "prelude", "postlude", "bridge", "transition", "segue",
    "sketch", "fragment", "snippet", "bits", "piece",
    "monologue", "dialogue", "speech", "interview", "conversation", "discussion",
    "atmosphere", "soundscape", "rain", "ocean", "wind",
    "meditation", "mantra", "prayer", "chant",
    "silence", "pause", "break", "intermission", "announcement", "commercial", "ad", "test",
    "testing", "tuning", "int.", "intro.", "outro.", "interl.", "untitled",
];

/// Multi-word phrases checked as plain substrings
const NON_SONG_PHRASES: &[&str] = &["field recording", "nature sounds"];

const NON_SONG_MARKERS: &[&str] = &["(interlude)", "(intro)", "(outro)", "(sketch)"];

const MIN_SONG_SECONDS: u32 = 60;
const MAX_SONG_SECONDS: u32 = 600;
/// Instrumentals shorter than this are treated as interludes
const MIN_INSTRUMENTAL_SECONDS: u32 = 90;

/// Library-scan eligibility checks
pub struct SongFilters;

impl SongFilters {
    fn has_non_song_title(title: &str) -> bool {
        let word_hit = title
            .split(|c: char| c.is_whitespace() || c == ':')
            .filter(|word| !word.is_empty())
            .any(|word| NON_SONG_WORDS.contains(&word));
        word_hit || NON_SONG_PHRASES.iter().any(|phrase| title.contains(phrase))
    }

    fn is_placeholder_title(title: &str) -> bool {
        let title = title.trim();
        let numeric = title.chars().all(|c| c.is_numeric() || c == '.' || c == '-');
        let track_number = title
            .strip_prefix("track ")
            .is_some_and(|rest| rest.chars().all(|c| c.is_numeric() || c.is_whitespace()));
        title.len() <= 2 || numeric || track_number
    }

    /// Check if a track is an actual song (not an interlude, sketch, DJ mix, etc.)
    pub fn is_actual_song(song: &Song) -> bool {
        let title = song.title.to_lowercase();
        let duration_out_of_range = song
            .duration
            .is_some_and(|d| !(MIN_SONG_SECONDS..=MAX_SONG_SECONDS).contains(&d));
        let short_instrumental = title.contains("(instrumental)")
            && song.duration.is_some_and(|d| d < MIN_INSTRUMENTAL_SECONDS);
        let marked = NON_SONG_MARKERS.iter().any(|marker| title.contains(marker));

        !Self::has_non_song_title(&title)
            && !Self::is_placeholder_title(&title)
            && !duration_out_of_range
            && !short_instrumental
            && !marked
    }

    pub fn matches_acceptable_genres(song: &Song, config: &PlaylistConfig) -> bool {
        config
            .acceptable_genres
            .as_ref()
            .is_none_or(|genres| song.matches_genre_patterns_string(genres))
    }

    pub fn does_not_match_unacceptable_genres(song: &Song, config: &PlaylistConfig) -> bool {
        config
            .unacceptable_genres
            .as_ref()
            .is_none_or(|genres| !song.matches_genre_patterns_string(genres))
    }

    /// Songs without BPM data pass
    pub fn matches_bpm_thresholds(song: &Song, config: &PlaylistConfig) -> bool {
        match (&config.bpm_thresholds, song.bpm) {
            (Some(range), Some(bpm)) => (range.min_bpm..=range.max_bpm).contains(&bpm),
            _ => true,
        }
    }

    /// Case-insensitive substring match against the first listed genre
    pub fn matches_primary_genre(song: &Song, filter: &str) -> bool {
        let filter = filter.trim().to_lowercase();
        song.get_all_genres()
            .first()
            .is_some_and(|primary| primary.contains(&filter))
    }

    /// Apply all filters to determine if a scanned song may enter a candidate pool
    pub fn should_include_song(song: &Song, config: &PlaylistConfig) -> bool {
        Self::is_actual_song(song)
            && Self::matches_acceptable_genres(song, config)
            && Self::does_not_match_unacceptable_genres(song, config)
            && Self::matches_bpm_thresholds(song, config)
    }
}
