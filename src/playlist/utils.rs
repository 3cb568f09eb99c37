use chrono::{DateTime, Utc};
use rand::Rng;
use rand::seq::SliceRandom;

use super::metadata::PlaylistMetadata;

/// Share of the playlist a genre needs before it appears in the name
const DOMINANT_GENRE_SHARE: f64 = 0.4;

const NAME_SUFFIXES: &[&str] = &[
    "tunes", "vibes", "jams", "melodies", "grooves", "beats", "rhythms", "sounds", "tracks",
];

/// Playlist naming utilities
pub struct PlaylistNaming;

impl PlaylistNaming {
    /// "<base> <weekday> <dominant genre>" when one genre holds 40% of the
    /// tracks, otherwise a random suffix, all lowercase. Empty playlists keep
    /// the base name as written.
    pub fn generate_playlist_name<R: Rng + ?Sized>(
        base_name: &str,
        metadata: &PlaylistMetadata,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> String {
        if metadata.total_songs == 0 {
            return base_name.to_string();
        }

        let weekday = now.format("%A").to_string();
        let descriptor = match metadata.dominant_genre() {
            Some((genre, share)) if share >= DOMINANT_GENRE_SHARE => genre.trim().to_string(),
            _ => NAME_SUFFIXES.choose(rng).copied().unwrap_or("tunes").to_string(),
        };
        format!("{base_name} {weekday} {descriptor}").to_lowercase()
    }
}
