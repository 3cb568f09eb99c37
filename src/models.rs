use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Song fields available from the OpenSubsonic API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Song {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub artist: String,
    #[serde(default)]
    pub album: String,
    pub genre: Option<String>,      // Single genre field (legacy)
    pub genres: Option<Vec<Genre>>, // Multiple genres array (OpenSubsonic extension)
    pub moods: Option<Vec<String>>, // OpenSubsonic mood tags
    pub bpm: Option<u32>,
    pub duration: Option<u32>,
    pub year: Option<u32>,
    pub track: Option<u32>,
    #[serde(rename = "playCount")]
    pub play_count: Option<u32>,
    #[serde(rename = "userRating")]
    pub user_rating: Option<u32>, // 1-5 stars
    #[serde(rename = "albumId")]
    pub album_id: Option<String>,
    #[serde(rename = "artistId")]
    pub artist_id: Option<String>,
    pub played: Option<String>,  // Last played timestamp
    pub starred: Option<String>, // Starred timestamp (if favorited)
    pub created: Option<String>, // Added to the library
    #[serde(rename = "contentType")]
    pub content_type: Option<String>,
}

/// Genre structure for multiple genres support
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Genre {
    pub name: String,
}

impl Song {
    /// All genres for this song, lowercased, primary genre first, without duplicates
    pub fn get_all_genres(&self) -> Vec<String> {
        let named = self
            .genres
            .iter()
            .flatten()
            .map(|genre| genre.name.as_str());

        let mut all_genres: Vec<String> = Vec::new();
        for genre in self.genre.as_deref().into_iter().chain(named) {
            let genre = genre.trim().to_lowercase();
            if !genre.is_empty() && !all_genres.contains(&genre) {
                all_genres.push(genre);
            }
        }
        all_genres
    }

    pub fn get_moods(&self) -> Vec<String> {
        self.moods
            .iter()
            .flatten()
            .map(|mood| mood.trim().to_lowercase())
            .filter(|mood| !mood.is_empty())
            .collect()
    }

    /// Check if this song matches any of the given genre patterns
    pub fn matches_genre_patterns_string(&self, patterns: &[String]) -> bool {
        let all_genres = self.get_all_genres();

        patterns.iter().any(|pattern| {
            let pattern = pattern.to_lowercase();
            all_genres.iter().any(|genre| genre.contains(&pattern))
        })
    }

    pub fn last_played_at(&self) -> Option<DateTime<Utc>> {
        self.played.as_deref().and_then(parse_timestamp)
    }

    pub fn added_at(&self) -> Option<DateTime<Utc>> {
        self.created.as_deref().and_then(parse_timestamp)
    }

    /// Star rating as a float; the API reports 0 for unrated
    pub fn star_rating(&self) -> Option<f64> {
        self.user_rating
            .filter(|&stars| stars > 0)
            .map(f64::from)
    }
}

/// Parse the timestamp formats returned by OpenSubsonic servers
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw.trim_end_matches('Z'), format).ok())
        .map(|naive| naive.and_utc())
}

impl Default for Song {
    fn default() -> Self {
        Song {
            id: String::new(),
            title: "Untitled Track".to_string(),
            artist: "Unknown Artist".to_string(),
            album: "Unknown Album".to_string(),
            genre: None,
            genres: None,
            moods: None,
            bpm: None,
            duration: None,
            year: None,
            track: None,
            play_count: None,
            user_rating: None,
            album_id: None,
            artist_id: None,
            played: None,
            starred: None,
            created: None,
            content_type: None,
        }
    }
}

/// Fields shared by every Subsonic response envelope
#[derive(Debug, Deserialize)]
pub struct SubsonicError {
    pub code: Option<u32>,
    pub message: Option<String>,
}

/// Response structure for getRandomSongs API call
#[derive(Debug, Deserialize)]
pub struct RandomSongsResponse {
    #[serde(rename = "subsonic-response")]
    pub subsonic_response: RandomSongsBody,
}

#[derive(Debug, Deserialize)]
pub struct RandomSongsBody {
    pub status: String,
    #[serde(rename = "randomSongs")]
    pub random_songs: Option<SongList>,
    pub error: Option<SubsonicError>,
}

#[derive(Debug, Deserialize)]
pub struct SongList {
    #[serde(default)]
    pub song: Vec<Song>,
}

/// Response structure for getSong API call
#[derive(Debug, Deserialize)]
pub struct GetSongResponse {
    #[serde(rename = "subsonic-response")]
    pub subsonic_response: GetSongBody,
}

#[derive(Debug, Deserialize)]
pub struct GetSongBody {
    pub status: String,
    pub song: Option<Song>,
    pub error: Option<SubsonicError>,
}

/// Response structure for getSimilarSongs API call
#[derive(Debug, Deserialize)]
pub struct SimilarSongsResponse {
    #[serde(rename = "subsonic-response")]
    pub subsonic_response: SimilarSongsBody,
}

#[derive(Debug, Deserialize)]
pub struct SimilarSongsBody {
    pub status: String,
    #[serde(rename = "similarSongs")]
    pub similar_songs: Option<SongList>,
    pub error: Option<SubsonicError>,
}

/// Response structure for createPlaylist API call
#[derive(Debug, Deserialize)]
pub struct CreatePlaylistResponse {
    #[serde(rename = "subsonic-response")]
    pub subsonic_response: CreatePlaylistSubsonicResponse,
}

#[derive(Debug, Deserialize)]
pub struct CreatePlaylistSubsonicResponse {
    pub status: String,
    pub playlist: Option<PlaylistInfo>,
}

/// Response structure for getPlaylists API call
#[derive(Debug, Deserialize)]
pub struct GetPlaylistsResponse {
    #[serde(rename = "subsonic-response")]
    pub subsonic_response: GetPlaylistsSubsonicResponse,
}

#[derive(Debug, Deserialize)]
pub struct GetPlaylistsSubsonicResponse {
    pub status: String,
    pub playlists: Option<PlaylistsContainer>,
}

#[derive(Debug, Deserialize)]
pub struct PlaylistsContainer {
    #[serde(default)]
    pub playlist: Vec<PlaylistInfo>,
}

#[derive(Debug, Deserialize)]
pub struct PlaylistInfo {
    pub id: String,
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_genres_keep_primary_first_and_dedupe() {
        let song = Song {
            genre: Some("Shoegaze".to_string()),
            genres: Some(vec![
                Genre { name: "Dream Pop".to_string() },
                Genre { name: "shoegaze".to_string() },
                Genre { name: " ".to_string() },
            ]),
            ..Default::default()
        };
        assert_eq!(song.get_all_genres(), vec!["shoegaze", "dream pop"]);
        assert!(song.matches_genre_patterns_string(&["POP".to_string()]));
        assert!(!song.matches_genre_patterns_string(&["metal".to_string()]));
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 9, 18, 30, 0).unwrap();
        assert_eq!(parse_timestamp("2024-03-09T18:30:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2024-03-09T18:30:00.000Z"), Some(expected));
        assert_eq!(parse_timestamp("2024-03-09 18:30:00"), Some(expected));
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn test_star_rating_treats_zero_as_unrated() {
        let unrated = Song {
            user_rating: Some(0),
            ..Default::default()
        };
        assert_eq!(unrated.star_rating(), None);
        let rated = Song {
            user_rating: Some(4),
            ..Default::default()
        };
        assert_eq!(rated.star_rating(), Some(4.0));
    }

    #[test]
    fn test_deserialize_random_songs_payload() {
        let payload = r#"{
            "subsonic-response": {
                "status": "ok",
                "version": "1.16.1",
                "randomSongs": {
                    "song": [{
                        "id": "tr-1",
                        "title": "Teardrop",
                        "artist": "Massive Attack",
                        "album": "Mezzanine",
                        "genre": "Trip-Hop",
                        "playCount": 12,
                        "userRating": 5,
                        "played": "2024-05-01T08:00:00Z",
                        "moods": ["Dark", "Hypnotic"]
                    }]
                }
            }
        }"#;
        let parsed: RandomSongsResponse = serde_json::from_str(payload).unwrap();
        let songs = parsed.subsonic_response.random_songs.unwrap().song;
        assert_eq!(songs.len(), 1);
        assert_eq!(songs[0].play_count, Some(12));
        assert_eq!(songs[0].get_moods(), vec!["dark", "hypnotic"]);
        assert!(songs[0].last_played_at().is_some());
    }
}
