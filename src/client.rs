use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};
use ureq::Agent;
use urlencoding::encode;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::{
    CreatePlaylistResponse, GetPlaylistsResponse, GetSongResponse, PlaylistInfo,
    RandomSongsResponse, SimilarSongsResponse, Song, SubsonicError,
};

const API_VERSION: &str = "1.16.1";
const CLIENT_NAME: &str = "playlist-curator";
const MAX_SONGS_PER_REQUEST: u32 = 500;
const MAX_SCAN_REQUESTS: usize = 20;
/// Subsonic error code for a missing entity
const NOT_FOUND_CODE: u32 = 70;

/// Server-side filter for catalog searches
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackQuery {
    pub genre: Option<String>,
    pub from_year: Option<u32>,
    pub to_year: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackSort {
    #[default]
    Random,
    MostPlayed,
    HighestRated,
}

/// Read access to the media library.
///
/// Lookups by id omit tracks that no longer exist instead of failing.
#[cfg_attr(test, mockall::automock)]
pub trait MediaCatalog: Send + Sync {
    fn fetch_tracks_by_ids(&self, ids: &[String]) -> Result<HashMap<String, Song>>;

    fn search_tracks(&self, query: &TrackQuery, sort: TrackSort, limit: usize) -> Result<Vec<Song>>;

    fn get_similar_tracks(&self, seed_id: &str, count: usize, max_distance: f64) -> Result<Vec<Song>>;
}

/// Stores a finished playlist on the server
pub trait PlaylistPublisher {
    /// Replace the playlist whose name starts with `base_name_pattern`, or create one
    fn publish(&self, name: &str, base_name_pattern: &str, song_ids: &[String]) -> Result<String>;
}

/// A simple Subsonic API client using MD5 authentication
pub struct SubsonicClient {
    agent: Agent,
    base_url: String,
    username: String,
    password: String,
}

impl SubsonicClient {
    pub fn new(config: &Config) -> Self {
        SubsonicClient {
            agent: Agent::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
        }
    }

    /// Generate authentication parameters using salt + token method
    fn generate_auth_params(&self) -> (String, String) {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let salt = format!("{:x}", md5::compute(format!("{nanos}{CLIENT_NAME}")))[..8].to_string();

        // token = md5(password + salt)
        let token = format!("{:x}", md5::compute(format!("{}{}", self.password, salt)));

        (salt, token)
    }

    fn endpoint(&self, method: &str) -> String {
        let (salt, token) = self.generate_auth_params();
        format!(
            "{}/rest/{}?u={}&t={}&s={}&v={}&c={}&f=json",
            self.base_url,
            method,
            encode(&self.username),
            token,
            salt,
            API_VERSION,
            CLIENT_NAME
        )
    }

    fn get_text(&self, url: &str) -> Result<String> {
        let response = self
            .agent
            .get(url)
            .call()
            .map_err(|e| Error::Catalog(format!("HTTP request failed: {e}")))?;
        Ok(response.into_string()?)
    }

    fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let text = self.get_text(url)?;
        serde_json::from_str(&text)
            .map_err(|e| Error::Catalog(format!("Failed to parse JSON response: {e}")))
    }

    fn check_status(status: &str, error: Option<&SubsonicError>) -> Result<()> {
        if status == "ok" {
            return Ok(());
        }
        let detail = error
            .and_then(|e| e.message.clone())
            .unwrap_or_else(|| "no detail".to_string());
        Err(Error::Catalog(format!("API returned status '{status}': {detail}")))
    }

    /// Test the API connection
    pub fn ping(&self) -> Result<()> {
        let body: serde_json::Value = self.get_json(&self.endpoint("ping"))?;
        let status = body["subsonic-response"]["status"].as_str().unwrap_or("missing");
        Self::check_status(status, None)
    }

    /// Fetch up to `count` distinct random songs, several requests at a time.
    ///
    /// `cancel` is checked between requests; a cancelled scan returns what
    /// has been collected so far.
    pub fn fetch_songs(&self, count: u32, cancel: &AtomicBool) -> Result<Vec<Song>> {
        if count <= MAX_SONGS_PER_REQUEST {
            return self.fetch_songs_batch(count, None);
        }

        let mut all_songs = Vec::new();
        let mut seen_ids = HashSet::new();
        let mut attempts = 0;

        info!("Fetching {count} songs ({MAX_SONGS_PER_REQUEST} per request)");

        while all_songs.len() < count as usize && attempts < MAX_SCAN_REQUESTS {
            if cancel.load(Ordering::Relaxed) {
                warn!("Library scan cancelled after {} songs", all_songs.len());
                break;
            }
            attempts += 1;
            let batch = self.fetch_songs_batch(MAX_SONGS_PER_REQUEST, None)?;
            let batch_size = batch.len();
            let before = all_songs.len();

            for song in batch {
                if seen_ids.insert(song.id.clone()) {
                    all_songs.push(song);
                    if all_songs.len() >= count as usize {
                        break;
                    }
                }
            }

            let added = all_songs.len() - before;
            debug!(
                "Batch {attempts}: got {batch_size} songs, {added} new (total: {}/{count})",
                all_songs.len()
            );

            // Few new songs means the library is smaller than requested
            if added < 50 && all_songs.len() < count as usize {
                info!("Only {added} new songs in batch {attempts}; library may be smaller than requested");
                break;
            }
        }

        Ok(all_songs)
    }

    fn fetch_songs_batch(&self, size: u32, genre: Option<&str>) -> Result<Vec<Song>> {
        let mut url = format!("{}&size={}", self.endpoint("getRandomSongs"), size);
        if let Some(genre) = genre {
            url.push_str(&format!("&genre={}", encode(genre)));
        }

        let parsed: RandomSongsResponse = self.get_json(&url)?;
        let body = parsed.subsonic_response;
        Self::check_status(&body.status, body.error.as_ref())?;

        Ok(body.random_songs.map(|list| list.song).unwrap_or_default())
    }

    /// Fetch one song; `None` when the server no longer knows it
    pub fn get_song(&self, id: &str) -> Result<Option<Song>> {
        let url = format!("{}&id={}", self.endpoint("getSong"), encode(id));
        let parsed: GetSongResponse = self.get_json(&url)?;
        let body = parsed.subsonic_response;

        if let Some(error) = &body.error {
            if error.code == Some(NOT_FOUND_CODE) {
                return Ok(None);
            }
        }
        Self::check_status(&body.status, body.error.as_ref())?;
        Ok(body.song)
    }

    /// Get all existing playlists
    pub fn get_playlists(&self) -> Result<Vec<PlaylistInfo>> {
        let parsed: GetPlaylistsResponse = self.get_json(&self.endpoint("getPlaylists"))?;
        let body = parsed.subsonic_response;
        Self::check_status(&body.status, None)?;

        Ok(body
            .playlists
            .map(|container| container.playlist)
            .unwrap_or_default())
    }

    /// Create a new playlist, deleting any playlist with the exact same name first
    pub fn create_playlist(&self, name: &str, song_ids: &[String]) -> Result<String> {
        if let Ok(existing_playlists) = self.get_playlists() {
            if let Some(existing) = existing_playlists.iter().find(|p| p.name == name) {
                info!("Playlist '{name}' already exists (ID: {}), deleting it first", existing.id);
                if let Err(e) = self.delete_playlist(&existing.id) {
                    warn!("Failed to delete existing playlist: {e}");
                }
            }
        }

        let mut url = format!("{}&name={}", self.endpoint("createPlaylist"), encode(name));
        for song_id in song_ids {
            url.push_str(&format!("&songId={}", encode(song_id)));
        }

        debug!("Creating playlist '{name}' with {} songs", song_ids.len());

        let parsed: CreatePlaylistResponse = self.get_json(&url)?;
        let body = parsed.subsonic_response;
        Self::check_status(&body.status, None)?;

        body.playlist
            .map(|playlist| playlist.id)
            .ok_or_else(|| Error::Catalog("No playlist returned in create response".to_string()))
    }

    /// Replace the contents and name of an existing playlist
    pub fn update_playlist(&self, playlist_id: &str, name: &str, song_ids: &[String]) -> Result<String> {
        let get_url = format!("{}&id={}", self.endpoint("getPlaylist"), encode(playlist_id));
        let current: serde_json::Value = self.get_json(&get_url)?;
        let existing_count = current["subsonic-response"]["playlist"]["entry"]
            .as_array()
            .map_or(0, Vec::len);

        let mut url = format!(
            "{}&playlistId={}&name={}",
            self.endpoint("updatePlaylist"),
            encode(playlist_id),
            encode(name)
        );
        for idx in 0..existing_count {
            url.push_str(&format!("&songIndexToRemove={idx}"));
        }
        for song_id in song_ids {
            url.push_str(&format!("&songIdToAdd={}", encode(song_id)));
        }

        debug!(
            "Updating playlist '{name}' (ID: {playlist_id}): removing {existing_count}, adding {}",
            song_ids.len()
        );

        let parsed: serde_json::Value = self.get_json(&url)?;
        let status = parsed["subsonic-response"]["status"].as_str().unwrap_or("missing");
        Self::check_status(status, None)?;
        Ok(playlist_id.to_string())
    }

    pub fn delete_playlist(&self, playlist_id: &str) -> Result<()> {
        let url = format!("{}&id={}", self.endpoint("deletePlaylist"), encode(playlist_id));
        let parsed: serde_json::Value = self.get_json(&url)?;
        let status = parsed["subsonic-response"]["status"].as_str().unwrap_or("missing");
        Self::check_status(status, None)
    }
}

const WEEKDAYS: [&str; 7] = [
    "monday",
    "tuesday",
    "wednesday",
    "thursday",
    "friday",
    "saturday",
    "sunday",
];

/// Whether `existing` was published for the definition named `base_name`:
/// either the bare name or the name followed by a weekday.
fn is_published_under(existing: &str, base_name: &str) -> bool {
    let existing = existing.trim().to_lowercase();
    let base = base_name.trim().to_lowercase();
    if existing == base {
        return true;
    }
    existing
        .strip_prefix(&base)
        .and_then(|rest| rest.strip_prefix(' '))
        .and_then(|rest| rest.split_whitespace().next())
        .is_some_and(|word| WEEKDAYS.contains(&word))
}

impl PlaylistPublisher for SubsonicClient {
    fn publish(&self, name: &str, base_name_pattern: &str, song_ids: &[String]) -> Result<String> {
        if let Ok(existing_playlists) = self.get_playlists() {
            if let Some(existing) = existing_playlists
                .iter()
                .find(|p| is_published_under(&p.name, base_name_pattern))
            {
                info!(
                    "Found existing playlist '{}' matching pattern '{base_name_pattern}' (ID: {})",
                    existing.name, existing.id
                );
                return self.update_playlist(&existing.id, name, song_ids);
            }
        }

        self.create_playlist(name, song_ids)
    }
}

impl MediaCatalog for SubsonicClient {
    fn fetch_tracks_by_ids(&self, ids: &[String]) -> Result<HashMap<String, Song>> {
        let mut found = HashMap::new();
        for id in ids {
            if let Some(song) = self.get_song(id)? {
                found.insert(id.clone(), song);
            }
        }
        Ok(found)
    }

    fn search_tracks(&self, query: &TrackQuery, sort: TrackSort, limit: usize) -> Result<Vec<Song>> {
        let size = u32::try_from(limit)
            .unwrap_or(MAX_SONGS_PER_REQUEST)
            .min(MAX_SONGS_PER_REQUEST);
        let songs = self.fetch_songs_batch(size, query.genre.as_deref())?;
        Ok(filter_and_sort(songs, query, sort, limit))
    }

    /// `max_distance` is not supported by the Subsonic API; the server's own
    /// similarity ranking is used as-is.
    fn get_similar_tracks(&self, seed_id: &str, count: usize, _max_distance: f64) -> Result<Vec<Song>> {
        let url = format!(
            "{}&id={}&count={}",
            self.endpoint("getSimilarSongs"),
            encode(seed_id),
            count
        );
        let parsed: SimilarSongsResponse = self.get_json(&url)?;
        let body = parsed.subsonic_response;
        Self::check_status(&body.status, body.error.as_ref())?;
        Ok(body.similar_songs.map(|list| list.song).unwrap_or_default())
    }
}

fn filter_and_sort(songs: Vec<Song>, query: &TrackQuery, sort: TrackSort, limit: usize) -> Vec<Song> {
    let genre = query.genre.as_ref().map(|g| g.to_lowercase());
    let mut songs: Vec<Song> = songs
        .into_iter()
        .filter(|song| {
            genre
                .as_ref()
                .is_none_or(|g| song.get_all_genres().iter().any(|s| s.contains(g.as_str())))
        })
        .filter(|song| match (song.year, query.from_year, query.to_year) {
            (None, None, None) => true,
            (None, _, _) => false,
            (Some(year), from, to) => from.is_none_or(|f| year >= f) && to.is_none_or(|t| year <= t),
        })
        .collect();

    match sort {
        TrackSort::Random => {}
        TrackSort::MostPlayed => songs.sort_by_key(|s| std::cmp::Reverse(s.play_count.unwrap_or(0))),
        TrackSort::HighestRated => songs.sort_by_key(|s| std::cmp::Reverse(s.user_rating.unwrap_or(0))),
    }
    songs.truncate(limit);
    songs
}

/// Catalog view over an already scanned library.
///
/// Id lookups and searches are answered from the scan; similarity queries
/// go to the remote catalog.
pub struct ScannedLibrary<'a> {
    songs: HashMap<String, Song>,
    order: Vec<String>,
    remote: &'a dyn MediaCatalog,
}

impl<'a> ScannedLibrary<'a> {
    pub fn new(songs: &[Song], remote: &'a dyn MediaCatalog) -> Self {
        let mut order = Vec::with_capacity(songs.len());
        let mut by_id = HashMap::with_capacity(songs.len());
        for song in songs {
            if by_id.insert(song.id.clone(), song.clone()).is_none() {
                order.push(song.id.clone());
            }
        }
        Self {
            songs: by_id,
            order,
            remote,
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl MediaCatalog for ScannedLibrary<'_> {
    fn fetch_tracks_by_ids(&self, ids: &[String]) -> Result<HashMap<String, Song>> {
        Ok(ids
            .iter()
            .filter_map(|id| self.songs.get(id).map(|song| (id.clone(), song.clone())))
            .collect())
    }

    fn search_tracks(&self, query: &TrackQuery, sort: TrackSort, limit: usize) -> Result<Vec<Song>> {
        let songs = self
            .order
            .iter()
            .filter_map(|id| self.songs.get(id).cloned())
            .collect();
        Ok(filter_and_sort(songs, query, sort, limit))
    }

    fn get_similar_tracks(&self, seed_id: &str, count: usize, max_distance: f64) -> Result<Vec<Song>> {
        self.remote.get_similar_tracks(seed_id, count, max_distance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn song(id: &str, genre: &str, plays: u32, year: Option<u32>) -> Song {
        Song {
            id: id.to_string(),
            title: format!("Song {id}"),
            genre: Some(genre.to_string()),
            play_count: Some(plays),
            year,
            ..Default::default()
        }
    }

    #[test]
    fn test_scanned_library_omits_missing_ids() {
        let remote = MockMediaCatalog::new();
        let songs = vec![song("a", "rock", 1, None), song("b", "jazz", 2, None)];
        let library = ScannedLibrary::new(&songs, &remote);

        let found = library
            .fetch_tracks_by_ids(&["a".to_string(), "deleted".to_string()])
            .unwrap();
        assert_eq!(found.len(), 1);
        assert!(found.contains_key("a"));
    }

    #[test]
    fn test_scanned_library_search_filters_and_sorts() {
        let remote = MockMediaCatalog::new();
        let songs = vec![
            song("a", "Indie Rock", 3, Some(2004)),
            song("b", "jazz", 50, Some(1959)),
            song("c", "rock", 9, Some(1994)),
            song("d", "rock", 20, None),
        ];
        let library = ScannedLibrary::new(&songs, &remote);

        let query = TrackQuery {
            genre: Some("Rock".to_string()),
            ..Default::default()
        };
        let ids: Vec<String> = library
            .search_tracks(&query, TrackSort::MostPlayed, 10)
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec!["d", "c", "a"]);

        let nineties = TrackQuery {
            from_year: Some(1990),
            to_year: Some(1999),
            ..Default::default()
        };
        let ids: Vec<String> = library
            .search_tracks(&nineties, TrackSort::Random, 10)
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec!["c"]);
    }

    #[test]
    fn test_published_name_matches_own_definition_only() {
        assert!(is_published_under("mix monday tunes", "Mix"));
        assert!(is_published_under("Mix Sunday Trip-Hop", "mix"));
        assert!(is_published_under("Morning Mix", "Morning Mix"));
        // Another definition whose name starts with the same word
        assert!(!is_published_under("mix evening friday rock", "Mix"));
        assert!(!is_published_under("mixtape monday jams", "Mix"));
        assert!(!is_published_under("mix", "Mix Evening"));
        assert!(is_published_under("mix evening friday rock", "Mix Evening"));
    }

    #[test]
    fn test_scanned_library_delegates_similarity() {
        let mut remote = MockMediaCatalog::new();
        remote
            .expect_get_similar_tracks()
            .withf(|seed, count, _| seed == "a" && *count == 5)
            .times(1)
            .returning(|_, _, _| Ok(vec![song("z", "rock", 0, None)]));

        let songs = vec![song("a", "rock", 1, None)];
        let library = ScannedLibrary::new(&songs, &remote);
        let similar = library.get_similar_tracks("a", 5, 0.5).unwrap();
        assert_eq!(similar.len(), 1);
        assert_eq!(similar[0].id, "z");
    }
}
