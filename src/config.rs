use crate::error::{Error, Result};
use crate::playlist::weights::ScoringSettings;

/// Configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub base_url: String,
    pub username: String,
    pub password: String,
    pub scoring: ScoringSettings,
    /// Number of songs requested from the library scan
    pub library_scan_size: u32,
    /// A dedicated discovery playlist is already configured elsewhere
    pub discovery_playlist_enabled: bool,
    /// JSON export of listening events with skips, if any
    pub play_history_file: Option<String>,
}

const DEFAULT_LIBRARY_SCAN_SIZE: u32 = 2000;

/// Load configuration from `.env` and environment
pub fn load_config() -> Result<Config> {
    // Load `.env` file if present
    dotenv::dotenv().ok();

    let base_url = required("BASE_URL")?;
    let username = required("USERNAME")?;
    let password = required("PASSWORD")?;

    let defaults = ScoringSettings::default();
    let scoring = ScoringSettings {
        recency_half_life_days: optional("RECENCY_HALF_LIFE_DAYS")?
            .unwrap_or(defaults.recency_half_life_days),
        play_count_saturation: optional("PLAY_COUNT_SATURATION")?
            .unwrap_or(defaults.play_count_saturation),
    };
    scoring.validate()?;

    let library_scan_size = optional("LIBRARY_SCAN_SIZE")?.unwrap_or(DEFAULT_LIBRARY_SCAN_SIZE);
    if library_scan_size == 0 {
        return Err(Error::Config(
            "LIBRARY_SCAN_SIZE must be greater than zero".to_string(),
        ));
    }

    Ok(Config {
        base_url,
        username,
        password,
        scoring,
        library_scan_size,
        discovery_playlist_enabled: optional("DISCOVERY_PLAYLIST_ENABLED")?.unwrap_or(false),
        play_history_file: optional("PLAY_HISTORY_FILE")?,
    })
}

fn required(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| Error::Config(format!("{key} is not set")))
}

fn optional<T>(key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) if raw.trim().is_empty() => Ok(None),
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| Error::Config(format!("{key}='{raw}' is invalid: {e}"))),
        Err(_) => Ok(None),
    }
}
