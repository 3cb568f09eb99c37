use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{Error, Result};

/// Answers whether two genres are related.
///
/// Identical genres are never reported as similar; exact matches are scored
/// separately by the caller. Implementations must be symmetric.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GenreSimilarity: Send + Sync {
    async fn are_similar(&self, genre_a: &str, genre_b: &str) -> Result<bool>;

    /// Forget answers kept from earlier generation runs
    fn clear_cache(&self) {}
}

/// Keyword families used to relate genres without a network lookup
const GENRE_FAMILIES: &[&[&str]] = &[
    &[
        "rock", "alternative", "indie", "grunge", "punk", "metal", "shoegaze", "emo",
    ],
    &[
        "electronic", "house", "techno", "trance", "edm", "dubstep", "drum and bass", "dnb",
        "synthwave", "idm", "electro", "breakbeat", "garage",
    ],
    &["ambient", "downtempo", "chillout", "lo-fi", "lofi", "new age", "trip-hop", "trip hop"],
    &["hip-hop", "hip hop", "rap", "trap", "grime", "boom bap"],
    &["r&b", "rnb", "soul", "funk", "neo-soul", "motown", "disco"],
    &["jazz", "blues", "swing", "bebop", "bossa nova", "fusion"],
    &[
        "folk", "country", "americana", "bluegrass", "singer-songwriter", "acoustic",
    ],
    &["classical", "baroque", "orchestral", "opera", "soundtrack", "chamber", "score"],
    &["pop", "synthpop", "dance", "k-pop", "j-pop", "electropop", "disco"],
    &["reggae", "dub", "ska", "dancehall"],
    &["latin", "salsa", "reggaeton", "cumbia", "bachata"],
];

fn normalize(genre: &str) -> String {
    genre.trim().to_lowercase()
}

fn families_of(genre: &str) -> impl Iterator<Item = usize> + '_ {
    GENRE_FAMILIES
        .iter()
        .enumerate()
        .filter(move |(_, keywords)| keywords.iter().any(|k| genre.contains(k)))
        .map(|(i, _)| i)
}

/// Relates genres that share a keyword family ("post-rock" and "grunge",
/// "deep house" and "techno").
#[derive(Debug, Default, Clone, Copy)]
pub struct GenreFamilyOracle;

impl GenreFamilyOracle {
    pub fn new() -> Self {
        Self
    }

    fn related(genre_a: &str, genre_b: &str) -> bool {
        let a = normalize(genre_a);
        let b = normalize(genre_b);
        if a.is_empty() || b.is_empty() || a == b {
            return false;
        }
        let families_b: Vec<usize> = families_of(&b).collect();
        families_of(&a).any(|family| families_b.contains(&family))
    }
}

#[async_trait]
impl GenreSimilarity for GenreFamilyOracle {
    async fn are_similar(&self, genre_a: &str, genre_b: &str) -> Result<bool> {
        Ok(Self::related(genre_a, genre_b))
    }
}

/// In-process answer cache in front of another oracle.
///
/// Answers are keyed on the unordered genre pair. Failed lookups are not
/// cached. The cache lives for one generation run.
pub struct CachedSimilarity<S> {
    inner: S,
    cache: RwLock<HashMap<(String, String), bool>>,
}

impl<S: GenreSimilarity> CachedSimilarity<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            cache: RwLock::new(HashMap::new()),
        }
    }

    fn key(genre_a: &str, genre_b: &str) -> (String, String) {
        let a = normalize(genre_a);
        let b = normalize(genre_b);
        if a <= b { (a, b) } else { (b, a) }
    }

    pub fn clear(&self) {
        if let Ok(mut cache) = self.cache.write() {
            cache.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.cache.read().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl<S: GenreSimilarity> GenreSimilarity for CachedSimilarity<S> {
    async fn are_similar(&self, genre_a: &str, genre_b: &str) -> Result<bool> {
        let key = Self::key(genre_a, genre_b);
        if key.0 == key.1 {
            return Ok(false);
        }

        // The read guard must be released before awaiting the inner oracle
        let cached = self
            .cache
            .read()
            .map_err(|_| Error::Similarity("genre answer cache is poisoned".to_string()))?
            .get(&key)
            .copied();
        if let Some(answer) = cached {
            return Ok(answer);
        }

        let answer = self.inner.are_similar(genre_a, genre_b).await?;
        if let Ok(mut cache) = self.cache.write() {
            cache.insert(key, answer);
        }
        Ok(answer)
    }

    fn clear_cache(&self) {
        if !self.is_empty() {
            debug!("Clearing {} cached genre answers", self.len());
            self.clear();
        }
    }
}
