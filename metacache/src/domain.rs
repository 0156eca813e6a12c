use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::config::Config;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Catalog a metadata record comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Anime,
    Movie,
    Tv,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Anime => "anime",
            MediaType::Movie => "movie",
            MediaType::Tv => "tv",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "anime" => Ok(MediaType::Anime),
            "movie" => Ok(MediaType::Movie),
            "tv" => Ok(MediaType::Tv),
            other => Err(format!("unknown media type '{}'", other)),
        }
    }
}

/// Compound cache key `(external_id, media_type)`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MediaKey {
    pub external_id: String,
    pub media_type: MediaType,
}

impl MediaKey {
    pub fn new(external_id: impl Into<String>, media_type: MediaType) -> Self {
        Self {
            external_id: external_id.into(),
            media_type,
        }
    }

    /// Unique key persistent backends index entries by.
    pub fn storage_key(&self) -> String {
        format!("{}:{}", self.media_type, self.external_id)
    }
}

impl fmt::Display for MediaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.media_type, self.external_id)
    }
}

/// Anything that can be fetched through the cache exposes a stable key.
pub trait HasMediaKey {
    fn media_key(&self) -> &MediaKey;
}

impl HasMediaKey for MediaKey {
    fn media_key(&self) -> &MediaKey {
        self
    }
}

/// A cached provider snapshot. Overwritten on refresh, never versioned.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<V> {
    pub key: MediaKey,
    pub data: V,
    pub last_updated: DateTime<Utc>,
}

impl<V> CacheEntry<V> {
    pub fn new(key: MediaKey, data: V) -> Self {
        Self::updated_at(key, data, Utc::now())
    }

    pub fn updated_at(key: MediaKey, data: V, last_updated: DateTime<Utc>) -> Self {
        Self {
            key,
            data,
            last_updated,
        }
    }

    /// Entries stamped in the future (clock skew) report zero age.
    pub fn age(&self) -> Duration {
        (Utc::now() - self.last_updated)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    pub fn is_fresh(&self, max_age: Duration) -> bool {
        self.age() < max_age
    }
}

/// How long a loader may run for a key class. `None` leaves it unbounded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoaderBudget {
    /// Refreshing an entry that exists but is stale.
    pub on_stale: Option<Duration>,
    /// Loading a key with no entry, including store pass-through.
    pub on_miss: Option<Duration>,
}

/// Per-class loader budgets.
///
/// Stale fallback applies to every class; only the time a loader is allowed
/// differs, and which classes get the `resilient` budget is configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CachePolicy {
    pub standard: LoaderBudget,
    pub resilient: LoaderBudget,
    pub resilient_types: HashSet<MediaType>,
}

impl CachePolicy {
    /// Same budget for every class.
    pub fn uniform(budget: LoaderBudget) -> Self {
        Self {
            standard: budget,
            resilient: budget,
            resilient_types: HashSet::new(),
        }
    }

    pub fn budget_for(&self, media_type: MediaType) -> LoaderBudget {
        if self.resilient_types.contains(&media_type) {
            self.resilient
        } else {
            self.standard
        }
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            standard: LoaderBudget::default(),
            resilient: LoaderBudget {
                on_stale: Some(Duration::from_secs(3)),
                on_miss: Some(Duration::from_secs(5)),
            },
            resilient_types: HashSet::from([MediaType::Anime]),
        }
    }
}

impl From<&Config> for CachePolicy {
    fn from(config: &Config) -> Self {
        let resilient_types = config
            .resilient_media_types
            .iter()
            .filter_map(|name| match name.parse::<MediaType>() {
                Ok(media_type) => Some(media_type),
                Err(e) => {
                    warn!("Ignoring resilient media type: {}", e);
                    None
                }
            })
            .collect();

        Self {
            standard: LoaderBudget {
                on_stale: config.standard_stale_timeout,
                on_miss: config.standard_miss_timeout,
            },
            resilient: LoaderBudget {
                on_stale: config.resilient_stale_timeout,
                on_miss: config.resilient_miss_timeout,
            },
            resilient_types,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn test_media_type_round_trips_through_strings() {
        for media_type in [MediaType::Anime, MediaType::Movie, MediaType::Tv] {
            assert_eq!(media_type.to_string().parse::<MediaType>(), Ok(media_type));
        }
        assert_eq!(" TV ".parse::<MediaType>(), Ok(MediaType::Tv));
        assert!("manga".parse::<MediaType>().is_err());
    }

    #[test]
    fn test_storage_key_distinguishes_media_types() {
        let anime = MediaKey::new("1", MediaType::Anime);
        let movie = MediaKey::new("1", MediaType::Movie);
        assert_eq!(anime.storage_key(), "anime:1");
        assert_ne!(anime.storage_key(), movie.storage_key());
    }

    #[test]
    fn test_entry_freshness() {
        let key = MediaKey::new("1", MediaType::Anime);
        let fresh = CacheEntry::new(key.clone(), "naruto");
        assert!(fresh.is_fresh(Duration::from_secs(60)));
        assert!(!fresh.is_fresh(Duration::ZERO));

        let old = CacheEntry::updated_at(key.clone(), "naruto", Utc::now() - ChronoDuration::hours(2));
        assert!(!old.is_fresh(Duration::from_secs(3600)));
        assert!(old.age() >= Duration::from_secs(7200));

        let skewed = CacheEntry::updated_at(key, "naruto", Utc::now() + ChronoDuration::hours(1));
        assert_eq!(skewed.age(), Duration::ZERO);
    }

    #[test]
    fn test_policy_budget_lookup() {
        let policy = CachePolicy::default();
        assert_eq!(
            policy.budget_for(MediaType::Anime).on_stale,
            Some(Duration::from_secs(3))
        );
        assert_eq!(policy.budget_for(MediaType::Movie), LoaderBudget::default());

        let uniform = CachePolicy::uniform(LoaderBudget {
            on_stale: Some(Duration::from_secs(1)),
            on_miss: Some(Duration::from_secs(2)),
        });
        assert_eq!(uniform.budget_for(MediaType::Tv), uniform.budget_for(MediaType::Anime));
    }

    #[test]
    fn test_policy_from_config_skips_unknown_types() {
        let config = Config {
            resilient_media_types: vec!["tv".to_string(), "podcast".to_string()],
            standard_miss_timeout: Some(Duration::from_secs(9)),
            ..Config::default()
        };
        let policy = CachePolicy::from(&config);
        assert_eq!(policy.resilient_types, HashSet::from([MediaType::Tv]));
        assert_eq!(
            policy.budget_for(MediaType::Movie).on_miss,
            Some(Duration::from_secs(9))
        );
    }
}
