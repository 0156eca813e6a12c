use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Sled,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "moka" => Ok(StoreBackend::Memory),
            "sled" => Ok(StoreBackend::Sled),
            other => Err(format!("unknown store backend '{}'", other)),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub store_backend: StoreBackend,
    pub data_dir: String,
    pub max_entries: u64,
    pub entry_ttl: Option<Duration>,
    pub sweep_interval: Duration,
    pub lookup_timeout: Duration,
    pub write_timeout: Duration,
    pub write_workers: usize,
    pub write_queue_capacity: usize,
    pub resilient_media_types: Vec<String>,
    pub resilient_stale_timeout: Option<Duration>,
    pub resilient_miss_timeout: Option<Duration>,
    pub standard_stale_timeout: Option<Duration>,
    pub standard_miss_timeout: Option<Duration>,
    pub batch_deadline: Duration,
    pub batch_item_timeout: Duration,
    pub batch_chunk_delay: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_backend: StoreBackend::Sled,
            data_dir: Self::DEFAULT_DATA_DIR.to_string(),
            max_entries: 10_000,
            entry_ttl: None,
            sweep_interval: Duration::from_secs(60),
            lookup_timeout: Duration::from_secs(2),
            write_timeout: Duration::from_secs(2),
            write_workers: 4,
            write_queue_capacity: 1024,
            resilient_media_types: vec!["anime".to_string()],
            resilient_stale_timeout: Some(Duration::from_secs(3)),
            resilient_miss_timeout: Some(Duration::from_secs(5)),
            standard_stale_timeout: None,
            standard_miss_timeout: None,
            batch_deadline: Duration::from_secs(12),
            batch_item_timeout: Duration::from_secs(5),
            batch_chunk_delay: Duration::from_millis(300),
        }
    }
}

impl Config {
    const DEFAULT_DATA_DIR: &str = "./data";

    /// Load `.env` (if present) and then read the process environment.
    pub fn load() -> Self {
        match dotenvy::dotenv() {
            Ok(path) => info!("Loaded environment variables from {}", path.display()),
            Err(_) => info!("No .env file found, using system environment variables"),
        }
        Self::from_env()
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a config from an arbitrary variable source. Unset variables keep
    /// their defaults; unparseable ones are reported and ignored.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let env = Env { lookup };

        Self {
            store_backend: env.parsed("METACACHE_STORE_BACKEND", defaults.store_backend),
            data_dir: env
                .raw("METACACHE_DATA_DIR")
                .unwrap_or(defaults.data_dir),
            max_entries: env.parsed("METACACHE_MAX_ENTRIES", defaults.max_entries),
            entry_ttl: env.optional_millis("METACACHE_ENTRY_TTL_MS", defaults.entry_ttl),
            sweep_interval: env.millis("METACACHE_SWEEP_INTERVAL_MS", defaults.sweep_interval),
            lookup_timeout: env.millis("METACACHE_LOOKUP_TIMEOUT_MS", defaults.lookup_timeout),
            write_timeout: env.millis("METACACHE_WRITE_TIMEOUT_MS", defaults.write_timeout),
            write_workers: env
                .parsed("METACACHE_WRITE_WORKERS", defaults.write_workers)
                .max(1),
            write_queue_capacity: env
                .parsed("METACACHE_WRITE_QUEUE", defaults.write_queue_capacity)
                .max(1),
            resilient_media_types: env
                .raw("METACACHE_RESILIENT_TYPES")
                .map(|s| {
                    s.split(',')
                        .map(|t| t.trim().to_ascii_lowercase())
                        .filter(|t| !t.is_empty())
                        .collect()
                })
                .unwrap_or(defaults.resilient_media_types),
            resilient_stale_timeout: env.optional_millis(
                "METACACHE_RESILIENT_STALE_TIMEOUT_MS",
                defaults.resilient_stale_timeout,
            ),
            resilient_miss_timeout: env.optional_millis(
                "METACACHE_RESILIENT_MISS_TIMEOUT_MS",
                defaults.resilient_miss_timeout,
            ),
            standard_stale_timeout: env.optional_millis(
                "METACACHE_STANDARD_STALE_TIMEOUT_MS",
                defaults.standard_stale_timeout,
            ),
            standard_miss_timeout: env.optional_millis(
                "METACACHE_STANDARD_MISS_TIMEOUT_MS",
                defaults.standard_miss_timeout,
            ),
            batch_deadline: env.millis("METACACHE_BATCH_DEADLINE_MS", defaults.batch_deadline),
            batch_item_timeout: env
                .millis("METACACHE_BATCH_ITEM_TIMEOUT_MS", defaults.batch_item_timeout),
            batch_chunk_delay: env
                .millis("METACACHE_BATCH_CHUNK_DELAY_MS", defaults.batch_chunk_delay),
        }
    }
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn raw(&self, name: &str) -> Option<String> {
        (self.lookup)(name).map(|v| v.trim().to_string())
    }

    fn parsed<T>(&self, name: &str, default: T) -> T
    where
        T: FromStr + std::fmt::Debug,
    {
        match self.raw(name) {
            Some(value) => value.parse().unwrap_or_else(|_| {
                warn!("{} has invalid value '{}', using {:?}", name, value, default);
                default
            }),
            None => default,
        }
    }

    fn millis(&self, name: &str, default: Duration) -> Duration {
        Duration::from_millis(self.parsed(name, default.as_millis() as u64))
    }

    /// `0` or `none` disables the bound.
    fn optional_millis(&self, name: &str, default: Option<Duration>) -> Option<Duration> {
        let Some(value) = self.raw(name) else {
            return default;
        };
        if value.eq_ignore_ascii_case("none") {
            return None;
        }
        match value.parse::<u64>() {
            Ok(0) => None,
            Ok(ms) => Some(Duration::from_millis(ms)),
            Err(_) => {
                warn!("{} has invalid value '{}', using {:?}", name, value, default);
                default
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults_match_reference_budgets() {
        let config = config_from(&[]);
        assert_eq!(config.store_backend, StoreBackend::Sled);
        assert_eq!(config.lookup_timeout, Duration::from_secs(2));
        assert_eq!(config.write_timeout, Duration::from_secs(2));
        assert_eq!(config.batch_deadline, Duration::from_secs(12));
        assert_eq!(config.batch_item_timeout, Duration::from_secs(5));
        assert_eq!(config.batch_chunk_delay, Duration::from_millis(300));
        assert_eq!(config.resilient_media_types, vec!["anime".to_string()]);
        assert_eq!(config.resilient_stale_timeout, Some(Duration::from_secs(3)));
        assert_eq!(config.standard_miss_timeout, None);
    }

    #[test]
    fn test_overrides_are_applied() {
        let config = config_from(&[
            ("METACACHE_STORE_BACKEND", "memory"),
            ("METACACHE_MAX_ENTRIES", "42"),
            ("METACACHE_RESILIENT_TYPES", "Anime, tv ,"),
            ("METACACHE_BATCH_CHUNK_DELAY_MS", "0"),
            ("METACACHE_STANDARD_MISS_TIMEOUT_MS", "1500"),
        ]);
        assert_eq!(config.store_backend, StoreBackend::Memory);
        assert_eq!(config.max_entries, 42);
        assert_eq!(
            config.resilient_media_types,
            vec!["anime".to_string(), "tv".to_string()]
        );
        assert_eq!(config.batch_chunk_delay, Duration::ZERO);
        assert_eq!(
            config.standard_miss_timeout,
            Some(Duration::from_millis(1500))
        );
    }

    #[test]
    fn test_optional_budgets_can_be_disabled() {
        let config = config_from(&[
            ("METACACHE_RESILIENT_STALE_TIMEOUT_MS", "none"),
            ("METACACHE_RESILIENT_MISS_TIMEOUT_MS", "0"),
        ]);
        assert_eq!(config.resilient_stale_timeout, None);
        assert_eq!(config.resilient_miss_timeout, None);
    }

    #[test]
    fn test_invalid_values_fall_back_to_defaults() {
        let config = config_from(&[
            ("METACACHE_STORE_BACKEND", "redis"),
            ("METACACHE_LOOKUP_TIMEOUT_MS", "soon"),
            ("METACACHE_WRITE_WORKERS", "0"),
        ]);
        assert_eq!(config.store_backend, StoreBackend::Sled);
        assert_eq!(config.lookup_timeout, Duration::from_secs(2));
        assert_eq!(config.write_workers, 1);
    }

    #[test]
    fn test_load_reads_process_environment() {
        // No .env sits next to this crate, so only the process environment counts.
        let config = Config::load();
        assert!(config.write_workers >= 1);
        assert!(config.write_queue_capacity >= 1);
        assert_eq!(config.store_backend, Config::from_env().store_backend);
    }
}
