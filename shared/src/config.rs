use crate::{Error, Result};
use std::collections::HashMap;
use std::time::Duration;
use tracing::warn;

/// Settings shared by every cache created from one registry.
#[derive(Clone, Debug)]
pub struct CacheSettings {
    /// Cache names created eagerly at startup.
    pub cache_names: Vec<String>,
    /// Create caches for unknown names on first use.
    pub dynamic: bool,
    /// Global prefix placed in front of every remote key.
    pub cache_prefix: Option<String>,
    /// Cache null loader results locally (never sent to the remote tier).
    pub cache_null_values: bool,
    pub remote: RemoteSettings,
    pub local: LocalSettings,
}

#[derive(Clone, Debug)]
pub struct RemoteSettings {
    pub default_expiration: Duration,
    /// Fraction of the expiration used as a random offset on both sides.
    pub expire_offset: f64,
    /// Per cache name expirations, preferred over `default_expiration`.
    pub expires: HashMap<String, Duration>,
    /// Topic every node publishes invalidations to.
    pub topic: String,
}

/// Sizing and expiry of the in-process tier. Zero disables a setting.
#[derive(Clone, Debug)]
pub struct LocalSettings {
    pub expire_after_access: Duration,
    pub expire_after_write: Duration,
    pub refresh_after_write: Duration,
    pub initial_capacity: usize,
    pub maximum_size: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            cache_names: Vec::new(),
            dynamic: true,
            cache_prefix: None,
            cache_null_values: true,
            remote: RemoteSettings::default(),
            local: LocalSettings::default(),
        }
    }
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            default_expiration: Duration::from_secs(10 * 60),
            expire_offset: 0.2,
            expires: HashMap::new(),
            topic: RemoteSettings::DEFAULT_TOPIC.to_string(),
        }
    }
}

impl Default for LocalSettings {
    fn default() -> Self {
        Self {
            expire_after_access: Duration::ZERO,
            expire_after_write: Duration::from_secs(3 * 60),
            refresh_after_write: Duration::ZERO,
            initial_capacity: 10,
            maximum_size: 1000,
        }
    }
}

impl RemoteSettings {
    pub const DEFAULT_TOPIC: &str = "cache:multi:topic";

    /// Remote expiration for a cache, per-name override first.
    pub fn expiration_for(&self, cache_name: &str) -> Duration {
        self.expires
            .get(cache_name)
            .copied()
            .unwrap_or(self.default_expiration)
    }
}

impl CacheSettings {
    /// Build settings from `STRATA_*` environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let local_defaults = LocalSettings::default();
        let remote_defaults = RemoteSettings::default();

        let cache_names = std::env::var("STRATA_CACHE_NAMES")
            .map(|names| split_list(&names))
            .unwrap_or_default();

        let remote = RemoteSettings {
            default_expiration: env_millis(
                "STRATA_REMOTE_DEFAULT_EXPIRATION_MS",
                remote_defaults.default_expiration,
            )?,
            expire_offset: env_parse("STRATA_REMOTE_EXPIRE_OFFSET", remote_defaults.expire_offset)?,
            expires: match std::env::var("STRATA_REMOTE_EXPIRES") {
                Ok(raw) => parse_expires(&raw)?,
                Err(_) => HashMap::new(),
            },
            topic: std::env::var("STRATA_REMOTE_TOPIC").unwrap_or(remote_defaults.topic),
        };

        let local = LocalSettings {
            expire_after_access: env_millis(
                "STRATA_LOCAL_EXPIRE_AFTER_ACCESS_MS",
                local_defaults.expire_after_access,
            )?,
            expire_after_write: env_millis(
                "STRATA_LOCAL_EXPIRE_AFTER_WRITE_MS",
                local_defaults.expire_after_write,
            )?,
            refresh_after_write: env_millis(
                "STRATA_LOCAL_REFRESH_AFTER_WRITE_MS",
                local_defaults.refresh_after_write,
            )?,
            initial_capacity: env_parse(
                "STRATA_LOCAL_INITIAL_CAPACITY",
                local_defaults.initial_capacity,
            )?,
            maximum_size: env_parse("STRATA_LOCAL_MAXIMUM_SIZE", local_defaults.maximum_size)?,
        };

        let cache_prefix = std::env::var("STRATA_CACHE_PREFIX")
            .ok()
            .filter(|prefix| !prefix.is_empty());
        if cache_prefix.is_none() {
            warn!("STRATA_CACHE_PREFIX not set, remote keys will start with the cache name");
        }

        Ok(Self {
            cache_names,
            dynamic: env_parse("STRATA_DYNAMIC", defaults.dynamic)?,
            cache_prefix,
            cache_null_values: env_parse("STRATA_CACHE_NULL_VALUES", defaults.cache_null_values)?,
            remote,
            local,
        })
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| Error::Config(format!("{name} has an invalid value '{raw}'"))),
        Err(_) => Ok(default),
    }
}

fn env_millis(name: &str, default: Duration) -> Result<Duration> {
    env_parse(name, default.as_millis() as u64).map(Duration::from_millis)
}

/// Parse `name=millis` pairs separated by commas.
fn parse_expires(raw: &str) -> Result<HashMap<String, Duration>> {
    let mut expires = HashMap::new();
    for pair in split_list(raw) {
        let (name, millis) = pair
            .split_once('=')
            .ok_or_else(|| Error::Config(format!("expected name=millis, got '{pair}'")))?;
        let millis = millis
            .trim()
            .parse::<u64>()
            .map_err(|_| Error::Config(format!("invalid expiration for '{}'", name.trim())))?;
        expires.insert(name.trim().to_string(), Duration::from_millis(millis));
    }
    Ok(expires)
}
