//! Configuration types

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::envelope::LATEST_VERSION;
use crate::error::ConfigError;

/// Default name of the version registry collection.
pub const DEFAULT_REGISTRY_COLLECTION: &str = "cacheVersions";

/// Default version tag under which registry entries are stored.
pub const DEFAULT_REGISTRY_VERSION: &str = "1";

/// Cache storage configuration.
///
/// `CACHE_DB_NAME` and `CACHE_HOST` are optional because the engine binding
/// owns connection setup; the remaining fields tune the store itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStorageConfig {
    #[serde(rename = "CACHE_DB_NAME", default, skip_serializing_if = "Option::is_none")]
    pub cache_db_name: Option<String>,

    #[serde(rename = "CACHE_HOST", default, skip_serializing_if = "Option::is_none")]
    pub cache_host: Option<String>,

    /// Collection holding one [`CacheVersion`](crate::CacheVersion) per data collection.
    #[serde(default = "default_registry_collection")]
    pub registry_collection: String,

    /// Version tag of registry entries.
    #[serde(default = "default_registry_version")]
    pub registry_version: String,

    /// Age after which a held lock is treated as abandoned.
    #[serde(with = "millis", default = "default_lock_stale_after")]
    pub lock_stale_after: Duration,

    /// Sleep between conditional-update attempts while a lock is contended.
    #[serde(with = "millis", default = "default_lock_poll_interval")]
    pub lock_poll_interval: Duration,

    /// Upper bound on total lock wait. `None` waits until cancelled.
    #[serde(with = "opt_millis", default, skip_serializing_if = "Option::is_none")]
    pub lock_max_wait: Option<Duration>,
}

fn default_registry_collection() -> String {
    DEFAULT_REGISTRY_COLLECTION.to_string()
}

fn default_registry_version() -> String {
    DEFAULT_REGISTRY_VERSION.to_string()
}

fn default_lock_stale_after() -> Duration {
    Duration::from_secs(30)
}

fn default_lock_poll_interval() -> Duration {
    Duration::from_millis(50)
}

impl Default for CacheStorageConfig {
    fn default() -> Self {
        Self {
            cache_db_name: None,
            cache_host: None,
            registry_collection: default_registry_collection(),
            registry_version: default_registry_version(),
            lock_stale_after: default_lock_stale_after(),
            lock_poll_interval: default_lock_poll_interval(),
            lock_max_wait: None,
        }
    }
}

impl CacheStorageConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a config from `CACHE_*` environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self {
            cache_db_name: lookup("CACHE_DB_NAME"),
            cache_host: lookup("CACHE_HOST"),
            ..Self::default()
        };
        if let Some(collection) = lookup("CACHE_REGISTRY_COLLECTION") {
            config.registry_collection = collection;
        }
        if let Some(version) = lookup("CACHE_REGISTRY_VERSION") {
            config.registry_version = version;
        }
        if let Some(raw) = lookup("CACHE_LOCK_STALE_AFTER_MS") {
            config.lock_stale_after = parse_millis("CACHE_LOCK_STALE_AFTER_MS", &raw)?;
        }
        if let Some(raw) = lookup("CACHE_LOCK_POLL_INTERVAL_MS") {
            config.lock_poll_interval = parse_millis("CACHE_LOCK_POLL_INTERVAL_MS", &raw)?;
        }
        if let Some(raw) = lookup("CACHE_LOCK_MAX_WAIT_MS") {
            config.lock_max_wait = Some(parse_millis("CACHE_LOCK_MAX_WAIT_MS", &raw)?);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn with_db_name(mut self, name: impl Into<String>) -> Self {
        self.cache_db_name = Some(name.into());
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.cache_host = Some(host.into());
        self
    }

    pub fn with_registry_collection(mut self, collection: impl Into<String>) -> Self {
        self.registry_collection = collection.into();
        self
    }

    pub fn with_registry_version(mut self, version: impl Into<String>) -> Self {
        self.registry_version = version.into();
        self
    }

    pub fn with_lock_stale_after(mut self, duration: Duration) -> Self {
        self.lock_stale_after = duration;
        self
    }

    pub fn with_lock_poll_interval(mut self, duration: Duration) -> Self {
        self.lock_poll_interval = duration;
        self
    }

    pub fn with_lock_max_wait(mut self, duration: Duration) -> Self {
        self.lock_max_wait = Some(duration);
        self
    }

    /// Reject values the store cannot operate with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.registry_collection.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "registry_collection".to_string(),
            });
        }
        if self.registry_version.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "registry_version".to_string(),
            });
        }
        if self.registry_version == LATEST_VERSION {
            return Err(ConfigError::InvalidValue {
                field: "registry_version".to_string(),
                value: self.registry_version.clone(),
                reason: "the latest sentinel cannot be a stored version tag".to_string(),
            });
        }
        if self.lock_stale_after.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "lock_stale_after".to_string(),
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if self.lock_poll_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "lock_poll_interval".to_string(),
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

fn parse_millis(field: &str, raw: &str) -> Result<Duration, ConfigError> {
    raw.trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|e| ConfigError::InvalidValue {
            field: field.to_string(),
            value: raw.to_string(),
            reason: e.to_string(),
        })
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod opt_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = CacheStorageConfig::default();
        assert_eq!(config.registry_collection, "cacheVersions");
        assert_eq!(config.registry_version, "1");
        assert_eq!(config.lock_stale_after, Duration::from_secs(30));
        assert_eq!(config.lock_poll_interval, Duration::from_millis(50));
        assert!(config.lock_max_wait.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_deserialize_original_keys() {
        let config: CacheStorageConfig =
            serde_json::from_str(r#"{"CACHE_DB_NAME": "cache", "CACHE_HOST": "mongodb://db:27017"}"#)
                .unwrap();
        assert_eq!(config.cache_db_name.as_deref(), Some("cache"));
        assert_eq!(config.cache_host.as_deref(), Some("mongodb://db:27017"));
        assert_eq!(config.lock_poll_interval, Duration::from_millis(50));
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = CacheStorageConfig::from_lookup(lookup_from(&[
            ("CACHE_DB_NAME", "test"),
            ("CACHE_LOCK_POLL_INTERVAL_MS", "10"),
            ("CACHE_LOCK_MAX_WAIT_MS", "2000"),
        ]))
        .unwrap();
        assert_eq!(config.cache_db_name.as_deref(), Some("test"));
        assert_eq!(config.lock_poll_interval, Duration::from_millis(10));
        assert_eq!(config.lock_max_wait, Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let err = CacheStorageConfig::from_lookup(lookup_from(&[(
            "CACHE_LOCK_STALE_AFTER_MS",
            "soon",
        )]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "CACHE_LOCK_STALE_AFTER_MS"));
    }

    #[test]
    fn test_validate_rejects_latest_registry_version() {
        let config = CacheStorageConfig::new().with_registry_version("latest");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_poll_interval() {
        let config = CacheStorageConfig::new().with_lock_poll_interval(Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_serde_roundtrip_uses_millis() {
        let config = CacheStorageConfig::new().with_lock_max_wait(Duration::from_millis(750));
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["lock_poll_interval"], 50);
        assert_eq!(json["lock_max_wait"], 750);
        let back: CacheStorageConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, config);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_valid_config_survives_serde(
            db_name in proptest::option::of("[a-z]{1,12}"),
            registry_collection in "[a-zA-Z]{1,16}",
            registry_version in "[0-9]{1,4}",
            stale_ms in 1u64..600_000,
            poll_ms in 1u64..10_000,
            max_wait_ms in proptest::option::of(0u64..600_000),
        ) {
            let mut config = CacheStorageConfig::new()
                .with_registry_collection(registry_collection)
                .with_registry_version(registry_version)
                .with_lock_stale_after(Duration::from_millis(stale_ms))
                .with_lock_poll_interval(Duration::from_millis(poll_ms));
            config.cache_db_name = db_name;
            config.lock_max_wait = max_wait_ms.map(Duration::from_millis);
            prop_assert!(config.validate().is_ok());

            let json = serde_json::to_string(&config).unwrap();
            let back: CacheStorageConfig = serde_json::from_str(&json).unwrap();
            prop_assert_eq!(back, config);
        }
    }
}
