use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub store: StoreConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    #[serde(rename = "type")]
    pub store_type: String,
    /// SQLite database file. Defaults to `pollwatch.db` in the working directory.
    pub path: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl StoreConfig {
    pub fn sqlite_path(&self) -> &str {
        self.path.as_deref().unwrap_or("pollwatch.db")
    }

    /// Connection string for the Postgres store. Call after `AppConfig::validate`.
    pub fn postgres_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            urlencoding::encode(self.user.as_deref().unwrap_or_default()),
            urlencoding::encode(self.password.as_deref().unwrap_or_default()),
            self.host.as_deref().unwrap_or("localhost"),
            self.port.unwrap_or(5432),
            self.database.as_deref().unwrap_or_default(),
        )
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Redis URL (e.g. "redis://localhost:6379"). In-process cache when unset.
    pub redis_url: Option<String>,
    /// Entry lifetime in seconds. 0 keeps entries until invalidated.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

fn default_ttl_secs() -> u64 {
    300
}

fn default_key_prefix() -> String {
    "pollwatch:".to_string()
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            ttl_secs: default_ttl_secs(),
            key_prefix: default_key_prefix(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file and environment variables
    pub fn load(config_path: &str) -> Result<Self> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::File::with_name(config_path));

        // Environment variables with prefix POLLWATCH_
        // Example: POLLWATCH_CACHE__TTL_SECS=60
        builder = builder.add_source(
            config::Environment::with_prefix("POLLWATCH")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        match self.store.store_type.as_str() {
            "postgres" => {
                if self.store.host.is_none() {
                    anyhow::bail!("Postgres store requires 'host'");
                }
                if self.store.database.is_none() {
                    anyhow::bail!("Postgres store requires 'database'");
                }
                if self.store.user.is_none() {
                    anyhow::bail!("Postgres store requires 'user'");
                }
                if self.store.password.is_none() {
                    anyhow::bail!("Postgres store requires 'password'");
                }
            }
            "sqlite" => {
                // Falls back to the default path, nothing required
            }
            _ => anyhow::bail!("Invalid store type: {}", self.store.store_type),
        }

        if self.cache.key_prefix.is_empty() {
            anyhow::bail!("Cache 'key_prefix' must not be empty");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sqlite_config() -> AppConfig {
        AppConfig {
            store: StoreConfig {
                store_type: "sqlite".to_string(),
                path: None,
                host: None,
                port: None,
                database: None,
                user: None,
                password: None,
            },
            cache: CacheConfig::default(),
        }
    }

    #[test]
    fn test_sqlite_config_is_valid() {
        let config = sqlite_config();
        assert!(config.validate().is_ok());
        assert_eq!(config.store.sqlite_path(), "pollwatch.db");
    }

    #[test]
    fn test_postgres_requires_host() {
        let mut config = sqlite_config();
        config.store.store_type = "postgres".to_string();
        config.store.database = Some("pollwatch".to_string());

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("host"));
    }

    #[test]
    fn test_unknown_store_type_rejected() {
        let mut config = sqlite_config();
        config.store.store_type = "mongo".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_key_prefix_rejected() {
        let mut config = sqlite_config();
        config.cache.key_prefix = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_postgres_url_encodes_credentials() {
        let mut config = sqlite_config();
        config.store.store_type = "postgres".to_string();
        config.store.host = Some("db".to_string());
        config.store.database = Some("votes".to_string());
        config.store.user = Some("admin".to_string());
        config.store.password = Some("p@ss".to_string());

        assert_eq!(
            config.store.postgres_url(),
            "postgres://admin:p%40ss@db:5432/votes"
        );
    }

    #[test]
    fn test_load_from_file_applies_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pollwatch.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "[store]\ntype = \"sqlite\"\npath = \"votes.db\"").unwrap();

        let config = AppConfig::load(path.to_str().unwrap()).unwrap();
        assert_eq!(config.store.sqlite_path(), "votes.db");
        assert_eq!(config.cache.ttl_secs, 300);
        assert_eq!(config.cache.key_prefix, "pollwatch:");
        assert!(config.cache.redis_url.is_none());
    }
}
