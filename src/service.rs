use crate::cache::{encode_key_segment, CacheService};
use crate::config::AppConfig;
use crate::error::LocationError;
use crate::store::{CountyPollingStationLimit, PollingStore, PostgresStore, SqliteStore};
use anyhow::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const KEY_ALL_LIMITS: &str = "all-polling-stations";

fn key_station_by_county_code(number: i32, county_code: &str) -> String {
    format!(
        "polling-station-countyCode-{}-{}",
        number,
        encode_key_segment(county_code)
    )
}

fn key_station_by_county_id(number: i32, county_id: i32) -> String {
    format!("polling-station-{}-{}", number, county_id)
}

fn key_county_limits(diaspora: Option<bool>) -> String {
    match diaspora {
        Some(flag) => format!("polling-station-diaspora-{}", flag),
        None => KEY_ALL_LIMITS.to_string(),
    }
}

/// Polling-station lookups and the bulk clear, backed by a store and a
/// read-through cache.
#[derive(Debug)]
pub struct PollingStationService {
    store: Arc<dyn PollingStore>,
    cache: CacheService,
}

impl PollingStationService {
    pub fn new(store: Arc<dyn PollingStore>, cache: CacheService) -> Self {
        Self { store, cache }
    }

    /// Open the configured store, apply migrations and connect the cache.
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        config.validate()?;

        let store: Arc<dyn PollingStore> = match config.store.store_type.as_str() {
            "postgres" => Arc::new(PostgresStore::new(&config.store.postgres_url()).await?),
            _ => Arc::new(SqliteStore::new(config.store.sqlite_path()).await?),
        };
        store.run_migrations().await?;

        let cache = CacheService::from_config(&config.cache).await?;

        info!(
            store = %config.store.store_type,
            redis = config.cache.redis_url.is_some(),
            "polling-station service initialized"
        );

        Ok(Self::new(store, cache))
    }

    pub fn store(&self) -> &Arc<dyn PollingStore> {
        &self.store
    }

    /// Resolve the id of station `number` in the county with `county_code`.
    #[tracing::instrument(name = "lookup_station_by_county_code", skip(self))]
    pub async fn get_polling_station_by_county_code(
        &self,
        number: i32,
        county_code: &str,
    ) -> Result<i32, LocationError> {
        let key = key_station_by_county_code(number, county_code);

        self.cache
            .get_or_compute(&key, move || async move {
                let county_id = self
                    .store
                    .find_county_id_by_code(county_code)
                    .await
                    .map_err(LocationError::Store)?
                    .ok_or_else(|| LocationError::CountyNotFound(county_code.to_string()))?;

                self.get_polling_station_by_county_id(number, county_id)
                    .await
            })
            .await
    }

    /// Resolve the id of station `number` in county `county_id`. Zero matches is
    /// `PollingStationNotFound`; several is `AmbiguousPollingStation`.
    #[tracing::instrument(name = "lookup_station_by_county_id", skip(self))]
    pub async fn get_polling_station_by_county_id(
        &self,
        number: i32,
        county_id: i32,
    ) -> Result<i32, LocationError> {
        let key = key_station_by_county_id(number, county_id);

        self.cache
            .get_or_compute(&key, move || async move {
                let ids = self
                    .store
                    .find_polling_station_ids(county_id, number)
                    .await
                    .map_err(LocationError::Store)?;

                match ids.len() {
                    0 => Err(LocationError::PollingStationNotFound { county_id, number }),
                    1 => Ok(ids[0]),
                    _ => Err(LocationError::AmbiguousPollingStation {
                        county_id,
                        number,
                        ids,
                    }),
                }
            })
            .await
    }

    /// Per-county polling-station limits ordered by display order. `diaspora`
    /// restricts the list to diaspora (or domestic) counties.
    #[tracing::instrument(name = "list_county_limits", skip(self))]
    pub async fn get_county_limits(
        &self,
        diaspora: Option<bool>,
    ) -> Result<Vec<CountyPollingStationLimit>, LocationError> {
        let key = key_county_limits(diaspora);

        self.cache
            .get_or_compute(&key, move || async move {
                self.store
                    .list_county_limits(diaspora)
                    .await
                    .map_err(LocationError::Store)
            })
            .await
    }

    /// Update a county's limit and drop the cached limit listings.
    pub async fn set_county_limit(&self, county_id: i32, limit: i32) -> Result<(), LocationError> {
        self.store
            .set_county_limit(county_id, limit)
            .await
            .map_err(LocationError::Store)?;

        for diaspora in [None, Some(true), Some(false)] {
            self.cache.invalidate(&key_county_limits(diaspora)).await;
        }

        Ok(())
    }

    /// Delete every polling station and its dependent rows in one transaction,
    /// then drop all cached lookups. Returns the number of stations deleted.
    ///
    /// A lookup that read the store before the commit and writes its result
    /// after the invalidation re-caches a deleted id; that entry lives until
    /// its TTL runs out or the next invalidation.
    #[tracing::instrument(name = "clear_all_polling_stations", skip(self, cancel))]
    pub async fn clear_all(&self, cancel: &CancellationToken) -> Result<u64, LocationError> {
        let deleted = self
            .store
            .clear_all(cancel)
            .await
            .map_err(LocationError::from_store)?;

        match self.cache.invalidate_all().await {
            Ok(invalidated) => info!(deleted, invalidated, "polling stations cleared"),
            Err(e) => warn!("cache: failed to invalidate after clear-all: {}", e),
        }

        Ok(deleted)
    }

    pub async fn close(&self) -> Result<()> {
        self.store.close().await
    }
}
