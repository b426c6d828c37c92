//! Entry points for the command-dispatch layer.
//!
//! Dispatch expects plain values and must never see an error from these calls,
//! so every failure is logged here and collapsed to [`FAILURE_SENTINEL`] (or an
//! empty list for the limits listing). Callers that need to tell "not found"
//! from "ambiguous" from "database down" should use
//! [`PollingStationService`] directly.

use crate::service::PollingStationService;
use crate::store::CountyPollingStationLimit;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::error;

/// Returned by the scalar handlers on any failure.
pub const FAILURE_SENTINEL: i32 = -1;

#[derive(Debug, Clone)]
pub struct LocationHandlers {
    service: Arc<PollingStationService>,
}

impl LocationHandlers {
    pub fn new(service: Arc<PollingStationService>) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &Arc<PollingStationService> {
        &self.service
    }

    /// Polling-station id for (`number`, `county_code`), or `-1`.
    pub async fn polling_station_by_county_code(&self, number: i32, county_code: &str) -> i32 {
        match self
            .service
            .get_polling_station_by_county_code(number, county_code)
            .await
        {
            Ok(id) => id,
            Err(e) => {
                error!(
                    error.kind = e.kind(),
                    number,
                    county_code,
                    "polling-station lookup by county code failed: {}",
                    e
                );
                FAILURE_SENTINEL
            }
        }
    }

    /// Polling-station id for (`number`, `county_id`), or `-1`.
    pub async fn polling_station_by_county_id(&self, number: i32, county_id: i32) -> i32 {
        match self
            .service
            .get_polling_station_by_county_id(number, county_id)
            .await
        {
            Ok(id) => id,
            Err(e) => {
                error!(
                    error.kind = e.kind(),
                    number,
                    county_id,
                    "polling-station lookup by county id failed: {}",
                    e
                );
                FAILURE_SENTINEL
            }
        }
    }

    /// County limits, or an empty list on failure.
    pub async fn county_limits(&self, diaspora: Option<bool>) -> Vec<CountyPollingStationLimit> {
        match self.service.get_county_limits(diaspora).await {
            Ok(limits) => limits,
            Err(e) => {
                error!(
                    error.kind = e.kind(),
                    ?diaspora,
                    "listing county polling-station limits failed: {}",
                    e
                );
                Vec::new()
            }
        }
    }

    /// Number of polling stations removed, or `-1`. Nothing is changed when
    /// this returns `-1`.
    pub async fn clear_all(&self, cancel: CancellationToken) -> i64 {
        match self.service.clear_all(&cancel).await {
            Ok(deleted) => i64::try_from(deleted).unwrap_or(i64::MAX),
            Err(e) => {
                error!(
                    error.kind = e.kind(),
                    "Error while removing polling stations: {}", e
                );
                i64::from(FAILURE_SENTINEL)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheService;
    use crate::config::CacheConfig;
    use crate::store::{MockStore, NewCounty, PollingStore};

    fn handlers(store: Arc<MockStore>) -> LocationHandlers {
        let service =
            PollingStationService::new(store, CacheService::in_memory(CacheConfig::default()));
        LocationHandlers::new(Arc::new(service))
    }

    async fn seed(store: &MockStore) -> i32 {
        let county_id = store
            .add_county(&NewCounty {
                code: "CJ".to_string(),
                name: "Cluj".to_string(),
                display_order: 1,
                diaspora: false,
                number_of_polling_stations: 10,
            })
            .await
            .unwrap();
        let station = store.add_polling_station(county_id, 5, None).await.unwrap();
        store.add_answer(station, 1, 1, None).await.unwrap();
        county_id
    }

    #[tokio::test]
    async fn test_store_failure_becomes_sentinel() {
        let store = Arc::new(MockStore::new());
        let county_id = seed(&store).await;
        store.set_fail_reads(true);
        let handlers = handlers(store);

        assert_eq!(
            handlers.polling_station_by_county_code(5, "CJ").await,
            FAILURE_SENTINEL
        );
        assert_eq!(
            handlers.polling_station_by_county_id(5, county_id).await,
            FAILURE_SENTINEL
        );
        assert!(handlers.county_limits(None).await.is_empty());
    }

    #[tokio::test]
    async fn test_clear_all_failure_leaves_rows() {
        let store = Arc::new(MockStore::new());
        seed(&store).await;
        store.set_fail_clear(true);
        let handlers = handlers(store.clone());

        assert_eq!(
            handlers.clear_all(CancellationToken::new()).await,
            i64::from(FAILURE_SENTINEL)
        );
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.polling_stations, 1);
        assert_eq!(stats.answers, 1);

        store.set_fail_clear(false);
        assert_eq!(handlers.clear_all(CancellationToken::new()).await, 1);
        assert_eq!(store.stats().await.unwrap().polling_stations, 0);
    }
}
