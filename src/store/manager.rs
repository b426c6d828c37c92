use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt::Debug;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct County {
    pub id: i32,
    pub code: String,
    pub name: String,
    pub display_order: i32,
    pub diaspora: bool,
    pub number_of_polling_stations: i32,
}

/// Fields needed to register a county.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCounty {
    pub code: String,
    pub name: String,
    pub display_order: i32,
    pub diaspora: bool,
    pub number_of_polling_stations: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct PollingStation {
    pub id: i32,
    pub county_id: i32,
    pub number: i32,
    pub address: Option<String>,
}

/// Read-only projection of a county and its configured polling-station limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CountyPollingStationLimit {
    pub name: String,
    pub code: String,
    #[sqlx(rename = "number_of_polling_stations")]
    pub limit: i32,
    pub id: i32,
    pub diaspora: bool,
    #[sqlx(rename = "display_order")]
    pub order: i32,
}

/// Row counts for every table touched by the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub counties: i64,
    pub polling_stations: i64,
    pub answers: i64,
    pub notes: i64,
    pub polling_station_infos: i64,
}

/// Returned (inside `anyhow::Error`) when `clear_all` observes its cancellation
/// token. The transaction is dropped uncommitted.
#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("clear-all was cancelled before commit")]
pub struct ClearAllCancelled;

/// Async interface over the polling-station tables.
#[async_trait]
pub trait PollingStore: Debug + Send + Sync {
    /// Close the underlying pool. Idempotent.
    async fn close(&self) -> Result<()> {
        Ok(())
    }

    /// Apply any pending schema migrations. Should be idempotent.
    async fn run_migrations(&self) -> Result<()>;

    async fn find_county_id_by_code(&self, code: &str) -> Result<Option<i32>>;

    async fn get_county(&self, id: i32) -> Result<Option<County>>;

    async fn get_polling_station(&self, id: i32) -> Result<Option<PollingStation>>;

    /// All station ids in `county_id` carrying `number`. More than one id means
    /// duplicated data; the schema does not prevent it.
    async fn find_polling_station_ids(&self, county_id: i32, number: i32) -> Result<Vec<i32>>;

    /// Counties ordered by display order, optionally filtered on the diaspora flag.
    async fn list_county_limits(
        &self,
        diaspora: Option<bool>,
    ) -> Result<Vec<CountyPollingStationLimit>>;

    /// Wipe answers, notes, polling-station infos and polling stations, and reset
    /// every county limit to 0, in one transaction. Returns the number of
    /// polling stations deleted.
    async fn clear_all(&self, cancel: &CancellationToken) -> Result<u64>;

    async fn add_county(&self, county: &NewCounty) -> Result<i32>;

    /// Fails if the county does not exist.
    async fn set_county_limit(&self, county_id: i32, limit: i32) -> Result<()>;

    async fn add_polling_station(
        &self,
        county_id: i32,
        number: i32,
        address: Option<&str>,
    ) -> Result<i32>;

    async fn add_answer(
        &self,
        polling_station_id: i32,
        observer_id: i32,
        option_id: i32,
        value: Option<&str>,
    ) -> Result<i32>;

    async fn add_note(&self, polling_station_id: i32, observer_id: i32, text: &str)
        -> Result<i32>;

    async fn add_polling_station_info(
        &self,
        polling_station_id: i32,
        observer_id: i32,
    ) -> Result<i32>;

    async fn stats(&self) -> Result<StoreStats>;
}
