//! Database backend abstraction for the polling-station store.
//!
//! [`StoreBackend`] is generic over any sqlx database implementing
//! [`StoreDatabase`], which papers over the dialect differences the store runs
//! into: bind-parameter syntax and reading the affected row count of a statement.
//!
//! # Example
//!
//! ```ignore
//! use pollwatch::store::backend::StoreBackend;
//! use sqlx::SqlitePool;
//!
//! let pool = SqlitePool::connect("sqlite:pollwatch.db?mode=rwc").await?;
//! let backend = StoreBackend::new(pool);
//! let limits = backend.list_county_limits(Some(true)).await?;
//! ```

use crate::store::manager::{
    ClearAllCancelled, County, CountyPollingStationLimit, NewCounty, PollingStation, StoreStats,
};
use anyhow::{anyhow, Context, Result};
use sqlx::{
    query, query_as, query_scalar, ColumnIndex, Database, Decode, Encode, Executor, FromRow,
    IntoArguments, Pool, Postgres, Sqlite, Type,
};
use std::borrow::Cow;
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Extension trait for sqlx databases with the dialect hooks the store needs.
pub trait StoreDatabase: Database {
    /// Returns the parameter placeholder for the given 1-based index.
    ///
    /// - Postgres uses `$1`, `$2`, etc.
    /// - SQLite uses `?` for all parameters (index is ignored).
    fn bind_param(index: usize) -> Cow<'static, str>;

    /// Number of rows changed by an executed statement.
    fn rows_affected(result: &Self::QueryResult) -> u64;
}

impl StoreDatabase for Postgres {
    fn bind_param(index: usize) -> Cow<'static, str> {
        Cow::Owned(format!("${}", index))
    }

    fn rows_affected(result: &Self::QueryResult) -> u64 {
        result.rows_affected()
    }
}

impl StoreDatabase for Sqlite {
    fn bind_param(_: usize) -> Cow<'static, str> {
        Cow::Borrowed("?")
    }

    fn rows_affected(result: &Self::QueryResult) -> u64 {
        result.rows_affected()
    }
}

/// Statements run by `clear_all` before the polling stations themselves are
/// removed. Dependents go first so foreign keys hold at every step.
const CLEAR_DEPENDENTS: [(&str, &str); 4] = [
    ("answers", "DELETE FROM answers"),
    ("notes", "DELETE FROM notes"),
    ("polling_station_infos", "DELETE FROM polling_station_infos"),
    (
        "county_limits",
        "UPDATE counties SET number_of_polling_stations = 0",
    ),
];

const CLEAR_POLLING_STATIONS: &str = "DELETE FROM polling_stations";

/// Race a database future against the cancellation token. Cancellation wins ties.
async fn cancellable<T, F>(cancel: &CancellationToken, step: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T, sqlx::Error>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            warn!(step, "clear-all cancelled, rolling back");
            Err(ClearAllCancelled.into())
        }
        result = fut => result.with_context(|| format!("clear-all step '{}' failed", step)),
    }
}

/// Generic database backend for the polling-station store.
pub struct StoreBackend<DB: StoreDatabase> {
    pool: Pool<DB>,
}

impl<DB: StoreDatabase> StoreBackend<DB> {
    pub fn new(pool: Pool<DB>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool<DB> {
        &self.pool
    }
}

impl<DB> StoreBackend<DB>
where
    DB: StoreDatabase,
    County: for<'r> FromRow<'r, DB::Row>,
    PollingStation: for<'r> FromRow<'r, DB::Row>,
    CountyPollingStationLimit: for<'r> FromRow<'r, DB::Row>,
    for<'q> &'q str: Encode<'q, DB> + Type<DB>,
    for<'q> Option<&'q str>: Encode<'q, DB> + Type<DB>,
    for<'q> bool: Encode<'q, DB> + Type<DB>,
    for<'q> i32: Encode<'q, DB> + Type<DB>,
    for<'r> i32: Decode<'r, DB>,
    for<'q> i64: Encode<'q, DB> + Type<DB>,
    for<'r> i64: Decode<'r, DB>,
    for<'q> <DB as Database>::Arguments<'q>: IntoArguments<'q, DB> + Send,
    for<'c> &'c Pool<DB>: Executor<'c, Database = DB>,
    for<'c> &'c mut <DB as Database>::Connection: Executor<'c, Database = DB>,
    usize: ColumnIndex<DB::Row>,
{
    pub async fn find_county_id_by_code(&self, code: &str) -> Result<Option<i32>> {
        let sql = format!(
            "SELECT id FROM counties WHERE code = {}",
            DB::bind_param(1)
        );

        query_scalar::<DB, i32>(&sql)
            .bind(code)
            .fetch_optional(&self.pool)
            .await
            .map_err(Into::into)
    }

    pub async fn get_county(&self, id: i32) -> Result<Option<County>> {
        let sql = format!(
            "SELECT id, code, name, display_order, diaspora, number_of_polling_stations \
             FROM counties WHERE id = {}",
            DB::bind_param(1)
        );

        query_as::<DB, County>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Into::into)
    }

    pub async fn get_polling_station(&self, id: i32) -> Result<Option<PollingStation>> {
        let sql = format!(
            "SELECT id, county_id, number, address FROM polling_stations WHERE id = {}",
            DB::bind_param(1)
        );

        query_as::<DB, PollingStation>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Into::into)
    }

    pub async fn find_polling_station_ids(&self, county_id: i32, number: i32) -> Result<Vec<i32>> {
        let sql = format!(
            "SELECT id FROM polling_stations WHERE county_id = {} AND number = {} ORDER BY id",
            DB::bind_param(1),
            DB::bind_param(2),
        );

        query_scalar::<DB, i32>(&sql)
            .bind(county_id)
            .bind(number)
            .fetch_all(&self.pool)
            .await
            .map_err(Into::into)
    }

    pub async fn list_county_limits(
        &self,
        diaspora: Option<bool>,
    ) -> Result<Vec<CountyPollingStationLimit>> {
        let mut sql = String::from(
            "SELECT name, code, number_of_polling_stations, id, diaspora, display_order \
             FROM counties",
        );

        if diaspora.is_some() {
            sql.push_str(" WHERE diaspora = ");
            sql.push_str(DB::bind_param(1).as_ref());
        }

        sql.push_str(" ORDER BY display_order, id");

        let mut stmt = query_as::<DB, CountyPollingStationLimit>(&sql);
        if let Some(flag) = diaspora {
            stmt = stmt.bind(flag);
        }

        stmt.fetch_all(&self.pool).await.map_err(Into::into)
    }

    /// Runs the wipe inside one transaction. On error or cancellation the
    /// transaction is dropped without commit, which rolls it back.
    #[tracing::instrument(name = "store_clear_all", skip(self, cancel))]
    pub async fn clear_all(&self, cancel: &CancellationToken) -> Result<u64> {
        let mut tx = cancellable(cancel, "begin", self.pool.begin()).await?;

        for (step, sql) in CLEAR_DEPENDENTS {
            let result = cancellable(cancel, step, query(sql).execute(&mut *tx)).await?;
            info!(step, rows = DB::rows_affected(&result), "clear-all step done");
        }

        let result = cancellable(
            cancel,
            "polling_stations",
            query(CLEAR_POLLING_STATIONS).execute(&mut *tx),
        )
        .await?;
        let deleted = DB::rows_affected(&result);

        if cancel.is_cancelled() {
            warn!("clear-all cancelled before commit, rolling back");
            return Err(ClearAllCancelled.into());
        }

        tx.commit().await.context("clear-all commit failed")?;

        info!(deleted, "clear-all committed");
        Ok(deleted)
    }

    #[tracing::instrument(
        name = "store_add_county",
        skip(self, county),
        fields(pollwatch.county_code = %county.code)
    )]
    pub async fn add_county(&self, county: &NewCounty) -> Result<i32> {
        let sql = format!(
            "INSERT INTO counties (code, name, display_order, diaspora, number_of_polling_stations) \
             VALUES ({}, {}, {}, {}, {}) RETURNING id",
            DB::bind_param(1),
            DB::bind_param(2),
            DB::bind_param(3),
            DB::bind_param(4),
            DB::bind_param(5),
        );

        query_scalar::<DB, i32>(&sql)
            .bind(county.code.as_str())
            .bind(county.name.as_str())
            .bind(county.display_order)
            .bind(county.diaspora)
            .bind(county.number_of_polling_stations)
            .fetch_one(&self.pool)
            .await
            .map_err(Into::into)
    }

    pub async fn set_county_limit(&self, county_id: i32, limit: i32) -> Result<()> {
        let sql = format!(
            "UPDATE counties SET number_of_polling_stations = {} WHERE id = {}",
            DB::bind_param(1),
            DB::bind_param(2),
        );

        let result = query(&sql)
            .bind(limit)
            .bind(county_id)
            .execute(&self.pool)
            .await?;

        if DB::rows_affected(&result) == 0 {
            return Err(anyhow!("County {} not found", county_id));
        }

        Ok(())
    }

    #[tracing::instrument(
        name = "store_add_polling_station",
        skip(self, address),
        fields(pollwatch.county_id = county_id, pollwatch.number = number)
    )]
    pub async fn add_polling_station(
        &self,
        county_id: i32,
        number: i32,
        address: Option<&str>,
    ) -> Result<i32> {
        let sql = format!(
            "INSERT INTO polling_stations (county_id, number, address) VALUES ({}, {}, {}) \
             RETURNING id",
            DB::bind_param(1),
            DB::bind_param(2),
            DB::bind_param(3),
        );

        query_scalar::<DB, i32>(&sql)
            .bind(county_id)
            .bind(number)
            .bind(address)
            .fetch_one(&self.pool)
            .await
            .map_err(Into::into)
    }

    pub async fn add_answer(
        &self,
        polling_station_id: i32,
        observer_id: i32,
        option_id: i32,
        value: Option<&str>,
    ) -> Result<i32> {
        let sql = format!(
            "INSERT INTO answers (polling_station_id, observer_id, option_id, value) \
             VALUES ({}, {}, {}, {}) RETURNING id",
            DB::bind_param(1),
            DB::bind_param(2),
            DB::bind_param(3),
            DB::bind_param(4),
        );

        query_scalar::<DB, i32>(&sql)
            .bind(polling_station_id)
            .bind(observer_id)
            .bind(option_id)
            .bind(value)
            .fetch_one(&self.pool)
            .await
            .map_err(Into::into)
    }

    pub async fn add_note(
        &self,
        polling_station_id: i32,
        observer_id: i32,
        text: &str,
    ) -> Result<i32> {
        let sql = format!(
            "INSERT INTO notes (polling_station_id, observer_id, text) VALUES ({}, {}, {}) \
             RETURNING id",
            DB::bind_param(1),
            DB::bind_param(2),
            DB::bind_param(3),
        );

        query_scalar::<DB, i32>(&sql)
            .bind(polling_station_id)
            .bind(observer_id)
            .bind(text)
            .fetch_one(&self.pool)
            .await
            .map_err(Into::into)
    }

    pub async fn add_polling_station_info(
        &self,
        polling_station_id: i32,
        observer_id: i32,
    ) -> Result<i32> {
        let sql = format!(
            "INSERT INTO polling_station_infos (polling_station_id, observer_id) \
             VALUES ({}, {}) RETURNING id",
            DB::bind_param(1),
            DB::bind_param(2),
        );

        query_scalar::<DB, i32>(&sql)
            .bind(polling_station_id)
            .bind(observer_id)
            .fetch_one(&self.pool)
            .await
            .map_err(Into::into)
    }

    async fn count_rows(&self, table: &str) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", table);
        query_scalar::<DB, i64>(&sql)
            .fetch_one(&self.pool)
            .await
            .with_context(|| format!("Failed to count rows in {}", table))
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        Ok(StoreStats {
            counties: self.count_rows("counties").await?,
            polling_stations: self.count_rows("polling_stations").await?,
            answers: self.count_rows("answers").await?,
            notes: self.count_rows("notes").await?,
            polling_station_infos: self.count_rows("polling_station_infos").await?,
        })
    }
}
