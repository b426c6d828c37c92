use crate::store::backend::StoreBackend;
use crate::store::manager::{
    County, CountyPollingStationLimit, NewCounty, PollingStation, PollingStore, StoreStats,
};
use crate::store::migrations::{run_migrations, StoreMigrations};
use anyhow::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres};
use std::fmt::{self, Debug, Formatter};
use tokio_util::sync::CancellationToken;

pub struct PostgresStore {
    backend: StoreBackend<Postgres>,
}

impl Debug for PostgresStore {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresStore")
            .field("pool", &"<PgPool>")
            .finish()
    }
}

struct PostgresMigrationBackend;

impl PostgresStore {
    pub async fn new(connection_string: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(connection_string)
            .await?;

        Ok(Self {
            backend: StoreBackend::new(pool),
        })
    }

    fn postgres_initialize_schema(pool: &PgPool) -> BoxFuture<'_, Result<()>> {
        async move {
            sqlx::query(
                "CREATE TABLE IF NOT EXISTS counties (
                    id SERIAL PRIMARY KEY,
                    code TEXT UNIQUE NOT NULL,
                    name TEXT NOT NULL,
                    display_order INTEGER NOT NULL DEFAULT 0,
                    diaspora BOOLEAN NOT NULL DEFAULT FALSE,
                    number_of_polling_stations INTEGER NOT NULL DEFAULT 0
                )",
            )
            .execute(pool)
            .await?;

            sqlx::query(
                "CREATE TABLE IF NOT EXISTS polling_stations (
                    id SERIAL PRIMARY KEY,
                    county_id INTEGER NOT NULL REFERENCES counties(id),
                    number INTEGER NOT NULL,
                    address TEXT
                )",
            )
            .execute(pool)
            .await?;

            sqlx::query(
                "CREATE TABLE IF NOT EXISTS answers (
                    id SERIAL PRIMARY KEY,
                    polling_station_id INTEGER NOT NULL REFERENCES polling_stations(id),
                    observer_id INTEGER NOT NULL,
                    option_id INTEGER NOT NULL,
                    value TEXT,
                    last_modified TIMESTAMPTZ DEFAULT NOW()
                )",
            )
            .execute(pool)
            .await?;

            sqlx::query(
                "CREATE TABLE IF NOT EXISTS notes (
                    id SERIAL PRIMARY KEY,
                    polling_station_id INTEGER NOT NULL REFERENCES polling_stations(id),
                    observer_id INTEGER NOT NULL,
                    text TEXT NOT NULL,
                    last_modified TIMESTAMPTZ DEFAULT NOW()
                )",
            )
            .execute(pool)
            .await?;

            sqlx::query(
                "CREATE TABLE IF NOT EXISTS polling_station_infos (
                    id SERIAL PRIMARY KEY,
                    polling_station_id INTEGER NOT NULL REFERENCES polling_stations(id),
                    observer_id INTEGER NOT NULL,
                    last_modified TIMESTAMPTZ DEFAULT NOW()
                )",
            )
            .execute(pool)
            .await?;

            Ok(())
        }
        .boxed()
    }
}

#[async_trait]
impl PollingStore for PostgresStore {
    async fn close(&self) -> Result<()> {
        self.backend.pool().close().await;
        Ok(())
    }

    async fn run_migrations(&self) -> Result<()> {
        run_migrations::<PostgresMigrationBackend>(self.backend.pool()).await
    }

    async fn find_county_id_by_code(&self, code: &str) -> Result<Option<i32>> {
        self.backend.find_county_id_by_code(code).await
    }

    async fn get_county(&self, id: i32) -> Result<Option<County>> {
        self.backend.get_county(id).await
    }

    async fn get_polling_station(&self, id: i32) -> Result<Option<PollingStation>> {
        self.backend.get_polling_station(id).await
    }

    async fn find_polling_station_ids(&self, county_id: i32, number: i32) -> Result<Vec<i32>> {
        self.backend
            .find_polling_station_ids(county_id, number)
            .await
    }

    async fn list_county_limits(
        &self,
        diaspora: Option<bool>,
    ) -> Result<Vec<CountyPollingStationLimit>> {
        self.backend.list_county_limits(diaspora).await
    }

    async fn clear_all(&self, cancel: &CancellationToken) -> Result<u64> {
        self.backend.clear_all(cancel).await
    }

    async fn add_county(&self, county: &NewCounty) -> Result<i32> {
        self.backend.add_county(county).await
    }

    async fn set_county_limit(&self, county_id: i32, limit: i32) -> Result<()> {
        self.backend.set_county_limit(county_id, limit).await
    }

    async fn add_polling_station(
        &self,
        county_id: i32,
        number: i32,
        address: Option<&str>,
    ) -> Result<i32> {
        self.backend
            .add_polling_station(county_id, number, address)
            .await
    }

    async fn add_answer(
        &self,
        polling_station_id: i32,
        observer_id: i32,
        option_id: i32,
        value: Option<&str>,
    ) -> Result<i32> {
        self.backend
            .add_answer(polling_station_id, observer_id, option_id, value)
            .await
    }

    async fn add_note(
        &self,
        polling_station_id: i32,
        observer_id: i32,
        text: &str,
    ) -> Result<i32> {
        self.backend
            .add_note(polling_station_id, observer_id, text)
            .await
    }

    async fn add_polling_station_info(
        &self,
        polling_station_id: i32,
        observer_id: i32,
    ) -> Result<i32> {
        self.backend
            .add_polling_station_info(polling_station_id, observer_id)
            .await
    }

    async fn stats(&self) -> Result<StoreStats> {
        self.backend.stats().await
    }
}

impl StoreMigrations for PostgresMigrationBackend {
    type Pool = PgPool;

    fn ensure_version_table(pool: &Self::Pool) -> BoxFuture<'_, Result<()>> {
        async move {
            sqlx::query(
                "CREATE TABLE IF NOT EXISTS schema_migrations (
                    version BIGINT PRIMARY KEY,
                    applied_at TIMESTAMPTZ DEFAULT NOW()
                )",
            )
            .execute(pool)
            .await?;
            Ok(())
        }
        .boxed()
    }

    fn applied_version(pool: &Self::Pool) -> BoxFuture<'_, Result<i64>> {
        async move {
            sqlx::query_scalar("SELECT COALESCE(MAX(version), 0)::BIGINT FROM schema_migrations")
                .fetch_one(pool)
                .await
                .map_err(Into::into)
        }
        .boxed()
    }

    fn mark_applied(pool: &Self::Pool, version: i64) -> BoxFuture<'_, Result<()>> {
        async move {
            sqlx::query("INSERT INTO schema_migrations (version) VALUES ($1)")
                .bind(version)
                .execute(pool)
                .await?;
            Ok(())
        }
        .boxed()
    }

    fn create_tables(pool: &Self::Pool) -> BoxFuture<'_, Result<()>> {
        PostgresStore::postgres_initialize_schema(pool)
    }

    fn create_lookup_index(pool: &Self::Pool) -> BoxFuture<'_, Result<()>> {
        async move {
            sqlx::query(
                "CREATE INDEX IF NOT EXISTS idx_polling_stations_county_number \
                 ON polling_stations (county_id, number)",
            )
            .execute(pool)
            .await?;
            Ok(())
        }
        .boxed()
    }
}
