//! Versioned schema changes shared by the SQLite and Postgres stores.

use anyhow::{bail, Context, Result};
use futures::future::BoxFuture;
use tracing::{debug, info};

/// Highest schema version this build knows how to create.
pub const LATEST_VERSION: i64 = 2;

type Step<P> = for<'a> fn(&'a P) -> BoxFuture<'a, Result<()>>;

pub trait StoreMigrations {
    type Pool;

    fn ensure_version_table(pool: &Self::Pool) -> BoxFuture<'_, Result<()>>;
    /// Highest applied version, 0 for a fresh database.
    fn applied_version(pool: &Self::Pool) -> BoxFuture<'_, Result<i64>>;
    fn mark_applied(pool: &Self::Pool, version: i64) -> BoxFuture<'_, Result<()>>;

    /// Counties, polling stations and their dependent tables.
    fn create_tables(pool: &Self::Pool) -> BoxFuture<'_, Result<()>>;
    /// Non-unique lookup index on polling_stations (county_id, number).
    fn create_lookup_index(pool: &Self::Pool) -> BoxFuture<'_, Result<()>>;
}

fn steps<M: StoreMigrations>() -> [(i64, &'static str, Step<M::Pool>); 2] {
    [
        (1, "create_tables", M::create_tables),
        (2, "create_lookup_index", M::create_lookup_index),
    ]
}

/// Apply every step newer than the recorded version. Refuses to touch a
/// database written by a build with a newer schema.
pub async fn run_migrations<M: StoreMigrations>(pool: &M::Pool) -> Result<()> {
    M::ensure_version_table(pool)
        .await
        .context("failed to create schema_migrations")?;

    let applied = M::applied_version(pool).await?;
    if applied > LATEST_VERSION {
        bail!(
            "store schema is at version {} but this build only supports up to {}",
            applied,
            LATEST_VERSION
        );
    }
    if applied == LATEST_VERSION {
        debug!(version = applied, "store schema up to date");
        return Ok(());
    }

    for (version, name, apply) in steps::<M>() {
        if version <= applied {
            continue;
        }
        info!(version, name, "applying store migration");
        apply(pool)
            .await
            .with_context(|| format!("store migration {} ({}) failed", version, name))?;
        M::mark_applied(pool, version).await?;
    }

    Ok(())
}
