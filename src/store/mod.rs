pub mod backend;
mod migrations;
#[cfg(test)]
mod mock_store;
mod postgres_manager;
mod sqlite_manager;

mod manager;

pub use manager::{
    ClearAllCancelled, County, CountyPollingStationLimit, NewCounty, PollingStation,
    PollingStore, StoreStats,
};
#[cfg(test)]
pub(crate) use mock_store::MockStore;
pub use postgres_manager::PostgresStore;
pub use sqlite_manager::SqliteStore;
