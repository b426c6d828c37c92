//! Error types for polling-station operations.

use crate::store::ClearAllCancelled;

/// Errors that can occur during polling-station lookups and administration.
#[derive(Debug, thiserror::Error)]
pub enum LocationError {
    #[error("Could not find County with code: {0}")]
    CountyNotFound(String),

    #[error("No polling station found for county {county_id}, number {number}")]
    PollingStationNotFound { county_id: i32, number: i32 },

    /// The schema allows duplicate station numbers within a county; the lookup
    /// refuses to pick one.
    #[error("More than one polling station found for county {county_id}, number {number}: {ids:?}")]
    AmbiguousPollingStation {
        county_id: i32,
        number: i32,
        ids: Vec<i32>,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Store error: {0:#}")]
    Store(anyhow::Error),
}

impl LocationError {
    /// Classify a store error, recognizing a cancelled clear-all.
    pub fn from_store(err: anyhow::Error) -> Self {
        if err.downcast_ref::<ClearAllCancelled>().is_some() {
            Self::Cancelled
        } else {
            Self::Store(err)
        }
    }

    /// Short machine-readable label, used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CountyNotFound(_) => "county_not_found",
            Self::PollingStationNotFound { .. } => "polling_station_not_found",
            Self::AmbiguousPollingStation { .. } => "ambiguous_polling_station",
            Self::Cancelled => "cancelled",
            Self::Store(_) => "store",
        }
    }
}
