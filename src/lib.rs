pub mod cache;
pub mod config;
mod error;
pub mod handlers;
mod service;
pub mod store;
pub mod telemetry;

pub use error::LocationError;
pub use handlers::{LocationHandlers, FAILURE_SENTINEL};
pub use service::PollingStationService;
