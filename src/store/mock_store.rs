//! Mock store implementation for testing.
//!
//! Provides an in-memory `PollingStore` that counts lookups and can be told to
//! fail, so the service and dispatch layers can be tested without a database.

use super::{
    ClearAllCancelled, County, CountyPollingStationLimit, NewCounty, PollingStation, PollingStore,
    StoreStats,
};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Default)]
struct MockState {
    counties: Vec<(i32, NewCounty)>,
    stations: Vec<PollingStation>,
    /// polling_station_id for each dependent row
    answers: Vec<i32>,
    notes: Vec<i32>,
    infos: Vec<i32>,
    next_id: i32,
}

impl MockState {
    fn next_id(&mut self) -> i32 {
        self.next_id += 1;
        self.next_id
    }

    fn require_station(&self, polling_station_id: i32) -> Result<()> {
        if self.stations.iter().any(|s| s.id == polling_station_id) {
            Ok(())
        } else {
            Err(anyhow!("Polling station {} not found", polling_station_id))
        }
    }
}

/// In-memory store that can be configured to fail for testing error handling.
#[derive(Debug, Default)]
pub struct MockStore {
    state: Mutex<MockState>,
    fail_reads: AtomicBool,
    fail_clear: AtomicBool,
    station_lookups: AtomicUsize,
    county_lookups: AtomicUsize,
    limit_listings: AtomicUsize,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every read fail with a simulated infrastructure error.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make `clear_all` fail after it has started, leaving state untouched.
    pub fn set_fail_clear(&self, fail: bool) {
        self.fail_clear.store(fail, Ordering::SeqCst);
    }

    /// Number of `find_polling_station_ids` calls served.
    pub fn station_lookups(&self) -> usize {
        self.station_lookups.load(Ordering::SeqCst)
    }

    /// Number of `find_county_id_by_code` calls served.
    pub fn county_lookups(&self) -> usize {
        self.county_lookups.load(Ordering::SeqCst)
    }

    /// Number of `list_county_limits` calls served.
    pub fn limit_listings(&self) -> usize {
        self.limit_listings.load(Ordering::SeqCst)
    }

    fn check_reads(&self) -> Result<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            bail!("simulated read failure");
        }
        Ok(())
    }
}

#[async_trait]
impl PollingStore for MockStore {
    async fn run_migrations(&self) -> Result<()> {
        Ok(())
    }

    async fn find_county_id_by_code(&self, code: &str) -> Result<Option<i32>> {
        self.county_lookups.fetch_add(1, Ordering::SeqCst);
        self.check_reads()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .counties
            .iter()
            .find(|(_, county)| county.code == code)
            .map(|(id, _)| *id))
    }

    async fn get_county(&self, id: i32) -> Result<Option<County>> {
        self.check_reads()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .counties
            .iter()
            .find(|(county_id, _)| *county_id == id)
            .map(|(id, county)| County {
                id: *id,
                code: county.code.clone(),
                name: county.name.clone(),
                display_order: county.display_order,
                diaspora: county.diaspora,
                number_of_polling_stations: county.number_of_polling_stations,
            }))
    }

    async fn get_polling_station(&self, id: i32) -> Result<Option<PollingStation>> {
        self.check_reads()?;
        let state = self.state.lock().unwrap();
        Ok(state.stations.iter().find(|s| s.id == id).cloned())
    }

    async fn find_polling_station_ids(&self, county_id: i32, number: i32) -> Result<Vec<i32>> {
        self.station_lookups.fetch_add(1, Ordering::SeqCst);
        self.check_reads()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .stations
            .iter()
            .filter(|s| s.county_id == county_id && s.number == number)
            .map(|s| s.id)
            .collect())
    }

    async fn list_county_limits(
        &self,
        diaspora: Option<bool>,
    ) -> Result<Vec<CountyPollingStationLimit>> {
        self.limit_listings.fetch_add(1, Ordering::SeqCst);
        self.check_reads()?;
        let state = self.state.lock().unwrap();
        let mut limits: Vec<CountyPollingStationLimit> = state
            .counties
            .iter()
            .filter(|(_, county)| diaspora.map_or(true, |flag| county.diaspora == flag))
            .map(|(id, county)| CountyPollingStationLimit {
                name: county.name.clone(),
                code: county.code.clone(),
                limit: county.number_of_polling_stations,
                id: *id,
                diaspora: county.diaspora,
                order: county.display_order,
            })
            .collect();
        limits.sort_by_key(|l| (l.order, l.id));
        Ok(limits)
    }

    async fn clear_all(&self, cancel: &CancellationToken) -> Result<u64> {
        if cancel.is_cancelled() {
            return Err(ClearAllCancelled.into());
        }
        if self.fail_clear.load(Ordering::SeqCst) {
            bail!("simulated clear-all failure");
        }

        let mut state = self.state.lock().unwrap();
        let deleted = state.stations.len() as u64;
        state.answers.clear();
        state.notes.clear();
        state.infos.clear();
        for (_, county) in state.counties.iter_mut() {
            county.number_of_polling_stations = 0;
        }
        state.stations.clear();
        Ok(deleted)
    }

    async fn add_county(&self, county: &NewCounty) -> Result<i32> {
        let mut state = self.state.lock().unwrap();
        if state.counties.iter().any(|(_, c)| c.code == county.code) {
            bail!("County code '{}' already exists", county.code);
        }
        let id = state.next_id();
        state.counties.push((id, county.clone()));
        Ok(id)
    }

    async fn set_county_limit(&self, county_id: i32, limit: i32) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let (_, county) = state
            .counties
            .iter_mut()
            .find(|(id, _)| *id == county_id)
            .ok_or_else(|| anyhow!("County {} not found", county_id))?;
        county.number_of_polling_stations = limit;
        Ok(())
    }

    async fn add_polling_station(
        &self,
        county_id: i32,
        number: i32,
        address: Option<&str>,
    ) -> Result<i32> {
        let mut state = self.state.lock().unwrap();
        if !state.counties.iter().any(|(id, _)| *id == county_id) {
            bail!("County {} not found", county_id);
        }
        let id = state.next_id();
        state.stations.push(PollingStation {
            id,
            county_id,
            number,
            address: address.map(str::to_string),
        });
        Ok(id)
    }

    async fn add_answer(
        &self,
        polling_station_id: i32,
        _observer_id: i32,
        _option_id: i32,
        _value: Option<&str>,
    ) -> Result<i32> {
        let mut state = self.state.lock().unwrap();
        state.require_station(polling_station_id)?;
        state.answers.push(polling_station_id);
        Ok(state.next_id())
    }

    async fn add_note(
        &self,
        polling_station_id: i32,
        _observer_id: i32,
        _text: &str,
    ) -> Result<i32> {
        let mut state = self.state.lock().unwrap();
        state.require_station(polling_station_id)?;
        state.notes.push(polling_station_id);
        Ok(state.next_id())
    }

    async fn add_polling_station_info(
        &self,
        polling_station_id: i32,
        _observer_id: i32,
    ) -> Result<i32> {
        let mut state = self.state.lock().unwrap();
        state.require_station(polling_station_id)?;
        state.infos.push(polling_station_id);
        Ok(state.next_id())
    }

    async fn stats(&self) -> Result<StoreStats> {
        self.check_reads()?;
        let state = self.state.lock().unwrap();
        Ok(StoreStats {
            counties: state.counties.len() as i64,
            polling_stations: state.stations.len() as i64,
            answers: state.answers.len() as i64,
            notes: state.notes.len() as i64,
            polling_station_infos: state.infos.len() as i64,
        })
    }
}
