//! What we have learned about remote stations.
//!
//! A [`CapabilityCache`] remembers, per station, whether it accepted or
//! refused extended (modulo 128) sequencing. Sessions consult it before
//! sending SABME and record the outcome of each handshake, so a station
//! that answered SABME with DM is not asked again.
//!
//! The cache lives in memory only. Share one across links with
//! [`LinkBuilder::capabilities`](crate::LinkBuilder::capabilities).

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use tracing::debug;

use crate::address::Address;

/// Known capabilities of one station. `None` means untested.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub extended: Option<bool>,
}

#[derive(Debug, Default)]
pub struct CapabilityCache {
    stations: RwLock<HashMap<Address, Capabilities>>,
}

impl CapabilityCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capabilities recorded for `station`.
    pub fn get(&self, station: &Address) -> Capabilities {
        let stations = self.stations.read().unwrap_or_else(PoisonError::into_inner);
        stations.get(&station.plain()).copied().unwrap_or_default()
    }

    /// Record whether `station` accepted SABME.
    pub fn record_extended(&self, station: &Address, supported: bool) {
        let mut stations = self.stations.write().unwrap_or_else(PoisonError::into_inner);
        let entry = stations.entry(station.plain()).or_default();
        if entry.extended != Some(supported) {
            debug!(%station, supported, "extended sequencing capability recorded");
            entry.extended = Some(supported);
        }
    }

    /// Drop everything known about `station`.
    pub fn forget(&self, station: &Address) {
        let mut stations = self.stations.write().unwrap_or_else(PoisonError::into_inner);
        stations.remove(&station.plain());
    }

    pub fn len(&self) -> usize {
        self.stations.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn untested_station_has_no_record() {
        let cache = CapabilityCache::new();
        let station = Address::new("KO4LCM", 2).unwrap();
        assert_eq!(cache.get(&station), Capabilities::default());
        assert!(cache.is_empty());
    }

    #[test]
    fn records_ignore_per_frame_flags() {
        let cache = CapabilityCache::new();
        let station = Address::new("KO4LCM", 2).unwrap();
        cache.record_extended(&station.clone().with_command_or_repeated(true), false);
        assert_eq!(cache.get(&station).extended, Some(false));

        cache.record_extended(&station, true);
        assert_eq!(cache.get(&station).extended, Some(true));
        assert_eq!(cache.len(), 1);

        cache.forget(&station);
        assert!(cache.is_empty());
    }

    #[test]
    fn ssid_distinguishes_stations() {
        let cache = CapabilityCache::new();
        cache.record_extended(&Address::new("KO4LCM", 2).unwrap(), true);
        assert_eq!(cache.get(&Address::new("KO4LCM", 3).unwrap()).extended, None);
    }
}
