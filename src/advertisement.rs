//! Observed BLE advertisement events.

use crate::mac_address::MacAddress;
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// A single advertisement observed by a scanner backend.
///
/// Payload maps are ordered by key so every downstream rendering of the
/// event is deterministic regardless of which backend produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct AdvertisementEvent {
    /// Capture time in milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    /// Address of the advertising device.
    pub source_address: MacAddress,
    /// Local name from the advertisement, if any.
    pub source_name: Option<String>,
    /// Received signal strength in dBm.
    pub signal_strength: i16,
    /// Manufacturer-specific data keyed by company identifier.
    pub vendor_data: BTreeMap<u16, Vec<u8>>,
    /// Service data keyed by service UUID.
    pub service_data: BTreeMap<Uuid, Vec<u8>>,
    /// Advertised service UUIDs.
    pub service_ids: Vec<Uuid>,
    /// Advertised transmit power in dBm, if present.
    pub tx_power: Option<i16>,
}

/// Current wall-clock time in milliseconds since the Unix epoch.
///
/// Scanner backends stamp events with this at capture time, before any
/// buffering delays the record.
pub fn unix_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}
