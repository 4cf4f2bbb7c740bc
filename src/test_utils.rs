use crate::advertisement::AdvertisementEvent;
use crate::mac_address::MacAddress;
use std::collections::BTreeMap;

/// A stable MAC address for unit tests.
pub const TEST_MAC: MacAddress = MacAddress([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);

/// Build an `AdvertisementEvent` with empty payloads and no optional fields.
///
/// Tests can override just the fields they care about.
pub fn base_event(source_address: MacAddress, timestamp_ms: u64) -> AdvertisementEvent {
    AdvertisementEvent {
        timestamp_ms,
        source_address,
        source_name: None,
        signal_strength: -67,
        vendor_data: BTreeMap::new(),
        service_data: BTreeMap::new(),
        service_ids: Vec::new(),
        tx_power: None,
    }
}
