//! Full JSON record formatter.
//!
//! Serializes every field of an event, losing nothing. Byte payloads are
//! rendered as lower-case hex strings, manufacturer ids as decimal string
//! keys, and UUIDs in hyphenated lower-case form. Used when the buffer is
//! drained at shutdown.

use crate::advertisement::AdvertisementEvent;
use crate::output::EventFormatter;
use crate::packet::EncodeError;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use uuid::Uuid;

struct VendorDataHex<'a>(&'a BTreeMap<u16, Vec<u8>>);

impl Serialize for VendorDataHex<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (vendor_id, data) in self.0 {
            map.serialize_entry(&vendor_id.to_string(), &hex::encode(data))?;
        }
        map.end()
    }
}

struct ServiceDataHex<'a>(&'a BTreeMap<Uuid, Vec<u8>>);

impl Serialize for ServiceDataHex<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (uuid, data) in self.0 {
            map.serialize_entry(uuid, &hex::encode(data))?;
        }
        map.end()
    }
}

#[derive(Serialize)]
struct Record<'a> {
    timestamp_ms: u64,
    source_address: String,
    source_name: Option<&'a str>,
    signal_strength: i16,
    vendor_data: VendorDataHex<'a>,
    service_data: ServiceDataHex<'a>,
    service_ids: &'a [Uuid],
    tx_power: Option<i16>,
}

/// Formatter producing one self-describing JSON record per event.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonFormatter;

impl EventFormatter for JsonFormatter {
    fn format(&self, event: &AdvertisementEvent) -> Result<String, EncodeError> {
        let record = Record {
            timestamp_ms: event.timestamp_ms,
            source_address: event.source_address.to_string(),
            source_name: event.source_name.as_deref(),
            signal_strength: event.signal_strength,
            vendor_data: VendorDataHex(&event.vendor_data),
            service_data: ServiceDataHex(&event.service_data),
            service_ids: &event.service_ids,
            tx_power: event.tx_power,
        };
        Ok(serde_json::to_string(&record)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{TEST_MAC, base_event};

    #[test]
    fn test_minimal_event_record() {
        let event = base_event(TEST_MAC, 1_700_000_000_000);
        assert_eq!(
            JsonFormatter.format(&event).unwrap(),
            "{\"timestamp_ms\":1700000000000,\
             \"source_address\":\"AA:BB:CC:DD:EE:FF\",\
             \"source_name\":null,\
             \"signal_strength\":-67,\
             \"vendor_data\":{},\
             \"service_data\":{},\
             \"service_ids\":[],\
             \"tx_power\":null}"
        );
    }

    #[test]
    fn test_payloads_rendered_as_hex_strings() {
        let battery: Uuid = "0000180f-0000-1000-8000-00805f9b34fb".parse().unwrap();

        let mut event = base_event(TEST_MAC, 1);
        event.source_name = Some("Ruuvi 1234".to_string());
        event.vendor_data = BTreeMap::from([(0x0499, vec![0x05, 0x0F, 0xAB])]);
        event.service_data = BTreeMap::from([(battery, vec![0x64])]);
        event.service_ids = vec![battery];
        event.tx_power = Some(4);

        let payload = JsonFormatter.format(&event).unwrap();
        assert!(payload.contains("\"source_name\":\"Ruuvi 1234\""));
        assert!(payload.contains("\"vendor_data\":{\"1177\":\"050fab\"}"));
        assert!(payload.contains(
            "\"service_data\":{\"0000180f-0000-1000-8000-00805f9b34fb\":\"64\"}"
        ));
        assert!(payload.contains("\"service_ids\":[\"0000180f-0000-1000-8000-00805f9b34fb\"]"));
        assert!(payload.contains("\"tx_power\":4"));
    }

    #[test]
    fn test_vendor_keys_in_ascending_numeric_order() {
        let mut event = base_event(TEST_MAC, 1);
        event.vendor_data = BTreeMap::from([(0x0499, vec![0x01]), (0x004C, vec![0x02])]);

        let payload = JsonFormatter.format(&event).unwrap();
        assert!(payload.contains("\"vendor_data\":{\"76\":\"02\",\"1177\":\"01\"}"));
    }

    #[test]
    fn test_identical_events_render_identically() {
        let mut event = base_event(TEST_MAC, 42);
        event.vendor_data = BTreeMap::from([(0x0499, vec![0xFF])]);

        let first = JsonFormatter.format(&event).unwrap();
        let second = JsonFormatter.format(&event.clone()).unwrap();
        assert_eq!(first, second);
    }
}
