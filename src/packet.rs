//! BLE advertising-data packet layout.
//!
//! Advertising payloads are a sequence of AD structures, each encoded as
//! `[length][type][payload...]` where the length byte counts the type byte
//! plus the payload. This module rebuilds such a payload from an event's
//! structured fields, and parses one into structured fields for backends
//! that read raw controller traffic.

use crate::advertisement::AdvertisementEvent;
use std::collections::BTreeMap;
use thiserror::Error;
use uuid::Uuid;

/// Incomplete list of 16-bit service UUIDs.
pub const AD_TYPE_UUID16_INCOMPLETE: u8 = 0x02;
/// Complete list of 16-bit service UUIDs.
pub const AD_TYPE_UUID16_COMPLETE: u8 = 0x03;
/// Incomplete list of 32-bit service UUIDs.
pub const AD_TYPE_UUID32_INCOMPLETE: u8 = 0x04;
/// Complete list of 32-bit service UUIDs.
pub const AD_TYPE_UUID32_COMPLETE: u8 = 0x05;
/// Incomplete list of 128-bit service UUIDs.
pub const AD_TYPE_UUID128_INCOMPLETE: u8 = 0x06;
/// Complete list of 128-bit service UUIDs.
pub const AD_TYPE_UUID128_COMPLETE: u8 = 0x07;
/// Shortened local name.
pub const AD_TYPE_SHORTENED_NAME: u8 = 0x08;
/// Complete local name.
pub const AD_TYPE_COMPLETE_NAME: u8 = 0x09;
/// Transmit power level.
pub const AD_TYPE_TX_POWER: u8 = 0x0A;
/// Service data with a 16-bit UUID.
pub const AD_TYPE_SERVICE_DATA: u8 = 0x16;
/// Service data with a 32-bit UUID.
pub const AD_TYPE_SERVICE_DATA_UUID32: u8 = 0x20;
/// Service data with a 128-bit UUID.
pub const AD_TYPE_SERVICE_DATA_UUID128: u8 = 0x21;
/// Manufacturer-specific data.
pub const AD_TYPE_MANUFACTURER_DATA: u8 = 0xFF;

/// Base UUID from which 16- and 32-bit Bluetooth UUIDs are expanded.
const BLUETOOTH_BASE_UUID: u128 = 0x00000000_0000_1000_8000_00805f9b34fb;

/// Errors raised while re-encoding an event for the wire.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EncodeError {
    /// A payload cannot fit the one-byte AD length field.
    #[error("{kind} payload of {len} bytes does not fit the AD length field")]
    PayloadTooLarge { kind: &'static str, len: usize },
    /// JSON rendering failed.
    #[error("JSON serialization failed: {0}")]
    Serialize(String),
}

impl From<serde_json::Error> for EncodeError {
    fn from(err: serde_json::Error) -> Self {
        EncodeError::Serialize(err.to_string())
    }
}

/// Rebuild the raw advertising-data blob from an event's structured fields.
///
/// Records are emitted in a fixed order: one incomplete-128-bit-UUID-list
/// record per advertised service id, then one manufacturer-data record per
/// vendor entry in ascending company-id order, then one service-data record
/// per entry in ascending UUID order. UUIDs are written little-endian as
/// they appear over the air, and manufacturer records carry the two-byte
/// little-endian company id before the payload.
pub fn reconstruct_advertising_data(event: &AdvertisementEvent) -> Result<Vec<u8>, EncodeError> {
    let mut packet = Vec::new();

    for id in &event.service_ids {
        packet.push(17);
        packet.push(AD_TYPE_UUID128_INCOMPLETE);
        packet.extend_from_slice(&uuid_to_le_bytes(id));
    }

    for (vendor_id, data) in &event.vendor_data {
        // Type byte, two id bytes, then the payload.
        let record_len = 3 + data.len();
        if record_len > u8::MAX as usize {
            return Err(EncodeError::PayloadTooLarge {
                kind: "manufacturer data",
                len: data.len(),
            });
        }
        packet.push(record_len as u8);
        packet.push(AD_TYPE_MANUFACTURER_DATA);
        packet.extend_from_slice(&vendor_id.to_le_bytes());
        packet.extend_from_slice(data);
    }

    for (uuid, data) in &event.service_data {
        // Type byte, sixteen UUID bytes, then the payload.
        let record_len = 17 + data.len();
        if record_len > u8::MAX as usize {
            return Err(EncodeError::PayloadTooLarge {
                kind: "service data",
                len: data.len(),
            });
        }
        packet.push(record_len as u8);
        packet.push(AD_TYPE_SERVICE_DATA);
        packet.extend_from_slice(&uuid_to_le_bytes(uuid));
        packet.extend_from_slice(data);
    }

    Ok(packet)
}

/// Structured fields recovered from a raw advertising-data payload.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct AdFields {
    pub local_name: Option<String>,
    pub service_ids: Vec<Uuid>,
    pub vendor_data: BTreeMap<u16, Vec<u8>>,
    pub service_data: BTreeMap<Uuid, Vec<u8>>,
    pub tx_power: Option<i16>,
}

/// Walk the AD structures of a raw advertising payload.
///
/// Unknown AD types are skipped. A zero length byte or a record running
/// past the end of the payload terminates the walk; everything parsed up
/// to that point is kept.
pub fn parse_advertising_data(data: &[u8]) -> AdFields {
    let mut fields = AdFields::default();
    let mut offset = 0;

    while offset + 2 <= data.len() {
        let record_len = data[offset] as usize;
        if record_len == 0 || offset + 1 + record_len > data.len() {
            break;
        }
        let ad_type = data[offset + 1];
        let payload = &data[offset + 2..offset + 1 + record_len];

        match ad_type {
            AD_TYPE_UUID16_INCOMPLETE | AD_TYPE_UUID16_COMPLETE => {
                for chunk in payload.chunks_exact(2) {
                    fields
                        .service_ids
                        .push(uuid_from_u16(u16::from_le_bytes([chunk[0], chunk[1]])));
                }
            }
            AD_TYPE_UUID32_INCOMPLETE | AD_TYPE_UUID32_COMPLETE => {
                for chunk in payload.chunks_exact(4) {
                    fields.service_ids.push(uuid_from_u32(u32::from_le_bytes([
                        chunk[0], chunk[1], chunk[2], chunk[3],
                    ])));
                }
            }
            AD_TYPE_UUID128_INCOMPLETE | AD_TYPE_UUID128_COMPLETE => {
                for chunk in payload.chunks_exact(16) {
                    fields.service_ids.push(uuid_from_le_bytes(chunk));
                }
            }
            AD_TYPE_SHORTENED_NAME | AD_TYPE_COMPLETE_NAME => {
                // A complete name wins over a shortened one.
                if ad_type == AD_TYPE_COMPLETE_NAME || fields.local_name.is_none() {
                    fields.local_name = Some(String::from_utf8_lossy(payload).into_owned());
                }
            }
            AD_TYPE_TX_POWER if payload.len() == 1 => {
                fields.tx_power = Some(i16::from(payload[0] as i8));
            }
            AD_TYPE_SERVICE_DATA if payload.len() >= 2 => {
                let uuid = uuid_from_u16(u16::from_le_bytes([payload[0], payload[1]]));
                fields.service_data.insert(uuid, payload[2..].to_vec());
            }
            AD_TYPE_SERVICE_DATA_UUID32 if payload.len() >= 4 => {
                let uuid = uuid_from_u32(u32::from_le_bytes([
                    payload[0], payload[1], payload[2], payload[3],
                ]));
                fields.service_data.insert(uuid, payload[4..].to_vec());
            }
            AD_TYPE_SERVICE_DATA_UUID128 if payload.len() >= 16 => {
                let uuid = uuid_from_le_bytes(&payload[..16]);
                fields.service_data.insert(uuid, payload[16..].to_vec());
            }
            AD_TYPE_MANUFACTURER_DATA if payload.len() >= 2 => {
                let vendor_id = u16::from_le_bytes([payload[0], payload[1]]);
                fields.vendor_data.insert(vendor_id, payload[2..].to_vec());
            }
            _ => {}
        }

        offset += 1 + record_len;
    }

    fields
}

/// Expand a 16-bit Bluetooth UUID to its 128-bit form.
pub fn uuid_from_u16(short: u16) -> Uuid {
    Uuid::from_u128(BLUETOOTH_BASE_UUID | (u128::from(short) << 96))
}

/// Expand a 32-bit Bluetooth UUID to its 128-bit form.
pub fn uuid_from_u32(short: u32) -> Uuid {
    Uuid::from_u128(BLUETOOTH_BASE_UUID | (u128::from(short) << 96))
}

fn uuid_to_le_bytes(uuid: &Uuid) -> [u8; 16] {
    let mut bytes = *uuid.as_bytes();
    bytes.reverse();
    bytes
}

fn uuid_from_le_bytes(le: &[u8]) -> Uuid {
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(le);
    bytes.reverse();
    Uuid::from_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{TEST_MAC, base_event};

    fn battery_service() -> Uuid {
        "0000180f-0000-1000-8000-00805f9b34fb".parse().unwrap()
    }

    #[test]
    fn test_empty_event_produces_empty_blob() {
        let event = base_event(TEST_MAC, 0);
        assert!(reconstruct_advertising_data(&event).unwrap().is_empty());
    }

    #[test]
    fn test_record_lengths_and_order() {
        let mut event = base_event(TEST_MAC, 0);
        event.service_ids = vec![battery_service()];
        event.vendor_data = BTreeMap::from([(0x0499, vec![0x05, 0x01, 0x02, 0x03])]);
        event.service_data = BTreeMap::from([(battery_service(), vec![0x64, 0x00])]);

        let blob = reconstruct_advertising_data(&event).unwrap();

        // Service id record: length 17, then vendor record of 4 payload
        // bytes: length 7, then service data of 2 payload bytes: length 19.
        assert_eq!(blob[0], 17);
        assert_eq!(blob[1], AD_TYPE_UUID128_INCOMPLETE);
        assert_eq!(blob[18], 7);
        assert_eq!(blob[19], AD_TYPE_MANUFACTURER_DATA);
        assert_eq!(blob[26], 19);
        assert_eq!(blob[27], AD_TYPE_SERVICE_DATA);
        assert_eq!(blob.len(), 18 + 8 + 20);
    }

    #[test]
    fn test_service_id_uuid_is_little_endian() {
        let mut event = base_event(TEST_MAC, 0);
        event.service_ids = vec![battery_service()];

        let blob = reconstruct_advertising_data(&event).unwrap();
        assert_eq!(
            &blob[2..18],
            &[
                0xfb, 0x34, 0x9b, 0x5f, 0x80, 0x00, 0x00, 0x80, 0x00, 0x10, 0x00, 0x00, 0x0f,
                0x18, 0x00, 0x00
            ]
        );
    }

    #[test]
    fn test_vendor_record_layout() {
        let mut event = base_event(TEST_MAC, 0);
        event.vendor_data = BTreeMap::from([(0x0499, vec![0xAB, 0xCD])]);

        let blob = reconstruct_advertising_data(&event).unwrap();
        assert_eq!(blob, vec![5, 0xFF, 0x99, 0x04, 0xAB, 0xCD]);
    }

    #[test]
    fn test_vendor_records_in_ascending_id_order() {
        let mut event = base_event(TEST_MAC, 0);
        event.vendor_data = BTreeMap::from([(0x0499, vec![0x01]), (0x004C, vec![0x02])]);

        let blob = reconstruct_advertising_data(&event).unwrap();
        // Apple (0x004C) precedes Ruuvi (0x0499).
        assert_eq!(&blob[..4], &[4, 0xFF, 0x4C, 0x00]);
        assert_eq!(&blob[5..9], &[4, 0xFF, 0x99, 0x04]);
    }

    #[test]
    fn test_oversized_vendor_payload_rejected() {
        let mut event = base_event(TEST_MAC, 0);
        event.vendor_data = BTreeMap::from([(0x0499, vec![0u8; 253])]);

        assert_eq!(
            reconstruct_advertising_data(&event),
            Err(EncodeError::PayloadTooLarge {
                kind: "manufacturer data",
                len: 253
            })
        );

        // 252 payload bytes is the maximum that still frames.
        event.vendor_data = BTreeMap::from([(0x0499, vec![0u8; 252])]);
        let blob = reconstruct_advertising_data(&event).unwrap();
        assert_eq!(blob[0], 255);
    }

    #[test]
    fn test_oversized_service_data_rejected() {
        let mut event = base_event(TEST_MAC, 0);
        event.service_data = BTreeMap::from([(battery_service(), vec![0u8; 239])]);

        assert!(matches!(
            reconstruct_advertising_data(&event),
            Err(EncodeError::PayloadTooLarge {
                kind: "service data",
                ..
            })
        ));
    }

    #[test]
    fn test_uuid_expansion() {
        assert_eq!(
            uuid_from_u16(0x180F).to_string(),
            "0000180f-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            uuid_from_u32(0x1234_5678).to_string(),
            "12345678-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_parse_mixed_payload() {
        // Flags, complete name, 16-bit uuid list, tx power, service data,
        // manufacturer data.
        let mut raw = vec![2, 0x01, 0x06];
        raw.extend_from_slice(&[6, 0x09]);
        raw.extend_from_slice(b"Ruuvi");
        raw.extend_from_slice(&[3, 0x03, 0x0F, 0x18]);
        raw.extend_from_slice(&[2, 0x0A, 0xF4]);
        raw.extend_from_slice(&[5, 0x16, 0x0F, 0x18, 0x64, 0x00]);
        raw.extend_from_slice(&[5, 0xFF, 0x99, 0x04, 0x05, 0x01]);

        let fields = parse_advertising_data(&raw);
        assert_eq!(fields.local_name.as_deref(), Some("Ruuvi"));
        assert_eq!(fields.service_ids, vec![uuid_from_u16(0x180F)]);
        assert_eq!(fields.tx_power, Some(-12));
        assert_eq!(
            fields.service_data.get(&uuid_from_u16(0x180F)),
            Some(&vec![0x64, 0x00])
        );
        assert_eq!(fields.vendor_data.get(&0x0499), Some(&vec![0x05, 0x01]));
    }

    #[test]
    fn test_parse_complete_name_wins() {
        let mut raw = vec![4, 0x09];
        raw.extend_from_slice(b"Tag");
        raw.extend_from_slice(&[3, 0x08]);
        raw.extend_from_slice(b"Ta");

        let fields = parse_advertising_data(&raw);
        assert_eq!(fields.local_name.as_deref(), Some("Tag"));
    }

    #[test]
    fn test_parse_stops_at_zero_length() {
        let raw = [0, 0x00, 5, 0xFF, 0x99, 0x04, 0x01];
        assert!(parse_advertising_data(&raw).vendor_data.is_empty());
    }

    #[test]
    fn test_parse_stops_at_truncated_record() {
        // Claims 10 payload bytes but only 2 follow.
        let raw = [11, 0xFF, 0x99, 0x04];
        assert!(parse_advertising_data(&raw).vendor_data.is_empty());
    }

    #[test]
    fn test_parse_recovers_reconstructed_fields() {
        let mut event = base_event(TEST_MAC, 0);
        event.service_ids = vec![battery_service()];
        event.vendor_data = BTreeMap::from([(0x0499, vec![0x05, 0x01])]);

        let blob = reconstruct_advertising_data(&event).unwrap();
        let fields = parse_advertising_data(&blob);

        assert_eq!(fields.service_ids, event.service_ids);
        assert_eq!(fields.vendor_data, event.vendor_data);
    }
}
