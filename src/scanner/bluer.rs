//! BlueZ D-Bus backend for advertisement capture.
//!
//! This backend uses the `bluer` crate to communicate with the BlueZ daemon
//! via D-Bus. It requires the `bluetoothd` daemon to be running.

use super::{EVENT_CHANNEL_BUFFER_SIZE, ScanConfig, ScanError};
use crate::advertisement::{AdvertisementEvent, unix_timestamp_ms};
use bluer::{Adapter, AdapterEvent, Address, DiscoveryFilter, DiscoveryTransport, Session};
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

impl From<bluer::Error> for ScanError {
    fn from(err: bluer::Error) -> Self {
        ScanError::Bluetooth(err.to_string())
    }
}

/// Build the BlueZ discovery filter for a scan.
///
/// Duplicate data is requested so that repeated advertisements from the same
/// device keep producing events instead of being coalesced by the daemon.
fn discovery_filter(service_uuids: &[Uuid]) -> DiscoveryFilter {
    DiscoveryFilter {
        uuids: service_uuids.iter().copied().collect(),
        transport: DiscoveryTransport::Le,
        duplicate_data: true,
        ..Default::default()
    }
}

/// Start scanning for advertisements using the BlueZ D-Bus backend.
///
/// This function initializes the Bluetooth adapter and starts an LE discovery
/// session. Captured advertisements are sent through the returned channel.
/// Runs indefinitely until interrupted.
///
/// # Arguments
/// * `config` - Adapter selection and the coarse service-UUID filter
///
/// # Returns
/// A receiver for captured advertisement events.
pub async fn start_scan(
    config: ScanConfig,
) -> Result<mpsc::Receiver<AdvertisementEvent>, ScanError> {
    let session = Session::new().await?;
    let adapter = match &config.adapter {
        Some(name) => session.adapter(name)?,
        None => session.default_adapter().await?,
    };
    adapter.set_powered(true).await?;
    adapter
        .set_discovery_filter(discovery_filter(&config.service_uuids))
        .await?;

    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_BUFFER_SIZE);

    let events = adapter.discover_devices_with_changes().await?;

    // Spawn a task that owns all Bluetooth state and runs the event loop
    tokio::spawn(async move {
        // Keep the D-Bus connection alive by moving it into this task
        let _session = session;
        futures::pin_mut!(events);

        while let Some(event) = events.next().await {
            if let AdapterEvent::DeviceAdded(address) = event
                && let Err(e) = forward_device(&adapter, address, &tx).await
            {
                debug!("Failed to read advertisement from {address}: {e}");
            }
        }
    });

    Ok(rx)
}

/// Read the advertisement properties of a discovered device and forward them
/// as an event.
///
/// BlueZ keeps devices cached after their advertisements stop. A missing RSSI
/// marks such a stale entry, so those devices are skipped rather than reported
/// with made-up signal data.
async fn forward_device(
    adapter: &Adapter,
    address: Address,
    tx: &mpsc::Sender<AdvertisementEvent>,
) -> Result<(), ScanError> {
    let device = adapter.device(address)?;

    let Some(signal_strength) = device.rssi().await? else {
        return Ok(()); // Cached device, no live advertisement
    };

    let source_name = device.name().await?;
    let vendor_data = device
        .manufacturer_data()
        .await?
        .unwrap_or_default()
        .into_iter()
        .collect();
    let service_data = device
        .service_data()
        .await?
        .unwrap_or_default()
        .into_iter()
        .collect();
    // BlueZ hands the UUID list back as a set; sort for stable output.
    let mut service_ids: Vec<Uuid> = device
        .uuids()
        .await?
        .unwrap_or_default()
        .into_iter()
        .collect();
    service_ids.sort_unstable();
    let tx_power = device.tx_power().await?;

    let event = AdvertisementEvent {
        timestamp_ms: unix_timestamp_ms(),
        source_address: address.into(),
        source_name,
        signal_strength,
        vendor_data,
        service_data,
        service_ids,
        tx_power,
    };
    let _ = tx.send(event).await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mac_address::MacAddress;

    #[test]
    fn test_address_to_mac_address() {
        let addr = Address([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
        let mac: MacAddress = addr.into();
        assert_eq!(mac, MacAddress([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]));
    }

    #[test]
    fn test_discovery_filter_unfiltered() {
        let filter = discovery_filter(&[]);
        assert!(filter.uuids.is_empty());
        assert!(filter.duplicate_data);
        assert_eq!(filter.transport, DiscoveryTransport::Le);
    }

    #[test]
    fn test_discovery_filter_with_uuids() {
        let uuid: Uuid = "0000180f-0000-1000-8000-00805f9b34fb".parse().unwrap();
        let filter = discovery_filter(&[uuid]);
        assert_eq!(filter.uuids.len(), 1);
        assert!(filter.uuids.contains(&uuid));
    }
}
