//! BLE scan sources.
//!
//! This module provides a dispatch over the compiled-in scanning backends.
//! Each backend watches for advertisements and delivers fully assembled
//! [`AdvertisementEvent`]s over a bounded channel, stamping the capture
//! time before any buffering can delay the record.

#[cfg(feature = "bluer")]
pub mod bluer;

#[cfg(feature = "hci")]
pub mod hci;

use crate::advertisement::AdvertisementEvent;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Error type for scanner operations.
#[derive(Error, Debug)]
pub enum ScanError {
    /// Bluetooth/adapter related error
    #[error("Bluetooth error: {0}")]
    Bluetooth(String),
    /// Backend not available (not compiled in)
    #[allow(dead_code)]
    #[error("Backend '{0}' not available (not compiled in)")]
    BackendNotAvailable(String),
}

/// Channel buffer size for advertisement events.
pub const EVENT_CHANNEL_BUFFER_SIZE: usize = 100;

/// Parameters handed to a backend when scanning starts.
#[derive(Debug, Clone, Default)]
pub struct ScanConfig {
    /// Adapter to scan on (e.g. "hci0"); `None` selects the default.
    pub adapter: Option<String>,
    /// Coarse service-UUID filter applied at the Bluetooth layer.
    ///
    /// When non-empty, only advertisements carrying one of these UUIDs
    /// reach the acceptance filter at all. Empty means no coarse filter.
    pub service_uuids: Vec<Uuid>,
}

/// Available scanner backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Backend {
    /// BlueZ D-Bus backend (requires bluetoothd daemon)
    #[cfg(feature = "bluer")]
    Bluer,
    /// Raw HCI socket backend (direct kernel access, no daemon required)
    #[cfg(feature = "hci")]
    Hci,
}

impl Default for Backend {
    fn default() -> Self {
        #[cfg(feature = "bluer")]
        return Backend::Bluer;
        #[cfg(all(feature = "hci", not(feature = "bluer")))]
        return Backend::Hci;
        #[cfg(not(any(feature = "bluer", feature = "hci")))]
        compile_error!("At least one backend feature must be enabled");
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            #[cfg(feature = "bluer")]
            Backend::Bluer => write!(f, "bluer"),
            #[cfg(feature = "hci")]
            Backend::Hci => write!(f, "hci"),
            #[cfg(not(any(feature = "bluer", feature = "hci")))]
            _ => unreachable!("Backend enum has no variants when no backend features are enabled"),
        }
    }
}

impl std::str::FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            #[cfg(feature = "bluer")]
            "bluer" | "bluez" => Ok(Backend::Bluer),
            #[cfg(feature = "hci")]
            "hci" | "raw" => Ok(Backend::Hci),
            _ => Err(format!("Unknown backend: {}", s)),
        }
    }
}

/// Start scanning for advertisements using the specified backend.
///
/// This is the main entry point for creating a scan source. It dispatches
/// to the appropriate backend implementation based on the `backend`
/// parameter.
///
/// # Arguments
/// * `backend` - The scanner backend to use
/// * `config` - Adapter selection and the coarse service-UUID filter
///
/// # Returns
/// A receiver for captured advertisement events.
pub async fn start_scan(
    backend: Backend,
    config: ScanConfig,
) -> Result<mpsc::Receiver<AdvertisementEvent>, ScanError> {
    match backend {
        #[cfg(feature = "bluer")]
        Backend::Bluer => bluer::start_scan(config).await,
        #[cfg(feature = "hci")]
        Backend::Hci => hci::start_scan(config).await,
    }
}
