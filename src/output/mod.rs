//! Wire formats for advertisement events.
//!
//! This module provides a trait for rendering events into publishable
//! payloads and the two concrete formats the gateway emits: the GPRP
//! envelope used for regular flushes and the full JSON record used when
//! draining the buffer at shutdown.

pub mod gprp;
pub mod json;

use crate::advertisement::AdvertisementEvent;
use crate::packet::EncodeError;

/// Trait for rendering advertisement events into publishable strings.
///
/// Implementations must be deterministic: the same event always renders to
/// the same bytes, with map entries in ascending key order.
pub trait EventFormatter: Send + Sync {
    /// Render one event.
    ///
    /// # Arguments
    /// * `event` - The advertisement event to render
    ///
    /// # Returns
    /// The payload to publish, or an [`EncodeError`] when the event cannot
    /// be represented in this format. A failed event is dropped by the
    /// caller; it never aborts the batch it arrived in.
    fn format(&self, event: &AdvertisementEvent) -> Result<String, EncodeError>;
}
