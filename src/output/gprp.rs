//! GPRP envelope formatter.
//!
//! Renders an event as a `$GPRP` CSV line carrying the reconstructed
//! advertising-data blob, wrapped in a compact JSON envelope:
//!
//! ```text
//! {"data":["$GPRP,<gateway>,<device>,<rssi>,<hex blob>,<secs.millis>"],"mqtt_topic":"..."}
//! ```
//!
//! Gateway and device addresses appear as twelve upper-case hex digits
//! without separators, and the blob as upper-case hex. The trailing
//! timestamp is seconds since the Unix epoch with exactly three fractional
//! digits.

use crate::advertisement::AdvertisementEvent;
use crate::mac_address::MacAddress;
use crate::output::EventFormatter;
use crate::packet::{EncodeError, reconstruct_advertising_data};
use serde::Serialize;

#[derive(Serialize)]
struct Envelope<'a> {
    data: [String; 1],
    mqtt_topic: &'a str,
}

/// Formatter producing one GPRP envelope per event.
pub struct GprpFormatter {
    gateway_id: String,
    topic: String,
}

impl GprpFormatter {
    /// Create a formatter identifying this gateway.
    ///
    /// # Arguments
    /// * `gateway_mac` - Address reported as the envelope's gateway id
    /// * `topic` - Topic name embedded in the envelope
    pub fn new(gateway_mac: MacAddress, topic: String) -> Self {
        Self {
            gateway_id: gateway_mac.plain_hex(),
            topic,
        }
    }

    fn gprp_line(&self, event: &AdvertisementEvent) -> Result<String, EncodeError> {
        let blob = reconstruct_advertising_data(event)?;
        Ok(format!(
            "$GPRP,{},{},{},{},{}.{:03}",
            self.gateway_id,
            event.source_address.plain_hex(),
            event.signal_strength,
            hex::encode_upper(&blob),
            event.timestamp_ms / 1000,
            event.timestamp_ms % 1000
        ))
    }
}

impl EventFormatter for GprpFormatter {
    fn format(&self, event: &AdvertisementEvent) -> Result<String, EncodeError> {
        let envelope = Envelope {
            data: [self.gprp_line(event)?],
            mqtt_topic: &self.topic,
        };
        Ok(serde_json::to_string(&envelope)?)
    }
}
