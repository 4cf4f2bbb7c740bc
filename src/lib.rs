//! `ble-gateway` library.
//!
//! The binary (`src/main.rs`) is responsible for CLI parsing, config loading
//! and process exit codes. The core "business logic" lives in
//! [`crate::gateway`] where it can be tested deterministically with an
//! injected scanner and an injected publish sink.

pub mod advertisement;
pub mod buffer;
pub mod config;
pub mod filter;
pub mod gateway;
pub mod mac_address;
pub mod mqtt;
pub mod output;
pub mod packet;
pub mod scanner;

#[cfg(test)]
pub mod test_utils;

// Re-export commonly used types at the crate root
pub use advertisement::AdvertisementEvent;
pub use buffer::{BufferPolicy, EventBuffer};
pub use config::{GatewayConfig, MqttConfig};
pub use filter::{AcceptanceFilter, FilterCriteria};
pub use mac_address::MacAddress;
pub use mqtt::{MqttPublisher, PublishSink};
pub use output::EventFormatter;
pub use output::gprp::GprpFormatter;
pub use output::json::JsonFormatter;
pub use scanner::{Backend, ScanConfig, ScanError};
