//! Gateway configuration.
//!
//! Configuration is read from a single JSON document covering:
//! - Gateway identity and buffering policy
//! - Whitelists for the acceptance filter
//! - Bluetooth adapter selection
//! - MQTT broker, authentication and delivery settings
//!
//! Parsing and validation are separate steps so command-line overrides can
//! be applied in between. Validation failures are fatal; the process never
//! starts scanning or connecting with a configuration it cannot honor.

use crate::buffer::BufferPolicy;
use crate::filter::FilterCriteria;
use crate::mac_address::MacAddress;
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Default publish interval: immediate mode.
pub const DEFAULT_PUBLISH_INTERVAL_SEC: f64 = 0.0;
/// Default pending-event cap forcing an early flush.
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 100;
/// Throttling is on unless configured off.
pub const DEFAULT_THROTTLE_CONTROL: bool = true;
/// Default MQTT port (TLS).
pub const DEFAULT_PORT: u16 = 8883;
/// Default MQTT client id.
pub const DEFAULT_CLIENT_ID: &str = "ble-gateway-001";
/// Default MQTT topic.
pub const DEFAULT_TOPIC: &str = "ble/gateway/data";
/// Default MQTT quality of service.
pub const DEFAULT_QOS: u8 = 1;
/// Default MQTT keepalive in seconds.
pub const DEFAULT_KEEPALIVE_SECS: u64 = 1200;
/// Longest client id the broker side accepts.
pub const MAX_CLIENT_ID_LENGTH: usize = 128;

/// Errors raised while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid JSON in configuration: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// How the gateway authenticates to the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthType {
    /// Mutual TLS with a client certificate and key.
    Mtls,
    /// Username and password, optionally over TLS.
    Userpass,
    /// No authentication.
    None,
}

/// Username and password for `userpass` authentication.
#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
}

/// MQTT connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    /// Broker hostname or IP address. Required.
    pub broker: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default = "default_topic")]
    pub topic: String,
    #[serde(default = "default_auth_type")]
    pub auth_type: AuthType,
    /// CA certificate for TLS. Required for mtls; enables TLS for userpass.
    #[serde(default)]
    pub root_ca_path: Option<PathBuf>,
    #[serde(default)]
    pub cert_path: Option<PathBuf>,
    #[serde(default)]
    pub key_path: Option<PathBuf>,
    #[serde(default)]
    pub credentials: Option<Credentials>,
    #[serde(default = "default_qos")]
    pub qos: u8,
    /// Keepalive interval in seconds.
    #[serde(default = "default_keepalive")]
    pub keepalive: u64,
}

/// Top-level gateway configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Address reported as the gateway id in GPRP records.
    #[serde(default)]
    pub gateway_mac: Option<MacAddress>,
    /// Seconds between flushes. Zero publishes immediately.
    #[serde(default = "default_publish_interval")]
    pub publish_interval_sec: f64,
    /// Pending-event count that forces a flush before the interval elapses.
    #[serde(default = "default_max_buffer_size")]
    pub max_buffer_size: usize,
    /// Keep only the latest event per device while buffering.
    #[serde(default = "default_throttle_control")]
    pub throttle_control: bool,
    #[serde(default)]
    pub mac_whitelist: Vec<MacAddress>,
    #[serde(default)]
    pub name_whitelist: Vec<String>,
    /// Company identifiers, as numbers or hex strings like "0x0499".
    #[serde(default, deserialize_with = "deserialize_vendor_ids")]
    pub manufacturer_id_whitelist: Vec<u16>,
    #[serde(default)]
    pub service_uuid_whitelist: Vec<Uuid>,
    /// Adapter to scan on (e.g. "hci0"); `None` selects the default.
    #[serde(default)]
    pub bluetooth_adapter: Option<String>,
    pub mqtt: MqttConfig,
}

fn default_publish_interval() -> f64 {
    DEFAULT_PUBLISH_INTERVAL_SEC
}

fn default_max_buffer_size() -> usize {
    DEFAULT_MAX_BUFFER_SIZE
}

fn default_throttle_control() -> bool {
    DEFAULT_THROTTLE_CONTROL
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_client_id() -> String {
    DEFAULT_CLIENT_ID.to_string()
}

fn default_topic() -> String {
    DEFAULT_TOPIC.to_string()
}

fn default_auth_type() -> AuthType {
    AuthType::Mtls
}

fn default_qos() -> u8 {
    DEFAULT_QOS
}

fn default_keepalive() -> u64 {
    DEFAULT_KEEPALIVE_SECS
}

/// Accept company identifiers as JSON numbers or as hex strings with an
/// optional `0x` prefix.
fn deserialize_vendor_ids<'de, D>(deserializer: D) -> Result<Vec<u16>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u16),
        Hex(String),
    }

    Vec::<Raw>::deserialize(deserializer)?
        .into_iter()
        .map(|raw| match raw {
            Raw::Number(id) => Ok(id),
            Raw::Hex(s) => {
                let digits = s.trim_start_matches("0x").trim_start_matches("0X");
                u16::from_str_radix(digits, 16).map_err(|_| {
                    serde::de::Error::custom(format!(
                        "invalid manufacturer id '{s}': use a number or a hex string like \"0x0499\""
                    ))
                })
            }
        })
        .collect()
}

impl GatewayConfig {
    /// Load configuration from a JSON file.
    ///
    /// The result is not yet validated; call [`validate`] once overrides
    /// have been applied.
    ///
    /// [`validate`]: GatewayConfig::validate
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|source| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            source,
        })?;
        Self::from_json(&content)
    }

    /// Parse configuration from a JSON string, without validating.
    ///
    /// # Errors
    /// Returns an error if the JSON is invalid.
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(content)?)
    }

    /// Validate the effective configuration.
    ///
    /// # Errors
    /// Returns an error describing the first constraint the configuration
    /// violates.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.publish_interval_sec.is_finite() || self.publish_interval_sec < 0.0 {
            return Err(ConfigError::Invalid(
                "publish_interval_sec must be a non-negative number".to_string(),
            ));
        }

        if self.max_buffer_size == 0 {
            return Err(ConfigError::Invalid(
                "max_buffer_size must be at least 1".to_string(),
            ));
        }

        self.mqtt.validate()
    }

    /// The buffering policy this configuration selects.
    pub fn buffer_policy(&self) -> BufferPolicy {
        BufferPolicy {
            flush_interval: Duration::from_secs_f64(self.publish_interval_sec),
            max_batch_size: self.max_buffer_size,
            throttle: self.throttle_control,
        }
    }

    /// The acceptance-filter criteria this configuration selects.
    pub fn filter_criteria(&self) -> FilterCriteria {
        FilterCriteria::from_whitelists(
            &self.mac_whitelist,
            &self.name_whitelist,
            &self.manufacturer_id_whitelist,
            &self.service_uuid_whitelist,
        )
    }
}

impl MqttConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.broker.is_empty() {
            return Err(ConfigError::Invalid(
                "mqtt.broker cannot be empty".to_string(),
            ));
        }

        if self.topic.is_empty() {
            return Err(ConfigError::Invalid(
                "mqtt.topic cannot be empty".to_string(),
            ));
        }

        if self.client_id.is_empty() {
            return Err(ConfigError::Invalid(
                "mqtt.client_id cannot be empty".to_string(),
            ));
        }

        if self.client_id.len() > MAX_CLIENT_ID_LENGTH {
            return Err(ConfigError::Invalid(format!(
                "mqtt.client_id cannot exceed {MAX_CLIENT_ID_LENGTH} characters"
            )));
        }

        if self.qos > 2 {
            return Err(ConfigError::Invalid(format!(
                "mqtt.qos must be 0, 1 or 2, got {}",
                self.qos
            )));
        }

        // rumqttc rejects shorter keepalives.
        if self.keepalive < 5 {
            return Err(ConfigError::Invalid(
                "mqtt.keepalive must be at least 5 seconds".to_string(),
            ));
        }

        match self.auth_type {
            AuthType::Mtls => {
                check_pem_file(self.root_ca_path.as_deref(), "mqtt.root_ca_path")?;
                check_pem_file(self.cert_path.as_deref(), "mqtt.cert_path")?;
                check_pem_file(self.key_path.as_deref(), "mqtt.key_path")?;
            }
            AuthType::Userpass => {
                let username_given = self
                    .credentials
                    .as_ref()
                    .is_some_and(|c| !c.username.is_empty());
                if !username_given {
                    return Err(ConfigError::Invalid(
                        "userpass auth requires mqtt.credentials.username".to_string(),
                    ));
                }
                if let Some(ca) = &self.root_ca_path {
                    check_pem_file(Some(ca), "mqtt.root_ca_path")?;
                } else if self.port == DEFAULT_PORT {
                    // No system trust store is consulted, so TLS on the
                    // conventional TLS port needs an explicit CA.
                    return Err(ConfigError::Invalid(format!(
                        "userpass auth on port {DEFAULT_PORT} requires mqtt.root_ca_path"
                    )));
                }
            }
            AuthType::None => {}
        }

        Ok(())
    }
}

fn check_pem_file(path: Option<&Path>, what: &str) -> Result<(), ConfigError> {
    let Some(path) = path else {
        return Err(ConfigError::Invalid(format!("{what} is required")));
    };
    let metadata = std::fs::metadata(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    if metadata.len() == 0 {
        return Err(ConfigError::Invalid(format!(
            "{what} file '{}' is empty",
            path.display()
        )));
    }
    Ok(())
}
