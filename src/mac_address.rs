//! Efficient MAC address type for Bluetooth devices.
//!
//! This module provides a compact 6-byte MAC address representation that is
//! decoupled from any specific Bluetooth library. Both the colon-separated
//! form (`AA:BB:CC:DD:EE:FF`) and the plain 12-hex-digit form used on the
//! wire (`AABBCCDDEEFF`) are accepted when parsing.

use std::fmt;
use std::hash::Hash;
use std::str::FromStr;
use thiserror::Error;

/// A Bluetooth MAC address stored as a compact 6-byte array.
///
/// This type provides efficient storage and hashing for use as HashMap keys,
/// while being independent of any specific Bluetooth library. Parsing is
/// case-insensitive, so whitelist entries match however they were written in
/// the configuration file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    /// The colon-free upper-case form used in GPRP records: `AABBCCDDEEFF`.
    pub fn plain_hex(&self) -> String {
        format!(
            "{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

/// Errors returned when parsing a MAC address string.
#[derive(Error, Debug, PartialEq)]
pub enum ParseMacError {
    #[error("invalid MAC address: expected 6 parts, got {0}")]
    InvalidLength(usize),
    #[error("invalid MAC address: part {0} has wrong length")]
    InvalidPartLength(usize),
    #[error("invalid MAC address: expected 12 hex digits, got {0}")]
    InvalidPlainLength(usize),
    #[error("invalid MAC address: '{0}' is not valid hex")]
    InvalidHex(String),
}

impl FromStr for MacAddress {
    type Err = ParseMacError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 6];

        if s.contains(':') {
            let parts: Vec<&str> = s.split(':').collect();
            if parts.len() != 6 {
                return Err(ParseMacError::InvalidLength(parts.len()));
            }
            for (i, part) in parts.iter().enumerate() {
                if part.len() != 2 {
                    return Err(ParseMacError::InvalidPartLength(i));
                }
                bytes[i] = u8::from_str_radix(part, 16)
                    .map_err(|_| ParseMacError::InvalidHex(part.to_string()))?;
            }
        } else {
            if !s.is_ascii() || s.len() != 12 {
                return Err(ParseMacError::InvalidPlainLength(s.len()));
            }
            for (i, byte) in bytes.iter_mut().enumerate() {
                let part = &s[i * 2..i * 2 + 2];
                *byte = u8::from_str_radix(part, 16)
                    .map_err(|_| ParseMacError::InvalidHex(part.to_string()))?;
            }
        }

        Ok(MacAddress(bytes))
    }
}

impl From<[u8; 6]> for MacAddress {
    fn from(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }
}

#[cfg(feature = "bluer")]
impl From<bluer::Address> for MacAddress {
    fn from(addr: bluer::Address) -> Self {
        Self(addr.0)
    }
}

#[cfg(feature = "bluer")]
impl From<MacAddress> for bluer::Address {
    fn from(addr: MacAddress) -> Self {
        bluer::Address(addr.0)
    }
}

impl serde::Serialize for MacAddress {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for MacAddress {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
