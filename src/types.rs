use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr, time::Duration};
use uuid::Uuid;

use crate::{
    characteristic::CharacteristicIndex,
    error::{BedError, Result},
    retry::RetryPolicy,
    BED_SERVICE_UUID, CONNECT_TIMEOUT, IO_TIMEOUT, MAX_TRAVEL_TIME,
};

/// A validated position or intensity in the range 0-100
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u8")]
pub struct Percentage(u8);

impl Percentage {
    /// Fully lowered / switched off
    pub const ZERO: Self = Self(0);
    /// Fully raised / switched on
    pub const FULL: Self = Self(100);

    /// Create a percentage, rejecting values above 100
    ///
    /// # Errors
    ///
    /// Returns [`BedError::InvalidPercentage`] if `value` exceeds 100.
    pub fn new(value: u8) -> Result<Self> {
        if value > 100 {
            return Err(BedError::InvalidPercentage(value.to_string()));
        }
        Ok(Self(value))
    }

    /// Create a percentage, capping values above 100
    #[must_use]
    pub const fn saturating(value: u8) -> Self {
        if value > 100 {
            Self::FULL
        } else {
            Self(value)
        }
    }

    /// Raw value
    #[must_use]
    pub const fn get(self) -> u8 {
        self.0
    }

    /// Single-byte characteristic payload
    #[must_use]
    pub fn to_payload(self) -> Bytes {
        Bytes::copy_from_slice(&[self.0])
    }
}

impl TryFrom<i64> for Percentage {
    type Error = BedError;

    fn try_from(value: i64) -> Result<Self> {
        u8::try_from(value)
            .ok()
            .filter(|v| *v <= 100)
            .map(Self)
            .ok_or_else(|| BedError::InvalidPercentage(value.to_string()))
    }
}

impl From<Percentage> for u8 {
    fn from(value: Percentage) -> Self {
        value.0
    }
}

impl FromStr for Percentage {
    type Err = BedError;

    fn from_str(s: &str) -> Result<Self> {
        let value: i64 = s
            .trim()
            .parse()
            .map_err(|_| BedError::InvalidPercentage(s.to_string()))?;
        Self::try_from(value)
    }
}

impl fmt::Display for Percentage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

/// Light state derived from a characteristic reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LightState {
    /// Reading was non-zero
    On,
    /// Reading was zero
    Off,
}

impl LightState {
    /// Interpret a raw reading
    #[must_use]
    pub const fn from_reading(value: u64) -> Self {
        if value == 0 {
            Self::Off
        } else {
            Self::On
        }
    }
}

impl fmt::Display for LightState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::On => write!(f, "on"),
            Self::Off => write!(f, "off"),
        }
    }
}

/// One named peripheral, e.g. one half of a split bed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Owner name used to address the device
    pub name: String,
    /// Hardware address, `XX:XX:XX:XX:XX:XX`
    pub address: String,
}

impl DeviceConfig {
    /// Create a device entry
    #[must_use]
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
        }
    }
}

/// Static configuration for the whole controller
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BedConfig {
    /// Service every characteristic lookup goes through
    pub service_uuid: Uuid,
    /// Devices to connect at startup, in order; the first is the primary
    pub devices: Vec<DeviceConfig>,
    /// Characteristic name to position mapping
    pub characteristics: CharacteristicIndex,
    /// Retry policy for the startup connection
    pub connect_retry: RetryPolicy,
    /// Retry policy for runtime reads and writes
    pub io_retry: RetryPolicy,
    /// Upper bound on a single connection attempt
    pub connect_timeout: Duration,
    /// Upper bound on a single characteristic read or write
    pub io_timeout: Duration,
    /// Time an actuator needs for a full 0 to 100 traversal
    pub max_travel_time: Duration,
}

impl Default for BedConfig {
    fn default() -> Self {
        Self {
            service_uuid: BED_SERVICE_UUID,
            devices: vec![
                DeviceConfig::new("left", "F8:68:CE:13:C3:DF"),
                DeviceConfig::new("right", "FA:7A:28:73:FF:3F"),
            ],
            characteristics: CharacteristicIndex::default(),
            connect_retry: RetryPolicy::default(),
            io_retry: RetryPolicy::default(),
            connect_timeout: CONNECT_TIMEOUT,
            io_timeout: IO_TIMEOUT,
            max_travel_time: MAX_TRAVEL_TIME,
        }
    }
}
