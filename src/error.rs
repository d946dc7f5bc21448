use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur while driving a bed over BLE
#[derive(Error, Debug)]
pub enum BedError {
    /// Bluetooth Low Energy related errors
    #[error("BLE error: {0}")]
    Ble(#[from] btleplug::Error),

    /// Characteristic name is not present in the index
    #[error("Unknown characteristic: {0}")]
    UnknownCharacteristic(String),

    /// Sub-index missing, unexpected or outside the configured list
    #[error("Index {index:?} out of range for characteristic {characteristic}")]
    IndexOutOfRange {
        /// Characteristic name
        characteristic: String,
        /// Requested sub-index
        index: Option<usize>,
    },

    /// Resolved position does not exist on the peripheral
    #[error("Characteristic position {position} out of range ({available} available)")]
    PositionOutOfRange {
        /// Resolved position
        position: usize,
        /// Number of characteristics exposed by the bound service
        available: usize,
    },

    /// Peripheral exposes a different characteristic than the index expects
    #[error("Characteristic at position {position} is {found:?}, expected {expected}")]
    CharacteristicMismatch {
        /// Position in the service's characteristic list
        position: usize,
        /// UUID pinned in the index
        expected: Uuid,
        /// UUID found on the peripheral; `None` if the position is missing
        found: Option<Uuid>,
    },

    /// Device name is not registered
    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    /// Device name configured twice
    #[error("Device configured more than once: {0}")]
    DuplicateDevice(String),

    /// Registry started with no devices
    #[error("No devices configured")]
    NoDevices,

    /// Hardware address could not be parsed
    #[error("Invalid device address: {0}")]
    InvalidAddress(String),

    /// Percentage input outside 0-100 or not a number
    #[error("Invalid percentage input: {0}")]
    InvalidPercentage(String),

    /// Device connection failed
    #[error("Failed to connect to device: {0}")]
    ConnectionFailed(String),

    /// Device disconnected unexpectedly
    #[error("Device disconnected")]
    Disconnected,

    /// Peripheral not seen by the adapter
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Bound service missing from the peripheral
    #[error("Service {0} not found")]
    ServiceNotFound(Uuid),

    /// Connection attempt timeout
    #[error("Connection timed out after {timeout_ms}ms")]
    Timeout {
        /// Timeout duration in milliseconds
        timeout_ms: u64,
    },

    /// Startup connection gave up
    #[error("Unable to connect to {device} after {attempts} attempts")]
    ConnectionExhausted {
        /// Device name
        device: String,
        /// Attempts made
        attempts: u32,
    },

    /// Write gave up after the retry ceiling
    #[error("[{device}] Write to {characteristic} failed after {attempts} attempts")]
    WriteFailed {
        /// Device name
        device: String,
        /// Characteristic name
        characteristic: String,
        /// Attempts made
        attempts: u32,
    },

    /// Read gave up after the retry ceiling
    #[error("[{device}] Read from {characteristic} failed after {attempts} attempts")]
    ReadFailed {
        /// Device name
        device: String,
        /// Characteristic name
        characteristic: String,
        /// Attempts made
        attempts: u32,
    },

    /// A required read failed before a dependent write
    #[error("Failed to read current position for: {}", devices.join(", "))]
    PreconditionFailed {
        /// Devices whose read failed
        devices: Vec<String>,
    },

    /// Payload could not be interpreted
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Other errors
    #[error("Other error: {0}")]
    Other(String),
}

/// Result type for bed operations
pub type Result<T> = std::result::Result<T, BedError>;

/// Coarse classification callers branch on instead of inspecting messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Programmer or configuration defect; never retried
    Configuration,
    /// Caller input rejected before dispatch
    Input,
    /// Link refused or dropped; retried up to the ceiling
    Link,
    /// A required read failed, so the dependent write was not attempted
    Precondition,
    /// Anything else; failed immediately for that operation only
    Unexpected,
}

impl BedError {
    /// Classify this error
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownCharacteristic(_)
            | Self::IndexOutOfRange { .. }
            | Self::PositionOutOfRange { .. }
            | Self::CharacteristicMismatch { .. }
            | Self::UnknownDevice(_)
            | Self::DuplicateDevice(_)
            | Self::NoDevices
            | Self::InvalidAddress(_) => ErrorKind::Configuration,
            Self::InvalidPercentage(_) => ErrorKind::Input,
            Self::ConnectionFailed(_)
            | Self::Disconnected
            | Self::DeviceNotFound(_)
            | Self::ServiceNotFound(_)
            | Self::Timeout { .. }
            | Self::ConnectionExhausted { .. }
            | Self::WriteFailed { .. }
            | Self::ReadFailed { .. } => ErrorKind::Link,
            Self::Ble(e) => {
                if is_link_ble_error(e) {
                    ErrorKind::Link
                } else {
                    ErrorKind::Unexpected
                }
            }
            Self::PreconditionFailed { .. } => ErrorKind::Precondition,
            Self::Protocol(_) | Self::Other(_) => ErrorKind::Unexpected,
        }
    }

    /// Check if this error indicates a broken link worth reconnecting for
    #[must_use]
    pub const fn is_link_error(&self) -> bool {
        matches!(self.kind(), ErrorKind::Link)
    }

    /// Check if this error is a configuration defect
    #[must_use]
    pub const fn is_configuration_error(&self) -> bool {
        matches!(self.kind(), ErrorKind::Configuration)
    }
}

const fn is_link_ble_error(error: &btleplug::Error) -> bool {
    matches!(
        error,
        btleplug::Error::NotConnected
            | btleplug::Error::DeviceNotFound
            | btleplug::Error::TimedOut(_)
            | btleplug::Error::RuntimeError(_)
            | btleplug::Error::Other(_)
    )
}
