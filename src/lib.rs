#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

//! # Bedlink 🛏️
//!
//! A Rust library for driving a split adjustable bed over Bluetooth Low Energy.
//!
//! The bed exposes one BLE peripheral per side. Each side carries the same
//! vendor service with unnamed characteristics for the two lift actuators,
//! two vibration motors and the under-bed light. This library keeps one
//! long-lived session per side and fans every command out to all of them.
//!
//! ## How it works
//!
//! - **Characteristic index**: human names such as `"upper lift"` map to
//!   positions in each device's discovered characteristic list
//! - **Sessions**: one connection per device, retried at startup and
//!   reconnected in place when the link drops mid-operation
//! - **Movement**: lift actuators report no completion, so a write is
//!   followed by a hold proportional to the distance travelled
//! - **Dispatch**: commands run concurrently on every device; a command that
//!   needs current positions reads all devices first and writes nothing if
//!   any read fails
//!
//! ## Safety Warning
//!
//! ⚠️ **Important**: This library moves furniture people lie on. A lift keeps
//! moving until it reaches its commanded position; there is no feedback that
//! it arrived.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use bedlink::{BedCommand, BedConfig, BtleConnector, Dispatcher, Percentage, SessionRegistry};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = BedConfig::default();
//!     let connector = BtleConnector::new().await?;
//!
//!     // Connect both sides of the bed
//!     let registry = Arc::new(SessionRegistry::from_config(&config, Arc::new(connector)).await?);
//!     let dispatcher = Dispatcher::new(Arc::clone(&registry), config.max_travel_time);
//!
//!     // Raise the upper lift halfway on every side
//!     let outcome = BedCommand::MoveUpper(Percentage::new(50)?).run(&dispatcher).await;
//!     println!("{outcome}");
//!
//!     registry.shutdown().await;
//!     Ok(())
//! }
//! ```

use std::time::Duration;
use uuid::Uuid;

/// Bluetooth Low Energy link and connector
pub mod ble;
/// Characteristic name to position mapping
pub mod characteristic;
/// Bed commands and queries
pub mod commands;
/// Fan-out of commands across devices
pub mod dispatch;
/// Error types and handling
pub mod error;
/// Travel-time holds for actuator writes
pub mod movement;
/// Named session set
pub mod registry;
/// Attempt counting and delays
pub mod retry;
/// Per-device connection and serialized I/O
pub mod session;
/// Type definitions and data structures
pub mod types;

#[cfg(test)]
mod mock;

// Re-export the main types for convenient usage
pub use ble::{BtleConnector, Connector, Link};
pub use characteristic::{CharacteristicEntry, CharacteristicIndex, Slot};
pub use commands::{BedCommand, BedQuery};
pub use dispatch::{
    CommandOutcome, DispatchState, Dispatcher, OutcomeStatus, PositionTarget, WriteCommand,
};
pub use error::{BedError, ErrorKind, Result};
pub use movement::{hold_duration, Movement};
pub use registry::SessionRegistry;
pub use retry::RetryPolicy;
pub use session::{DeviceSession, SessionContext};
pub use types::{BedConfig, DeviceConfig, LightState, Percentage};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Vendor service carrying every bed characteristic
pub const BED_SERVICE_UUID: Uuid = Uuid::from_u128(0xdb80_1000_f324_29c3_38d1_85c0_c2e8_6885);

/// Attempts per connect, read or write before giving up
pub const MAX_RETRIES: u32 = 5;

/// Pause between attempts
pub const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Upper bound on a single connection attempt
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound on a single characteristic read or write
pub const IO_TIMEOUT: Duration = Duration::from_secs(10);

/// Time for a lift to travel its full range
///
/// Holds are scaled from this: a move across half the range waits half of it.
pub const MAX_TRAVEL_TIME: Duration = Duration::from_secs(30);
