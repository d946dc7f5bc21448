use async_trait::async_trait;
use btleplug::{
    api::{BDAddr, Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType},
    platform::{Adapter, Manager, Peripheral},
};
use std::{str::FromStr, time::Duration};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{BedError, Result};

/// A live connection to one peripheral, bound to one service
///
/// Positions index the bound service's characteristic list.
#[async_trait]
pub trait Link: Send + Sync {
    /// Read the raw value of the characteristic at `position`
    async fn read(&self, position: usize) -> Result<Vec<u8>>;

    /// Write `payload` to the characteristic at `position` and wait for the ack
    async fn write(&self, position: usize, payload: &[u8]) -> Result<()>;

    /// Tear the connection down
    async fn disconnect(&self) -> Result<()>;

    /// UUID of the characteristic at `position`, if there is one
    fn uuid_at(&self, position: usize) -> Option<Uuid>;
}

/// Opens links; one call is one connection attempt
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect to `address` and bind `service`
    async fn connect(&self, address: &str, service: Uuid) -> Result<Box<dyn Link>>;
}

/// Decode a characteristic value as a native-endian unsigned integer
///
/// # Errors
///
/// Returns [`BedError::Protocol`] if the value is wider than 8 bytes.
pub fn decode_native(value: &[u8]) -> Result<u64> {
    const WIDTH: usize = std::mem::size_of::<u64>();
    if value.len() > WIDTH {
        return Err(BedError::Protocol(format!(
            "value of {} bytes does not fit an integer",
            value.len()
        )));
    }

    let mut buf = [0u8; WIDTH];
    if cfg!(target_endian = "little") {
        buf[..value.len()].copy_from_slice(value);
    } else {
        buf[WIDTH - value.len()..].copy_from_slice(value);
    }
    Ok(u64::from_ne_bytes(buf))
}

/// `btleplug`-backed connector using the first Bluetooth adapter
pub struct BtleConnector {
    adapter: Adapter,
    scan_window: Duration,
}

impl BtleConnector {
    /// Create a connector on the first available adapter
    ///
    /// # Errors
    ///
    /// Returns [`BedError::Ble`] if the Bluetooth stack cannot be initialized,
    /// or [`BedError::DeviceNotFound`] if there is no adapter.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| BedError::DeviceNotFound("no Bluetooth adapter".to_string()))?;

        Ok(Self {
            adapter,
            scan_window: Duration::from_secs(5),
        })
    }

    /// Override how long to scan when a peripheral is not yet known
    #[must_use]
    pub const fn with_scan_window(mut self, scan_window: Duration) -> Self {
        self.scan_window = scan_window;
        self
    }

    async fn known_peripheral(&self, address: BDAddr) -> Result<Option<Peripheral>> {
        Ok(self
            .adapter
            .peripherals()
            .await?
            .into_iter()
            .find(|p| p.address() == address))
    }

    async fn find_peripheral(&self, address: BDAddr, service: Uuid) -> Result<Peripheral> {
        if let Some(peripheral) = self.known_peripheral(address).await? {
            return Ok(peripheral);
        }

        debug!("{} not known yet, scanning for {:?}", address, self.scan_window);
        self.adapter
            .start_scan(ScanFilter {
                services: vec![service],
            })
            .await?;
        tokio::time::sleep(self.scan_window).await;
        self.adapter.stop_scan().await?;

        self.known_peripheral(address)
            .await?
            .ok_or_else(|| BedError::DeviceNotFound(address.to_string()))
    }
}

#[async_trait]
impl Connector for BtleConnector {
    async fn connect(&self, address: &str, service: Uuid) -> Result<Box<dyn Link>> {
        let bd_addr =
            BDAddr::from_str(address).map_err(|_| BedError::InvalidAddress(address.to_string()))?;

        let peripheral = self.find_peripheral(bd_addr, service).await?;

        if !peripheral.is_connected().await? {
            peripheral
                .connect()
                .await
                .map_err(|e| BedError::ConnectionFailed(e.to_string()))?;
        }
        peripheral.discover_services().await?;

        let characteristics: Vec<Characteristic> = peripheral
            .services()
            .into_iter()
            .find(|s| s.uuid == service)
            .ok_or(BedError::ServiceNotFound(service))?
            .characteristics
            .into_iter()
            .collect();

        info!(
            "Connected to {} ({} characteristics on {})",
            address,
            characteristics.len(),
            service
        );

        Ok(Box::new(BtleLink {
            peripheral,
            characteristics,
        }))
    }
}

/// Active connection to a bed peripheral
///
/// `btleplug` hands back a service's characteristics ordered by UUID, so
/// positions follow that order. Sessions check pinned UUIDs on connect.
pub struct BtleLink {
    peripheral: Peripheral,
    characteristics: Vec<Characteristic>,
}

impl BtleLink {
    fn characteristic(&self, position: usize) -> Result<&Characteristic> {
        self.characteristics
            .get(position)
            .ok_or(BedError::PositionOutOfRange {
                position,
                available: self.characteristics.len(),
            })
    }
}

#[async_trait]
impl Link for BtleLink {
    async fn read(&self, position: usize) -> Result<Vec<u8>> {
        let characteristic = self.characteristic(position)?;
        Ok(self.peripheral.read(characteristic).await?)
    }

    async fn write(&self, position: usize, payload: &[u8]) -> Result<()> {
        let characteristic = self.characteristic(position)?;
        debug!("Writing {:02X?} to {}", payload, characteristic.uuid);
        self.peripheral
            .write(characteristic, payload, WriteType::WithResponse)
            .await?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.peripheral.disconnect().await?;
        Ok(())
    }

    fn uuid_at(&self, position: usize) -> Option<Uuid> {
        self.characteristics.get(position).map(|c| c.uuid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_single_byte() {
        assert_eq!(decode_native(&[0x46]).unwrap(), 70);
        assert_eq!(decode_native(&[]).unwrap(), 0);
    }

    #[test]
    fn test_decode_native_endian() {
        let value: u16 = 0x0164;
        assert_eq!(decode_native(&value.to_ne_bytes()).unwrap(), 0x0164);

        let value: u64 = 0x0102_0304_0506_0708;
        assert_eq!(decode_native(&value.to_ne_bytes()).unwrap(), value);
    }

    #[test]
    fn test_decode_rejects_wide_values() {
        let result = decode_native(&[0u8; 9]);
        assert!(matches!(result, Err(BedError::Protocol(_))));
    }

    #[test]
    fn test_address_parsing() {
        assert!(BDAddr::from_str("F8:68:CE:13:C3:DF").is_ok());
        assert!(BDAddr::from_str("F8-68-CE").is_err());
    }
}
