//! Scripted in-memory peripherals for tests

use async_trait::async_trait;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};
use uuid::Uuid;

use crate::{
    ble::{Connector, Link},
    characteristic::CharacteristicIndex,
    error::{BedError, Result},
};

/// Number of characteristics every mock service exposes
pub const MOCK_CHARACTERISTICS: usize = 16;

#[derive(Default)]
pub struct MockPeripheral {
    values: Mutex<HashMap<usize, Vec<u8>>>,
    uuids: Mutex<HashMap<usize, Uuid>>,
    /// Connect attempts that fail before one succeeds
    pub connect_failures: AtomicU32,
    /// Reads/writes that fail with a link error before one succeeds
    pub link_failures: AtomicU32,
    /// Every read fails with a link error
    pub reads_broken: AtomicBool,
    /// Every write fails with a link error
    pub writes_broken: AtomicBool,
    /// Writes panic instead of returning
    pub panic_on_write: AtomicBool,
    /// Reads and writes never complete
    pub stalled: AtomicBool,
    /// Reads return a value too wide to decode
    pub oversized_reads: AtomicBool,
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
    pub reads: AtomicUsize,
    pub writes: AtomicUsize,
}

impl MockPeripheral {
    /// A peripheral laid out like the real bed service
    pub fn new() -> Arc<Self> {
        Arc::new(Self::bed())
    }

    pub fn unreachable() -> Arc<Self> {
        let peripheral = Self::bed();
        peripheral.connect_failures.store(u32::MAX, Ordering::SeqCst);
        Arc::new(peripheral)
    }

    pub fn set(&self, position: usize, value: &[u8]) {
        self.values
            .lock()
            .unwrap()
            .insert(position, value.to_vec());
    }

    pub fn set_uuid(&self, position: usize, uuid: Uuid) {
        self.uuids.lock().unwrap().insert(position, uuid);
    }

    fn bed() -> Self {
        let peripheral = Self::default();
        peripheral
            .uuids
            .lock()
            .unwrap()
            .extend(CharacteristicIndex::default().layout());
        peripheral
    }

    pub fn value(&self, position: usize) -> Option<Vec<u8>> {
        self.values.lock().unwrap().get(&position).cloned()
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[derive(Default)]
pub struct MockConnector {
    peripherals: HashMap<String, Arc<MockPeripheral>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, address: &str, peripheral: Arc<MockPeripheral>) -> Self {
        self.peripherals.insert(address.to_string(), peripheral);
        self
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, address: &str, _service: Uuid) -> Result<Box<dyn Link>> {
        let peripheral = self
            .peripherals
            .get(address)
            .ok_or_else(|| BedError::DeviceNotFound(address.to_string()))?;

        peripheral.connects.fetch_add(1, Ordering::SeqCst);
        if MockPeripheral::take_failure(&peripheral.connect_failures) {
            return Err(BedError::ConnectionFailed(format!("{address} refused")));
        }

        Ok(Box::new(MockLink {
            peripheral: Arc::clone(peripheral),
        }))
    }
}

struct MockLink {
    peripheral: Arc<MockPeripheral>,
}

impl MockLink {
    async fn stall(&self) {
        if self.peripheral.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
    }

    fn check(&self, position: usize, broken: &AtomicBool) -> Result<()> {
        if position >= MOCK_CHARACTERISTICS {
            return Err(BedError::PositionOutOfRange {
                position,
                available: MOCK_CHARACTERISTICS,
            });
        }
        if broken.load(Ordering::SeqCst)
            || MockPeripheral::take_failure(&self.peripheral.link_failures)
        {
            return Err(BedError::Disconnected);
        }
        Ok(())
    }
}

#[async_trait]
impl Link for MockLink {
    async fn read(&self, position: usize) -> Result<Vec<u8>> {
        self.peripheral.reads.fetch_add(1, Ordering::SeqCst);
        self.stall().await;
        self.check(position, &self.peripheral.reads_broken)?;
        if self.peripheral.oversized_reads.load(Ordering::SeqCst) {
            return Ok(vec![0xff; 9]);
        }
        Ok(self.peripheral.value(position).unwrap_or_else(|| vec![0]))
    }

    async fn write(&self, position: usize, payload: &[u8]) -> Result<()> {
        assert!(
            !self.peripheral.panic_on_write.load(Ordering::SeqCst),
            "scripted write panic"
        );
        self.peripheral.writes.fetch_add(1, Ordering::SeqCst);
        self.stall().await;
        self.check(position, &self.peripheral.writes_broken)?;
        self.peripheral.set(position, payload);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.peripheral.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn uuid_at(&self, position: usize) -> Option<Uuid> {
        if position >= MOCK_CHARACTERISTICS {
            return None;
        }
        let uuids = self.peripheral.uuids.lock().unwrap();
        Some(uuids.get(&position).copied().unwrap_or_else(Uuid::nil))
    }
}
