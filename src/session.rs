use bytes::Bytes;
use std::{sync::Arc, time::Duration};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    ble::{decode_native, Connector, Link},
    characteristic::CharacteristicIndex,
    error::{BedError, Result},
    retry::RetryPolicy,
    types::DeviceConfig,
};

/// Everything a session needs besides its own identity
///
/// Shared by every session of a registry.
#[derive(Clone)]
pub struct SessionContext {
    /// Opens links to peripherals
    pub connector: Arc<dyn Connector>,
    /// Service bound on every connection
    pub service: Uuid,
    /// Characteristic name to position mapping
    pub index: Arc<CharacteristicIndex>,
    /// Retry policy for the startup connection
    pub connect_retry: RetryPolicy,
    /// Retry policy for runtime reads and writes
    pub io_retry: RetryPolicy,
    /// Upper bound on a single connection attempt
    pub connect_timeout: Duration,
    /// Upper bound on a single characteristic read or write
    pub io_timeout: Duration,
}

impl SessionContext {
    /// Longest a read or write can take before giving up, hold excluded
    ///
    /// Every attempt may spend a full connect timeout reconnecting and a
    /// full I/O timeout on the operation itself.
    #[must_use]
    pub fn io_budget(&self) -> Duration {
        self.io_retry
            .worst_case(self.connect_timeout.saturating_add(self.io_timeout))
    }
}

fn timeout_error(timeout: Duration) -> BedError {
    BedError::Timeout {
        timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
    }
}

enum Access {
    Read,
    Write { payload: Bytes, hold: Duration },
}

/// One peripheral connection for one named device
///
/// Every read and write takes the session lock for its whole duration,
/// including reconnects and movement holds, so operations on one device are
/// totally ordered. Different sessions never contend.
pub struct DeviceSession {
    name: String,
    address: String,
    context: SessionContext,
    link: Mutex<Option<Box<dyn Link>>>,
}

impl DeviceSession {
    /// Connect to a device, retrying per `context.connect_retry`
    ///
    /// # Errors
    ///
    /// Returns [`BedError::ConnectionExhausted`] once every attempt has
    /// failed. Callers at startup must treat this as fatal.
    pub async fn connect(config: &DeviceConfig, context: SessionContext) -> Result<Self> {
        let session = Self {
            name: config.name.clone(),
            address: config.address.clone(),
            context,
            link: Mutex::new(None),
        };

        let label = format!("[{}] Bluetooth connection to {}", session.name, session.address);
        let link = session
            .context
            .connect_retry
            .run(&label, |_| session.open_link())
            .await
            .map_err(|e| {
                if e.is_configuration_error() {
                    error!("[{}] Refusing {}: {}", session.name, session.address, e);
                    return e;
                }
                error!(
                    "[{}] Unable to connect to {} after {} attempts: {}",
                    session.name, session.address, session.context.connect_retry.max_attempts, e
                );
                BedError::ConnectionExhausted {
                    device: session.name.clone(),
                    attempts: session.context.connect_retry.max_attempts,
                }
            })?;

        *session.link.lock().await = Some(link);
        Ok(session)
    }

    /// Device name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Hardware address
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Characteristic index this session resolves names against
    #[must_use]
    pub fn index(&self) -> &CharacteristicIndex {
        &self.context.index
    }

    /// Check if a link is currently held; waits for any in-flight operation
    pub async fn is_connected(&self) -> bool {
        self.link.lock().await.is_some()
    }

    /// Write `payload` to a characteristic
    ///
    /// # Errors
    ///
    /// Configuration and unexpected errors are returned immediately.
    /// Link errors trigger an in-place reconnect and a retry; once the
    /// ceiling is reached [`BedError::WriteFailed`] is returned.
    pub async fn write(
        &self,
        characteristic: &str,
        sub_index: Option<usize>,
        payload: Bytes,
    ) -> Result<()> {
        self.write_and_hold(characteristic, sub_index, payload, Duration::ZERO)
            .await
    }

    /// Write, then keep the session locked for `hold` after the ack
    ///
    /// # Errors
    ///
    /// Same as [`DeviceSession::write`].
    pub async fn write_and_hold(
        &self,
        characteristic: &str,
        sub_index: Option<usize>,
        payload: Bytes,
        hold: Duration,
    ) -> Result<()> {
        self.access(characteristic, sub_index, Access::Write { payload, hold })
            .await
            .map(|_| ())
    }

    /// Read a characteristic as a native-endian unsigned integer
    ///
    /// # Errors
    ///
    /// Same discipline as [`DeviceSession::write`]; exhaustion yields
    /// [`BedError::ReadFailed`].
    pub async fn read(&self, characteristic: &str, sub_index: Option<usize>) -> Result<u64> {
        self.access(characteristic, sub_index, Access::Read).await
    }

    /// Drop the link, if any
    ///
    /// # Errors
    ///
    /// Returns the link's disconnect error.
    pub async fn disconnect(&self) -> Result<()> {
        let link = self.link.lock().await.take();
        if let Some(link) = link {
            link.disconnect().await?;
            info!("[{}] Disconnected", self.name);
        }
        Ok(())
    }

    async fn open_link(&self) -> Result<Box<dyn Link>> {
        let timeout = self.context.connect_timeout;
        let link = tokio::time::timeout(
            timeout,
            self.context
                .connector
                .connect(&self.address, self.context.service),
        )
        .await
        .map_err(|_| timeout_error(timeout))??;

        if let Err(e) = self.verify_layout(link.as_ref()) {
            if let Err(disconnect) = link.disconnect().await {
                debug!("[{}] Disconnect after mismatch failed: {}", self.name, disconnect);
            }
            return Err(e);
        }

        info!("[{}] Connected to Bluetooth device {}", self.name, self.address);
        Ok(link)
    }

    fn verify_layout(&self, link: &dyn Link) -> Result<()> {
        for (position, expected) in self.context.index.layout() {
            let found = link.uuid_at(position);
            if found != Some(expected) {
                return Err(BedError::CharacteristicMismatch {
                    position,
                    expected,
                    found,
                });
            }
        }
        Ok(())
    }

    async fn access(
        &self,
        characteristic: &str,
        sub_index: Option<usize>,
        access: Access,
    ) -> Result<u64> {
        let position = self.context.index.resolve(characteristic, sub_index)?;
        let policy = self.context.io_retry;

        let mut link = self.link.lock().await;

        for attempt in policy.attempts() {
            if link.is_none() {
                debug!("[{}] Reconnecting (attempt {})", self.name, attempt);
                match self.open_link().await {
                    Ok(opened) => *link = Some(opened),
                    Err(e) if e.is_link_error() => {
                        warn!("[{}] Reconnect failed: {}", self.name, e);
                        policy.pause(attempt).await;
                        continue;
                    }
                    Err(e) => {
                        error!("[{}] Unexpected error while reconnecting: {}", self.name, e);
                        return Err(e);
                    }
                }
            }

            let Some(active) = link.as_deref() else {
                continue;
            };

            let io_timeout = self.context.io_timeout;
            let result = match &access {
                Access::Read => tokio::time::timeout(io_timeout, active.read(position))
                    .await
                    .map_err(|_| timeout_error(io_timeout))
                    .and_then(|read| decode_native(&read?)),
                Access::Write { payload, .. } => {
                    tokio::time::timeout(io_timeout, active.write(position, payload))
                        .await
                        .map_err(|_| timeout_error(io_timeout))
                        .and_then(|written| written.map(|()| 0))
                }
            };

            match result {
                Ok(value) => {
                    match &access {
                        Access::Read => info!(
                            "[{}] Read value {} from {} (index: {:?})",
                            self.name, value, characteristic, sub_index
                        ),
                        Access::Write { payload, hold } => {
                            info!(
                                "[{}] Wrote {:02x?} to {} (index: {:?})",
                                self.name,
                                payload.as_ref(),
                                characteristic,
                                sub_index
                            );
                            if !hold.is_zero() {
                                info!(
                                    "[{}] Waiting {} seconds for movement...",
                                    self.name,
                                    hold.as_secs() + u64::from(hold.subsec_nanos() > 0)
                                );
                                tokio::time::sleep(*hold).await;
                            }
                        }
                    }
                    return Ok(value);
                }
                Err(e) if e.is_link_error() => {
                    warn!(
                        "[{}] Access to {} failed, reconnecting: {}",
                        self.name, characteristic, e
                    );
                    if let Some(broken) = link.take() {
                        if let Err(e) = broken.disconnect().await {
                            debug!("[{}] Disconnect of broken link failed: {}", self.name, e);
                        }
                    }
                    policy.pause(attempt).await;
                }
                Err(e) => {
                    error!(
                        "[{}] Access to {} (index: {:?}) failed: {}",
                        self.name, characteristic, sub_index, e
                    );
                    return Err(e);
                }
            }
        }

        error!(
            "[{}] Giving up on {} after {} attempts",
            self.name, characteristic, policy.max_attempts
        );
        let device = self.name.clone();
        let characteristic = characteristic.to_string();
        let attempts = policy.max_attempts;
        Err(match access {
            Access::Read => BedError::ReadFailed {
                device,
                characteristic,
                attempts,
            },
            Access::Write { .. } => BedError::WriteFailed {
                device,
                characteristic,
                attempts,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        characteristic::{bed_characteristic_uuid, LIGHT, UPPER_LIFT, UPPER_VIB, ZERO_G},
        mock::{MockConnector, MockPeripheral},
        types::Percentage,
    };
    use std::sync::atomic::Ordering;
    use tokio::time::Instant;
    use tokio_test::{assert_err, assert_ok};

    const ADDRESS: &str = "AA:BB:CC:DD:EE:01";

    fn context(connector: MockConnector) -> SessionContext {
        SessionContext {
            connector: Arc::new(connector),
            service: Uuid::nil(),
            index: Arc::new(CharacteristicIndex::default()),
            connect_retry: RetryPolicy::default(),
            io_retry: RetryPolicy::default(),
            connect_timeout: Duration::from_secs(10),
            io_timeout: Duration::from_secs(10),
        }
    }

    async fn session_for(peripheral: &Arc<MockPeripheral>) -> DeviceSession {
        let connector = MockConnector::new().with(ADDRESS, Arc::clone(peripheral));
        DeviceSession::connect(&DeviceConfig::new("left", ADDRESS), context(connector))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_write_then_read_round_trip() {
        let peripheral = MockPeripheral::new();
        let session = session_for(&peripheral).await;

        for (name, sub_index, value) in [
            (UPPER_VIB, None, 42u8),
            (LIGHT, None, 100),
            (ZERO_G, Some(1), 31),
        ] {
            let payload = Percentage::new(value).unwrap().to_payload();
            assert_ok!(session.write(name, sub_index, payload).await);
            assert_eq!(session.read(name, sub_index).await.unwrap(), u64::from(value));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_retries_then_succeeds() {
        let peripheral = MockPeripheral::new();
        peripheral.connect_failures.store(2, Ordering::SeqCst);
        let start = Instant::now();

        let session = session_for(&peripheral).await;

        assert!(session.is_connected().await);
        assert_eq!(MockPeripheral::count(&peripheral.connects), 3);
        assert!(start.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_exhaustion_is_terminal() {
        let connector = MockConnector::new().with(ADDRESS, MockPeripheral::unreachable());

        let result =
            DeviceSession::connect(&DeviceConfig::new("left", ADDRESS), context(connector)).await;

        assert!(matches!(
            result,
            Err(BedError::ConnectionExhausted { ref device, attempts: 5 }) if device == "left"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_reconnects_in_place() {
        let peripheral = MockPeripheral::new();
        let session = session_for(&peripheral).await;
        peripheral.link_failures.store(2, Ordering::SeqCst);

        assert_ok!(session.write(LIGHT, None, Percentage::FULL.to_payload()).await);

        assert_eq!(MockPeripheral::count(&peripheral.writes), 3);
        assert_eq!(MockPeripheral::count(&peripheral.connects), 3);
        assert_eq!(peripheral.value(14), Some(vec![100]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_exhaustion_is_not_fatal() {
        let peripheral = MockPeripheral::new();
        let session = session_for(&peripheral).await;
        peripheral.writes_broken.store(true, Ordering::SeqCst);

        let result = session.write(LIGHT, None, Percentage::FULL.to_payload()).await;
        assert!(matches!(result, Err(BedError::WriteFailed { attempts: 5, .. })));
        assert_eq!(MockPeripheral::count(&peripheral.writes), 5);

        // The session stays usable once the link recovers
        peripheral.writes_broken.store(false, Ordering::SeqCst);
        assert_ok!(session.write(LIGHT, None, Percentage::ZERO.to_payload()).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_reconnects_in_place() {
        let peripheral = MockPeripheral::new();
        peripheral.set(5, &[42]);
        let session = session_for(&peripheral).await;
        peripheral.link_failures.store(2, Ordering::SeqCst);

        assert_eq!(session.read(UPPER_LIFT, None).await.unwrap(), 42);

        assert_eq!(MockPeripheral::count(&peripheral.reads), 3);
        assert_eq!(MockPeripheral::count(&peripheral.connects), 3);
        assert!(session.is_connected().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_undecodable_read_fails_without_retry() {
        let peripheral = MockPeripheral::new();
        let session = session_for(&peripheral).await;
        peripheral.oversized_reads.store(true, Ordering::SeqCst);

        let result = session.read(UPPER_LIFT, None).await;

        assert!(matches!(result, Err(BedError::Protocol(_))));
        assert_eq!(MockPeripheral::count(&peripheral.reads), 1);
        assert_eq!(MockPeripheral::count(&peripheral.connects), 1);
        assert_eq!(MockPeripheral::count(&peripheral.disconnects), 0);
        assert!(session.is_connected().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_read_gives_up_within_budget() {
        let peripheral = MockPeripheral::new();
        let session = session_for(&peripheral).await;
        peripheral.stalled.store(true, Ordering::SeqCst);
        let start = Instant::now();

        let result = session.read(UPPER_LIFT, None).await;

        assert!(matches!(result, Err(BedError::ReadFailed { attempts: 5, .. })));
        assert_eq!(MockPeripheral::count(&peripheral.reads), 5);
        // 5 x 10s I/O timeouts plus 4 x 5s delays
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(70));
        assert!(elapsed <= session.context.io_budget());

        // The lock is released, so the device recovers once it answers again
        peripheral.stalled.store(false, Ordering::SeqCst);
        assert_ok!(session.read(UPPER_LIFT, None).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_write_gives_up() {
        let peripheral = MockPeripheral::new();
        let session = session_for(&peripheral).await;
        peripheral.stalled.store(true, Ordering::SeqCst);

        let result = session.write(LIGHT, None, Percentage::FULL.to_payload()).await;

        assert!(matches!(result, Err(BedError::WriteFailed { attempts: 5, .. })));
        assert_eq!(peripheral.value(14), None);
    }

    #[test]
    fn test_io_budget() {
        let ctx = context(MockConnector::new());
        // 5 x (10s connect + 10s I/O) plus 4 x 5s delays
        assert_eq!(ctx.io_budget(), Duration::from_secs(120));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unexpected_layout_refuses_connect() {
        let peripheral = MockPeripheral::new();
        peripheral.set_uuid(5, bed_characteristic_uuid(0x1060));
        let connector = MockConnector::new().with(ADDRESS, Arc::clone(&peripheral));

        let result =
            DeviceSession::connect(&DeviceConfig::new("left", ADDRESS), context(connector)).await;

        assert!(matches!(
            result,
            Err(BedError::CharacteristicMismatch { position: 5, found: Some(_), .. })
        ));
        assert_eq!(MockPeripheral::count(&peripheral.connects), 1);
        assert_eq!(MockPeripheral::count(&peripheral.disconnects), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unexpected_layout_on_reconnect_stops_retrying() {
        let peripheral = MockPeripheral::new();
        let session = session_for(&peripheral).await;
        peripheral.set_uuid(14, Uuid::nil());
        peripheral.link_failures.store(1, Ordering::SeqCst);

        let result = session.write(LIGHT, None, Percentage::FULL.to_payload()).await;

        assert!(matches!(
            result,
            Err(BedError::CharacteristicMismatch { position: 14, .. })
        ));
        assert_eq!(MockPeripheral::count(&peripheral.connects), 2);
        assert_eq!(MockPeripheral::count(&peripheral.writes), 1);
        assert!(!session.is_connected().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_exhaustion_returns_error() {
        let peripheral = MockPeripheral::new();
        let session = session_for(&peripheral).await;
        peripheral.reads_broken.store(true, Ordering::SeqCst);

        let result = session.read(UPPER_LIFT, None).await;
        assert!(matches!(result, Err(BedError::ReadFailed { .. })));
    }

    #[tokio::test]
    async fn test_configuration_errors_are_not_retried() {
        let peripheral = MockPeripheral::new();
        let session = session_for(&peripheral).await;

        let unknown = session.write("headboard", None, Bytes::from_static(&[1])).await;
        assert!(matches!(unknown, Err(BedError::UnknownCharacteristic(_))));

        let bad_index = session.read(ZERO_G, Some(5)).await;
        assert!(matches!(bad_index, Err(BedError::IndexOutOfRange { .. })));

        assert_eq!(MockPeripheral::count(&peripheral.writes), 0);
        assert_eq!(MockPeripheral::count(&peripheral.reads), 0);
    }

    #[tokio::test]
    async fn test_position_outside_service_fails_immediately() {
        let peripheral = MockPeripheral::new();
        let connector = MockConnector::new().with(ADDRESS, Arc::clone(&peripheral));
        let mut ctx = context(connector);
        ctx.index = Arc::new(CharacteristicIndex::new([(
            "phantom",
            crate::characteristic::CharacteristicEntry::immediate(40),
        )]));
        let session = DeviceSession::connect(&DeviceConfig::new("left", ADDRESS), ctx)
            .await
            .unwrap();

        let result = session.read("phantom", None).await;
        assert!(matches!(result, Err(BedError::PositionOutOfRange { .. })));
        assert_eq!(MockPeripheral::count(&peripheral.reads), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hold_keeps_session_locked() {
        let peripheral = MockPeripheral::new();
        let session = Arc::new(session_for(&peripheral).await);
        let start = Instant::now();

        let writer = {
            let session = Arc::clone(&session);
            tokio::spawn(async move {
                session
                    .write_and_hold(
                        UPPER_LIFT,
                        None,
                        Percentage::FULL.to_payload(),
                        Duration::from_secs(30),
                    )
                    .await
            })
        };
        tokio::task::yield_now().await;

        let value = session.read(UPPER_LIFT, None).await.unwrap();
        assert_eq!(value, 100);
        assert!(start.elapsed() >= Duration::from_secs(30));
        assert_ok!(writer.await.unwrap());
    }

    #[tokio::test]
    async fn test_disconnect_releases_link() {
        let peripheral = MockPeripheral::new();
        let session = session_for(&peripheral).await;

        assert_ok!(session.disconnect().await);
        assert!(!session.is_connected().await);
        assert_eq!(MockPeripheral::count(&peripheral.disconnects), 1);

        // Next access reconnects lazily
        assert_ok!(session.read(LIGHT, None).await);
        assert!(session.is_connected().await);
        assert_err!(session.read("missing", None).await);
    }
}
