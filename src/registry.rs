use std::{collections::HashSet, sync::Arc};
use tracing::{error, info, warn};

use crate::{
    ble::Connector,
    error::{BedError, Result},
    session::{DeviceSession, SessionContext},
    types::{BedConfig, DeviceConfig},
};

/// The fixed set of named device sessions
///
/// Populated once at startup and never resized. A session stays registered
/// while its link is down; it reconnects on next access.
pub struct SessionRegistry {
    sessions: Vec<Arc<DeviceSession>>,
}

impl SessionRegistry {
    /// Connect every configured device, one after another
    ///
    /// Devices are connected sequentially so a failure surfaces before
    /// anything is exposed to callers.
    ///
    /// # Errors
    ///
    /// Returns [`BedError::NoDevices`] or [`BedError::DuplicateDevice`] for a
    /// bad device list, and [`BedError::ConnectionExhausted`] if any device
    /// cannot be reached. Sessions connected before the failure are
    /// disconnected first.
    pub async fn initialize_all(
        devices: &[DeviceConfig],
        context: &SessionContext,
    ) -> Result<Self> {
        validate(devices)?;

        let mut registry = Self {
            sessions: Vec::with_capacity(devices.len()),
        };

        for device in devices {
            match DeviceSession::connect(device, context.clone()).await {
                Ok(session) => registry.sessions.push(Arc::new(session)),
                Err(e) => {
                    error!("[{}] Startup connection failed: {}", device.name, e);
                    registry.shutdown().await;
                    return Err(e);
                }
            }
        }

        info!("Connected {} device(s)", registry.sessions.len());
        Ok(registry)
    }

    /// Build the session context from `config` and connect every device
    ///
    /// # Errors
    ///
    /// Same as [`SessionRegistry::initialize_all`].
    pub async fn from_config(config: &BedConfig, connector: Arc<dyn Connector>) -> Result<Self> {
        let context = SessionContext {
            connector,
            service: config.service_uuid,
            index: Arc::new(config.characteristics.clone()),
            connect_retry: config.connect_retry,
            io_retry: config.io_retry,
            connect_timeout: config.connect_timeout,
            io_timeout: config.io_timeout,
        };
        Self::initialize_all(&config.devices, &context).await
    }

    /// Look a session up by device name
    ///
    /// # Errors
    ///
    /// Returns [`BedError::UnknownDevice`] if `name` is not registered.
    pub fn get(&self, name: &str) -> Result<&Arc<DeviceSession>> {
        self.sessions
            .iter()
            .find(|s| s.name() == name)
            .ok_or_else(|| BedError::UnknownDevice(name.to_string()))
    }

    /// All sessions, in configuration order
    #[must_use]
    pub fn sessions(&self) -> &[Arc<DeviceSession>] {
        &self.sessions
    }

    /// The first configured device
    #[must_use]
    pub fn primary(&self) -> Option<&Arc<DeviceSession>> {
        self.sessions.first()
    }

    /// Device names, in configuration order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sessions.iter().map(|s| s.name())
    }

    /// Number of registered devices
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no devices are registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Disconnect every session; failures are logged, not returned
    pub async fn shutdown(&self) {
        for session in &self.sessions {
            if let Err(e) = session.disconnect().await {
                warn!("[{}] Failed to disconnect: {}", session.name(), e);
            }
        }
        info!("Bluetooth devices disconnected");
    }
}

fn validate(devices: &[DeviceConfig]) -> Result<()> {
    if devices.is_empty() {
        return Err(BedError::NoDevices);
    }

    let mut seen = HashSet::new();
    for device in devices {
        if !seen.insert(device.name.as_str()) {
            return Err(BedError::DuplicateDevice(device.name.clone()));
        }
    }
    Ok(())
}
