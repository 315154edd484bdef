//! Device registry: owns configured devices, their connections and logs.
//!
//! The registry is the public surface of the connectivity side. Expected
//! failures (unknown device, failed connect, failed send) surface as
//! boolean/sentinel returns, never as panics or errors; per-device trouble
//! stays isolated to that device.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::codec::parse_shorthand;
use crate::connection::{ConnectionEvent, DeviceConnection};
use crate::types::{
    DeviceConfig, DeviceEvent, DeviceStatus, Direction, Message, MessageLogEntry, RegistryConfig,
};

/// Bounded wait applied by [`DeviceRegistry::shutdown`].
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

struct DeviceEntry {
    config: DeviceConfig,
    is_connected: bool,
    status: String,
    message_count: u64,
    last_connection_time: Option<DateTime<Utc>>,
    last_auto_message: Option<String>,
    last_auto_message_time: Option<DateTime<Utc>>,
}

impl DeviceEntry {
    fn new(config: DeviceConfig) -> Self {
        Self {
            config,
            is_connected: false,
            status: "Disconnected".to_string(),
            message_count: 0,
            last_connection_time: None,
            last_auto_message: None,
            last_auto_message_time: None,
        }
    }
}

struct RegistryInner {
    config: RegistryConfig,
    devices: parking_lot::RwLock<HashMap<String, DeviceEntry>>,
    connections: parking_lot::Mutex<HashMap<String, Arc<DeviceConnection>>>,
    logs: parking_lot::Mutex<HashMap<String, VecDeque<MessageLogEntry>>>,
    event_tx: mpsc::Sender<DeviceEvent>,
    event_rx: parking_lot::Mutex<Option<mpsc::Receiver<DeviceEvent>>>,
    conn_tx: mpsc::Sender<ConnectionEvent>,
    cancel: CancellationToken,
}

impl RegistryInner {
    fn publish(&self, event: DeviceEvent) {
        // Fire-and-forget toward the consuming layer; a slow or absent
        // subscriber must not stall connection handling.
        if let Err(e) = self.event_tx.try_send(event) {
            debug!(error = %e, "device event dropped");
        }
    }

    fn push_log(&self, device_id: &str, entry: MessageLogEntry) {
        let mut logs = self.logs.lock();
        let log = logs.entry(device_id.to_string()).or_default();
        log.push_front(entry);
        log.truncate(self.config.max_log_entries);
    }
}

/// Registry of configured devices and their live connections.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct DeviceRegistry {
    inner: Arc<RegistryInner>,
}

impl DeviceRegistry {
    /// Create a registry and start its event relay.
    pub fn new(config: RegistryConfig) -> Self {
        let (event_tx, event_rx) = mpsc::channel(config.event_channel_capacity);
        let (conn_tx, conn_rx) = mpsc::channel(config.event_channel_capacity);

        let inner = Arc::new(RegistryInner {
            config,
            devices: parking_lot::RwLock::new(HashMap::new()),
            connections: parking_lot::Mutex::new(HashMap::new()),
            logs: parking_lot::Mutex::new(HashMap::new()),
            event_tx,
            event_rx: parking_lot::Mutex::new(Some(event_rx)),
            conn_tx,
            cancel: CancellationToken::new(),
        });

        tokio::spawn(relay_loop(Arc::clone(&inner), conn_rx));
        Self { inner }
    }

    /// Subscribe to registry events.
    ///
    /// This can only be called once. Returns None if already subscribed.
    pub fn subscribe(&self) -> Option<mpsc::Receiver<DeviceEvent>> {
        self.inner.event_rx.lock().take()
    }

    /// Register a device. Idempotent by `device_id`: an already registered
    /// id keeps its existing entry and log.
    pub fn add_device(&self, config: DeviceConfig) {
        let device_id = config.device_id.clone();
        let mut devices = self.inner.devices.write();
        if devices.contains_key(&device_id) {
            debug!(%device_id, "device already registered");
            return;
        }
        devices.insert(device_id.clone(), DeviceEntry::new(config));
        self.inner.logs.lock().entry(device_id.clone()).or_default();
        info!(%device_id, "device registered");
    }

    /// Remove a device, disconnecting it first.
    pub async fn remove_device(&self, device_id: &str) {
        self.disconnect_device(device_id).await;
        self.inner.devices.write().remove(device_id);
        self.inner.logs.lock().remove(device_id);
        info!(%device_id, "device removed");
    }

    /// Registered device ids.
    pub fn device_ids(&self) -> Vec<String> {
        self.inner.devices.read().keys().cloned().collect()
    }

    /// Connect a device according to its configured role.
    ///
    /// Any existing connection is torn down first. Returns false for an
    /// unknown or disabled id, or when the socket operation fails.
    pub async fn connect_device(&self, device_id: &str) -> bool {
        let config = match self.inner.devices.read().get(device_id) {
            Some(entry) => entry.config.clone(),
            None => {
                warn!(%device_id, "connect requested for unknown device");
                return false;
            }
        };

        if !config.enabled {
            warn!(%device_id, "connect requested for disabled device");
            return false;
        }

        let existing = self.inner.connections.lock().remove(device_id);
        if let Some(existing) = existing {
            existing.disconnect().await;
        }

        let connection = Arc::new(DeviceConnection::new(
            device_id,
            config.role,
            self.inner.conn_tx.clone(),
        ));

        match connection
            .connect(&config.host, config.port, config.connect_timeout())
            .await
        {
            Ok(()) => {
                self.inner
                    .connections
                    .lock()
                    .insert(device_id.to_string(), connection);
                if let Some(entry) = self.inner.devices.write().get_mut(device_id) {
                    entry.last_connection_time = Some(Utc::now());
                }
                info!(%device_id, mode = %config.role, "device connected");
                true
            }
            Err(e) => {
                warn!(%device_id, error = %e, "device connect failed");
                false
            }
        }
    }

    /// Connect every enabled device with `auto_connect` set. Returns the
    /// number of successful connects.
    pub async fn connect_auto_devices(&self) -> usize {
        let targets: Vec<String> = {
            let devices = self.inner.devices.read();
            devices
                .values()
                .filter(|e| e.config.enabled && e.config.auto_connect)
                .map(|e| e.config.device_id.clone())
                .collect()
        };

        let mut connected = 0;
        for device_id in targets {
            if self.connect_device(&device_id).await {
                connected += 1;
            }
        }
        connected
    }

    /// Disconnect a device. A second call is a no-op.
    pub async fn disconnect_device(&self, device_id: &str) {
        let connection = self.inner.connections.lock().remove(device_id);
        if let Some(connection) = connection {
            connection.disconnect().await;
            info!(%device_id, "device disconnected");
        }
    }

    /// Disconnect all devices concurrently and wait for completion.
    pub async fn disconnect_all(&self) {
        let connections: Vec<Arc<DeviceConnection>> =
            self.inner.connections.lock().drain().map(|(_, c)| c).collect();

        join_all(connections.iter().map(|c| c.disconnect())).await;
    }

    /// Send a message to a device.
    ///
    /// The message is stamped with the device's session identity. Every
    /// connection that failed the write gets its own failed
    /// [`MessageLogEntry`] naming the client, then an aggregate entry
    /// (success or failure) is recorded newest-first before returning,
    /// regardless of outcome.
    pub async fn send_message(
        &self,
        device_id: &str,
        message: Message,
        timeout_ms: u64,
        retry_count: u32,
    ) -> bool {
        let config = match self.inner.devices.read().get(device_id) {
            Some(entry) => entry.config.clone(),
            None => {
                warn!(%device_id, "send requested for unknown device");
                return false;
            }
        };

        let message = message.with_session(config.device_id_value, config.session_id_value);
        let connection = self.inner.connections.lock().get(device_id).cloned();

        let (success, error) = match connection {
            Some(connection) => {
                let report = connection.send(&message, timeout_ms, retry_count).await;

                // Failed clients are recorded on their own, independent of
                // the aggregate outcome below.
                for conn_id in report.failures() {
                    self.inner.push_log(
                        device_id,
                        MessageLogEntry::failed(
                            Direction::Outgoing,
                            message.clone(),
                            format!("client {conn_id}: send failed after retries"),
                        ),
                    );
                }

                let error = if report.delivered() {
                    None
                } else if report.deliveries.is_empty() {
                    Some("not connected".to_string())
                } else {
                    Some("send failed after retries".to_string())
                };
                (report.delivered(), error)
            }
            None => (false, Some("not connected".to_string())),
        };

        let entry = match &error {
            None => MessageLogEntry::ok(Direction::Outgoing, message),
            Some(e) => MessageLogEntry::failed(Direction::Outgoing, message, e.clone()),
        };
        self.inner.push_log(device_id, entry);
        success
    }

    /// Send a `SxFy:content` shorthand string to a device.
    ///
    /// Parsing is fail-closed: an unparseable string rejects the send,
    /// records a failed log entry and returns false. The literal input is
    /// never transmitted. Odd functions are marked as requiring a response,
    /// per the request/reply pairing convention.
    pub async fn send_shorthand(
        &self,
        device_id: &str,
        text: &str,
        is_user_interactive: bool,
        timeout_ms: u64,
        retry_count: u32,
    ) -> bool {
        let role = match self.inner.devices.read().get(device_id) {
            Some(entry) => entry.config.role,
            None => {
                warn!(%device_id, "send requested for unknown device");
                return false;
            }
        };

        match parse_shorthand(text) {
            Ok((stream, function, content)) => {
                let mut message = Message::outgoing(
                    stream,
                    function,
                    content,
                    function % 2 == 1,
                    device_id,
                    role,
                );
                if is_user_interactive {
                    message = message.user_interactive();
                }
                self.send_message(device_id, message, timeout_ms, retry_count)
                    .await
            }
            Err(e) => {
                warn!(%device_id, input = %text, error = %e, "shorthand rejected");
                let placeholder =
                    Message::outgoing(0, 0, text, false, device_id, role);
                self.inner.push_log(
                    device_id,
                    MessageLogEntry::failed(Direction::Outgoing, placeholder, e.to_string()),
                );
                false
            }
        }
    }

    /// Status projection for one device. Unknown ids yield the sentinel
    /// status instead of an error.
    pub fn device_status(&self, device_id: &str) -> DeviceStatus {
        let devices = self.inner.devices.read();
        let Some(entry) = devices.get(device_id) else {
            return DeviceStatus::unknown(device_id);
        };

        let client_count = self
            .inner
            .connections
            .lock()
            .get(device_id)
            .map(|c| c.client_count())
            .unwrap_or(0);

        DeviceStatus {
            device_id: entry.config.device_id.clone(),
            device_name: entry.config.device_name.clone(),
            mode: entry.config.role.label().to_string(),
            is_connected: entry.is_connected,
            status: entry.status.clone(),
            message_count: entry.message_count,
            client_count,
            last_connection_time: entry.last_connection_time,
            last_auto_message: entry.last_auto_message.clone(),
            last_auto_message_time: entry.last_auto_message_time,
        }
    }

    /// Status snapshot for every registered device.
    pub fn all_device_statuses(&self) -> Vec<DeviceStatus> {
        let ids: Vec<String> = self.inner.devices.read().keys().cloned().collect();
        ids.iter().map(|id| self.device_status(id)).collect()
    }

    /// Snapshot of a device's message log, newest first.
    pub fn message_log(&self, device_id: &str) -> Vec<MessageLogEntry> {
        self.inner
            .logs
            .lock()
            .get(device_id)
            .map(|log| log.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Clear a device's message log.
    pub fn clear_message_log(&self, device_id: &str) {
        if let Some(log) = self.inner.logs.lock().get_mut(device_id) {
            log.clear();
        }
    }

    /// Bound listener address of a Server-role device, once connected.
    pub fn device_local_addr(&self, device_id: &str) -> Option<SocketAddr> {
        self.inner
            .connections
            .lock()
            .get(device_id)
            .and_then(|c| c.local_addr())
    }

    /// Disconnect everything with a bounded wait, stop the relay and clear
    /// all registry maps.
    pub async fn shutdown(&self) {
        if timeout(SHUTDOWN_TIMEOUT, self.disconnect_all()).await.is_err() {
            warn!("shutdown: disconnect did not finish within bound");
        }
        self.inner.cancel.cancel();
        self.inner.devices.write().clear();
        self.inner.logs.lock().clear();
        info!("registry shut down");
    }
}

async fn relay_loop(inner: Arc<RegistryInner>, mut conn_rx: mpsc::Receiver<ConnectionEvent>) {
    loop {
        let event = tokio::select! {
            _ = inner.cancel.cancelled() => break,
            event = conn_rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        match event {
            ConnectionEvent::StatusChanged {
                device_id,
                is_connected,
            } => {
                let status = if is_connected { "Connected" } else { "Disconnected" };
                let mode = {
                    let mut devices = inner.devices.write();
                    let Some(entry) = devices.get_mut(&device_id) else {
                        continue;
                    };
                    entry.is_connected = is_connected;
                    entry.status = status.to_string();
                    entry.config.role.label().to_string()
                };

                inner.publish(DeviceEvent::StatusChanged {
                    device_id,
                    is_connected,
                    status: status.to_string(),
                    mode,
                    timestamp: Utc::now(),
                });
            }

            ConnectionEvent::MessageReceived { device_id, message } => {
                {
                    let mut devices = inner.devices.write();
                    let Some(entry) = devices.get_mut(&device_id) else {
                        continue;
                    };
                    entry.message_count += 1;
                    entry.last_auto_message = Some(message.content.clone());
                    entry.last_auto_message_time = Some(message.timestamp);
                }

                inner.push_log(
                    &device_id,
                    MessageLogEntry::ok(Direction::Incoming, message.clone()),
                );

                inner.publish(DeviceEvent::MessageReceived {
                    device_id,
                    content: message.content.clone(),
                    timestamp: message.timestamp,
                    is_user_interactive: message.is_user_interactive,
                    message,
                });
            }
        }
    }
    debug!("registry relay stopped");
}
