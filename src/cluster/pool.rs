//! Session pool
//!
//! One connection and one interactive shell per host index, opened lazily on
//! the first command that targets the host and reused afterwards.
//!
//! # Locking
//!
//! ```text
//! slots: DashMap<index, Arc<tokio::Mutex<SessionSlot>>>
//!                          │
//!                          └── held across connect/create_session awaits,
//!                              so two callers for the same index never
//!                              open two connections
//! ```
//!
//! Different indices never contend. The DashMap shard lock is only held long
//! enough to clone the slot `Arc`.
//!
//! Entries are not evicted when a connection drops. A lost host keeps its
//! dead session and later writes fail with `Disconnected`, which the
//! dispatcher surfaces in the host buffer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::error::EngineError;
use super::host::{ConnectionState, Host};
use super::notifier::OutputNotifier;
use crate::ssh::{Connection, SessionEvents, ShellChannel, SshError, Transport};

/// A host's cached (connection, shell channel) pair
#[derive(Clone)]
pub struct Session {
    pub connection: Arc<dyn Connection>,
    pub channel: Arc<dyn ShellChannel>,
}

impl Session {
    /// Whether both halves are the same objects as `other`'s
    pub fn same_as(&self, other: &Session) -> bool {
        Arc::ptr_eq(&self.connection, &other.connection) && Arc::ptr_eq(&self.channel, &other.channel)
    }
}

#[derive(Default)]
struct SessionSlot {
    connection: Option<Arc<dyn Connection>>,
    channel: Option<Arc<dyn ShellChannel>>,
    receiver: Option<Arc<HostReceiver>>,
}

pub struct SessionPool {
    transport: Arc<dyn Transport>,
    notifier: Arc<dyn OutputNotifier>,
    diagnostic_prefix: String,
    slots: DashMap<usize, Arc<Mutex<SessionSlot>>>,
}

impl SessionPool {
    pub fn new(
        transport: Arc<dyn Transport>,
        notifier: Arc<dyn OutputNotifier>,
        diagnostic_prefix: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            notifier,
            diagnostic_prefix: diagnostic_prefix.into(),
            slots: DashMap::new(),
        }
    }

    pub fn notifier(&self) -> &Arc<dyn OutputNotifier> {
        &self.notifier
    }

    pub fn diagnostic_prefix(&self) -> &str {
        &self.diagnostic_prefix
    }

    /// Return the host's session, connecting and opening a shell first if
    /// needed.
    ///
    /// Idempotent per host index: once both halves exist, every call returns
    /// the same pair. Failures are returned as-is, with no retry.
    pub async fn ensure_session(&self, host: &Arc<Host>) -> Result<Session, SshError> {
        let index = host.index();
        let slot = self.slots.entry(index).or_default().value().clone();
        let mut slot = slot.lock().await;

        let connection = match slot.connection.clone() {
            Some(connection) => connection,
            None => {
                debug!("No connection for host {}, connecting", index);
                match self.transport.connect(host).await {
                    Ok(connection) => {
                        host.set_connection_state(ConnectionState::Connected);
                        slot.connection = Some(connection.clone());
                        connection
                    }
                    Err(e) => {
                        warn!("Connecting to host {} ({}) failed: {}", index, host.address(), e);
                        host.set_connection_state(ConnectionState::Failed(e.to_string()));
                        return Err(e);
                    }
                }
            }
        };

        let channel = match slot.channel.clone() {
            Some(channel) => channel,
            None => {
                let receiver = Arc::new(HostReceiver::new(
                    host.clone(),
                    self.notifier.clone(),
                    self.diagnostic_prefix.clone(),
                ));
                match connection.create_session(receiver.clone()).await {
                    Ok(channel) => {
                        info!("Shell ready on host {} ({})", index, host.address());
                        host.set_connection_state(ConnectionState::Connected);
                        slot.channel = Some(channel.clone());
                        slot.receiver = Some(receiver);
                        channel
                    }
                    Err(e) => {
                        warn!("Opening shell on host {} failed: {}", index, e);
                        host.set_connection_state(ConnectionState::Failed(e.to_string()));
                        return Err(e);
                    }
                }
            }
        };

        Ok(Session {
            connection,
            channel,
        })
    }

    /// The cached pair for `index`, if both halves exist
    pub async fn cached(&self, index: usize) -> Option<Session> {
        let slot = self.slots.get(&index)?.value().clone();
        let slot = slot.lock().await;
        match (&slot.connection, &slot.channel) {
            (Some(connection), Some(channel)) => Some(Session {
                connection: connection.clone(),
                channel: channel.clone(),
            }),
            _ => None,
        }
    }

    /// Number of host indices with a cached connection or an attempt in
    /// progress
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Drop every shell and disconnect every connection
    pub async fn close_all(&self) {
        let slots: Vec<(usize, Arc<Mutex<SessionSlot>>)> = self
            .slots
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        self.slots.clear();

        for (index, slot) in slots {
            let mut slot = slot.lock().await;
            if let Some(receiver) = slot.receiver.take() {
                receiver.silence();
            }
            slot.channel.take();
            if let Some(connection) = slot.connection.take() {
                debug!("Disconnecting host {}", index);
                connection.disconnect().await;
            }
        }

        info!("Session pool closed");
    }
}

/// Receive handler bound to one host's shell
///
/// Appends everything the shell sends to the host buffer and fires the
/// notifier. A connection loss is reported into the buffer once.
pub struct HostReceiver {
    host: Arc<Host>,
    notifier: Arc<dyn OutputNotifier>,
    prefix: String,
    lost: AtomicBool,
}

impl HostReceiver {
    pub fn new(host: Arc<Host>, notifier: Arc<dyn OutputNotifier>, prefix: String) -> Self {
        Self {
            host,
            notifier,
            prefix,
            lost: AtomicBool::new(false),
        }
    }

    /// Stop reporting a loss; used when the pool closes the session itself
    pub fn silence(&self) {
        self.lost.store(true, Ordering::SeqCst);
    }
}

impl SessionEvents for HostReceiver {
    fn data_received(&self, data: &[u8]) {
        if self.host.append_output(data) {
            self.notifier.notify();
        }
    }

    fn connection_lost(&self, error: Option<&str>) {
        if self.lost.swap(true, Ordering::SeqCst) {
            return;
        }

        let closed = EngineError::TransportClosed {
            index: self.host.index(),
            reason: error.map(str::to_string),
        };
        warn!(
            "{} ({}): {}",
            closed,
            self.host.address(),
            error.unwrap_or("closed by peer")
        );

        let mut message = String::from("Connection lost. ");
        if let Some(error) = error {
            message.push_str("SSH session error: ");
            message.push_str(error);
        }
        self.host
            .set_connection_state(ConnectionState::Failed("Connection lost".to_string()));
        self.host.append_diagnostic(&self.prefix, &message);
        self.notifier.notify();
    }
}
