//! In-memory transport and helpers for engine tests

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::host::Host;
use super::notifier::OutputNotifier;
use crate::ssh::{AuthMethod, Connection, SessionEvents, ShellChannel, SshError, Transport};

/// Hosts indexed 1..=n
pub fn hosts(n: usize) -> Vec<Arc<Host>> {
    (1..=n)
        .map(|i| {
            Arc::new(Host::new(
                i,
                format!("10.0.0.{}", i),
                22,
                "ubuntu",
                AuthMethod::key("/keys/test", None),
            ))
        })
        .collect()
}

/// Notifier that counts calls
#[derive(Default)]
pub struct CountingNotifier {
    count: AtomicUsize,
}

impl CountingNotifier {
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

impl OutputNotifier for CountingNotifier {
    fn notify(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct Recorded {
    connects: HashMap<usize, usize>,
    sessions: HashMap<usize, usize>,
    writes: Vec<(usize, String)>,
    events: HashMap<usize, Arc<dyn SessionEvents>>,
    fail_session_once: HashSet<usize>,
    lost: HashSet<usize>,
}

/// Transport that records what the engine does with it
#[derive(Default)]
pub struct MockTransport {
    recorded: Arc<Mutex<Recorded>>,
    fail_connect: HashSet<usize>,
    panic_connect: HashSet<usize>,
    connect_delay: Option<Duration>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connecting to `index` fails with `ConnectionFailed`
    pub fn fail_connect(mut self, index: usize) -> Self {
        self.fail_connect.insert(index);
        self
    }

    /// Connecting to `index` panics
    pub fn panic_connect(mut self, index: usize) -> Self {
        self.panic_connect.insert(index);
        self
    }

    /// The first shell opened on `index` fails with `ChannelError`
    pub fn fail_session_once(self, index: usize) -> Self {
        self.recorded.lock().fail_session_once.insert(index);
        self
    }

    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = Some(delay);
        self
    }

    pub fn connect_count(&self, index: usize) -> usize {
        self.recorded.lock().connects.get(&index).copied().unwrap_or(0)
    }

    pub fn session_count(&self, index: usize) -> usize {
        self.recorded.lock().sessions.get(&index).copied().unwrap_or(0)
    }

    /// Every write in arrival order, as (host index, text)
    pub fn writes(&self) -> Vec<(usize, String)> {
        self.recorded.lock().writes.clone()
    }

    /// Host indices that received a write, sorted
    pub fn written_hosts(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = self.writes().into_iter().map(|(i, _)| i).collect();
        indices.sort_unstable();
        indices
    }

    /// The receive handler bound to `index`'s shell
    pub fn events(&self, index: usize) -> Option<Arc<dyn SessionEvents>> {
        self.recorded.lock().events.get(&index).cloned()
    }

    /// Drop `index`'s connection from the remote side: later writes fail
    /// with `Disconnected` and the receive handler hears about it
    pub fn lose_connection(&self, index: usize, reason: &str) {
        let events = {
            let mut recorded = self.recorded.lock();
            recorded.lost.insert(index);
            recorded.events.get(&index).cloned()
        };
        if let Some(events) = events {
            events.connection_lost(Some(reason));
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, host: &Host) -> Result<Arc<dyn Connection>, SshError> {
        let index = host.index();
        *self.recorded.lock().connects.entry(index).or_default() += 1;

        if let Some(delay) = self.connect_delay {
            tokio::time::sleep(delay).await;
        }
        if self.panic_connect.contains(&index) {
            panic!("transport blew up for host {}", index);
        }
        if self.fail_connect.contains(&index) {
            return Err(SshError::ConnectionFailed(format!(
                "{}: connection refused",
                host.address()
            )));
        }

        Ok(Arc::new(MockConnection {
            index,
            recorded: self.recorded.clone(),
            connected: AtomicBool::new(true),
        }))
    }
}

struct MockConnection {
    index: usize,
    recorded: Arc<Mutex<Recorded>>,
    connected: AtomicBool,
}

#[async_trait]
impl Connection for MockConnection {
    async fn create_session(
        &self,
        events: Arc<dyn SessionEvents>,
    ) -> Result<Arc<dyn ShellChannel>, SshError> {
        let mut recorded = self.recorded.lock();
        *recorded.sessions.entry(self.index).or_default() += 1;
        if recorded.fail_session_once.remove(&self.index) {
            return Err(SshError::ChannelError("pty refused".to_string()));
        }
        recorded.events.insert(self.index, events);
        Ok(Arc::new(MockChannel {
            index: self.index,
            recorded: self.recorded.clone(),
        }))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

struct MockChannel {
    index: usize,
    recorded: Arc<Mutex<Recorded>>,
}

#[async_trait]
impl ShellChannel for MockChannel {
    async fn write(&self, text: &str) -> Result<(), SshError> {
        let mut recorded = self.recorded.lock();
        if recorded.lost.contains(&self.index) {
            return Err(SshError::Disconnected);
        }
        recorded.writes.push((self.index, text.to_string()));
        Ok(())
    }
}
