//! Cluster host
//!
//! A `Host` is one addressable remote target. Its identity fields are fixed
//! when the cluster spec is loaded; the output buffer, hidden flag and
//! connection state change while the engine runs.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};

use crate::ssh::AuthMethod;

/// Connection state of a host, as seen by the session pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection attempted yet
    NotConnected,
    /// Connection (and possibly a shell) is up
    Connected,
    /// Connect, shell creation or the connection itself failed
    Failed(String),
}

pub struct Host {
    index: usize,
    address: String,
    port: u16,
    login_user: String,
    auth: AuthMethod,

    /// Raw bytes received from the remote shell, plus engine diagnostics
    output: Mutex<Vec<u8>>,

    /// Presentation hint, set by selection directives
    hidden: AtomicBool,

    state: RwLock<ConnectionState>,
}

impl Host {
    pub fn new(
        index: usize,
        address: impl Into<String>,
        port: u16,
        login_user: impl Into<String>,
        auth: AuthMethod,
    ) -> Self {
        Self {
            index,
            address: address.into(),
            port,
            login_user: login_user.into(),
            auth,
            output: Mutex::new(Vec::new()),
            hidden: AtomicBool::new(false),
            state: RwLock::new(ConnectionState::NotConnected),
        }
    }

    /// Stable addressing index; also the session cache key
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn login_user(&self) -> &str {
        &self.login_user
    }

    pub fn auth(&self) -> &AuthMethod {
        &self.auth
    }

    /// Append bytes to the output buffer.
    ///
    /// Returns whether the buffer is non-empty afterwards, which is the
    /// condition for firing the output notifier.
    pub fn append_output(&self, data: &[u8]) -> bool {
        let mut output = self.output.lock();
        output.extend_from_slice(data);
        !output.is_empty()
    }

    /// Append an engine-generated message, tagged with `prefix`
    pub fn append_diagnostic(&self, prefix: &str, message: &str) {
        let text = format!("\n{}: {}", prefix, message);
        self.append_output(text.as_bytes());
    }

    /// Clear the output buffer before a fresh command
    pub fn clear_output(&self) {
        self.output.lock().clear();
    }

    /// Copy of the raw output bytes
    pub fn output_bytes(&self) -> Vec<u8> {
        self.output.lock().clone()
    }

    /// Output decoded as UTF-8, replacing invalid sequences
    pub fn output_text(&self) -> String {
        String::from_utf8_lossy(&self.output.lock()).into_owned()
    }

    /// Output bytes from `offset` on, or `None` if the buffer is shorter
    /// than `offset` (it was cleared in between)
    pub fn output_since(&self, offset: usize) -> Option<Vec<u8>> {
        let output = self.output.lock();
        output.get(offset..).map(|tail| tail.to_vec())
    }

    pub fn output_len(&self) -> usize {
        self.output.lock().len()
    }

    pub fn is_hidden(&self) -> bool {
        self.hidden.load(Ordering::SeqCst)
    }

    pub fn set_hidden(&self, hidden: bool) {
        self.hidden.store(hidden, Ordering::SeqCst);
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state.read().clone()
    }

    pub fn set_connection_state(&self, state: ConnectionState) {
        *self.state.write() = state;
    }
}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host")
            .field("index", &self.index)
            .field("address", &self.address)
            .field("port", &self.port)
            .field("login_user", &self.login_user)
            .field("hidden", &self.is_hidden())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host() -> Host {
        Host::new(1, "10.0.0.1", 22, "ubuntu", AuthMethod::key("/keys/lab", None))
    }

    #[test]
    fn test_append_and_clear() {
        let host = host();
        assert_eq!(host.output_len(), 0);
        assert!(!host.append_output(b""));
        assert!(host.append_output(b"hello "));
        assert!(host.append_output(b""));
        host.append_output(b"world");
        assert_eq!(host.output_text(), "hello world");

        host.clear_output();
        assert!(host.output_bytes().is_empty());
    }

    #[test]
    fn test_split_utf8_is_kept_intact() {
        let host = host();
        let bytes = "héllo".as_bytes();
        host.append_output(&bytes[..2]);
        host.append_output(&bytes[2..]);
        assert_eq!(host.output_text(), "héllo");
    }

    #[test]
    fn test_output_since() {
        let host = host();
        host.append_output(b"abcdef");
        assert_eq!(host.output_since(2).unwrap(), b"cdef");
        assert_eq!(host.output_since(6).unwrap(), b"");
        assert!(host.output_since(7).is_none());
    }

    #[test]
    fn test_diagnostic_and_state() {
        let host = host();
        host.append_diagnostic("clustersh", "Connection lost. ");
        assert_eq!(host.output_text(), "\nclustersh: Connection lost. ");

        assert_eq!(host.connection_state(), ConnectionState::NotConnected);
        host.set_connection_state(ConnectionState::Failed("boom".to_string()));
        assert_eq!(
            host.connection_state(),
            ConnectionState::Failed("boom".to_string())
        );

        assert!(!host.is_hidden());
        host.set_hidden(true);
        assert!(host.is_hidden());
    }
}
