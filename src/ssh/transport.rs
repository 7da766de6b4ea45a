//! Transport seam
//!
//! The command engine never touches russh directly. It talks to these traits,
//! which cover exactly what it needs from a remote-shell library:
//!
//! - `Transport::connect` opens one authenticated connection for a host
//! - `Connection::create_session` opens one interactive shell on it and binds
//!   a receive handler
//! - `ShellChannel::write` sends raw text to that shell
//!
//! `SshTransport` (see `client.rs`) is the production implementation. Tests
//! plug in an in-memory transport.

use std::sync::Arc;

use async_trait::async_trait;

use super::error::SshError;
use crate::cluster::Host;

/// Receive-side callbacks for one interactive session
///
/// Called from the session's pump task, possibly concurrently with the
/// command loop.
pub trait SessionEvents: Send + Sync {
    /// Inbound bytes from the remote shell (stdout and stderr merged)
    fn data_received(&self, data: &[u8]);

    /// The session or its connection went away. `error` carries the
    /// underlying failure text when there is one.
    fn connection_lost(&self, error: Option<&str>);
}

/// Opens connections to cluster hosts
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn connect(&self, host: &Host) -> Result<Arc<dyn Connection>, SshError>;
}

/// One live, authenticated connection
#[async_trait]
pub trait Connection: Send + Sync {
    /// Open an interactive shell bound to `events`
    async fn create_session(
        &self,
        events: Arc<dyn SessionEvents>,
    ) -> Result<Arc<dyn ShellChannel>, SshError>;

    /// Whether the connection is still up
    fn is_connected(&self) -> bool;

    /// Close the connection
    async fn disconnect(&self);
}

/// Write half of an interactive shell
#[async_trait]
pub trait ShellChannel: Send + Sync {
    async fn write(&self, text: &str) -> Result<(), SshError>;
}
