//! SSH module - connections and interactive shells for cluster hosts
//!
//! The engine only sees the traits in `transport`. Everything russh-specific
//! lives behind `SshTransport`.

mod client;
mod config;
mod error;
mod handle_owner;
mod session;
pub mod transport;

pub use client::{ClientHandler, SshClient, SshTransport};
pub use config::{AuthMethod, SshConfig};
pub use error::SshError;
pub use handle_owner::{spawn_handle_owner_task, HandleCommand, HandleController};
pub use session::{SessionCommand, SshConnection, SshSession, SshShellChannel};
pub use transport::{Connection, SessionEvents, ShellChannel, Transport};
