//! Engine error types

use std::any::Any;

use thiserror::Error;

use super::address::AddressError;
use crate::ssh::SshError;

#[derive(Error, Debug)]
pub enum EngineError {
    /// Malformed `@` index list; the line is dropped
    #[error(transparent)]
    AddressParse(#[from] AddressError),

    /// Connect, shell creation or write failed for one host
    #[error("Host {index}: {source}")]
    Connection {
        index: usize,
        #[source]
        source: SshError,
    },

    /// A host's session went away asynchronously
    #[error("Host {index}: connection lost")]
    TransportClosed {
        index: usize,
        reason: Option<String>,
    },

    /// Anything else that escaped handling of a single command
    #[error("Unhandled fault: {0}")]
    UnhandledFault(String),

    #[error("Command queue closed")]
    QueueClosed,
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        return s.to_string();
    }
    if let Some(s) = payload.downcast_ref::<String>() {
        return s.clone();
    }
    "panic with non-string payload".to_string()
}
