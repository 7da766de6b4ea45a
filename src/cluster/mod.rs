//! Cluster command engine
//!
//! Hosts, the current selection, one lazily opened shell per host, and the
//! serialized loop that routes input lines to them.

mod address;
mod dispatch;
mod engine;
mod error;
mod host;
mod notifier;
mod pool;
mod selection;

#[cfg(test)]
pub(crate) mod testing;

pub use address::{resolve, AddressError, Directive};
pub use dispatch::Dispatcher;
pub use engine::{CommandEngine, Diagnostic};
pub use error::EngineError;
pub use host::{ConnectionState, Host};
pub use notifier::{ChangeSignal, OutputNotifier};
pub use pool::{HostReceiver, Session, SessionPool};
pub use selection::Selection;
