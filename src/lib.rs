//! clustersh - run shell commands on a cluster of SSH hosts in parallel
//!
//! Built on russh and tokio. The engine in [`cluster`] is transport-agnostic;
//! [`ssh::SshTransport`] is the production transport.

pub mod cluster;
pub mod config;
pub mod ssh;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize logging
///
/// `RUST_LOG` wins over `level`; with neither set the filter is `info`.
/// Logs go to stderr so they never mix with host output.
pub fn init_logging(level: Option<&str>) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level.unwrap_or("info")))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
