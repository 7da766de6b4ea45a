//! Command fan-out
//!
//! One task per target host: ensure the session, write the command. The call
//! returns once every task has finished. Per-host failures end up in that
//! host's buffer; only a task that died outright is reported to the caller.

use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use super::error::{panic_message, EngineError};
use super::host::Host;
use super::pool::SessionPool;

pub struct Dispatcher {
    pool: Arc<SessionPool>,
}

impl Dispatcher {
    pub fn new(pool: Arc<SessionPool>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Arc<SessionPool> {
        &self.pool
    }

    /// Send `command` plus a newline to every host in `targets`
    ///
    /// Does not wait for the remote command to finish.
    pub async fn dispatch(&self, command: &str, targets: &[Arc<Host>]) -> Result<(), EngineError> {
        if targets.is_empty() {
            debug!("No targets for {:?}, skipping", command);
            return Ok(());
        }

        let line = Arc::new(format!("{}\n", command));
        let mut tasks = JoinSet::new();

        for host in targets {
            let pool = self.pool.clone();
            let host = host.clone();
            let line = line.clone();
            tasks.spawn(async move {
                if let Err(e) = send_to_host(&pool, &host, &line).await {
                    warn!("{}", e);
                    host.append_diagnostic(pool.diagnostic_prefix(), &e.to_string());
                    pool.notifier().notify();
                }
            });
        }

        let mut fault: Option<EngineError> = None;
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("Dispatch task for {:?} failed: {}", command, e);
                if fault.is_none() {
                    fault = Some(EngineError::UnhandledFault(join_error_message(e)));
                }
            }
        }

        match fault {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

async fn send_to_host(pool: &SessionPool, host: &Arc<Host>, line: &str) -> Result<(), EngineError> {
    let connection_error = |source| EngineError::Connection {
        index: host.index(),
        source,
    };

    let session = pool.ensure_session(host).await.map_err(connection_error)?;
    session.channel.write(line).await.map_err(connection_error)
}

fn join_error_message(e: tokio::task::JoinError) -> String {
    if e.is_panic() {
        return panic_message(e.into_panic());
    }
    e.to_string()
}
