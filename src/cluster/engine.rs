//! Command engine
//!
//! Owns the host list, the current selection and the session pool, and runs
//! the serialized command loop:
//!
//! ```text
//! submit(line) ──► queue ──► run_command_loop ──► resolve ──► Directive
//!                                                   │
//!                        ┌──────────────────────────┼───────────────────┐
//!                        ▼                          ▼                   ▼
//!                 ClearSelection/Select        Dispatch ──► Dispatcher  Noop
//!                 (selection + hidden flags)
//! ```
//!
//! Line N+1 is not resolved until line N's dispatch has returned. Errors from
//! a single line, panics included, are logged and broadcast as a
//! [`Diagnostic`]; the loop keeps going until [`CommandEngine::shutdown`].

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::FutureExt;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, mpsc, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::address::{resolve, Directive};
use super::dispatch::Dispatcher;
use super::error::{panic_message, EngineError};
use super::host::Host;
use super::notifier::OutputNotifier;
use super::pool::SessionPool;
use super::selection::Selection;
use crate::config::EngineSettings;
use crate::ssh::Transport;

const DIAGNOSTIC_CAPACITY: usize = 64;

/// Out-of-band report of a line that failed as a whole
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub command: String,
    pub error: String,
}

pub struct CommandEngine {
    hosts: Vec<Arc<Host>>,
    selection: Arc<RwLock<Selection>>,
    dispatcher: Dispatcher,
    notifier: Arc<dyn OutputNotifier>,
    queue_tx: mpsc::UnboundedSender<String>,
    queue_rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    diagnostics: broadcast::Sender<Diagnostic>,
    shutdown: CancellationToken,
    processing: AtomicBool,
    pending: AtomicUsize,
    idle: Notify,
}

impl CommandEngine {
    pub fn new(
        hosts: Vec<Arc<Host>>,
        transport: Arc<dyn Transport>,
        notifier: Arc<dyn OutputNotifier>,
        settings: &EngineSettings,
    ) -> Self {
        let pool = Arc::new(SessionPool::new(
            transport,
            notifier.clone(),
            settings.diagnostic_prefix.clone(),
        ));
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let (diagnostics, _) = broadcast::channel(DIAGNOSTIC_CAPACITY);

        Self {
            hosts,
            selection: Arc::new(RwLock::new(Selection::default())),
            dispatcher: Dispatcher::new(pool),
            notifier,
            queue_tx,
            queue_rx: Mutex::new(Some(queue_rx)),
            diagnostics,
            shutdown: CancellationToken::new(),
            processing: AtomicBool::new(false),
            pending: AtomicUsize::new(0),
            idle: Notify::new(),
        }
    }

    /// Every host, in cluster order
    pub fn hosts(&self) -> &[Arc<Host>] {
        &self.hosts
    }

    /// Snapshot of the current selection
    pub fn selection(&self) -> Selection {
        self.selection.read().clone()
    }

    /// Shared handle for readers that want to follow selection changes
    pub fn selection_handle(&self) -> Arc<RwLock<Selection>> {
        self.selection.clone()
    }

    pub fn pool(&self) -> &Arc<SessionPool> {
        self.dispatcher.pool()
    }

    /// Whether the loop is between dequeuing a line and finishing it
    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::SeqCst)
    }

    pub fn subscribe_diagnostics(&self) -> broadcast::Receiver<Diagnostic> {
        self.diagnostics.subscribe()
    }

    /// Queue a line for the command loop
    pub fn submit(&self, line: impl Into<String>) -> Result<(), EngineError> {
        if self.shutdown.is_cancelled() {
            return Err(EngineError::QueueClosed);
        }
        self.pending.fetch_add(1, Ordering::SeqCst);
        self.queue_tx.send(line.into()).map_err(|_| {
            self.finish_one();
            EngineError::QueueClosed
        })
    }

    /// Whether every submitted line has been handled
    pub fn is_idle(&self) -> bool {
        self.pending.load(Ordering::SeqCst) == 0
    }

    /// Wait until every submitted line has been handled
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.is_idle() {
                return;
            }
            notified.await;
        }
    }

    fn finish_one(&self) {
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }

    /// Clear every host buffer and notify once
    pub fn reset_buffers(&self) {
        for host in &self.hosts {
            host.clear_output();
        }
        self.notifier.notify();
    }

    /// Stop the loop before its next iteration. Sends already in flight
    /// run to completion.
    pub fn shutdown(&self) {
        info!("Command engine shutting down");
        self.shutdown.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Disconnect every cached session
    pub async fn close_sessions(&self) {
        self.pool().close_all().await;
    }

    /// Resolve one line and apply the result
    pub async fn handle_line(&self, line: &str) -> Result<(), EngineError> {
        let directive = {
            let selection = self.selection.read();
            resolve(line, &self.hosts, &selection)?
        };

        match directive {
            Directive::Noop => Ok(()),
            Directive::ClearSelection => {
                self.selection.write().clear();
                for host in &self.hosts {
                    host.set_hidden(false);
                }
                debug!("Selection cleared");
                self.notifier.notify();
                Ok(())
            }
            Directive::Select(targets) => {
                for host in &self.hosts {
                    let selected = targets.iter().any(|t| t.index() == host.index());
                    host.set_hidden(!selected);
                }
                let mut selection = self.selection.write();
                selection.set(targets);
                debug!("Selection set to {:?}", selection.indices());
                drop(selection);
                self.notifier.notify();
                Ok(())
            }
            Directive::Dispatch { targets, command } => {
                self.dispatcher.dispatch(&command, &targets).await
            }
        }
    }

    /// Drain the queue until shutdown
    ///
    /// Only one loop can run at a time; a second concurrent call returns
    /// `QueueClosed`.
    pub async fn run_command_loop(&self) -> Result<(), EngineError> {
        let mut rx = self
            .queue_rx
            .lock()
            .take()
            .ok_or(EngineError::QueueClosed)?;

        info!("Command loop started for {} hosts", self.hosts.len());

        loop {
            let line = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                line = rx.recv() => match line {
                    Some(line) => line,
                    None => break,
                },
            };

            self.processing.store(true, Ordering::SeqCst);
            let outcome = AssertUnwindSafe(self.handle_line(&line))
                .catch_unwind()
                .await;
            self.processing.store(false, Ordering::SeqCst);

            let result = match outcome {
                Ok(result) => result,
                Err(payload) => Err(EngineError::UnhandledFault(panic_message(payload))),
            };
            if let Err(e) = result {
                self.report(&line, &e);
            }
            self.finish_one();
        }

        let mut dropped = 0;
        while rx.try_recv().is_ok() {
            dropped += 1;
            self.finish_one();
        }
        if dropped > 0 {
            info!("Dropped {} queued lines on shutdown", dropped);
        }

        *self.queue_rx.lock() = Some(rx);
        info!("Command loop stopped");
        Ok(())
    }

    fn report(&self, line: &str, e: &EngineError) {
        error!("Command {:?} failed: {}", line, e);
        let _ = self.diagnostics.send(Diagnostic {
            command: line.to_string(),
            error: e.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::testing::{hosts, CountingNotifier, MockTransport};
    use std::time::Duration;

    fn engine(
        n: usize,
        transport: MockTransport,
    ) -> (Arc<CommandEngine>, Arc<MockTransport>, Arc<CountingNotifier>) {
        let transport = Arc::new(transport);
        let notifier = Arc::new(CountingNotifier::default());
        let engine = Arc::new(CommandEngine::new(
            hosts(n),
            transport.clone(),
            notifier.clone(),
            &EngineSettings::default(),
        ));
        (engine, transport, notifier)
    }

    fn hidden(engine: &CommandEngine) -> Vec<usize> {
        engine
            .hosts()
            .iter()
            .filter(|h| h.is_hidden())
            .map(|h| h.index())
            .collect()
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn test_plain_command_goes_to_every_host() {
        let (engine, transport, _) = engine(5, MockTransport::new());

        engine.handle_line("uptime").await.unwrap();

        assert_eq!(transport.written_hosts(), vec![1, 2, 3, 4, 5]);
        assert!(engine.selection().is_empty());
    }

    #[tokio::test]
    async fn test_select_hides_the_rest() {
        let (engine, transport, notifier) = engine(5, MockTransport::new());

        engine.handle_line("@1,3").await.unwrap();

        assert_eq!(engine.selection().indices(), vec![1, 3]);
        assert_eq!(hidden(&engine), vec![2, 4, 5]);
        assert_eq!(notifier.count(), 1);
        assert!(transport.writes().is_empty());

        engine.handle_line("df -h").await.unwrap();
        assert_eq!(transport.written_hosts(), vec![1, 3]);
    }

    #[tokio::test]
    async fn test_addressed_command_keeps_selection() {
        let (engine, transport, _) = engine(5, MockTransport::new());

        engine.handle_line("@2").await.unwrap();
        engine.handle_line("@1,3 whoami").await.unwrap();

        assert_eq!(transport.written_hosts(), vec![1, 3]);
        assert_eq!(engine.selection().indices(), vec![2]);
        assert_eq!(hidden(&engine), vec![1, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_clear_selection_is_idempotent() {
        let (engine, transport, notifier) = engine(4, MockTransport::new());

        engine.handle_line("@4").await.unwrap();
        engine.handle_line("@*").await.unwrap();
        let after_first = (engine.selection().indices(), hidden(&engine));
        engine.handle_line("@").await.unwrap();
        let after_second = (engine.selection().indices(), hidden(&engine));

        assert_eq!(after_first, (vec![], vec![]));
        assert_eq!(after_first, after_second);
        assert_eq!(notifier.count(), 3);
        assert!(transport.writes().is_empty());
    }

    #[tokio::test]
    async fn test_parse_error_changes_nothing() {
        let (engine, transport, notifier) = engine(5, MockTransport::new());
        engine.handle_line("@2,4").await.unwrap();
        engine.hosts()[0].append_output(b"previous output");
        let notified = notifier.count();

        let err = engine.handle_line("@1,x ls").await.unwrap_err();

        assert!(matches!(err, EngineError::AddressParse(_)));
        assert!(transport.writes().is_empty());
        assert_eq!(engine.selection().indices(), vec![2, 4]);
        assert_eq!(hidden(&engine), vec![1, 3, 5]);
        assert_eq!(engine.hosts()[0].output_text(), "previous output");
        assert_eq!(notifier.count(), notified);
    }

    #[tokio::test]
    async fn test_blank_line_is_noop() {
        let (engine, transport, notifier) = engine(2, MockTransport::new());

        engine.handle_line("   ").await.unwrap();

        assert!(transport.writes().is_empty());
        assert_eq!(notifier.count(), 0);
        assert!(engine.pool().is_empty());
    }

    #[tokio::test]
    async fn test_reset_buffers() {
        let (engine, _, notifier) = engine(3, MockTransport::new());
        for host in engine.hosts() {
            host.append_output(b"stale");
        }

        engine.reset_buffers();

        assert!(engine.hosts().iter().all(|h| h.output_len() == 0));
        assert_eq!(notifier.count(), 1);
    }

    #[tokio::test]
    async fn test_loop_survives_errors_and_reports_them() {
        let (engine, transport, _) = engine(3, MockTransport::new().panic_connect(2));
        let mut diagnostics = engine.subscribe_diagnostics();

        let runner = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.run_command_loop().await })
        };

        engine.submit("@1,x ls").unwrap();
        engine.submit("@2 boom").unwrap();
        engine.submit("@1,3 hostname").unwrap();

        let first = diagnostics.recv().await.unwrap();
        assert_eq!(first.command, "@1,x ls");
        assert!(first.error.contains("x"));

        let second = diagnostics.recv().await.unwrap();
        assert_eq!(second.command, "@2 boom");
        assert!(second.error.contains("Unhandled fault"));

        wait_until(|| transport.written_hosts() == vec![1, 3]).await;

        engine.shutdown();
        runner.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_lines_run_in_order() {
        let (engine, transport, _) =
            engine(2, MockTransport::new().with_connect_delay(Duration::from_millis(10)));

        let runner = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.run_command_loop().await })
        };

        for command in ["one", "two", "three"] {
            engine.submit(format!("@1 {}", command)).unwrap();
        }
        wait_until(|| transport.writes().len() == 3).await;

        let texts: Vec<String> = transport.writes().into_iter().map(|(_, t)| t).collect();
        assert_eq!(texts, vec!["one\n", "two\n", "three\n"]);

        engine.shutdown();
        runner.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_stops_the_loop() {
        let (engine, transport, _) = engine(2, MockTransport::new());

        let runner = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.run_command_loop().await })
        };

        engine.shutdown();
        tokio::time::timeout(Duration::from_secs(1), runner)
            .await
            .expect("loop exited")
            .unwrap()
            .unwrap();

        assert!(engine.is_shut_down());
        assert!(matches!(engine.submit("uptime"), Err(EngineError::QueueClosed)));
        assert!(transport.writes().is_empty());
    }

    #[tokio::test]
    async fn test_single_loop_at_a_time() {
        let (engine, _, _) = engine(1, MockTransport::new());

        let runner = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.run_command_loop().await })
        };
        wait_until(|| engine.queue_rx.lock().is_none()).await;

        assert!(matches!(
            engine.run_command_loop().await,
            Err(EngineError::QueueClosed)
        ));

        engine.shutdown();
        runner.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_wait_idle_after_queue_drains() {
        let (engine, transport, _) =
            engine(3, MockTransport::new().with_connect_delay(Duration::from_millis(10)));
        assert!(engine.is_idle());

        let runner = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.run_command_loop().await })
        };

        engine.submit("@1 echo a").unwrap();
        engine.submit("@2,3 echo b").unwrap();
        assert!(!engine.is_idle());

        tokio::time::timeout(Duration::from_secs(2), engine.wait_idle())
            .await
            .expect("queue drained");
        assert_eq!(transport.written_hosts(), vec![1, 2, 3]);

        engine.shutdown();
        runner.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_releases_queued_lines() {
        let (engine, transport, _) =
            engine(2, MockTransport::new().with_connect_delay(Duration::from_millis(50)));

        let runner = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.run_command_loop().await })
        };

        engine.submit("@1 first").unwrap();
        engine.submit("@1 second").unwrap();
        engine.submit("@2 third").unwrap();
        wait_until(|| engine.is_processing()).await;

        engine.shutdown();
        runner.await.unwrap().unwrap();

        tokio::time::timeout(Duration::from_millis(500), engine.wait_idle())
            .await
            .expect("queued lines released");
        assert!(engine.is_idle());
        assert_eq!(transport.writes(), vec![(1, "first\n".to_string())]);
    }
}
