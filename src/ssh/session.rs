//! SSH Session management
//!
//! An `SshSession` is an authenticated handle that has not been started yet.
//! Starting it hands the handle to its owner task and yields an
//! `SshConnection`, which opens interactive shells on demand.

use std::sync::Arc;

use async_trait::async_trait;
use russh::client::{Handle, Msg};
use russh::{Channel, ChannelMsg};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info};

use super::client::ClientHandler;
use super::error::SshError;
use super::handle_owner::{spawn_handle_owner_task, HandleController};
use super::transport::{Connection, SessionEvents, ShellChannel};

/// Commands that can be sent to a shell channel task
#[derive(Debug)]
pub enum SessionCommand {
    /// Data to send to SSH stdin
    Data(Vec<u8>),
    /// Close the session
    Close,
}

/// Authenticated SSH handle, before the owner task is spawned
pub struct SshSession {
    handle: Handle<ClientHandler>,
    term: String,
    cols: u32,
    rows: u32,
}

impl SshSession {
    pub fn new(handle: Handle<ClientHandler>, term: String, cols: u32, rows: u32) -> Self {
        Self {
            handle,
            term,
            cols,
            rows,
        }
    }

    /// Start the Handle Owner Task and return the live connection
    pub fn start(self) -> SshConnection {
        let id = uuid::Uuid::new_v4().to_string();
        let controller = spawn_handle_owner_task(self.handle, id.clone());
        SshConnection {
            id,
            controller,
            term: self.term,
            cols: self.cols,
            rows: self.rows,
        }
    }
}

/// A started SSH connection
pub struct SshConnection {
    id: String,
    controller: HandleController,
    term: String,
    cols: u32,
    rows: u32,
}

impl SshConnection {
    pub fn id(&self) -> &str {
        &self.id
    }
}

#[async_trait]
impl Connection for SshConnection {
    async fn create_session(
        &self,
        events: Arc<dyn SessionEvents>,
    ) -> Result<Arc<dyn ShellChannel>, SshError> {
        info!("Opening shell channel on connection {}", self.id);

        let channel = self.controller.open_session_channel().await?;

        debug!("Channel opened, requesting PTY");

        channel
            .request_pty(false, &self.term, self.cols, self.rows, 0, 0, &[])
            .await
            .map_err(|e| SshError::ChannelError(format!("PTY request failed: {}", e)))?;

        debug!("PTY allocated, requesting shell");

        channel
            .request_shell(false)
            .await
            .map_err(|e| SshError::ChannelError(format!("Shell request failed: {}", e)))?;

        info!("Interactive shell started on connection {}", self.id);

        let (cmd_tx, cmd_rx) = mpsc::channel::<SessionCommand>(1024);
        let disconnect_rx = self.controller.subscribe_disconnect();
        tokio::spawn(pump_channel(
            self.id.clone(),
            channel,
            cmd_rx,
            disconnect_rx,
            events,
        ));

        Ok(Arc::new(SshShellChannel { cmd_tx }))
    }

    fn is_connected(&self) -> bool {
        self.controller.is_connected()
    }

    async fn disconnect(&self) {
        self.controller.disconnect().await;
    }
}

/// Shell channel task: forwards writes to the channel and delivers
/// everything the channel produces to `events`.
///
/// Reports `connection_lost` exactly once, unless the shell was closed
/// locally.
async fn pump_channel(
    id: String,
    mut channel: Channel<Msg>,
    mut cmd_rx: mpsc::Receiver<SessionCommand>,
    mut disconnect_rx: broadcast::Receiver<()>,
    events: Arc<dyn SessionEvents>,
) {
    debug!("Shell channel task started for connection {}", id);

    let lost: Option<Option<String>> = loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(SessionCommand::Data(data)) => {
                        if let Err(e) = channel.data(&data[..]).await {
                            error!("Failed to send data to SSH channel: {}", e);
                            break Some(Some(e.to_string()));
                        }
                    }
                    Some(SessionCommand::Close) | None => {
                        info!("Shell channel closed locally on connection {}", id);
                        let _ = channel.eof().await;
                        break None;
                    }
                }
            }

            msg = channel.wait() => {
                match msg {
                    Some(ChannelMsg::Data { data }) => {
                        events.data_received(&data);
                    }
                    Some(ChannelMsg::ExtendedData { data, ext }) => {
                        // stderr
                        if ext == 1 {
                            events.data_received(&data);
                        }
                    }
                    Some(ChannelMsg::Eof) => {
                        info!("SSH channel EOF on connection {}", id);
                        break Some(None);
                    }
                    Some(ChannelMsg::Close) | None => {
                        info!("SSH channel closed on connection {}", id);
                        break Some(None);
                    }
                    Some(ChannelMsg::ExitStatus { exit_status }) => {
                        info!("Remote shell exited with status {} on connection {}", exit_status, id);
                    }
                    Some(_) => {}
                }
            }

            _ = disconnect_rx.recv() => {
                info!("SSH connection {} went away", id);
                break Some(Some("SSH connection closed".to_string()));
            }
        }
    };

    if let Some(reason) = lost {
        events.connection_lost(reason.as_deref());
    }

    debug!("Shell channel task terminated for connection {}", id);
}

/// Write half of an interactive shell, backed by the channel task
pub struct SshShellChannel {
    cmd_tx: mpsc::Sender<SessionCommand>,
}

#[async_trait]
impl ShellChannel for SshShellChannel {
    async fn write(&self, text: &str) -> Result<(), SshError> {
        self.cmd_tx
            .send(SessionCommand::Data(text.as_bytes().to_vec()))
            .await
            .map_err(|_| SshError::Disconnected)
    }
}

impl Drop for SshShellChannel {
    fn drop(&mut self) {
        let _ = self.cmd_tx.try_send(SessionCommand::Close);
    }
}
