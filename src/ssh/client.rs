//! SSH Client implementation using russh

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client;
use russh::keys::key::PrivateKeyWithHashAlg;
use russh::keys::{HashAlg, PublicKey};
use tracing::{debug, info};

use super::config::{AuthMethod, SshConfig};
use super::error::SshError;
use super::session::SshSession;
use super::transport::{Connection, Transport};
use crate::cluster::Host;
use crate::config::EngineSettings;

/// One-shot SSH connector for a single host
pub struct SshClient {
    config: SshConfig,
}

impl SshClient {
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }

    /// Connect to the SSH server and return an authenticated session
    pub async fn connect(self) -> Result<SshSession, SshError> {
        let addr = (self.config.host.clone(), self.config.port);

        info!(
            "Connecting to {}@{}:{}",
            self.config.username, self.config.host, self.config.port
        );

        let keepalive_interval = match self.config.keepalive_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        let ssh_config = client::Config {
            inactivity_timeout: None,
            keepalive_interval,
            keepalive_max: self.config.keepalive_max,
            ..Default::default()
        };

        let handler = ClientHandler::new(self.config.host.clone(), self.config.port);

        let mut handle = tokio::time::timeout(
            Duration::from_secs(self.config.timeout_secs),
            client::connect(Arc::new(ssh_config), addr, handler),
        )
        .await
        .map_err(|_| SshError::Timeout("Connection timed out".to_string()))?
        .map_err(|e| SshError::ConnectionFailed(e.to_string()))?;

        debug!("SSH handshake completed");

        let authenticated = match &self.config.auth {
            AuthMethod::Password { password } => handle
                .authenticate_password(&self.config.username, password)
                .await
                .map_err(|e| SshError::AuthenticationFailed(e.to_string()))?,
            AuthMethod::Key {
                key_path,
                passphrase,
            } => {
                let key = russh::keys::load_secret_key(key_path, passphrase.as_deref())
                    .map_err(|e| SshError::KeyError(format!("{}: {}", key_path, e)))?;

                let key_with_hash = PrivateKeyWithHashAlg::new(Arc::new(key), None);

                handle
                    .authenticate_publickey(&self.config.username, key_with_hash)
                    .await
                    .map_err(|e| SshError::AuthenticationFailed(e.to_string()))?
            }
        };

        if !authenticated.success() {
            return Err(SshError::AuthenticationFailed(
                "Authentication rejected by server".to_string(),
            ));
        }

        info!(
            "SSH authentication successful for {}@{}",
            self.config.username, self.config.host
        );

        Ok(SshSession::new(
            handle,
            self.config.term,
            self.config.cols,
            self.config.rows,
        ))
    }
}

/// Client handler for russh callbacks
///
/// Cluster nodes are usually short-lived machines whose keys change on every
/// rebuild, so server keys are accepted without a known_hosts lookup. The
/// fingerprint is logged at debug level.
pub struct ClientHandler {
    host: String,
    port: u16,
}

impl ClientHandler {
    pub fn new(host: String, port: u16) -> Self {
        Self { host, port }
    }
}

impl client::Handler for ClientHandler {
    type Error = SshError;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        debug!(
            "Accepting host key for {}:{} (fingerprint: {})",
            self.host,
            self.port,
            server_public_key.fingerprint(HashAlg::Sha256)
        );
        Ok(true)
    }
}

/// Production `Transport`: one russh connection per cluster host
pub struct SshTransport {
    settings: EngineSettings,
}

impl SshTransport {
    pub fn new(settings: EngineSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl Transport for SshTransport {
    async fn connect(&self, host: &Host) -> Result<Arc<dyn Connection>, SshError> {
        let config = SshConfig::new(
            host.address(),
            host.port(),
            host.login_user(),
            host.auth().clone(),
            &self.settings,
        );
        let session = SshClient::new(config).connect().await?;
        let connection = session.start();
        info!(
            "Host {} ({}) connected as {}",
            host.index(),
            host.address(),
            connection.id()
        );
        Ok(Arc::new(connection))
    }
}
