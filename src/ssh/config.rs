//! SSH Configuration

use crate::config::EngineSettings;

/// SSH connection configuration for one cluster host
#[derive(Debug, Clone)]
pub struct SshConfig {
    /// Remote host address
    pub host: String,

    /// SSH port
    pub port: u16,

    /// Username for authentication
    pub username: String,

    /// Authentication method
    pub auth: AuthMethod,

    /// Connection timeout in seconds
    pub timeout_secs: u64,

    /// Keepalive interval in seconds (0 disables keepalive)
    pub keepalive_interval_secs: u64,

    /// Missed keepalives before the connection is dropped
    pub keepalive_max: usize,

    /// Terminal type announced in the PTY request
    pub term: String,

    /// Terminal columns
    pub cols: u32,

    /// Terminal rows
    pub rows: u32,
}

impl SshConfig {
    /// Build a config for one host, taking timeouts and PTY geometry from
    /// the engine settings
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        auth: AuthMethod,
        settings: &EngineSettings,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            auth,
            timeout_secs: settings.connect_timeout_secs,
            keepalive_interval_secs: settings.keepalive_interval_secs,
            keepalive_max: settings.keepalive_max,
            term: settings.term.clone(),
            cols: settings.cols,
            rows: settings.rows,
        }
    }
}

/// Authentication methods supported
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMethod {
    /// Password authentication
    Password { password: String },

    /// SSH key authentication
    Key {
        /// Path to private key file
        key_path: String,
        /// Optional passphrase for encrypted keys
        passphrase: Option<String>,
    },
}

impl AuthMethod {
    pub fn password(password: impl Into<String>) -> Self {
        Self::Password {
            password: password.into(),
        }
    }

    pub fn key(key_path: impl Into<String>, passphrase: Option<String>) -> Self {
        Self::Key {
            key_path: key_path.into(),
            passphrase,
        }
    }
}
