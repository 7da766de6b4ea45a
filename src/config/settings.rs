//! Engine settings
//!
//! Knobs that apply to every host of a cluster. Read from the optional
//! `settings` object of a cluster file; every field has a default.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// TCP connect + SSH handshake timeout in seconds
    pub connect_timeout_secs: u64,

    /// SSH keepalive interval in seconds (0 disables keepalive)
    pub keepalive_interval_secs: u64,

    /// Missed keepalives before a connection is dropped
    pub keepalive_max: usize,

    /// Terminal type for the PTY request
    pub term: String,

    /// PTY columns
    pub cols: u32,

    /// PTY rows
    pub rows: u32,

    /// Tag used in diagnostics the engine writes into host buffers
    pub diagnostic_prefix: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 30,
            keepalive_interval_secs: 30,
            keepalive_max: 3,
            term: "xterm-256color".to_string(),
            cols: 200,
            rows: 50,
            diagnostic_prefix: "clustersh".to_string(),
        }
    }
}
