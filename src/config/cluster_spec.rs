//! Cluster specification files
//!
//! A cluster file is a JSON document listing the hosts of one cluster plus
//! shared login defaults. Files live in `~/.clustersh/clusters/`.
//!
//! ```json
//! {
//!   "name": "lab",
//!   "login_user": "ubuntu",
//!   "ssh_key_path": "~/.ssh/id_ed25519",
//!   "hosts": [
//!     { "address": "10.0.0.1" },
//!     { "index": 7, "address": "10.0.0.2", "login_user": "admin", "port": 2222 }
//!   ]
//! }
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info};

use super::settings::EngineSettings;
use crate::cluster::Host;
use crate::ssh::AuthMethod;

const DEFAULT_PORT: u16 = 22;

/// Cluster spec loading errors
#[derive(Debug, thiserror::Error)]
pub enum ClusterSpecError {
    #[error("Failed to determine config directory")]
    NoConfigDir,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Cluster spec has no hosts")]
    NoHosts,

    #[error("Host index {0} is used more than once")]
    DuplicateIndex(usize),

    #[error("No login user for host {address}")]
    MissingLoginUser { address: String },

    #[error("No ssh_key_path or password for host {address}")]
    MissingCredentials { address: String },
}

/// On-disk shape of a cluster file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterSpecFile {
    #[serde(default)]
    pub name: Option<String>,

    /// Default login user for every host
    #[serde(default)]
    pub login_user: Option<String>,

    /// Default private key for every host
    #[serde(default)]
    pub ssh_key_path: Option<String>,

    /// Default password for every host (used only when no key is set)
    #[serde(default)]
    pub password: Option<String>,

    /// Default SSH port
    #[serde(default)]
    pub port: Option<u16>,

    #[serde(default)]
    pub settings: EngineSettings,

    pub hosts: Vec<HostEntry>,
}

/// One host line of a cluster file; unset fields fall back to the cluster
/// defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostEntry {
    /// Addressing index; defaults to the 1-based position in `hosts`
    #[serde(default)]
    pub index: Option<usize>,

    pub address: String,

    #[serde(default)]
    pub login_user: Option<String>,

    #[serde(default)]
    pub ssh_key_path: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default)]
    pub port: Option<u16>,
}

/// A loaded cluster: ordered hosts and the settings that apply to them
#[derive(Debug, Clone)]
pub struct ClusterSpec {
    pub name: String,
    pub path: Option<PathBuf>,
    pub hosts: Vec<Arc<Host>>,
    pub settings: EngineSettings,
}

impl ClusterSpec {
    /// Load and validate a cluster file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ClusterSpecError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).await?;
        let file: ClusterSpecFile = serde_json::from_str(&contents)?;

        let fallback_name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "cluster".to_string());

        let mut spec = Self::from_file(file, fallback_name)?;
        spec.path = Some(path.to_path_buf());

        info!(
            "Loaded cluster {} with {} hosts from {:?}",
            spec.name,
            spec.hosts.len(),
            path
        );
        Ok(spec)
    }

    /// Build the host list from an already-parsed file
    pub fn from_file(
        file: ClusterSpecFile,
        fallback_name: impl Into<String>,
    ) -> Result<Self, ClusterSpecError> {
        if file.hosts.is_empty() {
            return Err(ClusterSpecError::NoHosts);
        }

        let mut seen = HashSet::new();
        let mut hosts = Vec::with_capacity(file.hosts.len());

        for (position, entry) in file.hosts.into_iter().enumerate() {
            let index = entry.index.unwrap_or(position + 1);
            if !seen.insert(index) {
                return Err(ClusterSpecError::DuplicateIndex(index));
            }

            let login_user = entry
                .login_user
                .or_else(|| file.login_user.clone())
                .ok_or_else(|| ClusterSpecError::MissingLoginUser {
                    address: entry.address.clone(),
                })?;

            let key_path = entry.ssh_key_path.or_else(|| file.ssh_key_path.clone());
            let password = entry.password.or_else(|| file.password.clone());
            let auth = match (key_path, password) {
                (Some(key_path), _) => AuthMethod::key(expand_tilde(&key_path), None),
                (None, Some(password)) => AuthMethod::password(password),
                (None, None) => {
                    return Err(ClusterSpecError::MissingCredentials {
                        address: entry.address,
                    })
                }
            };

            let port = entry.port.or(file.port).unwrap_or(DEFAULT_PORT);

            debug!("Host {} -> {}@{}:{}", index, login_user, entry.address, port);
            hosts.push(Arc::new(Host::new(
                index,
                entry.address,
                port,
                login_user,
                auth,
            )));
        }

        Ok(Self {
            name: file.name.unwrap_or_else(|| fallback_name.into()),
            path: None,
            hosts,
            settings: file.settings,
        })
    }
}

/// Get the clustersh configuration directory (`~/.clustersh`)
pub fn config_dir() -> Result<PathBuf, ClusterSpecError> {
    dirs::home_dir()
        .map(|home| home.join(".clustersh"))
        .ok_or(ClusterSpecError::NoConfigDir)
}

/// Get the directory holding cluster files
pub fn clusters_dir() -> Result<PathBuf, ClusterSpecError> {
    Ok(config_dir()?.join("clusters"))
}

/// List the cluster files in the default directory
///
/// A missing directory yields an empty list.
pub async fn list_cluster_specs() -> Result<Vec<PathBuf>, ClusterSpecError> {
    list_cluster_specs_in(&clusters_dir()?).await
}

/// List `*.json` files in `dir`, sorted by path
pub async fn list_cluster_specs_in(dir: &Path) -> Result<Vec<PathBuf>, ClusterSpecError> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "json") {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

/// Expand a leading `~/` to the home directory
pub fn expand_tilde(path: &str) -> String {
    match path.strip_prefix("~/") {
        Some(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest).to_string_lossy().into_owned(),
            None => path.to_string(),
        },
        None => path.to_string(),
    }
}
