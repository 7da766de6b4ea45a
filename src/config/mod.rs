//! Configuration Management Module
//!
//! Cluster spec files and the engine settings they carry.

pub mod cluster_spec;
pub mod settings;

pub use cluster_spec::{
    clusters_dir, config_dir, expand_tilde, list_cluster_specs, list_cluster_specs_in,
    ClusterSpec, ClusterSpecError, ClusterSpecFile, HostEntry,
};
pub use settings::EngineSettings;
