//! Current host selection
//!
//! The set of hosts that plain commands go to. Empty means every host.

use std::sync::Arc;

use super::host::Host;

#[derive(Debug, Clone, Default)]
pub struct Selection {
    hosts: Vec<Arc<Host>>,
}

impl Selection {
    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    pub fn hosts(&self) -> &[Arc<Host>] {
        &self.hosts
    }

    pub fn indices(&self) -> Vec<usize> {
        self.hosts.iter().map(|h| h.index()).collect()
    }

    pub fn contains(&self, index: usize) -> bool {
        self.hosts.iter().any(|h| h.index() == index)
    }

    /// Replace the selection. Later duplicates of an index are dropped.
    pub fn set(&mut self, hosts: Vec<Arc<Host>>) {
        let mut unique: Vec<Arc<Host>> = Vec::with_capacity(hosts.len());
        for host in hosts {
            if !unique.iter().any(|h| h.index() == host.index()) {
                unique.push(host);
            }
        }
        self.hosts = unique;
    }

    pub fn clear(&mut self) {
        self.hosts.clear();
    }

    /// Hosts a plain command goes to: the selection, or `all` when empty
    pub fn targets(&self, all: &[Arc<Host>]) -> Vec<Arc<Host>> {
        if self.hosts.is_empty() {
            all.to_vec()
        } else {
            self.hosts.clone()
        }
    }
}
