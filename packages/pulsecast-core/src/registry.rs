//! Controller-side node registry.
//!
//! In-memory list of configured playback nodes with their last-known
//! observed state. The registry tolerates concurrent readers and per-node
//! last-write-wins updates from the fan-out dispatcher; there is no
//! cross-node ordering guarantee.

use std::fmt;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::RegistryError;
use crate::protocol::DEFAULT_PORT;

/// Last-known health of a node, as observed by the most recent exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NodeHealth {
    /// No exchange has completed since the node was registered.
    Unknown,
    /// The last exchange produced a decodable response.
    Reachable,
    /// The last connection attempt was refused.
    Unreachable,
    /// The last exchange exceeded its deadline.
    TimedOut,
    /// Any other exchange failure (transport or malformed response).
    ErrorState,
}

impl fmt::Display for NodeHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Unknown => "Unknown",
            Self::Reachable => "OK",
            Self::Unreachable => "Refused",
            Self::TimedOut => "Timeout",
            Self::ErrorState => "Error",
        };
        f.write_str(label)
    }
}

/// Static node identity: where to reach it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Human-readable name. Duplicates are permitted; empty is not.
    pub name: String,
    pub hostname: String,
    #[serde(default = "NodeConfig::default_port")]
    pub port: u16,
}

impl NodeConfig {
    fn default_port() -> u16 {
        DEFAULT_PORT
    }

    /// Connect address in `host:port` form.
    pub fn address(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }
}

/// A registered node with its mutable observed state.
#[derive(Debug, Clone)]
pub struct NodeEntry {
    /// Runtime identity, regenerated on each load; never persisted.
    pub id: Uuid,
    pub config: NodeConfig,
    pub health: NodeHealth,
    pub is_playing: bool,
    /// Label of the last command issued to this node.
    pub last_command: Option<&'static str>,
}

impl NodeEntry {
    fn new(config: NodeConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            config,
            health: NodeHealth::Unknown,
            is_playing: false,
            last_command: None,
        }
    }
}

/// Concurrent registry of configured nodes.
///
/// Entries are replaced wholesale on load and mutated per-node by
/// [`record_outcome`](Self::record_outcome); the GUI or CLI reads
/// snapshots.
#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: RwLock<Vec<NodeEntry>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a node. Name and hostname must be non-empty; duplicate
    /// names are allowed.
    pub fn add(&self, config: NodeConfig) -> Result<Uuid, RegistryError> {
        if config.name.trim().is_empty() || config.hostname.trim().is_empty() {
            return Err(RegistryError::MissingIdentity);
        }
        let entry = NodeEntry::new(config);
        let id = entry.id;
        log::info!("Added node: {}", entry.config.name);
        self.nodes.write().push(entry);
        Ok(id)
    }

    /// Removes a node by runtime id. Returns whether an entry was removed.
    pub fn remove(&self, id: Uuid) -> bool {
        let mut nodes = self.nodes.write();
        let before = nodes.len();
        nodes.retain(|n| n.id != id);
        before != nodes.len()
    }

    /// Removes every node with the given name, returning how many matched.
    pub fn remove_by_name(&self, name: &str) -> usize {
        let mut nodes = self.nodes.write();
        let before = nodes.len();
        nodes.retain(|n| n.config.name != name);
        let removed = before - nodes.len();
        if removed > 0 {
            log::info!("Removed {removed} node(s) named {name}");
        }
        removed
    }

    /// Replaces the registry contents with freshly loaded configurations.
    ///
    /// Invalid entries (empty name or hostname) are skipped with a warning
    /// rather than failing the whole load.
    pub fn load(&self, configs: Vec<NodeConfig>) {
        let entries: Vec<NodeEntry> = configs
            .into_iter()
            .filter(|c| {
                let valid = !c.name.trim().is_empty() && !c.hostname.trim().is_empty();
                if !valid {
                    log::warn!("Skipping node entry with missing name or hostname");
                }
                valid
            })
            .map(NodeEntry::new)
            .collect();
        *self.nodes.write() = entries;
    }

    /// Point-in-time copy of all entries.
    pub fn snapshot(&self) -> Vec<NodeEntry> {
        self.nodes.read().clone()
    }

    /// Static configurations of all entries, in registration order.
    pub fn configs(&self) -> Vec<NodeConfig> {
        self.nodes.read().iter().map(|n| n.config.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }

    /// Records the outcome of one exchange against one node.
    ///
    /// Last writer wins; if the node was removed while the exchange was in
    /// flight the outcome is dropped silently.
    pub fn record_outcome(
        &self,
        id: Uuid,
        health: NodeHealth,
        is_playing: Option<bool>,
        command: &'static str,
    ) {
        let mut nodes = self.nodes.write();
        if let Some(entry) = nodes.iter_mut().find(|n| n.id == id) {
            entry.health = health;
            if let Some(is_playing) = is_playing {
                entry.is_playing = is_playing;
            } else if health != NodeHealth::Reachable {
                entry.is_playing = false;
            }
            entry.last_command = Some(command);
        }
    }
}
