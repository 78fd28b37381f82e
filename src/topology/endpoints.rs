//! Endpoint directory: every destination a run can target.

use super::Zone;
use std::collections::BTreeMap;

/// A running test agent, one per node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Agent {
    pub name: String,
    pub node_name: String,
    pub pod_address: String,
    pub host_address: String,
}

impl Agent {
    pub fn zone(&self) -> Zone {
        Zone::from_node_name(&self.node_name)
    }
}

/// A reachable destination, annotated with its zone and a display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub address: String,
    pub zone: Zone,
    pub name: String,
}

/// The fixed destination outside the cluster used to check internet egress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalAnchor {
    pub address: String,
    pub name: String,
}

impl Default for ExternalAnchor {
    fn default() -> Self {
        Self {
            address: "1.1.1.1".to_string(),
            name: "cloudflare".to_string(),
        }
    }
}

/// Destinations keyed by address, iterated in address order.
#[derive(Debug, Clone, Default)]
pub struct EndpointDirectory {
    entries: BTreeMap<String, Endpoint>,
}

impl EndpointDirectory {
    /// Register each agent's pod address and host address, plus the anchor.
    ///
    /// Colliding addresses (agents sharing a host, host-network pods) keep
    /// the last registration; both describe the same node.
    pub fn build(agents: &[Agent], anchor: &ExternalAnchor) -> Self {
        let mut directory = Self::default();
        for agent in agents {
            let zone = agent.zone();
            directory.insert(&agent.pod_address, zone, &agent.name);
            directory.insert(&agent.host_address, zone, &agent.node_name);
        }
        directory.insert(&anchor.address, Zone::Internet, &anchor.name);
        tracing::debug!(endpoints = directory.len(), "Endpoint directory built");
        directory
    }

    fn insert(&mut self, address: &str, zone: Zone, name: &str) {
        self.entries.insert(
            address.to_string(),
            Endpoint {
                address: address.to_string(),
                zone,
                name: name.to_string(),
            },
        );
    }

    pub fn get(&self, address: &str) -> Option<&Endpoint> {
        self.entries.get(address)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Endpoint> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
