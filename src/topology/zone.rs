//! Availability-zone tags derived from node naming conventions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Zone tag attached to agents, endpoints and test cases.
///
/// Nodes whose name carries no zone marker are `Unzoned`. They still take
/// part in unfiltered runs but can never be selected by an explicit filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Zone {
    #[serde(rename = "AZ1")]
    Az1,
    #[serde(rename = "AZ2")]
    Az2,
    #[serde(rename = "AZ3")]
    Az3,
    /// Destinations outside the cluster.
    #[serde(rename = "Internet")]
    Internet,
    #[serde(rename = "")]
    Unzoned,
}

/// Marker tokens embedded in node names, checked in order.
const ZONE_MARKERS: [(&str, Zone); 3] = [
    ("-z1-", Zone::Az1),
    ("-z2-", Zone::Az2),
    ("-z3-", Zone::Az3),
];

impl Zone {
    /// Derive the zone of a node from its name, e.g. `worker-z2-ab12` is AZ2.
    pub fn from_node_name(node: &str) -> Self {
        ZONE_MARKERS
            .iter()
            .find(|(marker, _)| node.contains(marker))
            .map(|(_, zone)| *zone)
            .unwrap_or(Zone::Unzoned)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Zone::Az1 => "AZ1",
            Zone::Az2 => "AZ2",
            Zone::Az3 => "AZ3",
            Zone::Internet => "Internet",
            Zone::Unzoned => "",
        }
    }

    /// True for the availability zones of the cluster itself.
    pub fn is_cluster(&self) -> bool {
        matches!(self, Zone::Az1 | Zone::Az2 | Zone::Az3)
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown zone filter '{0}' (expected all, AZ1, AZ2, AZ3 or Internet)")]
pub struct ParseZoneFilterError(String);

/// Source or destination selector for a run. `All` is the wildcard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ZoneFilter {
    #[default]
    All,
    Only(Zone),
}

impl ZoneFilter {
    pub fn matches(&self, zone: Zone) -> bool {
        match self {
            ZoneFilter::All => true,
            ZoneFilter::Only(wanted) => *wanted == zone,
        }
    }
}

impl FromStr for ZoneFilter {
    type Err = ParseZoneFilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(ZoneFilter::All),
            "az1" => Ok(ZoneFilter::Only(Zone::Az1)),
            "az2" => Ok(ZoneFilter::Only(Zone::Az2)),
            "az3" => Ok(ZoneFilter::Only(Zone::Az3)),
            "internet" => Ok(ZoneFilter::Only(Zone::Internet)),
            _ => Err(ParseZoneFilterError(s.to_string())),
        }
    }
}

impl fmt::Display for ZoneFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ZoneFilter::All => f.write_str("all"),
            ZoneFilter::Only(zone) => zone.fmt(f),
        }
    }
}
