//! Cluster topology as seen by the harness: agents, zones and the
//! destinations they can be tested against.

pub mod endpoints;
pub mod zone;

pub use self::endpoints::{Agent, Endpoint, EndpointDirectory, ExternalAnchor};
pub use self::zone::{Zone, ZoneFilter};
