//! Test matrix generation.
//!
//! Enumerates (source, destination, probe) triples for the discovered agents
//! and the active zone filters. Ids are handed out in emission order, so a
//! fixed agent order always yields the same id-to-case mapping.

pub mod case;

pub use self::case::{Batch, CaseId, Outcome, ProbeKind, TestCase};

use crate::config::{ProbeSettings, RunOptions};
use crate::topology::{Agent, Endpoint, EndpointDirectory, Zone};

/// Hands out case ids starting at 1.
#[derive(Debug)]
struct IdSequence(CaseId);

impl IdSequence {
    fn new() -> Self {
        Self(1)
    }

    fn next(&mut self) -> CaseId {
        let id = self.0;
        self.0 += 1;
        id
    }
}

/// Build the batch for a fresh run.
///
/// Latency and HTTP cases run from every agent in the source zone to every
/// endpoint in the destination zone. Bandwidth cases pair agents directly.
pub fn generate(
    agents: &[Agent],
    endpoints: &EndpointDirectory,
    options: &RunOptions,
    probes: &ProbeSettings,
) -> Batch {
    let mut ids = IdSequence::new();
    let mut cases = Vec::new();

    for agent in agents {
        let from_az = agent.zone();
        if !options.from_zone.matches(from_az) {
            continue;
        }
        for endpoint in endpoints.iter() {
            if !options.to_zone.matches(endpoint.zone) {
                continue;
            }
            if options.is_enabled(ProbeKind::Latency) {
                cases.push(endpoint_case(
                    &mut ids,
                    agent,
                    endpoint,
                    ProbeKind::Latency,
                    endpoint.address.clone(),
                ));
            }
            if options.is_enabled(ProbeKind::Http) {
                if let Some(target) = http_target(endpoint, probes.http_port) {
                    cases.push(endpoint_case(&mut ids, agent, endpoint, ProbeKind::Http, target));
                }
            }
        }
    }

    if options.is_enabled(ProbeKind::Bandwidth) {
        for (i, client) in agents.iter().enumerate() {
            if !options.from_zone.matches(client.zone()) {
                continue;
            }
            for (j, server) in agents.iter().enumerate() {
                if i == j || !options.to_zone.matches(server.zone()) {
                    continue;
                }
                cases.push(TestCase {
                    id: ids.next(),
                    from: client.name.clone(),
                    from_ip: client.pod_address.clone(),
                    from_az: client.zone(),
                    to: server.name.clone(),
                    to_ip: server.pod_address.clone(),
                    to_az: server.zone(),
                    kind: ProbeKind::Bandwidth,
                    outcome: Outcome::Pending,
                    bandwidth: None,
                });
            }
        }
    }

    tracing::debug!(
        agents = agents.len(),
        endpoints = endpoints.len(),
        cases = cases.len(),
        from = %options.from_zone,
        to = %options.to_zone,
        "Test matrix generated"
    );
    Batch::new(cases)
}

/// Target of an HTTP probe, or `None` when the endpoint is not probed over HTTP.
///
/// Cluster destinations are reached on the agents' HTTP port; the external
/// anchor on its default port. Unzoned endpoints are skipped.
fn http_target(endpoint: &Endpoint, http_port: u16) -> Option<String> {
    if endpoint.zone.is_cluster() {
        Some(format!("{}:{}", endpoint.address, http_port))
    } else if endpoint.zone == Zone::Internet {
        Some(endpoint.address.clone())
    } else {
        None
    }
}

fn endpoint_case(
    ids: &mut IdSequence,
    agent: &Agent,
    endpoint: &Endpoint,
    kind: ProbeKind,
    target: String,
) -> TestCase {
    TestCase {
        id: ids.next(),
        from: agent.name.clone(),
        from_ip: agent.pod_address.clone(),
        from_az: agent.zone(),
        to: endpoint.name.clone(),
        to_ip: target,
        to_az: endpoint.zone,
        kind,
        outcome: Outcome::Pending,
        bandwidth: None,
    }
}
