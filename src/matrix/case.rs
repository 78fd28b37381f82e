//! Test cases and batches, plus their on-disk representation.

use crate::topology::Zone;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Identity of a case within a batch. Assigned from 1 in emission order.
pub type CaseId = u32;

/// The probe a case runs. Serialized with the tags of the tools behind it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProbeKind {
    /// ICMP reachability (`ping`).
    #[serde(rename = "ping")]
    Latency,
    /// HTTP status check (`curl`).
    #[serde(rename = "curl")]
    Http,
    /// Throughput between two agents (`iperf3`).
    #[serde(rename = "iperf")]
    Bandwidth,
}

impl ProbeKind {
    pub const ALL: [ProbeKind; 3] = [ProbeKind::Latency, ProbeKind::Http, ProbeKind::Bandwidth];

    pub fn tag(&self) -> &'static str {
        match self {
            ProbeKind::Latency => "ping",
            ProbeKind::Http => "curl",
            ProbeKind::Bandwidth => "iperf",
        }
    }
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Disposition of a case.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Outcome {
    #[default]
    Pending,
    Pass,
    Fail(String),
}

impl Outcome {
    pub fn is_pass(&self) -> bool {
        matches!(self, Outcome::Pass)
    }

    /// Failure detail; empty unless the case failed.
    pub fn detail(&self) -> &str {
        match self {
            Outcome::Fail(detail) => detail,
            _ => "",
        }
    }
}

/// A single planned or executed probe between a source agent and a destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "CaseRecord", into = "CaseRecord")]
pub struct TestCase {
    pub id: CaseId,
    pub from: String,
    pub from_ip: String,
    pub from_az: Zone,
    pub to: String,
    pub to_ip: String,
    pub to_az: Zone,
    pub kind: ProbeKind,
    pub outcome: Outcome,
    /// Sender throughput in bits per second, for bandwidth cases that passed.
    pub bandwidth: Option<f64>,
}

impl TestCase {
    /// Store the final disposition of one execution attempt.
    pub fn record(&mut self, outcome: Outcome, bandwidth: Option<f64>) {
        self.outcome = outcome;
        self.bandwidth = bandwidth;
    }

    /// Clear the previous disposition before the case is run again.
    pub fn reset(&mut self) {
        self.record(Outcome::Pending, None);
    }

    /// Copy the outcome fields of `other` onto this case, leaving identity
    /// and endpoints as they are.
    pub fn take_outcome_from(&mut self, other: &TestCase) {
        self.record(other.outcome.clone(), other.bandwidth);
    }
}

/// Stored layout of a case. Field names are shared with earlier result
/// files, so they must not change.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct CaseRecord {
    id: CaseId,
    from: String,
    from_ip: String,
    from_az: Zone,
    to: String,
    to_ip: String,
    to_az: Zone,
    kind: ProbeKind,
    result: bool,
    error: String,
    #[serde(default)]
    bandwidth: Option<f64>,
}

impl From<CaseRecord> for TestCase {
    fn from(r: CaseRecord) -> Self {
        let outcome = if r.result {
            Outcome::Pass
        } else {
            Outcome::Fail(r.error)
        };
        Self {
            id: r.id,
            from: r.from,
            from_ip: r.from_ip,
            from_az: r.from_az,
            to: r.to,
            to_ip: r.to_ip,
            to_az: r.to_az,
            kind: r.kind,
            outcome,
            bandwidth: r.bandwidth,
        }
    }
}

impl From<TestCase> for CaseRecord {
    fn from(c: TestCase) -> Self {
        Self {
            id: c.id,
            from: c.from,
            from_ip: c.from_ip,
            from_az: c.from_az,
            to: c.to,
            to_ip: c.to_ip,
            to_az: c.to_az,
            kind: c.kind,
            result: c.outcome.is_pass(),
            error: c.outcome.detail().to_string(),
            bandwidth: c.bandwidth,
        }
    }
}

/// Ordered cases; the unit of execution and persistence.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Batch {
    cases: Vec<TestCase>,
}

impl Batch {
    pub fn new(cases: Vec<TestCase>) -> Self {
        Self { cases }
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TestCase> {
        self.cases.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, TestCase> {
        self.cases.iter_mut()
    }

    pub fn get(&self, id: CaseId) -> Option<&TestCase> {
        self.cases.iter().find(|c| c.id == id)
    }

    /// Cases whose id is in `ids`, in stored order, reset to pending.
    pub fn select_for_rerun(&self, ids: &BTreeSet<CaseId>) -> Batch {
        let cases = self
            .cases
            .iter()
            .filter(|c| ids.contains(&c.id))
            .map(|c| {
                let mut case = c.clone();
                case.reset();
                case
            })
            .collect();
        Batch { cases }
    }
}

impl<'a> IntoIterator for &'a Batch {
    type Item = &'a TestCase;
    type IntoIter = std::slice::Iter<'a, TestCase>;

    fn into_iter(self) -> Self::IntoIter {
        self.cases.iter()
    }
}
