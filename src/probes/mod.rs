//! Probe adapters: each turns a test case into commands on the agents and
//! interprets what comes back.

pub mod http;
pub mod icmp;
pub mod iperf;

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::cluster::{ExecError, RemoteExec};
use crate::config::ProbeSettings;
use crate::matrix::{CaseId, ProbeKind, TestCase};

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error("unexpected HTTP status {code}")]
    HttpStatus { code: u16 },

    #[error("could not start iperf3 server: {0}")]
    ServerStart(#[source] ExecError),

    #[error("iperf3 client failed: {0}")]
    Client(#[source] ExecError),

    #[error("could not stop iperf3 server: {0}")]
    ServerStop(#[source] ExecError),

    #[error("failed to parse iperf3 report: {0}")]
    Report(#[from] serde_json::Error),

    /// The throughput test ran but reported no streams.
    #[error("no data")]
    NoData,

    #[error("no handler registered for {0} probes")]
    Unsupported(ProbeKind),
}

/// What a probe needs to know about the case it runs.
#[derive(Debug, Clone, Copy)]
pub struct ProbeTarget<'a> {
    pub id: CaseId,
    /// Agent the probe runs from.
    pub source: &'a str,
    /// Agent name of the destination; only meaningful for agent-to-agent probes.
    pub destination: &'a str,
    /// Address (optionally with port) the probe targets.
    pub address: &'a str,
}

impl<'a> From<&'a TestCase> for ProbeTarget<'a> {
    fn from(case: &'a TestCase) -> Self {
        Self {
            id: case.id,
            source: &case.from,
            destination: &case.to,
            address: &case.to_ip,
        }
    }
}

/// Result of a successful probe.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Measurement {
    /// Sender throughput in bits per second (bandwidth probes only).
    pub bandwidth_bps: Option<f64>,
}

/// Trait for all probes run through the agents.
#[async_trait::async_trait]
pub trait Probe: Send + Sync {
    /// Run the probe. Any error is a failed case, never a failed run.
    async fn run(
        &self,
        exec: &dyn RemoteExec,
        target: ProbeTarget<'_>,
    ) -> Result<Measurement, ProbeError>;
}

/// Lookup table from probe kind to its handler.
#[derive(Clone, Default)]
pub struct ProbeRegistry {
    handlers: HashMap<ProbeKind, Arc<dyn Probe>>,
}

impl ProbeRegistry {
    /// Registry with the three built-in probes.
    pub fn from_settings(settings: &ProbeSettings) -> Self {
        let mut registry = Self::default();
        registry.register(ProbeKind::Latency, icmp::LatencyProbe::new(settings.ping_count));
        registry.register(ProbeKind::Http, http::HttpProbe);
        registry.register(
            ProbeKind::Bandwidth,
            iperf::BandwidthProbe::new(
                settings.iperf_port,
                settings.iperf_port_span,
                settings.iperf_bytes.clone(),
            ),
        );
        registry
    }

    pub fn register(&mut self, kind: ProbeKind, probe: impl Probe + 'static) {
        self.handlers.insert(kind, Arc::new(probe));
    }

    pub fn get(&self, kind: ProbeKind) -> Option<&dyn Probe> {
        self.handlers.get(&kind).map(|p| p.as_ref())
    }

    /// Run the handler for `kind`.
    pub async fn run(
        &self,
        kind: ProbeKind,
        exec: &dyn RemoteExec,
        target: ProbeTarget<'_>,
    ) -> Result<Measurement, ProbeError> {
        match self.get(kind) {
            Some(probe) => probe.run(exec, target).await,
            None => Err(ProbeError::Unsupported(kind)),
        }
    }
}
