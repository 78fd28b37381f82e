//! iperf3 bandwidth probe -- transient server on the destination agent,
//! timed client run from the source agent, JSON report parsing.

use serde::Deserialize;
use tracing::{debug, warn};

use super::{Measurement, Probe, ProbeError, ProbeTarget};
use crate::cluster::RemoteExec;
use crate::matrix::CaseId;

/// Parsed iperf3 JSON result (subset of fields we care about).
#[derive(Debug, Default, Deserialize)]
pub struct Iperf3Report {
    #[serde(default)]
    pub end: Iperf3End,
}

#[derive(Debug, Default, Deserialize)]
pub struct Iperf3End {
    #[serde(default)]
    pub streams: Vec<Iperf3Stream>,
}

#[derive(Debug, Deserialize)]
pub struct Iperf3Stream {
    pub sender: Iperf3Sum,
}

#[derive(Debug, Deserialize)]
pub struct Iperf3Sum {
    pub bits_per_second: f64,
}

/// Parse an iperf3 JSON output string into a structured result.
pub fn parse_output(json_str: &str) -> Result<Iperf3Report, ProbeError> {
    Ok(serde_json::from_str(json_str)?)
}

/// Sender throughput of the first stream, in bits per second.
pub fn sender_bandwidth(json_str: &str) -> Result<f64, ProbeError> {
    let report = parse_output(json_str)?;
    report
        .end
        .streams
        .first()
        .map(|s| s.sender.bits_per_second)
        .ok_or(ProbeError::NoData)
}

/// Throughput between two agents.
///
/// Pairs of a batch run concurrently, so each case gets its own server port
/// out of `base_port..base_port + port_span`.
#[derive(Debug, Clone)]
pub struct BandwidthProbe {
    base_port: u16,
    port_span: u16,
    bytes: String,
}

impl BandwidthProbe {
    pub fn new(base_port: u16, port_span: u16, bytes: String) -> Self {
        Self {
            base_port,
            port_span: port_span.max(1),
            bytes,
        }
    }

    pub fn port_for(&self, id: CaseId) -> u16 {
        let offset = id.saturating_sub(1) % u32::from(self.port_span);
        // offset < port_span <= u16::MAX; the range itself is checked when
        // the config is loaded
        self.base_port.saturating_add(offset as u16)
    }

    pub fn server_command(port: u16) -> String {
        format!("iperf3 -s -p {port} -D")
    }

    pub fn client_command(&self, address: &str, port: u16) -> String {
        format!("iperf3 -c {address} -p {port} -n {} -J", self.bytes)
    }

    /// Stops only the server bound to `port`. The trailing `-D` keeps port
    /// 1000 from matching 10000, the bracket keeps pkill from matching the
    /// shell running it.
    pub fn stop_command(port: u16) -> String {
        format!("sh -c 'pkill -f \"[i]perf3 -s -p {port} -D\"'")
    }
}

#[async_trait::async_trait]
impl Probe for BandwidthProbe {
    async fn run(
        &self,
        exec: &dyn RemoteExec,
        target: ProbeTarget<'_>,
    ) -> Result<Measurement, ProbeError> {
        let port = self.port_for(target.id);

        exec.exec(target.destination, &Self::server_command(port))
            .await
            .map_err(ProbeError::ServerStart)?;

        let client = exec
            .exec(target.source, &self.client_command(target.address, port))
            .await;

        // stop the server before looking at the client result
        let stopped = exec.exec(target.destination, &Self::stop_command(port)).await;

        let output = client.map_err(ProbeError::Client)?;
        if let Err(e) = stopped {
            warn!(
                id = target.id,
                server = target.destination,
                port,
                "iperf3 server left running"
            );
            return Err(ProbeError::ServerStop(e));
        }

        let bps = sender_bandwidth(&output.stdout)?;
        debug!(
            id = target.id,
            client = target.source,
            server = target.destination,
            bps,
            "iperf3 finished"
        );
        Ok(Measurement {
            bandwidth_bps: Some(bps),
        })
    }
}
