use super::{Measurement, Probe, ProbeError, ProbeTarget};
use crate::cluster::RemoteExec;
use tracing::debug;

/// ICMP reachability probe, run with the agent's `ping`.
///
/// Passes when ping exits zero, i.e. at least one reply came back.
#[derive(Debug, Clone)]
pub struct LatencyProbe {
    count: u32,
}

impl LatencyProbe {
    pub fn new(count: u32) -> Self {
        Self { count: count.max(1) }
    }

    pub fn command(&self, address: &str) -> String {
        format!("ping -c{} {}", self.count, address)
    }
}

#[async_trait::async_trait]
impl Probe for LatencyProbe {
    async fn run(
        &self,
        exec: &dyn RemoteExec,
        target: ProbeTarget<'_>,
    ) -> Result<Measurement, ProbeError> {
        let output = exec.exec(target.source, &self.command(target.address)).await?;
        match extract_avg_rtt(&output.stdout) {
            Some(rtt_ms) => debug!(id = target.id, target = target.address, rtt_ms, "Ping reply"),
            None => debug!(
                id = target.id,
                target = target.address,
                "Ping succeeded without RTT summary"
            ),
        }
        Ok(Measurement::default())
    }
}

/// Average round trip from the summary line, e.g.
/// `rtt min/avg/max/mdev = 0.041/0.052/0.070/0.010 ms` (iputils) or
/// `round-trip min/avg/max = 0.041/0.052/0.070 ms` (busybox).
fn extract_avg_rtt(output: &str) -> Option<f64> {
    output
        .lines()
        .find(|line| line.starts_with("rtt") || line.starts_with("round-trip"))
        .and_then(|line| line.split(" = ").nth(1))
        .and_then(|values| values.split('/').nth(1))
        .and_then(|avg| avg.trim().parse::<f64>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command() {
        assert_eq!(LatencyProbe::new(5).command("10.0.0.2"), "ping -c5 10.0.0.2");
        assert_eq!(LatencyProbe::new(0).command("1.1.1.1"), "ping -c1 1.1.1.1");
    }

    #[test]
    fn test_extract_avg_rtt_iputils() {
        let out = "PING 10.0.0.2 (10.0.0.2) 56(84) bytes of data.\n\
                   64 bytes from 10.0.0.2: icmp_seq=1 ttl=64 time=0.061 ms\n\
                   \n\
                   --- 10.0.0.2 ping statistics ---\n\
                   5 packets transmitted, 5 received, 0% packet loss, time 4099ms\n\
                   rtt min/avg/max/mdev = 0.041/0.052/0.070/0.010 ms\n";
        assert_eq!(extract_avg_rtt(out), Some(0.052));
    }

    #[test]
    fn test_extract_avg_rtt_busybox() {
        let out = "round-trip min/avg/max = 1.101/2.250/4.002 ms\n";
        assert_eq!(extract_avg_rtt(out), Some(2.25));
    }

    #[test]
    fn test_extract_avg_rtt_missing() {
        assert_eq!(extract_avg_rtt("5 packets transmitted, 0 received"), None);
    }
}
