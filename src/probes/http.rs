use super::{Measurement, Probe, ProbeError, ProbeTarget};
use crate::cluster::RemoteExec;
use std::ops::RangeInclusive;

/// Status codes counted as a reachable HTTP service (success and redirects).
pub const ACCEPTED_STATUS: RangeInclusive<u16> = 200..=399;

/// HTTP probe checking the status code of a HEAD request issued with the
/// agent's `curl`.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpProbe;

impl HttpProbe {
    pub fn command(address: &str) -> String {
        format!("curl -sIG {address}")
    }
}

#[async_trait::async_trait]
impl Probe for HttpProbe {
    async fn run(
        &self,
        exec: &dyn RemoteExec,
        target: ProbeTarget<'_>,
    ) -> Result<Measurement, ProbeError> {
        let output = exec.exec(target.source, &Self::command(target.address)).await?;
        let code = parse_status_code(&output.stdout);
        tracing::debug!(id = target.id, target = target.address, code, "HTTP status");
        if is_accepted(code) {
            Ok(Measurement::default())
        } else {
            Err(ProbeError::HttpStatus { code })
        }
    }
}

/// Status code from the first line of a response head, `0` if it is missing.
pub fn parse_status_code(output: &str) -> u16 {
    output
        .lines()
        .next()
        .and_then(|status_line| status_line.split_whitespace().nth(1))
        .and_then(|code| code.parse().ok())
        .unwrap_or(0)
}

pub fn is_accepted(code: u16) -> bool {
    ACCEPTED_STATUS.contains(&code)
}
