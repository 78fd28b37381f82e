//! Concurrent batch execution.
//!
//! All cases of a batch start together and are joined together. Each case
//! future holds the only mutable reference to its own slot of the batch, so
//! outcomes are written without any locking.

use colored::Colorize;
use futures::future::join_all;
use tracing::{debug, info};

use crate::cluster::RemoteExec;
use crate::matrix::{Batch, Outcome, TestCase};
use crate::probes::{ProbeRegistry, ProbeTarget};

pub struct Executor<'a> {
    exec: &'a dyn RemoteExec,
    probes: &'a ProbeRegistry,
    verbose: bool,
}

impl<'a> Executor<'a> {
    pub fn new(exec: &'a dyn RemoteExec, probes: &'a ProbeRegistry, verbose: bool) -> Self {
        Self {
            exec,
            probes,
            verbose,
        }
    }

    /// Run every case and return the batch with outcomes filled in.
    ///
    /// Probe failures are recorded on their case; this never fails.
    pub async fn execute(&self, mut batch: Batch) -> Batch {
        info!(cases = batch.len(), "Executing batch");
        join_all(batch.iter_mut().map(|slot| self.run_case(slot))).await;
        batch
    }

    async fn run_case(&self, slot: &mut TestCase) {
        if self.verbose {
            println!(
                "Test ID - {:3} started: {} from {}/{} to {}/{}",
                slot.id,
                slot.kind,
                slot.from_az.as_str().yellow(),
                slot.from,
                slot.to_az.as_str().yellow(),
                slot.to
            );
        }

        let result = self
            .probes
            .run(slot.kind, self.exec, ProbeTarget::from(&*slot))
            .await;

        match result {
            Ok(measurement) => {
                debug!(id = slot.id, kind = %slot.kind, "Case passed");
                slot.record(Outcome::Pass, measurement.bandwidth_bps);
            }
            Err(e) => {
                debug!(id = slot.id, kind = %slot.kind, error = %e, "Case failed");
                slot.record(Outcome::Fail(e.to_string()), None);
            }
        }
    }
}
