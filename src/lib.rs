//! overlaytest -- connectivity checks between the agents of a cluster-wide
//! daemon workload, their nodes and the internet, grouped by availability zone.
//!
//! This crate provides the test matrix generator, the concurrent executor,
//! the probe adapters and the result store; the Kubernetes side lives behind
//! the traits in [`cluster`].

pub mod analysis;
pub mod cluster;
pub mod config;
pub mod executor;
pub mod matrix;
pub mod probes;
pub mod storage;
pub mod topology;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::analysis::Summary;
use crate::cluster::{AgentDiscovery, RemoteExec, WorkloadLifecycle};
use crate::config::{HarnessConfig, RunOptions};
use crate::executor::Executor;
use crate::matrix::Batch;
use crate::probes::ProbeRegistry;
use crate::storage::ResultStore;
use crate::topology::EndpointDirectory;

/// How a run ended. Only `Completed` executed anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Discovery found no running agents.
    NoAgents,
    /// Agents were found but no case matched the filters or re-run ids.
    NothingToRun,
    Completed(Summary),
}

/// Discover agents, build (or reload) the batch, execute it, report and persist.
pub async fn run_tests(
    discovery: &dyn AgentDiscovery,
    exec: &dyn RemoteExec,
    config: &HarnessConfig,
    options: &RunOptions,
) -> Result<RunOutcome> {
    // a re-run without stored results is fatal even when no agent is up
    let store = ResultStore::new(&config.results.path);
    let stored = if options.is_rerun() {
        Some(store.load()?)
    } else {
        None
    };

    let agents = discovery
        .list_running_agents(&config.cluster.label_selector)
        .await
        .context("could not get pods")?;
    if agents.is_empty() {
        println!("No running agents found.");
        return Ok(RunOutcome::NoAgents);
    }

    let batch = match stored {
        Some(stored) => stored.select_for_rerun(&options.rerun),
        None => {
            let endpoints = EndpointDirectory::build(&agents, &config.probes.anchor());
            matrix::generate(&agents, &endpoints, options, &config.probes)
        }
    };
    if batch.is_empty() {
        println!("Nothing to do; no test case matched the filter.");
        return Ok(RunOutcome::NothingToRun);
    }

    if options.is_rerun() {
        println!(
            "Pods running: {}. Re-running selected tests.\n----------",
            agents.len()
        );
    } else {
        println!(
            "Pods running: {}. Starting tests from {} to {}.\n----------",
            agents.len(),
            options.from_zone,
            options.to_zone
        );
    }

    let probes = ProbeRegistry::from_settings(&config.probes);
    let executed = Executor::new(exec, &probes, options.verbose)
        .execute(batch)
        .await;

    let summary = analysis::analyze(&executed, options.verbose, &mut std::io::stdout())?;

    if options.is_rerun() {
        store.save_rerun(&executed)?;
    } else {
        store.save(&executed)?;
    }
    info!(passed = summary.passed, failed = summary.failed, "Run finished");
    Ok(RunOutcome::Completed(summary))
}

/// Workload steps wrapped around a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Lifecycle {
    /// Create the namespace and daemonset before the run.
    pub deploy: bool,
    /// Delete the daemonset after the run, whether or not the run succeeded.
    pub teardown: bool,
}

/// Deploy (optionally), wait for the agents, run and tear down (optionally).
///
/// Returns `None` when `options` select no tests. A requested teardown is
/// attempted even when an earlier step failed; the first error is returned.
pub async fn run_session<C>(
    cluster: &C,
    config: &HarnessConfig,
    options: &RunOptions,
    lifecycle: Lifecycle,
) -> Result<Option<RunOutcome>>
where
    C: AgentDiscovery + RemoteExec + WorkloadLifecycle,
{
    let result = deploy_and_run(cluster, config, options, lifecycle.deploy).await;
    if !lifecycle.teardown {
        return result;
    }

    let teardown = cluster
        .teardown_daemon_workload()
        .await
        .context("could not delete daemonset");
    match (result, teardown) {
        (Ok(outcome), Ok(())) => Ok(outcome),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(teardown_err)) => {
            warn!(error = %format!("{teardown_err:#}"), "Teardown after failed run also failed");
            Err(e)
        }
    }
}

async fn deploy_and_run<C>(
    cluster: &C,
    config: &HarnessConfig,
    options: &RunOptions,
    deploy: bool,
) -> Result<Option<RunOutcome>>
where
    C: AgentDiscovery + RemoteExec + WorkloadLifecycle,
{
    if deploy {
        cluster
            .ensure_daemon_workload()
            .await
            .context("could not deploy daemonset")?;
    }
    if !options.has_tests() {
        return Ok(None);
    }
    cluster.wait_until_ready().await?;
    let outcome = run_tests(cluster, cluster, config, options).await?;
    Ok(Some(outcome))
}

/// Replay the stored results without touching the cluster.
pub fn list_results(config: &HarnessConfig) -> Result<Summary> {
    let batch: Batch = ResultStore::new(&config.results.path).load()?;
    let summary = analysis::analyze(&batch, true, &mut std::io::stdout())?;
    Ok(summary)
}
