//! Cluster collaborators: agent discovery, remote command execution and the
//! lifecycle of the daemon workload that hosts the agents.

pub mod k8s;

pub use self::k8s::KubeCluster;

use crate::topology::Agent;
use thiserror::Error;

/// Captured output of a remote command that exited successfully.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Error)]
pub enum ExecError {
    /// The command channel to the agent could not be opened.
    #[error("could not exec into {agent} after {attempts} attempt(s): {message}")]
    Transport {
        agent: String,
        attempts: u32,
        message: String,
    },

    /// The command ran and failed.
    #[error("command `{command}` failed on {agent}: {message}")]
    Command {
        agent: String,
        command: String,
        message: String,
        stderr: String,
    },
}

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("failed to load kubeconfig {path}: {message}")]
    Kubeconfig { path: String, message: String },

    #[error(transparent)]
    Api(#[from] kube::Error),

    #[error("daemonset {name} is not ready on all nodes ({ready}/{desired})")]
    NotReady {
        name: String,
        ready: i32,
        desired: i32,
    },

    #[error("failed to build manifest for {name}: {source}")]
    Manifest {
        name: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Lists the agents currently able to run probes.
#[async_trait::async_trait]
pub trait AgentDiscovery: Send + Sync {
    /// Running agents matching `label_selector`, in the order the cluster reports them.
    async fn list_running_agents(&self, label_selector: &str) -> Result<Vec<Agent>, ClusterError>;
}

/// Runs shell commands inside an agent.
#[async_trait::async_trait]
pub trait RemoteExec: Send + Sync {
    async fn exec(&self, agent: &str, command: &str) -> Result<ExecOutput, ExecError>;
}

/// Creates, checks and removes the daemon workload.
#[async_trait::async_trait]
pub trait WorkloadLifecycle: Send + Sync {
    async fn ensure_daemon_workload(&self) -> Result<(), ClusterError>;

    /// Wait until an agent runs on every scheduled node.
    async fn wait_until_ready(&self) -> Result<(), ClusterError>;

    async fn teardown_daemon_workload(&self) -> Result<(), ClusterError>;
}
