//! Kubernetes implementation of the cluster collaborators.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::{Namespace, Pod};
use kube::api::{Api, AttachParams, AttachedProcess, DeleteParams, ListParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use serde_json::json;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info, warn};

use super::{AgentDiscovery, ClusterError, ExecError, ExecOutput, RemoteExec, WorkloadLifecycle};
use crate::config::ClusterConfig;
use crate::topology::Agent;

/// socat action answering every connection with an empty 200.
const HTTP_REPLY: &str = "SYSTEM:printf 'HTTP/1.1 200 OK\\r\\nContent-Length: 0\\r\\n\\r\\n'";

/// Namespaced handle on the cluster running the agents.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
    settings: ClusterConfig,
    http_port: u16,
}

impl KubeCluster {
    /// Connect using an explicit kubeconfig file.
    pub async fn connect(
        kubeconfig: &Path,
        settings: ClusterConfig,
        http_port: u16,
    ) -> Result<Self, ClusterError> {
        let kubeconfig_error = |message: String| ClusterError::Kubeconfig {
            path: kubeconfig.display().to_string(),
            message,
        };
        let raw = Kubeconfig::read_from(kubeconfig).map_err(|e| kubeconfig_error(e.to_string()))?;
        let config = Config::from_custom_kubeconfig(raw, &KubeConfigOptions::default())
            .await
            .map_err(|e| kubeconfig_error(e.to_string()))?;
        let client = Client::try_from(config)?;
        info!(
            kubeconfig = %kubeconfig.display(),
            namespace = %settings.namespace,
            "Connected to cluster"
        );
        Ok(Self {
            client,
            settings,
            http_port,
        })
    }

    pub fn namespace(&self) -> &str {
        &self.settings.namespace
    }

    fn pods(&self) -> Api<Pod> {
        Api::namespaced(self.client.clone(), &self.settings.namespace)
    }

    fn daemonsets(&self) -> Api<DaemonSet> {
        Api::namespaced(self.client.clone(), &self.settings.namespace)
    }

    fn daemonset_manifest(&self) -> Result<DaemonSet, ClusterError> {
        let (key, value) = selector_label(&self.settings.label_selector, &self.settings.daemonset);
        let (key, value) = (key.as_str(), value.as_str());
        let port = self.http_port;
        let manifest = json!({
            "apiVersion": "apps/v1",
            "kind": "DaemonSet",
            "metadata": {
                "name": self.settings.daemonset,
                "namespace": self.settings.namespace,
                "labels": { key: value },
            },
            "spec": {
                "selector": { "matchLabels": { key: value } },
                "template": {
                    "metadata": { "labels": { key: value } },
                    "spec": {
                        "tolerations": [{ "operator": "Exists" }],
                        "containers": [{
                            "name": self.settings.container,
                            "image": self.settings.image,
                            "command": [
                                "socat",
                                format!("TCP-LISTEN:{port},fork,reuseaddr"),
                                HTTP_REPLY,
                            ],
                            "ports": [{ "containerPort": port, "protocol": "TCP" }],
                        }],
                    },
                },
            },
        });
        serde_json::from_value(manifest).map_err(|source| ClusterError::Manifest {
            name: self.settings.daemonset.clone(),
            source,
        })
    }
}

/// First `key=value` term of a label selector, or `name=<fallback>`.
fn selector_label(selector: &str, fallback: &str) -> (String, String) {
    selector
        .split(',')
        .next()
        .and_then(|term| term.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .filter(|(k, v)| !k.is_empty() && !v.is_empty())
        .unwrap_or_else(|| ("name".to_string(), fallback.to_string()))
}

fn ready_counts(ds: &DaemonSet) -> (i32, i32) {
    ds.status
        .as_ref()
        .map(|s| (s.number_ready, s.desired_number_scheduled))
        .unwrap_or((0, 0))
}

/// Ready only once the controller has observed the current spec, scheduled
/// at least one agent and every scheduled agent reports ready. A daemonset
/// that was just created has no status yet.
fn is_rolled_out(ds: &DaemonSet) -> bool {
    let Some(status) = ds.status.as_ref() else {
        return false;
    };
    let generation = ds.metadata.generation.unwrap_or(0);
    let observed = status.observed_generation.unwrap_or(0);
    observed >= generation
        && status.desired_number_scheduled > 0
        && status.number_ready == status.desired_number_scheduled
}

fn agent_from_pod(pod: &Pod) -> Option<Agent> {
    let name = pod.metadata.name.clone()?;
    let node_name = pod.spec.as_ref().and_then(|s| s.node_name.clone());
    let status = pod.status.as_ref();
    let pod_address = status.and_then(|s| s.pod_ip.clone());
    let host_address = status.and_then(|s| s.host_ip.clone());

    match (node_name, pod_address, host_address) {
        (Some(node_name), Some(pod_address), Some(host_address)) => Some(Agent {
            name,
            node_name,
            pod_address,
            host_address,
        }),
        _ => {
            warn!(pod = %name, "Skipping running pod without node or addresses");
            None
        }
    }
}

async fn read_stream(stream: Option<impl AsyncRead + Unpin>) -> String {
    let mut buf = Vec::new();
    if let Some(mut stream) = stream {
        if let Err(e) = stream.read_to_end(&mut buf).await {
            debug!(error = %e, "Exec stream ended with an error");
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Drain stdout and stderr, then map the exec status onto success or failure.
async fn collect(
    agent: &str,
    command: &str,
    mut process: AttachedProcess,
) -> Result<ExecOutput, ExecError> {
    let status = process.take_status();
    let (stdout, stderr) = tokio::join!(
        read_stream(process.stdout()),
        read_stream(process.stderr())
    );
    let status = match status {
        Some(status) => status.await,
        None => None,
    };
    if let Err(e) = process.join().await {
        debug!(agent, error = ?e, "Exec session did not shut down cleanly");
    }

    match status {
        Some(s) if s.status.as_deref() == Some("Success") => Ok(ExecOutput { stdout, stderr }),
        Some(s) => Err(ExecError::Command {
            agent: agent.to_string(),
            command: command.to_string(),
            message: s
                .message
                .unwrap_or_else(|| "command terminated with an error".to_string()),
            stderr,
        }),
        None => Err(ExecError::Command {
            agent: agent.to_string(),
            command: command.to_string(),
            message: "no exit status reported".to_string(),
            stderr,
        }),
    }
}

#[async_trait]
impl RemoteExec for KubeCluster {
    /// Runs `/bin/sh -c <command>` in the agent container.
    ///
    /// Only failures to open the exec channel are retried; the budget is
    /// local to this call.
    async fn exec(&self, agent: &str, command: &str) -> Result<ExecOutput, ExecError> {
        let pods = self.pods();
        let params = AttachParams::default()
            .container(self.settings.container.as_str())
            .stdin(false)
            .stdout(true)
            .stderr(true);
        let argv = ["/bin/sh", "-c", command];

        let attempts = self.settings.exec_attempts.max(1);
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            match pods.exec(agent, argv, &params).await {
                Ok(process) => return collect(agent, command, process).await,
                Err(e) => {
                    debug!(agent, attempt, error = %e, "Exec attempt failed");
                    last_error = e.to_string();
                }
            }
        }
        Err(ExecError::Transport {
            agent: agent.to_string(),
            attempts,
            message: last_error,
        })
    }
}

#[async_trait]
impl AgentDiscovery for KubeCluster {
    async fn list_running_agents(&self, label_selector: &str) -> Result<Vec<Agent>, ClusterError> {
        let params = ListParams::default()
            .labels(label_selector)
            .fields("status.phase=Running");
        let pods = self.pods().list(&params).await?;
        let agents: Vec<Agent> = pods.items.iter().filter_map(agent_from_pod).collect();
        debug!(selector = %label_selector, agents = agents.len(), "Listed running agents");
        Ok(agents)
    }
}

#[async_trait]
impl WorkloadLifecycle for KubeCluster {
    async fn ensure_daemon_workload(&self) -> Result<(), ClusterError> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        let namespace: Namespace = serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "Namespace",
            "metadata": { "name": self.settings.namespace },
        }))
        .map_err(|source| ClusterError::Manifest {
            name: self.settings.namespace.clone(),
            source,
        })?;
        match namespaces.create(&PostParams::default(), &namespace).await {
            Ok(_) => info!(namespace = %self.settings.namespace, "Namespace created"),
            Err(kube::Error::Api(resp)) if resp.code == 409 => {
                debug!(namespace = %self.settings.namespace, "Namespace already exists")
            }
            Err(e) => return Err(e.into()),
        }

        let manifest = self.daemonset_manifest()?;
        match self.daemonsets().create(&PostParams::default(), &manifest).await {
            Ok(_) => info!(daemonset = %self.settings.daemonset, "Daemonset created"),
            Err(kube::Error::Api(resp)) if resp.code == 409 => {
                debug!(daemonset = %self.settings.daemonset, "Daemonset already exists")
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    async fn wait_until_ready(&self) -> Result<(), ClusterError> {
        let name = &self.settings.daemonset;
        let attempts = self.settings.ready_attempts.max(1);
        let mut counts = (0, 0);

        for attempt in 1..=attempts {
            let ds = self.daemonsets().get(name).await?;
            if is_rolled_out(&ds) {
                println!("Daemonset \"{name}\" is ready.");
                return Ok(());
            }
            counts = ready_counts(&ds);
            let (ready, desired) = counts;
            if attempt < attempts {
                let wait = Duration::from_secs(
                    u64::from(attempt) * self.settings.ready_backoff_secs,
                );
                println!(
                    "Daemonset \"{name}\" is not running on all nodes ({ready}/{desired}). \
                     Retry in {} seconds...",
                    wait.as_secs()
                );
                tokio::time::sleep(wait).await;
            }
        }

        let (ready, desired) = counts;
        Err(ClusterError::NotReady {
            name: name.clone(),
            ready,
            desired,
        })
    }

    async fn teardown_daemon_workload(&self) -> Result<(), ClusterError> {
        match self
            .daemonsets()
            .delete(&self.settings.daemonset, &DeleteParams::default())
            .await
        {
            Ok(_) => info!(daemonset = %self.settings.daemonset, "Daemonset deleted"),
            Err(kube::Error::Api(resp)) if resp.code == 404 => {
                debug!(daemonset = %self.settings.daemonset, "Daemonset already gone")
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }
}
