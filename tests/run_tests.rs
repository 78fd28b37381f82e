//! End-to-end runs against in-memory cluster fakes.

use std::collections::BTreeSet;
use std::sync::Mutex;

use overlaytest::cluster::{
    AgentDiscovery, ClusterError, ExecError, ExecOutput, RemoteExec, WorkloadLifecycle,
};
use overlaytest::config::{HarnessConfig, RunOptions};
use overlaytest::matrix::{Batch, Outcome, ProbeKind, TestCase};
use overlaytest::storage::ResultStore;
use overlaytest::topology::{Agent, Zone, ZoneFilter};
use overlaytest::{Lifecycle, RunOutcome};

struct FakeCluster {
    agents: Vec<Agent>,
    /// Commands containing any of these fragments fail.
    failing: Vec<String>,
    commands: Mutex<Vec<(String, String)>>,
    ready: bool,
    /// Workload steps in call order.
    steps: Mutex<Vec<&'static str>>,
}

impl FakeCluster {
    fn new(agents: Vec<Agent>) -> Self {
        Self {
            agents,
            failing: Vec::new(),
            commands: Mutex::new(Vec::new()),
            ready: true,
            steps: Mutex::new(Vec::new()),
        }
    }

    fn never_ready(mut self) -> Self {
        self.ready = false;
        self
    }

    fn steps(&self) -> Vec<&'static str> {
        self.steps.lock().unwrap().clone()
    }

    fn failing(mut self, fragment: &str) -> Self {
        self.failing.push(fragment.to_string());
        self
    }

    fn commands(&self) -> Vec<(String, String)> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl AgentDiscovery for FakeCluster {
    async fn list_running_agents(
        &self,
        _label_selector: &str,
    ) -> Result<Vec<Agent>, ClusterError> {
        Ok(self.agents.clone())
    }
}

#[async_trait::async_trait]
impl RemoteExec for FakeCluster {
    async fn exec(&self, agent: &str, command: &str) -> Result<ExecOutput, ExecError> {
        self.commands
            .lock()
            .unwrap()
            .push((agent.to_string(), command.to_string()));

        if self.failing.iter().any(|f| command.contains(f.as_str())) {
            return Err(ExecError::Command {
                agent: agent.to_string(),
                command: command.to_string(),
                message: "command terminated with non-zero exit code: 1".to_string(),
                stderr: String::new(),
            });
        }

        let stdout = if command.starts_with("curl") {
            "HTTP/1.1 200 OK\r\nServer: socat\r\n".to_string()
        } else if command.starts_with("iperf3 -c") {
            r#"{"end": {"streams": [{"sender": {"bits_per_second": 4200000000.0}}]}}"#.to_string()
        } else {
            String::new()
        };
        Ok(ExecOutput {
            stdout,
            stderr: String::new(),
        })
    }
}

#[async_trait::async_trait]
impl WorkloadLifecycle for FakeCluster {
    async fn ensure_daemon_workload(&self) -> Result<(), ClusterError> {
        self.steps.lock().unwrap().push("deploy");
        Ok(())
    }

    async fn wait_until_ready(&self) -> Result<(), ClusterError> {
        self.steps.lock().unwrap().push("wait");
        if self.ready {
            Ok(())
        } else {
            Err(ClusterError::NotReady {
                name: "overlaytest".to_string(),
                ready: 0,
                desired: 2,
            })
        }
    }

    async fn teardown_daemon_workload(&self) -> Result<(), ClusterError> {
        self.steps.lock().unwrap().push("teardown");
        Ok(())
    }
}

const DEPLOY_AND_TEARDOWN: Lifecycle = Lifecycle {
    deploy: true,
    teardown: true,
};

fn agent(name: &str, node: &str, pod: &str, host: &str) -> Agent {
    Agent {
        name: name.to_string(),
        node_name: node.to_string(),
        pod_address: pod.to_string(),
        host_address: host.to_string(),
    }
}

fn two_agents() -> Vec<Agent> {
    vec![
        agent("a1", "node-z1-x", "10.0.0.1", "192.168.0.1"),
        agent("a2", "node-z2-y", "10.0.0.2", "192.168.0.2"),
    ]
}

fn config_in(dir: &tempfile::TempDir) -> HarnessConfig {
    let mut config = HarnessConfig::default();
    config.results.path = dir.path().join("test_results.json");
    config
}

fn options(kinds: &[ProbeKind]) -> RunOptions {
    RunOptions {
        kinds: kinds.iter().copied().collect(),
        ..Default::default()
    }
}

fn stored_case(id: u32, outcome: Outcome) -> TestCase {
    TestCase {
        id,
        from: "a1".to_string(),
        from_ip: "10.0.0.1".to_string(),
        from_az: Zone::Az1,
        to: format!("dst-{id}"),
        to_ip: format!("10.0.1.{id}"),
        to_az: Zone::Az2,
        kind: ProbeKind::Latency,
        outcome,
        bandwidth: None,
    }
}

fn stored_entries(config: &HarnessConfig) -> Vec<serde_json::Value> {
    let raw = std::fs::read_to_string(&config.results.path).unwrap();
    serde_json::from_str(&raw).unwrap()
}

#[tokio::test]
async fn test_full_run_saves_every_case() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir);
    let cluster = FakeCluster::new(two_agents()).failing("1.1.1.1");

    let outcome = overlaytest::run_tests(
        &cluster,
        &cluster,
        &config,
        &options(&[ProbeKind::Latency, ProbeKind::Http]),
    )
    .await
    .unwrap();

    // 2 agents x (2 pods + 2 hosts + anchor) x (ping + curl)
    let RunOutcome::Completed(summary) = outcome else {
        panic!("expected a completed run, got {outcome:?}");
    };
    assert_eq!(summary.total, 20);
    // both probes to the anchor fail for each agent
    assert_eq!(summary.failed, 4);

    let stored = ResultStore::new(&config.results.path).load().unwrap();
    assert_eq!(stored.len(), 20);
    for case in &stored {
        if case.to_az == Zone::Internet {
            assert!(case.outcome.detail().contains("non-zero exit code"));
        } else {
            assert_eq!(case.outcome, Outcome::Pass);
        }
    }
}

#[tokio::test]
async fn test_rerun_updates_only_selected_case() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir);
    let store = ResultStore::new(&config.results.path);
    let original = Batch::new(vec![
        stored_case(1, Outcome::Pass),
        stored_case(2, Outcome::Pass),
        stored_case(3, Outcome::Fail("100% packet loss".to_string())),
        stored_case(4, Outcome::Fail("timeout".to_string())),
        stored_case(5, Outcome::Pass),
    ]);
    store.save(&original).unwrap();
    let before = stored_entries(&config);

    let cluster = FakeCluster::new(two_agents());
    let opts = RunOptions {
        rerun: BTreeSet::from([3]),
        ..Default::default()
    };
    let outcome = overlaytest::run_tests(&cluster, &cluster, &config, &opts)
        .await
        .unwrap();

    let RunOutcome::Completed(summary) = outcome else {
        panic!("expected a completed run, got {outcome:?}");
    };
    assert_eq!(summary.total, 1);
    assert_eq!(summary.passed, 1);

    // only case 3 was executed
    assert_eq!(
        cluster.commands(),
        vec![("a1".to_string(), "ping -c5 10.0.1.3".to_string())]
    );

    let after = stored_entries(&config);
    assert_eq!(after.len(), 5);
    for (i, (old, new)) in before.iter().zip(&after).enumerate() {
        if i == 2 {
            assert_eq!(new["id"], 3);
            assert_eq!(new["result"], true);
            assert_eq!(new["error"], "");
        } else {
            assert_eq!(old, new, "entry {} changed", i + 1);
        }
    }
}

#[tokio::test]
async fn test_rerun_of_failing_case_keeps_history_size() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir);
    let store = ResultStore::new(&config.results.path);
    store
        .save(&Batch::new(vec![
            stored_case(1, Outcome::Pass),
            stored_case(2, Outcome::Pass),
        ]))
        .unwrap();

    let cluster = FakeCluster::new(two_agents()).failing("10.0.1.2");
    let opts = RunOptions {
        rerun: BTreeSet::from([2, 77]),
        ..Default::default()
    };
    overlaytest::run_tests(&cluster, &cluster, &config, &opts)
        .await
        .unwrap();

    let stored = store.load().unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored.get(1).unwrap().outcome, Outcome::Pass);
    assert!(!stored.get(2).unwrap().outcome.is_pass());
}

#[tokio::test]
async fn test_rerun_without_stored_results_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir);
    let cluster = FakeCluster::new(two_agents());
    let opts = RunOptions {
        rerun: BTreeSet::from([1]),
        ..Default::default()
    };

    let err = overlaytest::run_tests(&cluster, &cluster, &config, &opts)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("no stored results"), "{err:#}");
    assert!(cluster.commands().is_empty());
}

#[tokio::test]
async fn test_rerun_checks_stored_results_before_discovery() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir);
    let cluster = FakeCluster::new(Vec::new());
    let opts = RunOptions {
        rerun: BTreeSet::from([1]),
        ..Default::default()
    };

    let err = overlaytest::run_tests(&cluster, &cluster, &config, &opts)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("no stored results"), "{err:#}");

    std::fs::write(&config.results.path, "{ not json").unwrap();
    let err = overlaytest::run_tests(&cluster, &cluster, &config, &opts)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("malformed"), "{err:#}");
}

#[tokio::test]
async fn test_no_agents_is_not_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir);
    let cluster = FakeCluster::new(Vec::new());

    let opts = options(&[ProbeKind::Latency]);
    let outcome = overlaytest::run_tests(&cluster, &cluster, &config, &opts)
        .await
        .unwrap();
    assert_eq!(outcome, RunOutcome::NoAgents);
    assert!(!config.results.path.exists());
}

#[tokio::test]
async fn test_empty_batch_is_distinct_from_no_agents() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir);
    let cluster = FakeCluster::new(two_agents());
    let opts = RunOptions {
        from_zone: ZoneFilter::Only(Zone::Az3),
        ..options(&[ProbeKind::Latency])
    };

    let outcome = overlaytest::run_tests(&cluster, &cluster, &config, &opts)
        .await
        .unwrap();
    assert_eq!(outcome, RunOutcome::NothingToRun);
    assert!(cluster.commands().is_empty());
}

#[tokio::test]
async fn test_bandwidth_run_orchestrates_server_and_client() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir);
    let cluster = FakeCluster::new(two_agents());
    let opts = RunOptions {
        from_zone: ZoneFilter::Only(Zone::Az1),
        to_zone: ZoneFilter::Only(Zone::Az2),
        ..options(&[ProbeKind::Bandwidth])
    };

    let outcome = overlaytest::run_tests(&cluster, &cluster, &config, &opts)
        .await
        .unwrap();
    assert!(matches!(outcome, RunOutcome::Completed(s) if s.total == 1 && s.passed == 1));

    assert_eq!(
        cluster.commands(),
        vec![
            ("a2".to_string(), "iperf3 -s -p 12345 -D".to_string()),
            ("a1".to_string(), "iperf3 -c 10.0.0.2 -p 12345 -n 10M -J".to_string()),
            (
                "a2".to_string(),
                "sh -c 'pkill -f \"[i]perf3 -s -p 12345 -D\"'".to_string()
            ),
        ]
    );

    let stored = ResultStore::new(&config.results.path).load().unwrap();
    let case = stored.get(1).unwrap();
    assert_eq!(case.bandwidth, Some(4_200_000_000.0));
}

#[tokio::test]
async fn test_bandwidth_client_failure_still_stops_server() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir);
    let cluster = FakeCluster::new(two_agents()).failing("iperf3 -c");
    let opts = RunOptions {
        from_zone: ZoneFilter::Only(Zone::Az2),
        ..options(&[ProbeKind::Bandwidth])
    };

    overlaytest::run_tests(&cluster, &cluster, &config, &opts)
        .await
        .unwrap();

    let commands = cluster.commands();
    assert_eq!(commands.len(), 3);
    assert!(commands[2].1.starts_with("sh -c 'pkill"));

    let stored = ResultStore::new(&config.results.path).load().unwrap();
    let detail = stored.get(1).unwrap().outcome.detail().to_string();
    assert!(detail.starts_with("iperf3 client failed"), "{detail}");
}

#[tokio::test]
async fn test_session_deploys_runs_and_tears_down() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir);
    let cluster = FakeCluster::new(two_agents());

    let outcome = overlaytest::run_session(
        &cluster,
        &config,
        &options(&[ProbeKind::Latency]),
        DEPLOY_AND_TEARDOWN,
    )
    .await
    .unwrap();

    assert!(matches!(outcome, Some(RunOutcome::Completed(s)) if s.total == 10));
    assert_eq!(cluster.steps(), vec!["deploy", "wait", "teardown"]);
}

#[tokio::test]
async fn test_teardown_runs_after_failed_rerun() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir);
    let cluster = FakeCluster::new(two_agents());
    let opts = RunOptions {
        rerun: BTreeSet::from([3]),
        ..Default::default()
    };

    let err = overlaytest::run_session(&cluster, &config, &opts, DEPLOY_AND_TEARDOWN)
        .await
        .unwrap_err();

    assert!(err.to_string().contains("no stored results"), "{err:#}");
    assert_eq!(cluster.steps(), vec!["deploy", "wait", "teardown"]);
}

#[tokio::test]
async fn test_teardown_runs_when_workload_never_ready() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir);
    let cluster = FakeCluster::new(two_agents()).never_ready();

    let err = overlaytest::run_session(
        &cluster,
        &config,
        &options(&[ProbeKind::Latency]),
        DEPLOY_AND_TEARDOWN,
    )
    .await
    .unwrap_err();

    assert!(err.to_string().contains("not ready"), "{err:#}");
    assert_eq!(cluster.steps(), vec!["deploy", "wait", "teardown"]);
    assert!(cluster.commands().is_empty());
}

#[tokio::test]
async fn test_session_without_lifecycle_flags_leaves_workload_alone() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir);
    let cluster = FakeCluster::new(two_agents()).never_ready();

    let result = overlaytest::run_session(
        &cluster,
        &config,
        &options(&[ProbeKind::Latency]),
        Lifecycle::default(),
    )
    .await;

    assert!(result.is_err());
    assert_eq!(cluster.steps(), vec!["wait"]);
}

#[tokio::test]
async fn test_lifecycle_only_session_runs_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir);
    let cluster = FakeCluster::new(two_agents());

    let outcome = overlaytest::run_session(
        &cluster,
        &config,
        &RunOptions::default(),
        DEPLOY_AND_TEARDOWN,
    )
    .await
    .unwrap();

    assert_eq!(outcome, None);
    assert_eq!(cluster.steps(), vec!["deploy", "teardown"]);
    assert!(cluster.commands().is_empty());
}
