//! Harness configuration.
//!
//! Two layers: a TOML file describing the cluster workload and probe
//! parameters (`HarnessConfig`), and the per-invocation selection of what to
//! run (`RunOptions`). Both are built once at startup and passed explicitly
//! to the generator and executor.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::matrix::{CaseId, ProbeKind};
use crate::topology::{ExternalAnchor, ZoneFilter};

/// Environment variable naming a config file to use when `--config` is absent.
pub const CONFIG_ENV: &str = "OVERLAYTEST_CONFIG";

/// Config file picked up from the working directory.
pub const LOCAL_CONFIG: &str = "overlaytest.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HarnessConfig {
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub probes: ProbeSettings,
    #[serde(default)]
    pub results: ResultsConfig,
}

impl HarnessConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        config
            .probes
            .validate()
            .with_context(|| format!("invalid config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded harness configuration");
        Ok(config)
    }

    /// Resolve the configuration for this invocation.
    ///
    /// An explicit path must load. Otherwise `$OVERLAYTEST_CONFIG`, then
    /// `./overlaytest.toml`, then compiled-in defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "OVERLAYTEST_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let local = Path::new(LOCAL_CONFIG);
        if local.exists() {
            match Self::load(local) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %local.display(),
                        error = %e,
                        "local config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Ok(Self::default())
    }
}

// ---------------------------------------------------------------------------
// Cluster
// ---------------------------------------------------------------------------

/// Where the agents live and how to reach them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub namespace: String,
    /// Name of the daemon workload that runs one agent per node.
    pub daemonset: String,
    /// Label selector matching the agent pods.
    pub label_selector: String,
    /// Container inside the agent pod that commands are executed in.
    pub container: String,
    /// Image used when the harness deploys the workload itself.
    pub image: String,
    /// Readiness checks before giving up on the workload.
    pub ready_attempts: u32,
    /// Wait after the n-th failed readiness check is `n * ready_backoff_secs`.
    pub ready_backoff_secs: u64,
    /// Attempts per remote command when the exec channel cannot be opened.
    pub exec_attempts: u32,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            namespace: "dpservice-test".to_string(),
            daemonset: "overlaytest".to_string(),
            label_selector: "name=overlaytest".to_string(),
            container: "overlaytest".to_string(),
            image: "nicolaka/netshoot:latest".to_string(),
            ready_attempts: 3,
            ready_backoff_secs: 5,
            exec_attempts: 3,
        }
    }
}

// ---------------------------------------------------------------------------
// Probes
// ---------------------------------------------------------------------------

/// Parameters of the commands the probes run on the agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeSettings {
    /// Echo requests per latency probe.
    pub ping_count: u32,
    /// Port the agents serve HTTP on.
    pub http_port: u16,
    /// First port used by transient iperf3 servers.
    pub iperf_port: u16,
    /// Number of consecutive ports iperf3 servers are spread over.
    pub iperf_port_span: u16,
    /// Amount of data each bandwidth probe transfers (iperf3 `-n`).
    pub iperf_bytes: String,
    pub external_address: String,
    pub external_name: String,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        let anchor = ExternalAnchor::default();
        Self {
            ping_count: 5,
            http_port: 80,
            iperf_port: 12345,
            iperf_port_span: 1000,
            iperf_bytes: "10M".to_string(),
            external_address: anchor.address,
            external_name: anchor.name,
        }
    }
}

impl ProbeSettings {
    /// Every port handed to an iperf3 server must be a distinct valid port.
    pub fn validate(&self) -> Result<()> {
        if self.iperf_port_span == 0 {
            bail!("probes.iperf_port_span must be at least 1");
        }
        let last = u32::from(self.iperf_port) + u32::from(self.iperf_port_span) - 1;
        if last > u32::from(u16::MAX) {
            bail!("probes.iperf_port_span runs past port 65535 (last port would be {last})");
        }
        Ok(())
    }

    pub fn anchor(&self) -> ExternalAnchor {
        ExternalAnchor {
            address: self.external_address.clone(),
            name: self.external_name.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResultsConfig {
    /// File holding the most recent batch.
    pub path: PathBuf,
}

impl Default for ResultsConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("test_results.json"),
        }
    }
}

// ---------------------------------------------------------------------------
// Run options
// ---------------------------------------------------------------------------

/// What a single invocation runs. Never mutated after construction.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub from_zone: ZoneFilter,
    pub to_zone: ZoneFilter,
    pub kinds: BTreeSet<ProbeKind>,
    /// Stored cases to run again instead of generating a new batch.
    pub rerun: BTreeSet<CaseId>,
    pub verbose: bool,
}

impl RunOptions {
    /// Selecting bandwidth disables the other kinds for the run.
    pub fn with_kinds(mut self, ping: bool, curl: bool, iperf: bool) -> Self {
        self.kinds.clear();
        if iperf {
            self.kinds.insert(ProbeKind::Bandwidth);
            return self;
        }
        if ping {
            self.kinds.insert(ProbeKind::Latency);
        }
        if curl {
            self.kinds.insert(ProbeKind::Http);
        }
        self
    }

    pub fn is_enabled(&self, kind: ProbeKind) -> bool {
        self.kinds.contains(&kind)
    }

    pub fn is_rerun(&self) -> bool {
        !self.rerun.is_empty()
    }

    /// Whether this invocation runs any case at all. A re-run needs no kind
    /// selection: stored cases carry their own kind.
    pub fn has_tests(&self) -> bool {
        !self.kinds.is_empty() || self.is_rerun()
    }
}
