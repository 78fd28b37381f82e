use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Result};
use clap::Parser;
use overlaytest::cluster::KubeCluster;
use overlaytest::config::{HarnessConfig, RunOptions};
use overlaytest::matrix::CaseId;
use overlaytest::topology::ZoneFilter;
use overlaytest::{Lifecycle, RunOutcome};

/// Exit status when the run finished with failed cases.
const EXIT_CASES_FAILED: u8 = 2;

#[derive(Parser)]
#[command(
    name = "overlaytest",
    about = "Cross-zone pod, node and internet connectivity checks",
    version,
    long_about = None
)]
struct Cli {
    /// Location of your kubeconfig file (required to touch the cluster)
    #[arg(short = 'k', long)]
    kubeconfig: Option<PathBuf>,

    /// Namespace of the daemonset (overrides the config file)
    #[arg(short = 'n', long)]
    namespace: Option<String>,

    /// Show verbose output
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Test ICMP reachability
    #[arg(short = 'p', long)]
    ping: bool,

    /// Test HTTP reachability
    #[arg(short = 'c', long)]
    curl: bool,

    /// Measure bandwidth between agents (disables ping and curl)
    #[arg(short = 'i', long)]
    iperf: bool,

    /// List previously run tests
    #[arg(short = 'l', long)]
    list: bool,

    /// Test IDs to rerun
    #[arg(short = 'r', long, value_delimiter = ',')]
    rerun: Vec<CaseId>,

    /// Tests from specified AZ
    #[arg(short = 'f', long, default_value = "all")]
    from_az: ZoneFilter,

    /// Tests to specified AZ
    #[arg(short = 't', long, default_value = "all")]
    to_az: ZoneFilter,

    /// Create the namespace and daemonset before testing
    #[arg(long)]
    deploy: bool,

    /// Delete the daemonset after testing
    #[arg(long)]
    teardown: bool,

    /// Harness configuration file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,
}

fn exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_CASES_FAILED)
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Initialize tracing
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    if !std::io::stdout().is_terminal() {
        colored::control::set_override(false);
    }

    let mut config = HarnessConfig::resolve(cli.config.as_deref())?;
    if let Some(namespace) = cli.namespace {
        config.cluster.namespace = namespace;
    }

    // only list saved test results and exit
    if cli.list {
        let summary = overlaytest::list_results(&config)?;
        return Ok(exit_code(summary.is_success()));
    }

    let options = RunOptions {
        from_zone: cli.from_az,
        to_zone: cli.to_az,
        rerun: cli.rerun.into_iter().collect(),
        verbose: cli.verbose,
        ..Default::default()
    }
    .with_kinds(cli.ping, cli.curl, cli.iperf);

    let lifecycle = Lifecycle {
        deploy: cli.deploy,
        teardown: cli.teardown,
    };
    if !options.has_tests() && lifecycle == Lifecycle::default() {
        println!("Nothing to do; select at least one of --ping, --curl, --iperf or --rerun.");
        return Ok(ExitCode::SUCCESS);
    }

    // to prevent running tests on the wrong cluster, the kubeconfig has to be given explicitly
    let Some(kubeconfig) = cli.kubeconfig else {
        bail!("Kubeconfig path has to be specified via --kubeconfig/-k flag");
    };
    println!("Using kubeconfig: {}", kubeconfig.display());

    let cluster =
        KubeCluster::connect(&kubeconfig, config.cluster.clone(), config.probes.http_port).await?;
    tracing::info!(namespace = %cluster.namespace(), "Cluster ready for testing");

    let outcome = overlaytest::run_session(&cluster, &config, &options, lifecycle).await?;
    let success = match outcome {
        Some(RunOutcome::Completed(summary)) => summary.is_success(),
        _ => true,
    };
    Ok(exit_code(success))
}
