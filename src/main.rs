//! Local Volume Converter
//!
//! Command line entry point. `list` shows the chart-declared claims still on
//! hostPath volumes; `convert` moves one of them to a local volume.
//!
//! ```text
//! local-volume-converter list
//! local-volume-converter convert --namespace kube-system --chart sonarr --volume config --volume media
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use local_volume_converter::controlplane::{render_candidates, resolve};
use local_volume_converter::{
    create_client, ClusterClientRef, ConversionRequest, ConverterConfig, ExecLauncherConfig,
    JobLauncherConfig, KubeClusterClient, LauncherConfig, MigrationContext,
    MigrationNamespaceManager, PollerConfig, ResourcePicker, VolumeConversionOrchestrator,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Local Volume Converter - move chart volumes from hostPath to local storage
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the kubeconfig (in-cluster or default config when unset)
    #[arg(long, env = "KUBECONFIG")]
    kubeconfig: Option<PathBuf>,

    /// Namespace the migration jobs run in
    #[arg(long, env = "MIGRATION_NAMESPACE", default_value = "pv-migration")]
    migration_namespace: String,

    /// Service account the migration jobs run as
    #[arg(long, env = "MIGRATION_SERVICE_ACCOUNT", default_value = "pv-migrate")]
    service_account: String,

    /// Delay between two polls of the cluster, in milliseconds
    #[arg(long, env = "POLL_INTERVAL_MS", default_value = "1000")]
    poll_interval_ms: u64,

    /// Image of the pv-migrate jobs
    #[arg(long, env = "PV_MIGRATE_IMAGE")]
    copy_image: Option<String>,

    /// Run a local pv-migrate binary instead of cluster jobs
    #[arg(long, env = "PV_MIGRATE_BINARY")]
    pv_migrate_binary: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List chart volumes still bound to hostPath volumes
    List,

    /// Convert chart volumes to local volumes in one migration session
    Convert {
        /// Namespace of the chart object
        #[arg(long)]
        namespace: String,

        /// Chart name
        #[arg(long)]
        chart: String,

        /// Logical volume name or claim name, repeatable
        #[arg(long = "volume", required = true)]
        volumes: Vec<String>,
    },
}

impl Args {
    fn converter_config(&self) -> ConverterConfig {
        let mut job = JobLauncherConfig::default();
        if let Some(image) = &self.copy_image {
            job.image = image.clone();
        }

        ConverterConfig {
            context: MigrationContext::new(&self.migration_namespace, &self.service_account),
            poller: PollerConfig {
                interval: Duration::from_millis(self.poll_interval_ms),
            },
            launcher: LauncherConfig {
                job,
                exec: self.pv_migrate_binary.clone().map(|binary| ExecLauncherConfig {
                    binary,
                    kubeconfig: self.kubeconfig.clone(),
                }),
            },
        }
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args)?;

    info!("Starting Local Volume Converter");
    info!("  Version: {}", local_volume_converter::VERSION);

    let client = create_client(args.kubeconfig.as_deref())
        .await
        .context("connecting to the cluster")?;
    let cluster: ClusterClientRef = Arc::new(KubeClusterClient::new(client));

    match &args.command {
        Command::List => list(cluster).await,
        Command::Convert {
            namespace,
            chart,
            volumes,
        } => convert(&args, cluster, namespace, chart, volumes).await,
    }
}

async fn list(cluster: ClusterClientRef) -> anyhow::Result<()> {
    let discovered = ResourcePicker::new(cluster)
        .discover()
        .await
        .context("discovering hostPath volumes")?;
    print!("{}", render_candidates(&discovered));
    Ok(())
}

async fn convert(
    args: &Args,
    cluster: ClusterClientRef,
    namespace: &str,
    chart: &str,
    volumes: &[String],
) -> anyhow::Result<()> {
    let config = args.converter_config();

    let picker = ResourcePicker::new(cluster.clone());
    let discovered = picker
        .discover()
        .await
        .context("discovering hostPath volumes")?;
    let requests = volumes
        .iter()
        .map(|volume| {
            resolve(&discovered, namespace, chart, volume).with_context(|| {
                format!("selecting volume {} of {}/{}", volume, namespace, chart)
            })
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping conversion");
            token.cancel();
        }
    });

    let manager = MigrationNamespaceManager::new(cluster.clone(), config.context.clone());
    manager
        .ensure()
        .await
        .context("preparing the migration namespace")?;

    let result = run_session(config, cluster, cancel, &requests).await;
    manager.teardown().await;
    result
}

/// Convert each request in turn, stopping at the first failure
async fn run_session(
    config: ConverterConfig,
    cluster: ClusterClientRef,
    cancel: CancellationToken,
    requests: &[ConversionRequest],
) -> anyhow::Result<()> {
    let orchestrator = VolumeConversionOrchestrator::new(config, cluster, cancel)?;

    for request in requests {
        let report = orchestrator.convert(request).await.with_context(|| {
            format!(
                "converting {}/{}",
                request.workload_namespace, request.claim_name
            )
        })?;

        info!(
            "Conversion of {}/{} finished in {}s",
            report.workload_namespace,
            report.claim_name,
            (report.finished_at - report.started_at).num_seconds()
        );
        println!("{}", report.notice);
    }
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) -> anyhow::Result<()> {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper=warn".parse()?)
        .add_directive("kube=info".parse()?)
        .add_directive("tower=warn".parse()?);

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
    Ok(())
}
