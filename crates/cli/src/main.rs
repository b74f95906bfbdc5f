use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use kwait_apply::{diff_summary, manifest::parse_manifests, prune_server_fields, LifecycleError, Orchestrator};
use kwait_core::{
    parse_poll_interval, DeleteWait, LifecycleConfig, ProviderConfig, ResourceIdentity, Timeout, WaitCondition,
    DEFAULT_POLL_INTERVAL, DEFAULT_TIMEOUT,
};
use kwait_kubehub::{discover, get_kube_client, identity_for, resolve_kind, resolve_resource, KubeCluster};
use serde_json::{json, Value as Json};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "kwaitctl", version, about = "Apply Kubernetes objects and wait for them to converge")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Kubernetes namespace (default: from manifest, then current context)
    #[arg(long = "ns", global = true)]
    namespace: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output {
    Human,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Server-side apply every object in a manifest, then wait for conditions
    Apply {
        /// Manifest file (`-` for stdin)
        #[arg(short = 'f', long = "filename")]
        file: PathBuf,
        /// Condition to wait for: `PATH` (non-empty) or `PATH=VALUE`; repeatable, checked in order
        #[arg(long = "wait")]
        wait: Vec<String>,
        /// Per-condition timeout; 0 checks once, negative waits up to a week
        #[arg(long = "timeout", default_value = DEFAULT_TIMEOUT, allow_hyphen_values = true)]
        timeout: String,
        #[arg(long = "poll-interval", default_value = DEFAULT_POLL_INTERVAL)]
        poll_interval: String,
        /// Take ownership of fields managed by others
        #[arg(long = "force-conflicts", action = ArgAction::SetTrue)]
        force_conflicts: bool,
        #[arg(long = "field-manager")]
        field_manager: Option<String>,
    },
    /// Delete an object, optionally waiting until it is gone
    Delete {
        /// Resource key, e.g. "v1/configmaps" or "apps/v1/deployments"
        resource: String,
        name: String,
        /// Wait for the object to disappear; 0 checks once, negative waits up to a week
        #[arg(long = "wait-timeout", allow_hyphen_values = true)]
        wait_timeout: Option<String>,
        #[arg(long = "poll-interval", default_value = DEFAULT_POLL_INTERVAL)]
        poll_interval: String,
    },
    /// Print a live object, or one field of it
    Get {
        /// Resource key, e.g. "v1/configmaps" or "apps/v1/deployments"
        resource: String,
        name: String,
        #[arg(long = "jsonpath")]
        jsonpath: Option<String>,
    },
    /// Summarize what applying a manifest would change
    Diff {
        #[arg(short = 'f', long = "filename")]
        file: PathBuf,
    },
}

fn init_tracing() {
    let env = std::env::var("KWAIT_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("KWAIT_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            match metrics_exporter_prometheus::PrometheusBuilder::new().with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid KWAIT_METRICS_ADDR; expected host:port");
        }
    }
}

/// Cancel in-flight waits on Ctrl-C.
fn cancel_on_interrupt() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("interrupted; cancelling");
            trigger.cancel();
        }
    });
    token
}

/// `PATH` or `PATH=VALUE`.
fn parse_wait_flag(raw: &str, timeout: Timeout, every: std::time::Duration) -> Result<WaitCondition> {
    let (path, value) = match raw.split_once('=') {
        Some((p, v)) => (p, Some(v)),
        None => (raw, None),
    };
    Ok(WaitCondition::new(path, value)?.timeout(timeout).poll_interval(every))
}

fn read_input(file: &Path) -> Result<String> {
    if file.as_os_str() == "-" {
        return std::io::read_to_string(std::io::stdin()).context("reading manifest from stdin");
    }
    std::fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))
}

/// Partial failures say so; the exit code is non-zero either way.
fn explain(err: LifecycleError) -> anyhow::Error {
    if err.state_changed() {
        anyhow::Error::new(err).context("the object was changed but did not reach the expected state")
    } else {
        err.into()
    }
}

fn print_json(v: &Json) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(v)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let provider = ProviderConfig::from_env()?;

    let client = get_kube_client().await?;
    let default_ns = cli.namespace.clone().unwrap_or_else(|| client.default_namespace().to_string());
    let orch = Orchestrator::new(KubeCluster::new(client.clone()), &provider).with_cancellation(cancel_on_interrupt());

    match cli.command {
        Commands::Apply { file, wait, timeout, poll_interval, force_conflicts, field_manager } => {
            let timeout = Timeout::parse(&timeout)?;
            let every = parse_poll_interval(&poll_interval)?;
            let conditions = wait.iter().map(|w| parse_wait_flag(w, timeout, every)).collect::<Result<Vec<_>>>()?;
            let opts = LifecycleConfig { force_conflicts: force_conflicts.then_some(true), field_manager, ..Default::default() }
                .apply_options(&provider);
            let manifests = parse_manifests(&read_input(&file)?, cli.namespace.as_deref())?;
            let discovery = discover(client.clone()).await?;

            let mut applied = Vec::new();
            for m in manifests {
                let resolved = resolve_kind(&discovery, &m.api_version, &m.kind)?;
                let m = if resolved.namespaced { m } else { m.cluster_scoped() };
                let ns = m.namespace.as_deref().unwrap_or(&default_ns);
                let id = identity_for(&resolved, Some(ns), &m.name)?;
                info!(target_object = %id, "applying");
                let live = orch.upsert(&id, &m.payload, &opts, &conditions).await.map_err(explain)?;
                match cli.output {
                    Output::Human => println!("{}/{} applied", m.kind, m.name),
                    Output::Json => applied.push(live),
                }
            }
            if cli.output == Output::Json {
                print_json(&Json::Array(applied))?;
            }
        }
        Commands::Delete { resource, name, wait_timeout, poll_interval } => {
            let wait = match wait_timeout {
                Some(t) => Some(DeleteWait { timeout: Timeout::parse(&t)?, poll_interval: parse_poll_interval(&poll_interval)? }),
                None => None,
            };
            let discovery = discover(client.clone()).await?;
            let id = identity_for(&resolve_resource(&discovery, &resource)?, Some(&default_ns), &name)?;
            orch.tear_down(&id, wait.as_ref()).await.map_err(explain)?;
            match cli.output {
                Output::Human => println!("{} deleted", id),
                Output::Json => print_json(&json!({ "deleted": id }))?,
            }
        }
        Commands::Get { resource, name, jsonpath } => {
            let discovery = discover(client.clone()).await?;
            let id = identity_for(&resolve_resource(&discovery, &resource)?, Some(&default_ns), &name)?;
            let live = orch.read(&id).await?;
            match (jsonpath, cli.output) {
                (Some(path), _) => {
                    let field = kwait_path::FieldPath::parse(&path)?;
                    let value = field.lookup(&live).ok_or_else(|| anyhow!("{} not found in {}", field, id))?;
                    println!("{}", value);
                }
                (None, Output::Json) => print_json(&live)?,
                (None, Output::Human) => print!("{}", serde_yaml::to_string(&prune_server_fields(live))?),
            }
        }
        Commands::Diff { file } => {
            let manifests = parse_manifests(&read_input(&file)?, cli.namespace.as_deref())?;
            let discovery = discover(client.clone()).await?;
            let mut out = Vec::new();
            for m in manifests {
                let resolved = resolve_kind(&discovery, &m.api_version, &m.kind)?;
                let m = if resolved.namespaced { m } else { m.cluster_scoped() };
                let id: ResourceIdentity =
                    identity_for(&resolved, Some(m.namespace.as_deref().unwrap_or(&default_ns)), &m.name)?;
                let base = match orch.read(&id).await {
                    Ok(live) => prune_server_fields(live),
                    Err(LifecycleError::Read { source, .. }) if source.is_not_found() => Json::Null,
                    Err(e) => return Err(e.into()),
                };
                let summary = diff_summary(&prune_server_fields(m.payload), &base);
                match cli.output {
                    Output::Human => println!(
                        "{}/{}: +{} ~{} -{}{}",
                        m.kind,
                        m.name,
                        summary.adds,
                        summary.updates,
                        summary.removes,
                        if base.is_null() { " (new)" } else { "" }
                    ),
                    Output::Json => out.push(json!({ "object": id, "summary": summary, "exists": !base.is_null() })),
                }
            }
            if cli.output == Output::Json {
                print_json(&Json::Array(out))?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn wait_flags_with_and_without_values() {
        let c = parse_wait_flag("status.readyReplicas=3", Timeout::Once, Duration::from_secs(1)).unwrap();
        assert_eq!(c.expected_value.as_deref(), Some("3"));
        assert_eq!(c.timeout, Timeout::Once);

        let c = parse_wait_flag("{.status.loadBalancer.ingress[0].ip}", Timeout::Week, Duration::from_secs(2)).unwrap();
        assert_eq!(c.expected_value, None);
        assert_eq!(c.poll_interval, Duration::from_secs(2));

        assert!(parse_wait_flag("status..phase", Timeout::Once, Duration::from_secs(1)).is_err());
    }

    #[test]
    fn negative_timeouts_parse_as_flags() {
        let cli = Cli::try_parse_from(["kwaitctl", "apply", "-f", "x.yaml", "--timeout", "-1s", "--wait", "status.phase=Ready"])
            .unwrap();
        let Commands::Apply { timeout, wait, .. } = cli.command else { panic!("expected apply") };
        assert_eq!(timeout, "-1s");
        assert_eq!(wait, vec!["status.phase=Ready"]);

        let cli = Cli::try_parse_from(["kwaitctl", "--ns", "prod", "delete", "apps/v1/deployments", "web", "--wait-timeout", "0"])
            .unwrap();
        assert_eq!(cli.namespace.as_deref(), Some("prod"));
        assert!(matches!(cli.command, Commands::Delete { wait_timeout: Some(ref t), .. } if t == "0"));
    }
}
