use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use metrics::counter;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use stagehand_controller::{spawn_controller, ControllerConfig};
use stagehand_core::ResourceKind;
use stagehand_kubehub::KubeSinkFactory;
use stagehand_lifecycle::{execute, Action, Lifecycle, Outcome, RecordingSink, Resource};
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

mod stages;

#[derive(Parser, Debug)]
#[command(name = "stagehandctl", version, about = "Stagehand: drive Kubernetes resources through staged lifecycles")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Kubernetes namespace (default: all namespaces)
    #[arg(long = "ns", global = true, env = "STAGEHAND_NAMESPACE")]
    namespace: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Load and build stage files; exit non-zero on the first broken one
    Check {
        /// Stage files (YAML, single or multi-document)
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Evaluate stages against a resource file without touching a cluster
    Eval {
        /// Stage file
        stages: PathBuf,
        /// Resource document (YAML or JSON)
        resource: PathBuf,
        /// Seed for weighted picks and jitter
        #[arg(long = "seed")]
        seed: Option<u64>,
        /// Dry-run every matching stage, not only the pick
        #[arg(long = "all", action = ArgAction::SetTrue)]
        all: bool,
    },
    /// Watch a resource kind and apply stages until Ctrl-C
    Run {
        /// GVK key, e.g. "v1/Pod" or "example.com/v1/Widget"
        #[arg(long = "gvk", default_value = "v1/Pod", env = "STAGEHAND_GVK")]
        gvk: String,
        /// Include the builtin pod and node stages
        #[arg(long = "builtin", action = ArgAction::SetTrue)]
        builtin: bool,
        /// Stage files; re-read on SIGHUP
        files: Vec<PathBuf>,
    },
}

fn init_tracing() {
    let env = std::env::var("STAGEHAND_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("STAGEHAND_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid STAGEHAND_METRICS_ADDR; expected host:port");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    match cli.command {
        Commands::Check { files } => check(&files, cli.output),
        Commands::Eval { stages, resource, seed, all } => eval(&stages, &resource, seed, all, cli.output).await,
        Commands::Run { gvk, builtin, files } => run(&gvk, cli.namespace, builtin, files).await,
    }
}

#[derive(Serialize)]
struct CheckRow {
    file: String,
    stages: usize,
    inert: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn check(files: &[PathBuf], output: Output) -> Result<()> {
    let mut rows = Vec::with_capacity(files.len());
    for file in files {
        let built = stages::read_file(file).and_then(|configs| {
            let lifecycle = Lifecycle::new(&configs)?;
            Ok((configs.len(), lifecycle.len()))
        });
        rows.push(match built {
            Ok((total, active)) => CheckRow { file: file.display().to_string(), stages: total, inert: total - active, error: None },
            Err(e) => CheckRow { file: file.display().to_string(), stages: 0, inert: 0, error: Some(format!("{:#}", e)) },
        });
    }
    let cross = if rows.iter().all(|r| r.error.is_none()) { stages::read_all(files, false).err() } else { None };

    match output {
        Output::Human => {
            for r in &rows {
                match &r.error {
                    None if r.inert > 0 => println!("ok    {} ({} stages, {} without selector)", r.file, r.stages, r.inert),
                    None => println!("ok    {} ({} stages)", r.file, r.stages),
                    Some(e) => println!("error {}: {}", r.file, e),
                }
            }
            if let Some(e) = &cross {
                println!("error {:#}", e);
            }
        }
        Output::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
    }

    let failed = rows.iter().filter(|r| r.error.is_some()).count();
    if failed > 0 {
        return Err(anyhow!("{} of {} stage files failed", failed, rows.len()));
    }
    match cross {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[derive(Serialize)]
struct EvalReport {
    resource: String,
    kind: String,
    matched: Vec<String>,
    picked: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    delay_ms: Option<u128>,
    runs: Vec<DryRun>,
}

#[derive(Serialize)]
struct DryRun {
    stage: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    outcome: Option<Outcome>,
    actions: Vec<Action>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// `kind` and the API group (the part of `apiVersion` before `/`).
fn kind_and_group(doc: &serde_json::Value) -> (String, String) {
    let kind = doc.get("kind").and_then(|v| v.as_str()).unwrap_or("Pod").to_string();
    let api_version = doc.get("apiVersion").and_then(|v| v.as_str()).unwrap_or("v1");
    let group = api_version.rsplit_once('/').map(|(g, _)| g.to_string()).unwrap_or_default();
    (kind, group)
}

async fn eval(stages_path: &PathBuf, resource_path: &PathBuf, seed: Option<u64>, all: bool, output: Output) -> Result<()> {
    let lifecycle = stages::build(std::slice::from_ref(stages_path), false)?;
    let text = std::fs::read_to_string(resource_path).with_context(|| format!("reading {}", resource_path.display()))?;
    let doc: serde_json::Value =
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", resource_path.display()))?;
    let (kind, group) = kind_and_group(&doc);
    let lifecycle = lifecycle.for_kind(&group, &kind);
    let resource = Resource::from_document(ResourceKind::from_kind(&kind), doc).observed_at(Utc::now());
    info!(resource = %resource.display_name(), kind = %kind, stages = lifecycle.len(), "eval invoked");

    let mut rng = match seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_entropy(),
    };
    let matched: Vec<_> = lifecycle.matches(&resource).into_iter().cloned().collect();
    let picked = lifecycle.pick(&resource, &mut rng)?.cloned();
    let delay = match &picked {
        Some(stage) => stage.delay(&resource, resource.now(), &mut rng)?,
        None => None,
    };

    let targets: Vec<_> = if all { matched.clone() } else { picked.iter().cloned().collect() };
    let mut runs = Vec::with_capacity(targets.len());
    for stage in &targets {
        let sink = RecordingSink::new();
        let result = execute(stage, &resource, &sink).await;
        runs.push(DryRun {
            stage: stage.name().to_string(),
            outcome: result.as_ref().ok().copied(),
            actions: sink.actions(),
            error: result.err().map(|e| e.to_string()),
        });
    }

    let report = EvalReport {
        resource: resource.display_name(),
        kind,
        matched: matched.iter().map(|s| s.name().to_string()).collect(),
        picked: picked.as_ref().map(|s| s.name().to_string()),
        delay_ms: delay.map(|d| d.as_millis()),
        runs,
    };
    match output {
        Output::Human => print_report(&report)?,
        Output::Json => println!("{}", serde_json::to_string_pretty(&report)?),
    }
    Ok(())
}

fn print_report(report: &EvalReport) -> Result<()> {
    println!("resource: {} ({})", report.resource, report.kind);
    if report.matched.is_empty() {
        println!("matched:  (none)");
    } else {
        println!("matched:  {}", report.matched.join(", "));
    }
    println!("picked:   {}", report.picked.as_deref().unwrap_or("-"));
    match report.delay_ms {
        Some(ms) => println!("delay:    {}ms", ms),
        None => println!("delay:    none"),
    }
    for run in &report.runs {
        println!();
        println!("{}:", run.stage);
        for action in &run.actions {
            match action {
                Action::Event(e) => println!("  event  {} {}: {}", e.type_, e.reason, e.message),
                Action::Delete => println!("  delete"),
                Action::Patch(p) => {
                    let target = p.subresource.as_deref().unwrap_or("-");
                    let user = p.impersonation.as_ref().map(|i| format!(" as {}", i.username)).unwrap_or_default();
                    println!("  patch  {} {}{}", target, p.wire_type.content_type(), user);
                    println!("         {}", serde_json::to_string(&p.data)?);
                }
            }
        }
        match (&run.outcome, &run.error) {
            (_, Some(e)) => println!("  failed: {}", e),
            (Some(Outcome::Deleted), None) => println!("  -> deleted"),
            _ => {}
        }
    }
    Ok(())
}

async fn run(gvk: &str, namespace: Option<String>, builtin: bool, files: Vec<PathBuf>) -> Result<()> {
    if files.is_empty() && !builtin {
        return Err(anyhow!("no stages: pass stage files or --builtin"));
    }
    let client = kube::Client::try_default().await.context("building kube client")?;
    let target = stagehand_kubehub::resolve(client.clone(), gvk).await?;
    let (group, kind) = (target.gvk.group.clone(), target.gvk.kind.clone());
    let lifecycle = stages::build(&files, builtin)?.for_kind(&group, &kind);
    if lifecycle.is_empty() {
        warn!(gvk = %gvk, "no stages target this kind; resources will be watched but left alone");
    }
    info!(gvk = %gvk, ns = ?namespace, stages = lifecycle.len(), "run invoked");

    let factory = Arc::new(KubeSinkFactory::new(client.clone(), target.clone()));
    let (delta_tx, handle) = spawn_controller(target.kind(), lifecycle, factory, ControllerConfig::from_env());

    let watcher_handle = tokio::spawn({
        let target = target.clone();
        let client = client.clone();
        async move {
            if let Err(e) = stagehand_kubehub::start_watcher(client, &target, namespace.as_deref(), delta_tx).await {
                error!(error = ?e, "watcher failed");
            }
        }
    });

    let (reload_tx, mut reload_rx) = mpsc::channel::<()>(1);
    listen_for_hangup(reload_tx);
    loop {
        tokio::select! {
            Some(()) = reload_rx.recv() => {
                match stages::build(&files, builtin) {
                    Ok(next) => {
                        counter!("stagehand_reload_total", 1u64);
                        handle.reload(next.for_kind(&group, &kind));
                    }
                    Err(e) => warn!(error = %format!("{:#}", e), "reload failed; keeping current stages"),
                }
            }
            _ = signal::ctrl_c() => {
                info!("Ctrl-C received; shutting down");
                break;
            }
        }
    }

    // Aborting the watcher drops the last delta sender, which stops the controller.
    watcher_handle.abort();
    Ok(())
}

#[cfg(unix)]
fn listen_for_hangup(tx: mpsc::Sender<()>) {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::hangup()) {
        Ok(mut hup) => {
            tokio::spawn(async move {
                while hup.recv().await.is_some() {
                    info!("SIGHUP received; reloading stages");
                    if tx.send(()).await.is_err() {
                        break;
                    }
                }
            });
        }
        Err(e) => warn!(error = %e, "cannot listen for SIGHUP; reload disabled"),
    }
}

#[cfg(not(unix))]
fn listen_for_hangup(_tx: mpsc::Sender<()>) {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn kind_and_group_from_api_version() {
        assert_eq!(kind_and_group(&json!({"apiVersion": "v1", "kind": "Node"})), ("Node".to_string(), String::new()));
        assert_eq!(
            kind_and_group(&json!({"apiVersion": "example.com/v1", "kind": "Widget"})),
            ("Widget".to_string(), "example.com".to_string())
        );
        assert_eq!(kind_and_group(&json!({})), ("Pod".to_string(), String::new()));
    }

    #[test]
    fn cli_parses_commands() {
        let cli = Cli::try_parse_from(["stagehandctl", "-o", "json", "eval", "s.yaml", "pod.yaml", "--seed", "7", "--all"]).unwrap();
        assert_eq!(cli.output, Output::Json);
        match cli.command {
            Commands::Eval { seed, all, .. } => {
                assert_eq!(seed, Some(7));
                assert!(all);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(Cli::try_parse_from(["stagehandctl", "check"]).is_err());
        let cli = Cli::try_parse_from(["stagehandctl", "run", "--builtin", "--ns", "demo"]).unwrap();
        assert_eq!(cli.namespace.as_deref(), Some("demo"));
        assert!(matches!(cli.command, Commands::Run { builtin: true, ref gvk, .. } if gvk == "v1/Pod"));
    }
}
