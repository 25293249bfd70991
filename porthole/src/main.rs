mod args;
mod colors;

use crate::colors::{FG1, FG2};
use anyhow::{Context, Result};
use clap::Parser;
use const_format::concatcp;
use kube::Client;
use owo_colors::OwoColorize;
use porthole_refresh::cluster::{ClusterHandle, ClusterSet};
use porthole_refresh::events::EventStreamManager;
use porthole_refresh::informers::ClusterInformers;
use porthole_refresh::logs::api::KubePodLogApi;
use porthole_refresh::permissions::{PermissionChecker, SelfAccessReviewer};
use porthole_refresh::{RefreshConfig, RefreshManager, telemetry};
use std::sync::Arc;
use tracing::info;

const APP: &str = concatcp!("porthole/", env!("CARGO_PKG_VERSION"));

#[tokio::main]
async fn main() -> Result<()> {
    porthole_common::init();

    // Exit the whole process when any thread panics unrecovered; the
    // orchestrator restarts the container. Supervised tasks recover their
    // own panics before this fires.
    let default_panic = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        default_panic(info);
        std::process::exit(1);
    }));

    let cli = args::Cli::parse();
    match cli.command {
        args::Commands::Server(args) => run_server(args).await,
    }
}

fn refresh_config(tuning: &porthole_common::args::TuningArgs) -> RefreshConfig {
    RefreshConfig {
        request_timeout: tuning.request_timeout,
        manual_job_max_attempts: tuning.manual_job_max_attempts,
        manual_job_retry_delay: tuning.manual_job_retry_delay,
        snapshot_ttl: tuning.snapshot_ttl,
        permission_ttl: tuning.permission_ttl,
        permission_prime_interval: tuning.permission_prime_interval,
        log_backoff_initial: tuning.log_backoff_initial,
        log_backoff_max: tuning.log_backoff_max,
        log_batch_window: tuning.log_batch_window,
        log_keepalive_interval: tuning.log_keepalive_interval,
        ..Default::default()
    }
}

/// One client per requested kubeconfig context; no contexts means the
/// current context (or in-cluster config).
async fn connect_clusters(contexts: &[String]) -> Result<Vec<(String, Client)>> {
    let mut clients = Vec::new();

    if contexts.is_empty() {
        let config = kube::Config::infer()
            .await
            .context("failed to infer kube config")?;
        let name = config
            .cluster_url
            .host()
            .unwrap_or("default")
            .to_string();
        let client = Client::try_from(config).context("failed to build kube client")?;
        clients.push((name, client));
    } else {
        for ctx in contexts {
            let options = kube::config::KubeConfigOptions {
                context: Some(ctx.clone()),
                ..Default::default()
            };
            let config = kube::Config::from_kubeconfig(&options)
                .await
                .with_context(|| format!("failed to load kube context {ctx:?}"))?;
            let client = Client::try_from(config)
                .with_context(|| format!("failed to build client for context {ctx:?}"))?;
            clients.push((ctx.clone(), client));
        }
    }

    Ok(clients)
}

async fn run_server(args: args::ServerArgs) -> Result<()> {
    let config = refresh_config(&args.tuning);
    let telemetry = telemetry::global();

    println!(
        "{}{}",
        "🔭 porthole refresh backend starting • version=".color(FG1),
        APP.color(FG2),
    );

    let clusters = Arc::new(ClusterSet::new());
    for (id, client) in connect_clusters(&args.clusters.contexts).await? {
        let mut checker = PermissionChecker::new(
            Arc::new(SelfAccessReviewer::new(client.clone())),
            config.permission_ttl,
        );
        if args.clusters.permission_audit {
            // Audit mode runs every decision past an uncached second
            // reviewer and warns on disagreement.
            checker = checker.with_audit(Arc::new(SelfAccessReviewer::new(client.clone())));
        }

        let events = Arc::new(EventStreamManager::new(&id, &config, Arc::clone(&telemetry)));
        let informers = Arc::new(ClusterInformers::new(
            &id,
            client.clone(),
            Arc::new(checker),
            Arc::clone(&events),
            Arc::clone(&telemetry),
        ));

        println!(
            "{}{}",
            "🔗 cluster connected • id=".color(FG1),
            id.color(FG2),
        );
        clusters.insert(ClusterHandle {
            id: id.clone(),
            informers: Some(Arc::clone(&informers)),
            state: informers,
            logs: Arc::new(KubePodLogApi::new(client)),
            events,
        });
    }

    let manager = RefreshManager::new(config, Arc::clone(&clusters), Arc::clone(&telemetry));
    manager
        .register_default_domains()
        .context("failed to register snapshot domains")?;
    info!(target: "porthole", "registered domains: {}", manager.registry().list().join(", "));

    manager.start().await.context("failed to start refresh manager")?;
    println!("{}", "🟢 refresh manager running".green());
    porthole_common::signal_ready();

    let shutdown = tokio_util::sync::CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            porthole_common::shutdown::shutdown_signal().await;
            println!("{}", "🛑 shutdown signal received".red());
            shutdown.cancel();
        }
    });

    // Process-local stand-in for the console's diagnostics panel: a periodic
    // dump of the per-stream counters.
    let mut diagnostics = tokio::time::interval(args.tuning.diagnostics_interval);
    diagnostics.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    diagnostics.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = diagnostics.tick() => {
                for status in manager.telemetry().snapshot_summary() {
                    info!(
                        target: "porthole::diagnostics",
                        "stream={} messages={} dropped={} errors={} resyncs={} last_error={:?}",
                        status.name,
                        status.total_messages,
                        status.dropped_messages,
                        status.error_count,
                        status.resyncs,
                        status.last_error,
                    );
                }
            }
        }
    }

    manager
        .shutdown()
        .await
        .context("refresh manager shutdown reported an error")?;
    println!("{}", "👋 refresh backend stopped".green());
    Ok(())
}
