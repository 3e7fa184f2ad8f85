mod cli;
mod collector;
mod kubernetes;
mod tee;
mod types;
mod utils;
mod watcher;

use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use cli::Cli;
use collector::{Collector, DiskCollector, MultiplexCollector, StreamCollector};
use kubernetes::KubeLogSource;
use utils::LabelSelector;
use watcher::{WatchOptions, Watcher};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // //////////////////////////////////////
    // setup logging

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // //////////////////////////////////////
    // validate CLI flags

    if !cli.pods.is_empty() && cli.selector.is_some() {
        error!("Cannot specify both pod names and a label selector at the same time.");
        std::process::exit(1);
    }

    if cli.pods.is_empty() && cli.namespaces.is_empty() {
        error!("At least a namespace or a pod name pattern must be given.");
        std::process::exit(1);
    }

    let label_selector = match cli.selector.as_deref() {
        Some(expression) => match LabelSelector::parse(expression) {
            Ok(selector) => Some(selector),
            Err(err) => {
                error!("Invalid label selector: {}", err);
                std::process::exit(1);
            }
        },
        None => None,
    };

    let directory = cli.output.clone().unwrap_or_else(|| {
        format!("capture-{}", chrono::Local::now().format("%Y.%m.%dT%H.%M.%S"))
    });

    info!(directory = %directory, "Storing logs on disk.");

    // //////////////////////////////////////
    // assemble the collector chain

    let dump_events = cli.events || cli.raw_events;

    let disk = DiskCollector::new(&directory, cli.flat, cli.events, cli.raw_events)
        .context("failed to create log collector")?;

    let collector: Arc<dyn Collector> = if cli.stream {
        let stdout = StreamCollector::new(cli.prefix.clone());
        Arc::new(MultiplexCollector::new(Box::new(disk), Box::new(stdout)))
    } else {
        Arc::new(disk)
    };

    // //////////////////////////////////////
    // setup kubernetes client

    debug!("Creating Kubernetes client.");

    let client = kubernetes::create_client(cli.context.clone())
        .await
        .context("failed to create Kubernetes client")?;

    // //////////////////////////////////////
    // take the initial snapshot, then start to watch pods & maybe events

    if dump_events {
        debug!("Starting to watch pods & events.");
    } else {
        debug!("Starting to watch pods.");
    }

    let (initial_pods, resource_version) =
        kubernetes::list_pods(&client, cli.selector.as_deref()).await?;

    let initial_events = if dump_events {
        kubernetes::list_events(&client).await?
    } else {
        Vec::new()
    };

    // in oneshot mode only the initial listing is processed and no watch is
    // opened at all; the pod list's resourceVersion is the shared cursor for
    // both live watches otherwise
    let (pod_watch, event_watch) = if cli.oneshot {
        (None, None)
    } else {
        let pods = kubernetes::watch_pods(client.clone(), &resource_version).await?;
        let events = if dump_events {
            Some(kubernetes::watch_events(client.clone(), &resource_version).await?)
        } else {
            None
        };
        (Some(pods), events)
    };

    // //////////////////////////////////////
    // reconcile until the watches close or the user interrupts

    let token = CancellationToken::new();
    {
        let token = token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupted, waiting for the running captures to finish.");
                token.cancel();
            }
        });
    }

    let opts = WatchOptions {
        label_selector,
        namespaces: cli.namespaces.clone(),
        pod_names: cli.pods.clone(),
        container_names: cli.containers.clone(),
        running_only: cli.live,
        oneshot: cli.oneshot,
        dump_metadata: cli.metadata,
        dump_events,
    };

    let watcher = Watcher::new(
        Arc::new(KubeLogSource::new(client)),
        collector,
        initial_pods,
        initial_events,
        opts,
    );

    watcher.watch(token, pod_watch, event_watch).await
}
