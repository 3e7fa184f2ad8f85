use std::fmt::Debug;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use k8s_openapi::api::core::v1::{Event, Pod};
use kube::api::{ListParams, LogParams, WatchEvent, WatchParams};
use kube::{Api, Client, config};
use serde::de::DeserializeOwned;
use tracing::{info, warn};

use crate::collector::LogReader;
use crate::types::ContainerTarget;
use crate::watcher::LogSource;

/// Build a client for the current kubeconfig context, or for an explicitly
/// named one.
pub async fn create_client(context: Option<String>) -> Result<Client> {
    let client_config = match context {
        Some(context_name) => {
            let client_config = config::Config::from_kubeconfig(&config::KubeConfigOptions {
                context: Some(context_name.clone()),
                ..Default::default()
            })
            .await
            .map_err(|err| {
                anyhow::anyhow!("Context '{}' not found in kubeconfig: {}", context_name, err)
            })?;
            info!("Using context: {}", context_name);
            client_config
        }
        None => config::Config::infer().await?,
    };

    Ok(Client::try_from(client_config)?)
}

/// List pods across all namespaces. The list's resourceVersion doubles as
/// the starting cursor for the live watches, so a list without one is fatal.
pub async fn list_pods(
    client: &Client,
    label_selector: Option<&str>,
) -> Result<(Vec<Pod>, String)> {
    let api: Api<Pod> = Api::all(client.clone());

    let mut params = ListParams::default();
    if let Some(selector) = label_selector {
        params = params.labels(selector);
    }

    let pods = api
        .list(&params)
        .await
        .context("failed to perform list on Pods")?;

    let resource_version = pods
        .metadata
        .resource_version
        .clone()
        .context("pod list did not return a resourceVersion to start the watch from")?;

    Ok((pods.items, resource_version))
}

/// List events across all namespaces. Label selectors are not applied to
/// events, the watcher filters them by the involved pod instead.
pub async fn list_events(client: &Client) -> Result<Vec<Event>> {
    let events = Api::<Event>::all(client.clone())
        .list(&ListParams::default())
        .await
        .context("failed to perform list on Events")?;

    Ok(events.items)
}

pub async fn watch_pods(client: Client, resource_version: &str) -> Result<BoxStream<'static, Pod>> {
    watch_resource(Api::all(client), resource_version, "pod").await
}

pub async fn watch_events(
    client: Client,
    resource_version: &str,
) -> Result<BoxStream<'static, Event>> {
    watch_resource(Api::all(client), resource_version, "event").await
}

/// Adapt a raw watch into a stream of resource snapshots. Deletions and
/// bookmarks carry nothing to capture, and a notification that cannot be
/// decoded is skipped so one bad payload does not stop reconciliation.
async fn watch_resource<K>(
    api: Api<K>,
    resource_version: &str,
    kind: &'static str,
) -> Result<BoxStream<'static, K>>
where
    K: Clone + DeserializeOwned + Debug + Send + 'static,
{
    let stream = api
        .watch(&WatchParams::default(), resource_version)
        .await
        .with_context(|| format!("failed to create watch for {}s", kind))?;

    Ok(stream
        .filter_map(move |notification| async move {
            match notification {
                Ok(WatchEvent::Added(resource)) | Ok(WatchEvent::Modified(resource)) => {
                    Some(resource)
                }
                Ok(WatchEvent::Deleted(_)) | Ok(WatchEvent::Bookmark(_)) => None,
                Ok(WatchEvent::Error(status)) => {
                    warn!(kind, error = %status.message, "Watch reported an error, skipping.");
                    None
                }
                Err(err) => {
                    warn!(kind, error = %err, "Failed to decode a watch notification, skipping.");
                    None
                }
            }
        })
        .boxed())
}

/// Opens container log streams through the Kubernetes log endpoint.
pub struct KubeLogSource {
    client: Client,
}

impl KubeLogSource {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl LogSource for KubeLogSource {
    async fn open(&self, target: &ContainerTarget, follow: bool) -> Result<LogReader> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), &target.namespace);

        let params = LogParams {
            follow,
            container: Some(target.container_name.clone()),
            ..Default::default()
        };

        let stream = api
            .log_stream(&target.pod_name, &params)
            .await
            .with_context(|| format!("failed to open the log stream for {}", target))?;

        Ok(Box::new(stream))
    }
}
