use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use k8s_openapi::api::core::v1::{Container, ContainerStatus, Event, Pod};
use kube::ResourceExt;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::collector::{Collector, LogReader};
use crate::types::ContainerTarget;
use crate::utils::{LabelSelector, needle_matches_patterns};

/// Opens the byte stream for one container incarnation. In production this
/// is the Kubernetes log endpoint; tests inject their own source.
#[async_trait]
pub trait LogSource: Send + Sync {
    async fn open(&self, target: &ContainerTarget, follow: bool) -> Result<LogReader>;
}

/// Container incarnations a capture task has already been started for.
/// Claiming an incarnation is atomic, so concurrent observations of the same
/// pod cannot start a second capture for the same container run.
#[derive(Default)]
pub struct SeenContainers {
    inner: Mutex<HashSet<ContainerTarget>>,
}

impl SeenContainers {
    /// Record the incarnation. True on the first claim, false afterwards.
    pub async fn try_claim(&self, target: &ContainerTarget) -> bool {
        self.inner.lock().await.insert(target.clone())
    }
}

#[derive(Debug, Clone, Default)]
pub struct WatchOptions {
    pub label_selector: Option<LabelSelector>,
    pub namespaces: Vec<String>,
    pub pod_names: Vec<String>,
    pub container_names: Vec<String>,
    pub running_only: bool,
    pub oneshot: bool,
    pub dump_metadata: bool,
    pub dump_events: bool,
}

pub type PodStream = BoxStream<'static, Pod>;
pub type EventStream = BoxStream<'static, Event>;

/// Turns pod and event observations into capture tasks: every observation
/// runs through the matching criteria, accepted container incarnations are
/// claimed exactly once and get their own concurrent log capture.
pub struct Watcher {
    log_source: Arc<dyn LogSource>,
    collector: Arc<dyn Collector>,
    initial_pods: Vec<Pod>,
    initial_events: Vec<Event>,
    opts: WatchOptions,
    seen: SeenContainers,
}

impl Watcher {
    pub fn new(
        log_source: Arc<dyn LogSource>,
        collector: Arc<dyn Collector>,
        initial_pods: Vec<Pod>,
        initial_events: Vec<Event>,
        opts: WatchOptions,
    ) -> Self {
        Self {
            log_source,
            collector,
            initial_pods,
            initial_events,
            opts,
            seen: SeenContainers::default(),
        }
    }

    /// Process the initial snapshot, then follow both watch channels until
    /// they close or the token is cancelled, and finally wait for every
    /// outstanding capture task to finish.
    ///
    /// Passing no channels at all makes this a snapshot-only run that
    /// returns once the initial captures have drained.
    pub async fn watch(
        self,
        token: CancellationToken,
        pod_watch: Option<PodStream>,
        event_watch: Option<EventStream>,
    ) -> Result<()> {
        let mut tasks = JoinSet::new();

        for pod in &self.initial_pods {
            if self.pod_matches(pod) {
                self.start_log_collectors(pod, &mut tasks, &token).await;
            }
        }

        for event in &self.initial_events {
            if self.event_matches(event) {
                self.dump_event(event).await;
            }
        }

        let mut pods = pod_watch.unwrap_or_else(|| stream::empty().boxed());
        let mut events = event_watch.unwrap_or_else(|| stream::empty().boxed());
        let mut pods_done = false;
        let mut events_done = false;

        while !(pods_done && events_done) {
            tokio::select! {
                item = pods.next(), if !pods_done => match item {
                    Some(pod) => {
                        if self.pod_matches(&pod) {
                            self.start_log_collectors(&pod, &mut tasks, &token).await;
                        }
                    }
                    None => pods_done = true,
                },
                item = events.next(), if !events_done => match item {
                    Some(event) => {
                        if self.event_matches(&event) {
                            self.dump_event(&event).await;
                        }
                    }
                    None => events_done = true,
                },
                _ = token.cancelled() => break,
            }
        }

        // capture tasks are bounded by their stream closing, which
        // cancellation forces, so this drain terminates
        while tasks.join_next().await.is_some() {}

        Ok(())
    }

    async fn start_log_collectors(
        &self,
        pod: &Pod,
        tasks: &mut JoinSet<()>,
        token: &CancellationToken,
    ) {
        self.dump_pod_metadata(pod).await;

        let Some(spec) = &pod.spec else {
            return;
        };

        let status = pod.status.as_ref();
        let init_statuses = status
            .and_then(|status| status.init_container_statuses.as_deref())
            .unwrap_or_default();
        let container_statuses = status
            .and_then(|status| status.container_statuses.as_deref())
            .unwrap_or_default();

        if let Some(init_containers) = spec.init_containers.as_deref() {
            self.start_container_collectors(pod, init_containers, init_statuses, tasks, token)
                .await;
        }

        self.start_container_collectors(pod, &spec.containers, container_statuses, tasks, token)
            .await;
    }

    async fn start_container_collectors(
        &self,
        pod: &Pod,
        containers: &[Container],
        statuses: &[ContainerStatus],
        tasks: &mut JoinSet<()>,
        token: &CancellationToken,
    ) {
        let pod_name = pod.name_any();
        let namespace = pod.namespace().unwrap_or_default();

        for container in containers {
            if !needle_matches_patterns(&container.name, &self.opts.container_names) {
                debug!(
                    pod = %pod_name,
                    namespace = %namespace,
                    container = %container.name,
                    "Container name does not match."
                );
                continue;
            }

            // a container without a status is not ready yet; the next
            // observation of this pod carries one and gets re-evaluated
            let Some(status) = statuses.iter().find(|status| status.name == container.name)
            else {
                debug!(
                    pod = %pod_name,
                    namespace = %namespace,
                    container = %container.name,
                    "Container has no status yet."
                );
                continue;
            };

            if !self.phase_accepted(&pod_name, &namespace, status) {
                continue;
            }

            let target = ContainerTarget {
                namespace: namespace.clone(),
                pod_name: pod_name.clone(),
                container_name: container.name.clone(),
                restart_count: status.restart_count,
            };

            // already capturing this incarnation; a restart shows up with a
            // new restart count and gets claimed again
            if !self.seen.try_claim(&target).await {
                continue;
            }

            let log_source = Arc::clone(&self.log_source);
            let collector = Arc::clone(&self.collector);
            let follow = !self.opts.oneshot;
            let token = token.clone();

            tasks.spawn(async move {
                collect_container_logs(log_source, collector, target, follow, token).await;
            });
        }
    }

    fn phase_accepted(&self, pod_name: &str, namespace: &str, status: &ContainerStatus) -> bool {
        let state = status.state.as_ref();
        let running = state.map(|state| state.running.is_some()).unwrap_or(false);
        let terminated = state
            .map(|state| state.terminated.is_some())
            .unwrap_or(false);

        if self.opts.running_only {
            if !running {
                debug!(
                    pod = %pod_name,
                    namespace = %namespace,
                    container = %status.name,
                    "Container is not running."
                );
                return false;
            }
        } else if !running && !terminated {
            debug!(
                pod = %pod_name,
                namespace = %namespace,
                container = %status.name,
                "Container is still waiting."
            );
            return false;
        }

        true
    }

    async fn dump_pod_metadata(&self, pod: &Pod) {
        if !self.opts.dump_metadata {
            return;
        }

        if let Err(err) = self.collector.collect_pod_metadata(pod).await {
            error!(
                pod = %pod.name_any(),
                namespace = %pod.namespace().unwrap_or_default(),
                error = %err,
                "Failed to collect pod metadata."
            );
        }
    }

    async fn dump_event(&self, event: &Event) {
        if !self.opts.dump_events {
            return;
        }

        if let Err(err) = self.collector.collect_event(event).await {
            let involved = &event.involved_object;
            error!(
                pod = involved.name.as_deref().unwrap_or_default(),
                namespace = involved.namespace.as_deref().unwrap_or_default(),
                error = %err,
                "Failed to collect event."
            );
        }
    }

    fn pod_matches(&self, pod: &Pod) -> bool {
        self.pod_name_matches(pod) && self.pod_namespace_matches(pod) && self.pod_labels_match(pod)
    }

    fn pod_name_matches(&self, pod: &Pod) -> bool {
        if needle_matches_patterns(&pod.name_any(), &self.opts.pod_names) {
            return true;
        }

        debug!(
            pod = %pod.name_any(),
            namespace = %pod.namespace().unwrap_or_default(),
            "Pod name does not match."
        );

        false
    }

    fn pod_namespace_matches(&self, pod: &Pod) -> bool {
        if needle_matches_patterns(&pod.namespace().unwrap_or_default(), &self.opts.namespaces) {
            return true;
        }

        debug!(
            pod = %pod.name_any(),
            namespace = %pod.namespace().unwrap_or_default(),
            "Pod namespace does not match."
        );

        false
    }

    fn pod_labels_match(&self, pod: &Pod) -> bool {
        let Some(selector) = &self.opts.label_selector else {
            return true;
        };

        if selector.matches(pod.labels()) {
            return true;
        }

        debug!(
            pod = %pod.name_any(),
            namespace = %pod.namespace().unwrap_or_default(),
            "Pod labels do not match."
        );

        false
    }

    fn event_matches(&self, event: &Event) -> bool {
        let involved = &event.involved_object;

        if involved.kind.as_deref() != Some("Pod") || involved.api_version.as_deref() != Some("v1")
        {
            debug!("Involved object is not a Pod.");
            return false;
        }

        let name = involved.name.as_deref().unwrap_or_default();
        let namespace = involved.namespace.as_deref().unwrap_or_default();

        // label data is not available on an event without fetching the pod,
        // which may already be gone, so the selector is not applied here
        if !needle_matches_patterns(name, &self.opts.pod_names) {
            debug!(pod = name, namespace = namespace, "Pod name does not match.");
            return false;
        }

        if !needle_matches_patterns(namespace, &self.opts.namespaces) {
            debug!(pod = name, namespace = namespace, "Pod namespace does not match.");
            return false;
        }

        true
    }
}

async fn collect_container_logs(
    log_source: Arc<dyn LogSource>,
    collector: Arc<dyn Collector>,
    target: ContainerTarget,
    follow: bool,
    token: CancellationToken,
) {
    info!(
        pod = %target.pod_name,
        namespace = %target.namespace,
        container = %target.container_name,
        "Starting to collect logs."
    );

    let stream = match log_source.open(&target, follow).await {
        Ok(stream) => stream,
        Err(err) => {
            error!(
                pod = %target.pod_name,
                namespace = %target.namespace,
                container = %target.container_name,
                error = %err,
                "Failed to stream logs."
            );
            return;
        }
    };

    tokio::select! {
        result = collector.collect_logs(&target, stream) => {
            if let Err(err) = result {
                error!(
                    pod = %target.pod_name,
                    namespace = %target.namespace,
                    container = %target.container_name,
                    error = %err,
                    "Failed to collect logs."
                );
            }
        }
        // cancellation drops the stream mid-read; the partially written
        // log stays behind
        _ = token.cancelled() => {
            debug!(
                pod = %target.pod_name,
                namespace = %target.namespace,
                container = %target.container_name,
                "Log collection cancelled."
            );
        }
    }

    info!(
        pod = %target.pod_name,
        namespace = %target.namespace,
        container = %target.container_name,
        "Logs have finished."
    );
}
