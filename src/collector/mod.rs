mod disk;
mod multiplex;
mod stream;

pub use disk::DiskCollector;
pub use multiplex::MultiplexCollector;
pub use stream::StreamCollector;

use anyhow::Result;
use async_trait::async_trait;
use futures::io::AsyncRead;
use k8s_openapi::api::core::v1::{Event, Pod};

use crate::types::ContainerTarget;

/// A container log stream as handed over by the log source.
pub type LogReader = Box<dyn AsyncRead + Send + Unpin>;

/// Destination for everything captured about a pod: container log streams,
/// the pod manifest and its events.
#[async_trait]
pub trait Collector: Send + Sync {
    /// Persist a structural snapshot of the pod. Idempotent, the first
    /// recorded snapshot wins and is never overwritten.
    async fn collect_pod_metadata(&self, pod: &Pod) -> Result<()>;

    /// Append a single event to the pod's event records.
    async fn collect_event(&self, event: &Event) -> Result<()>;

    /// Drain the stream to completion into the destination for this
    /// container incarnation.
    async fn collect_logs(&self, target: &ContainerTarget, stream: LogReader) -> Result<()>;
}
