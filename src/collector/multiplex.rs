use anyhow::{Result, anyhow};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Event, Pod};

use super::{Collector, LogReader};
use crate::tee::{TeeReader, tee};
use crate::types::ContainerTarget;

/// Feeds two collectors with the same input. Metadata and events are handed
/// to the first collector and only on success to the second; log streams are
/// duplicated through the fan-out tee so both collectors consume the same
/// bytes at their own pace.
pub struct MultiplexCollector {
    a: Box<dyn Collector>,
    b: Box<dyn Collector>,
}

impl MultiplexCollector {
    pub fn new(a: Box<dyn Collector>, b: Box<dyn Collector>) -> Self {
        Self { a, b }
    }
}

#[async_trait]
impl Collector for MultiplexCollector {
    async fn collect_pod_metadata(&self, pod: &Pod) -> Result<()> {
        self.a.collect_pod_metadata(pod).await?;
        self.b.collect_pod_metadata(pod).await
    }

    async fn collect_event(&self, event: &Event) -> Result<()> {
        self.a.collect_event(event).await?;
        self.b.collect_event(event).await
    }

    async fn collect_logs(&self, target: &ContainerTarget, stream: LogReader) -> Result<()> {
        let (pump, readers) = tee(stream, 2);
        let [reader_a, reader_b]: [TeeReader; 2] = readers
            .try_into()
            .map_err(|_| anyhow!("fan-out did not yield a reader per collector"))?;

        // the pump runs alongside both collectors so that a slow consumer
        // throttles the upstream read instead of buffering without bound
        let (_, result_a, result_b) = tokio::join!(
            pump.run(),
            self.a.collect_logs(target, Box::new(reader_a)),
            self.b.collect_logs(target, Box::new(reader_b)),
        );

        result_a?;
        result_b
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::DiskCollector;
    use futures::io::{AsyncReadExt, Cursor};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct RecordingCollector {
        fail_metadata: bool,
        state: Arc<Mutex<Recorded>>,
    }

    #[derive(Default)]
    struct Recorded {
        metadata_calls: usize,
        event_calls: usize,
        captures: Vec<(ContainerTarget, Vec<u8>)>,
    }

    #[async_trait]
    impl Collector for RecordingCollector {
        async fn collect_pod_metadata(&self, _pod: &Pod) -> Result<()> {
            self.state.lock().unwrap().metadata_calls += 1;
            if self.fail_metadata {
                anyhow::bail!("metadata sink unavailable");
            }
            Ok(())
        }

        async fn collect_event(&self, _event: &Event) -> Result<()> {
            self.state.lock().unwrap().event_calls += 1;
            Ok(())
        }

        async fn collect_logs(&self, target: &ContainerTarget, mut stream: LogReader) -> Result<()> {
            let mut data = Vec::new();
            stream.read_to_end(&mut data).await?;
            self.state.lock().unwrap().captures.push((target.clone(), data));
            Ok(())
        }
    }

    fn target() -> ContainerTarget {
        ContainerTarget {
            namespace: "default".to_string(),
            pod_name: "web-1".to_string(),
            container_name: "app".to_string(),
            restart_count: 0,
        }
    }

    #[tokio::test]
    async fn log_streams_reach_both_collectors() {
        let dir = tempfile::tempdir().unwrap();
        let disk = DiskCollector::new(dir.path(), false, false, false).unwrap();
        let recording = RecordingCollector::default();
        let multiplex = MultiplexCollector::new(Box::new(disk), Box::new(recording.clone()));

        let payload = b"one\ntwo\nthree\n";
        multiplex
            .collect_logs(&target(), Box::new(Cursor::new(payload.to_vec())))
            .await
            .unwrap();

        let on_disk = std::fs::read(dir.path().join("default").join("web-1_app_000.log")).unwrap();
        assert_eq!(on_disk, payload);

        let state = recording.state.lock().unwrap();
        assert_eq!(state.captures.len(), 1);
        assert_eq!(state.captures[0].0, target());
        assert_eq!(state.captures[0].1, payload);
    }

    #[tokio::test]
    async fn metadata_failure_short_circuits_the_second_collector() {
        let failing = RecordingCollector {
            fail_metadata: true,
            ..Default::default()
        };
        let second = RecordingCollector::default();
        let multiplex =
            MultiplexCollector::new(Box::new(failing.clone()), Box::new(second.clone()));

        assert!(multiplex.collect_pod_metadata(&Pod::default()).await.is_err());
        assert_eq!(failing.state.lock().unwrap().metadata_calls, 1);
        assert_eq!(second.state.lock().unwrap().metadata_calls, 0);
    }

    #[tokio::test]
    async fn events_reach_both_collectors_in_order() {
        let first = RecordingCollector::default();
        let second = RecordingCollector::default();
        let multiplex = MultiplexCollector::new(Box::new(first.clone()), Box::new(second.clone()));

        multiplex.collect_event(&Event::default()).await.unwrap();

        assert_eq!(first.state.lock().unwrap().event_calls, 1);
        assert_eq!(second.state.lock().unwrap().event_calls, 1);
    }
}
