use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result, bail};
use async_trait::async_trait;
use futures::io::AsyncReadExt;
use k8s_openapi::api::core::v1::{Event, Pod};
use kube::ResourceExt;
use tokio::io::AsyncWriteExt;

use super::{Collector, LogReader};
use crate::types::ContainerTarget;

/// Writes everything below one output directory, one subdirectory per
/// namespace unless flat mode collapses all files into the root.
pub struct DiskCollector {
    directory: PathBuf,
    flat_files: bool,
    events_as_text: bool,
    raw_events: bool,
}

impl DiskCollector {
    pub fn new(
        directory: impl AsRef<Path>,
        flat_files: bool,
        events_as_text: bool,
        raw_events: bool,
    ) -> Result<Self> {
        let directory = directory.as_ref();

        std::fs::create_dir_all(directory)
            .with_context(|| format!("failed to create directory {:?}", directory))?;

        let directory = std::fs::canonicalize(directory)
            .with_context(|| format!("failed to determine absolute path to {:?}", directory))?;

        Ok(Self {
            directory,
            flat_files,
            events_as_text,
            raw_events,
        })
    }

    async fn target_directory(&self, namespace: &str) -> Result<PathBuf> {
        let directory = if self.flat_files {
            self.directory.clone()
        } else {
            self.directory.join(namespace)
        };

        tokio::fs::create_dir_all(&directory)
            .await
            .with_context(|| format!("failed to create directory {:?}", directory))?;

        Ok(directory)
    }

    async fn append(&self, filename: &Path, content: &[u8]) -> Result<()> {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(filename)
            .await
            .with_context(|| format!("failed to open {:?}", filename))?;

        file.write_all(content)
            .await
            .with_context(|| format!("failed to write to {:?}", filename))?;

        file.flush()
            .await
            .with_context(|| format!("failed to write to {:?}", filename))?;

        Ok(())
    }

    async fn dump_event_as_text(&self, directory: &Path, event: &Event) -> Result<()> {
        let name = event.involved_object.name.as_deref().unwrap_or_default();
        let filename = directory.join(format!("{}.events.log", name));

        let timestamp = event
            .last_timestamp
            .as_ref()
            .map(|timestamp| timestamp.0)
            .unwrap_or_default();

        let mut line = format!(
            "{}: [{}]",
            timestamp.format("%a, %d %b %Y %H:%M:%S %Z"),
            event.type_.as_deref().unwrap_or_default()
        );

        if let Some(component) = event.source.as_ref().and_then(|source| source.component.as_deref())
            && !component.is_empty()
        {
            line = format!("{} [{}]", line, component);
        }

        line = format!(
            "{} {} (reason: {}) ({}x)\n",
            line,
            event.message.as_deref().unwrap_or_default(),
            event.reason.as_deref().unwrap_or_default(),
            event.count.unwrap_or_default(),
        );

        self.append(&filename, line.as_bytes()).await
    }

    async fn dump_event_as_yaml(&self, directory: &Path, event: &Event) -> Result<()> {
        let name = event.involved_object.name.as_deref().unwrap_or_default();
        let filename = directory.join(format!("{}.events.yaml", name));

        let mut trimmed = event.clone();
        trimmed.metadata.managed_fields = None;

        let encoded = serde_yaml::to_string(&trimmed)?;

        let mut document = String::with_capacity(encoded.len() + 5);
        document.push_str("---\n");
        document.push_str(&encoded);
        document.push('\n');

        self.append(&filename, document.as_bytes()).await
    }
}

#[async_trait]
impl Collector for DiskCollector {
    async fn collect_pod_metadata(&self, pod: &Pod) -> Result<()> {
        let directory = self
            .target_directory(&pod.namespace().unwrap_or_default())
            .await?;
        let filename = directory.join(format!("{}.yaml", pod.name_any()));

        // file exists already, do not overwrite
        if tokio::fs::metadata(&filename).await.is_ok() {
            return Ok(());
        }

        let mut manifest = serde_yaml::to_value(pod)?;
        if let Some(mapping) = manifest.as_mapping_mut() {
            mapping.insert("apiVersion".into(), "v1".into());
            mapping.insert("kind".into(), "Pod".into());
        }

        let encoded = serde_yaml::to_string(&manifest)?;
        tokio::fs::write(&filename, encoded)
            .await
            .with_context(|| format!("failed to write {:?}", filename))?;

        Ok(())
    }

    async fn collect_event(&self, event: &Event) -> Result<()> {
        if !self.events_as_text && !self.raw_events {
            bail!("event dumping is not enabled");
        }

        let namespace = event.involved_object.namespace.as_deref().unwrap_or_default();
        let directory = self.target_directory(namespace).await?;

        if self.events_as_text {
            self.dump_event_as_text(&directory, event).await?;
        }

        if self.raw_events {
            self.dump_event_as_yaml(&directory, event).await?;
        }

        Ok(())
    }

    async fn collect_logs(&self, target: &ContainerTarget, mut stream: LogReader) -> Result<()> {
        let directory = self.target_directory(&target.namespace).await?;
        let filename = directory.join(target.log_file_name());

        let mut file = tokio::fs::File::create(&filename)
            .await
            .with_context(|| format!("failed to open log file {:?}", filename))?;

        let mut buf = vec![0u8; 8 * 1024];
        loop {
            let n = stream
                .read(&mut buf)
                .await
                .with_context(|| format!("failed to read log stream for {}", target))?;
            if n == 0 {
                break;
            }

            file.write_all(&buf[..n])
                .await
                .with_context(|| format!("failed to write to log file {:?}", filename))?;
        }

        file.flush()
            .await
            .with_context(|| format!("failed to write to log file {:?}", filename))?;

        Ok(())
    }
}
