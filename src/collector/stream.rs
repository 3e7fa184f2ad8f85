use std::sync::OnceLock;

use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;
use futures::io::{AsyncBufReadExt, BufReader};
use k8s_openapi::api::core::v1::{Event, Pod};
use regex::{Captures, Regex};

use super::{Collector, LogReader};
use crate::types::ContainerTarget;

/// Mirrors log lines to stdout, each line carrying a prefix so output from
/// concurrently captured containers stays distinguishable.
pub struct StreamCollector {
    prefix_format: String,
}

impl StreamCollector {
    pub fn new(prefix_format: impl Into<String>) -> Self {
        Self {
            prefix_format: prefix_format.into(),
        }
    }

    fn prefix(&self, target: &ContainerTarget) -> String {
        static PLACEHOLDERS: OnceLock<Regex> = OnceLock::new();
        let placeholders = PLACEHOLDERS
            .get_or_init(|| Regex::new("%([a-zA-Z]+)").expect("placeholder pattern is valid"));

        placeholders
            .replace_all(&self.prefix_format, |caps: &Captures<'_>| match &caps[0] {
                "%pn" => target.pod_name.clone(),
                "%pN" => target.namespace.clone(),
                "%c" => target.container_name.clone(),
                other => other.to_string(),
            })
            .trim()
            .to_string()
    }
}

#[async_trait]
impl Collector for StreamCollector {
    async fn collect_pod_metadata(&self, _pod: &Pod) -> Result<()> {
        Ok(())
    }

    async fn collect_event(&self, _event: &Event) -> Result<()> {
        Ok(())
    }

    async fn collect_logs(&self, target: &ContainerTarget, stream: LogReader) -> Result<()> {
        let prefix = self.prefix(target);
        let mut lines = BufReader::new(stream).lines();

        while let Some(line) = lines.next().await {
            let line = line?;
            println!("{}", format!("{} {}", prefix, line).trim_end());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> ContainerTarget {
        ContainerTarget {
            namespace: "default".to_string(),
            pod_name: "web-1".to_string(),
            container_name: "app".to_string(),
            restart_count: 0,
        }
    }

    #[test]
    fn prefix_substitutes_placeholders() {
        let collector = StreamCollector::new("[%pN/%pn:%c] >>");
        assert_eq!(collector.prefix(&target()), "[default/web-1:app] >>");
    }

    #[test]
    fn unknown_placeholders_pass_through() {
        let collector = StreamCollector::new("%pn %x |");
        assert_eq!(collector.prefix(&target()), "web-1 %x |");
    }

    #[test]
    fn prefix_is_trimmed() {
        let collector = StreamCollector::new("  %c  ");
        assert_eq!(collector.prefix(&target()), "app");
    }
}
