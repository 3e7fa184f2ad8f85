use std::fmt;

/// One incarnation of a container. A restarted container comes back with a
/// higher restart count, so it gets a new identity and a new log destination
/// instead of appending to the previous run's file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerTarget {
    pub namespace: String,
    pub pod_name: String,
    pub container_name: String,
    pub restart_count: i32,
}

impl ContainerTarget {
    /// File name the incarnation's log stream is written to.
    pub fn log_file_name(&self) -> String {
        format!(
            "{}_{}_{:03}.log",
            self.pod_name, self.container_name, self.restart_count
        )
    }
}

impl fmt::Display for ContainerTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.namespace, self.pod_name, self.container_name, self.restart_count
        )
    }
}
