use clap::Parser;

#[derive(Parser)]
#[command(name = "kubectl-capture")]
#[command(about = "Continuously capture logs from Kubernetes pods to disk")]
pub struct Cli {
    /// Pod names to capture logs for (supports glob expressions)
    pub pods: Vec<String>,

    /// Kubernetes namespace to watch pods in (supports glob expressions, can
    /// be given multiple times)
    #[arg(short = 'n', long = "namespace")]
    pub namespaces: Vec<String>,

    /// Container names to store logs for (supports glob expressions, can be
    /// given multiple times)
    #[arg(short = 'c', long = "container")]
    pub containers: Vec<String>,

    /// Label selector as an alternative to specifying pod names
    #[arg(short = 'l', long)]
    pub selector: Option<String>,

    /// Directory where logs should be stored
    #[arg(short = 'o', long)]
    pub output: Option<String>,

    /// Do not create a directory per namespace, but put all logs in the same
    /// directory
    #[arg(short = 'f', long)]
    pub flat: bool,

    /// Only consider running pods, ignore completed/failed pods
    #[arg(long)]
    pub live: bool,

    /// Do not just dump logs to disk, but also stream them to stdout
    #[arg(long)]
    pub stream: bool,

    /// Prefix pattern to put at the beginning of each streamed line
    /// (pn = pod name, pN = pod namespace, c = container name)
    #[arg(long, default_value = "[%pN/%pn:%c] >>")]
    pub prefix: String,

    /// Dump logs, but do not tail the containers (i.e. exit after
    /// downloading the current state)
    #[arg(long)]
    pub oneshot: bool,

    /// Dump pods additionally as YAML (note that this can include secrets
    /// in environment variables)
    #[arg(long)]
    pub metadata: bool,

    /// Dump events for each matching pod as a human readable log file
    /// (note: label selectors are not respected)
    #[arg(long)]
    pub events: bool,

    /// Dump events for each matching pod as YAML (note: label selectors are
    /// not respected)
    #[arg(long = "events-raw")]
    pub raw_events: bool,

    /// Kubeconfig context to use
    #[arg(long)]
    pub context: Option<String>,

    /// Enable more verbose output
    #[arg(short, long)]
    pub verbose: bool,
}
