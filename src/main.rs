use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use futures::SinkExt;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use kubegate_exec::FileTransfer;
use kubegate_k8s::{Cluster, ClusterRegistry, PodTarget};
use kubegate_logs::{LogQuery, LogTailer};

mod config;
mod shell;

use config::GatewayConfig;

/// Kubegate - A gateway to the resources, logs and shells of many Kubernetes clusters
#[derive(Parser, Debug)]
#[command(name = "kubegate")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the gateway configuration file
    #[arg(long, env = "KUBEGATE_CONFIG", default_value = "config.toml")]
    config: PathBuf,

    /// Default log filter, overridden by RUST_LOG
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Selects a container
#[derive(clap::Args, Debug)]
struct TargetArgs {
    /// Cluster name
    cluster: String,

    /// Namespace of the pod
    namespace: String,

    /// Pod name
    pod: String,

    /// Container name, defaults to the pod's only container
    #[arg(short, long)]
    container: Option<String>,
}

impl TargetArgs {
    fn target(&self) -> PodTarget {
        let target = PodTarget::new(&self.namespace, &self.pod);
        match &self.container {
            Some(container) => target.container(container),
            None => target,
        }
    }
}

/// Addresses a resource below an API path
#[derive(clap::Args, Debug)]
struct ResourceArgs {
    /// Cluster name
    cluster: String,

    /// API path, e.g. `api/v1` or `apis/apps/v1`
    path: String,

    /// Resource, e.g. `pods`
    resource: String,

    /// Object name
    name: Option<String>,

    /// Namespace, omit for cluster-scoped resources
    #[arg(short, long)]
    namespace: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the configured clusters
    Clusters,

    /// List the namespaces of one or more clusters
    Namespaces {
        #[arg(required = true)]
        clusters: Vec<String>,
    },

    /// List the custom resource definitions of a cluster
    Crds {
        cluster: String,

        /// Seconds to wait for discovery to complete
        #[arg(long, default_value = "30")]
        wait: u64,
    },

    /// Get or list resources
    Get {
        #[command(flatten)]
        resource: ResourceArgs,

        /// Query parameter for lists, e.g. `labelSelector=app=web`
        #[arg(long, value_parser = parse_param)]
        param: Option<(String, String)>,
    },

    /// Create a resource or replace a subresource
    Create {
        #[command(flatten)]
        resource: ResourceArgs,

        /// Subresource to replace, requires a name
        #[arg(long)]
        subresource: Option<String>,

        /// JSON body file, `-` for stdin
        #[arg(long)]
        body: PathBuf,
    },

    /// Apply a JSON patch to a resource
    Patch {
        #[command(flatten)]
        resource: ResourceArgs,

        /// JSON patch file, `-` for stdin
        #[arg(long)]
        body: PathBuf,
    },

    /// Delete a resource
    Delete {
        #[command(flatten)]
        resource: ResourceArgs,

        /// Delete options file
        #[arg(long)]
        body: Option<PathBuf>,
    },

    /// Print or follow the logs of a container
    Logs {
        #[command(flatten)]
        target: TargetArgs,

        /// Only keep lines matching this regular expression
        #[arg(long, conflicts_with = "follow")]
        filter: Option<String>,

        /// Keep streaming new lines
        #[arg(short, long)]
        follow: bool,

        /// Only return lines newer than this many seconds
        #[arg(long, default_value = "0")]
        since: i64,

        /// Number of lines from the end of the log
        #[arg(long, default_value = "0")]
        tail: i64,

        /// Logs of the previous container instance
        #[arg(long)]
        previous: bool,
    },

    /// Download a file or directory as a tar archive
    Download {
        #[command(flatten)]
        target: TargetArgs,

        /// Path in the container
        #[arg(long)]
        path: String,

        /// Local archive file, stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Upload a local file into a container
    Upload {
        #[command(flatten)]
        target: TargetArgs,

        /// Local file, `-` for stdin
        #[arg(long)]
        source: PathBuf,

        /// Destination path in the container
        #[arg(long)]
        destination: String,
    },

    /// Open an interactive shell in a container
    Shell {
        #[command(flatten)]
        target: TargetArgs,

        /// Shell to start
        #[arg(long, default_value = "sh")]
        shell: String,
    },
}

fn parse_param(value: &str) -> Result<(String, String), String> {
    value
        .split_once('=')
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected NAME=VALUE, got {value:?}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args);

    let result = run(args).await;

    if let Err(e) = &result {
        eprintln!("Error: {:#}", e);
    }

    result
}

fn init_tracing(args: &Args) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&args.log_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match args.log_format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn run(args: Args) -> Result<()> {
    let config = GatewayConfig::load(&args.config)?;
    let registry = ClusterRegistry::load(&config.clusters, config.retry_policy())
        .await
        .context("failed to load clusters")?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::debug!("interrupted");
            on_interrupt.cancel();
        }
    });

    match args.command {
        Command::Clusters => {
            for name in registry.names() {
                println!("{name}");
            }
        }

        Command::Namespaces { clusters } => {
            for namespace in registry.namespaces(&clusters, config.namespace_ttl()).await? {
                println!("{namespace}");
            }
        }

        Command::Crds { cluster, wait } => {
            let cluster = registry.cluster(&cluster)?;
            let wait = Duration::from_secs(wait);
            let discovery = tokio::time::timeout(wait, cluster.wait_for_crds());
            let crds = match discovery.await {
                Ok(crds) => crds,
                Err(_) => {
                    tracing::warn!(cluster = %cluster.name(), "CRD discovery has not completed yet");
                    cluster.crds()
                }
            };
            println!("{}", serde_json::to_string_pretty(&*crds)?);
        }

        Command::Get { resource, param } => {
            let cluster = registry.cluster(&resource.cluster)?;
            let (param_name, param_value) = param.unzip();
            let body = cluster
                .get_resources(
                    resource.namespace.as_deref(),
                    resource.name.as_deref(),
                    &resource.path,
                    &resource.resource,
                    param_name.as_deref(),
                    param_value.as_deref(),
                )
                .await?;
            write_stdout(&body).await?;
        }

        Command::Create {
            resource,
            subresource,
            body,
        } => {
            let cluster = registry.cluster(&resource.cluster)?;
            let body = read_input(&body).await?;
            cluster
                .create_resource(
                    resource.namespace.as_deref(),
                    resource.name.as_deref(),
                    &resource.path,
                    &resource.resource,
                    subresource.as_deref(),
                    body,
                )
                .await?;
        }

        Command::Patch { resource, body } => {
            let cluster = registry.cluster(&resource.cluster)?;
            let name = resource.name.as_deref().context("patch needs an object name")?;
            let body = read_input(&body).await?;
            cluster
                .patch_resource(
                    resource.namespace.as_deref(),
                    name,
                    &resource.path,
                    &resource.resource,
                    body,
                )
                .await?;
        }

        Command::Delete { resource, body } => {
            let cluster = registry.cluster(&resource.cluster)?;
            let name = resource.name.as_deref().context("delete needs an object name")?;
            let body = match &body {
                Some(path) => Some(read_input(path).await?),
                None => None,
            };
            cluster
                .delete_resource(
                    resource.namespace.as_deref(),
                    name,
                    &resource.path,
                    &resource.resource,
                    body,
                )
                .await?;
        }

        Command::Logs {
            target,
            filter,
            follow,
            since,
            tail,
            previous,
        } => {
            let cluster = registry.cluster(&target.cluster)?;
            let query = LogQuery::default()
                .since(since)
                .tail(tail)
                .previous(previous)
                .follow(follow);
            logs(cluster, &target.target(), filter.as_deref(), &query, &cancel).await?;
        }

        Command::Download {
            target,
            path,
            output,
        } => {
            let cluster = registry.cluster(&target.cluster)?;
            let transfer = FileTransfer::new(cluster);
            let bytes = match output {
                Some(output) => {
                    let mut file = tokio::fs::File::create(&output)
                        .await
                        .with_context(|| format!("failed to create {}", output.display()))?;
                    transfer.download(&target.target(), &path, &mut file, &cancel).await?
                }
                None => {
                    let mut stdout = tokio::io::stdout();
                    transfer.download(&target.target(), &path, &mut stdout, &cancel).await?
                }
            };
            tracing::info!(bytes, "archive written");
        }

        Command::Upload {
            target,
            source,
            destination,
        } => {
            let cluster = registry.cluster(&target.cluster)?;
            let transfer = FileTransfer::new(cluster);
            let bytes = if source.as_os_str() == "-" {
                let mut stdin = tokio::io::stdin();
                transfer.upload(&target.target(), &destination, &mut stdin, &cancel).await?
            } else {
                let mut file = tokio::fs::File::open(&source)
                    .await
                    .with_context(|| format!("failed to open {}", source.display()))?;
                transfer.upload(&target.target(), &destination, &mut file, &cancel).await?
            };
            eprintln!("uploaded {bytes} bytes to {destination}");
        }

        Command::Shell { target, shell } => {
            let cluster = registry.cluster(&target.cluster)?;
            shell::run(cluster, target.target(), &shell, &cancel).await?;
        }
    }

    Ok(())
}

async fn logs(
    cluster: &Cluster,
    target: &PodTarget,
    filter: Option<&str>,
    query: &LogQuery,
    cancel: &CancellationToken,
) -> Result<()> {
    let tailer = LogTailer::new(cluster);
    if !query.follow {
        let logs = tailer.get_logs(target, filter, query).await?;
        return write_stdout(logs.as_bytes()).await;
    }

    let sink = futures::sink::unfold(tokio::io::stdout(), |mut stdout, line: String| async move {
        stdout.write_all(line.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
        Ok::<_, std::io::Error>(stdout)
    });
    let mut sink = Box::pin(sink);
    tailer.stream_logs(&mut sink, target, query, cancel).await?;
    sink.close().await?;
    Ok(())
}

async fn write_stdout(bytes: &[u8]) -> Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(bytes).await?;
    stdout.flush().await?;
    Ok(())
}

async fn read_input(path: &std::path::Path) -> Result<Vec<u8>> {
    if path.as_os_str() == "-" {
        let mut body = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut tokio::io::stdin(), &mut body).await?;
        return Ok(body);
    }
    tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))
}
