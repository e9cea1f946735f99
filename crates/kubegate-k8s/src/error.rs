use std::io;

use thiserror::Error;

/// Errors returned by kubegate cluster operations
#[derive(Debug, Error)]
pub enum Error {
    /// The cluster API rejected or failed a request. `source` is the
    /// upstream error exactly as the client returned it.
    #[error("request to cluster {cluster} failed (namespace: {namespace:?}, resource: {resource})")]
    Api {
        cluster: String,
        namespace: Option<String>,
        resource: String,
        #[source]
        source: kube::Error,
    },

    #[error("failed to read kubeconfig for cluster {cluster}")]
    Kubeconfig {
        cluster: String,
        #[source]
        source: kube::config::KubeconfigError,
    },

    #[error("failed to load in-cluster configuration for cluster {cluster}")]
    InCluster {
        cluster: String,
        #[source]
        source: kube::config::InClusterError,
    },

    #[error("failed to create client for cluster {cluster}")]
    Connect {
        cluster: String,
        #[source]
        source: kube::Error,
    },

    #[error("cluster name {normalized:?} (from {name:?}) is already registered")]
    DuplicateCluster { name: String, normalized: String },

    #[error("cluster {0} was not found")]
    ClusterNotFound(String),

    #[error("invalid log filter")]
    InvalidFilter(#[from] regex::Error),

    #[error("shell {0:?} is not allowed")]
    InvalidShell(String),

    #[error("stream from cluster {cluster} failed")]
    Stream {
        cluster: String,
        #[source]
        source: io::Error,
    },

    #[error("connection to caller failed: {0}")]
    Sink(String),

    #[error("remote command failed: {0}")]
    Exec(String),

    #[error("session was cancelled before it completed")]
    Cancelled,

    #[error("could not build request")]
    Request(#[from] http::Error),

    #[error("could not decode response from cluster {cluster}")]
    Decode {
        cluster: String,
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

