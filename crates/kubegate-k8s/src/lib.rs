//! Kubernetes cluster connections for kubegate
//!
//! This crate owns the per-cluster state of the gateway: the API connection,
//! the background-discovered custom resource catalog, the namespace cache and
//! the generic resource operations forwarded to each cluster.

mod api;
mod cluster;
mod discovery;
mod error;
mod namespaces;
mod registry;
mod resources;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use api::{
    ClusterApi, ExecReader, ExecRequest, ExecSession, ExecWriter, KubeApi, LogReader, PodTarget,
    TerminalSize,
};
pub use cluster::Cluster;
pub use discovery::{RetryPolicy, flatten_crds};
pub use error::{Error, Result};
pub use registry::{ClusterRegistry, check_unique_names};
pub use resources::{CustomKind, ObjectOrigin, ResourceUri, Stamped};

// Re-export types that are used in our public API
pub use kube::api::LogParams;
pub use kubegate_types::{ClusterConfig, Crd, CrdColumn, CrdScope, Provider, normalize_name};
