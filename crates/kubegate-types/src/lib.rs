//! Shared types for kubegate
//!
//! This crate contains data structures used across multiple kubegate crates:
//! the custom resource catalog entries, cluster configuration and the cluster
//! name normalization rule.

use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

// ============================================================================
// Cluster Names
// ============================================================================

static NON_ALPHANUMERIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("[^a-z0-9]+").expect("static pattern is valid"));

/// Normalize a free-form cluster name into its canonical identifier.
///
/// The name is lowercased, every run of characters outside `[a-z0-9]` is
/// collapsed into a single `-` and leading/trailing separators are trimmed.
/// Applying it twice yields the same result as applying it once.
///
/// Distinct inputs can normalize to the same identifier (`"Dev Cluster"` and
/// `"dev_cluster"` both become `"dev-cluster"`); the registry rejects such
/// collisions instead of letting one cluster shadow another.
pub fn normalize_name(name: &str) -> String {
    let lower = name.to_lowercase();
    NON_ALPHANUMERIC
        .replace_all(&lower, "-")
        .trim_matches('-')
        .to_string()
}

// ============================================================================
// Custom Resource Definitions
// ============================================================================

/// Scope of the objects of a custom resource
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CrdScope {
    #[default]
    Namespaced,
    Cluster,
}

impl From<&str> for CrdScope {
    fn from(s: &str) -> Self {
        match s {
            "Cluster" => Self::Cluster,
            _ => Self::Namespaced,
        }
    }
}

/// A single served version of a custom resource definition.
///
/// `path` and `resource` are everything needed to address the objects of the
/// definition through the generic resource operations of a cluster.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Crd {
    /// API group and version, e.g. `monitoring.coreos.com/v1`
    pub path: String,
    /// Plural resource name
    pub resource: String,
    /// Kind
    pub title: String,
    pub description: String,
    pub scope: CrdScope,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<CrdColumn>,
}

/// Presentation hint copied from a definition's additional printer columns
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrdColumn {
    pub description: String,
    pub json_path: String,
    pub name: String,
    #[serde(rename = "type")]
    pub type_: String,
}

// ============================================================================
// Configuration
// ============================================================================

/// How to reach the API server of one cluster
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Provider {
    /// Use the service account of the pod the gateway runs in
    InCluster,
    /// Use a kubeconfig file; `path` defaults to the standard kubeconfig
    /// lookup and `context` to the file's current context
    Kubeconfig {
        #[serde(default)]
        path: Option<PathBuf>,
        #[serde(default)]
        context: Option<String>,
    },
}

/// Configuration entry for one cluster
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub name: String,
    pub provider: Provider,
}

impl ClusterConfig {
    pub fn new(name: impl Into<String>, provider: Provider) -> Self {
        Self {
            name: name.into(),
            provider,
        }
    }

    /// Normalized name the cluster is registered under
    pub fn normalized_name(&self) -> String {
        normalize_name(&self.name)
    }
}
