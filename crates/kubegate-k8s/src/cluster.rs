use std::sync::Arc;
use std::time::Duration;

use kube::config::{KubeConfigOptions, Kubeconfig};
use tokio::sync::watch;
use tokio::task::AbortHandle;

use kubegate_types::{ClusterConfig, Crd, Provider, normalize_name};

use crate::api::{ClusterApi, KubeApi};
use crate::discovery::{self, CrdSnapshot, RetryPolicy};
use crate::error::{Error, Result};
use crate::namespaces::NamespaceCache;

/// One Kubernetes cluster: its API connection and the state derived from it.
///
/// Cloning is cheap and all clones share the same connection, CRD catalog
/// and namespace cache.
#[derive(Clone)]
pub struct Cluster {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    api: Arc<dyn ClusterApi>,
    crds: Arc<watch::Sender<CrdSnapshot>>,
    namespaces: NamespaceCache,
    discovery: AbortHandle,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.discovery.abort();
    }
}

impl Cluster {
    /// Create a cluster on top of an API connection and start CRD discovery.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(name: &str, api: Arc<dyn ClusterApi>, retry: RetryPolicy) -> Self {
        let name = normalize_name(name);
        let (tx, _) = watch::channel(None);
        let crds = Arc::new(tx);

        let discovery = tokio::spawn(discovery::discover(
            name.clone(),
            Arc::clone(&api),
            retry,
            Arc::clone(&crds),
        ))
        .abort_handle();

        Self {
            inner: Arc::new(Inner {
                name,
                api,
                crds,
                namespaces: NamespaceCache::default(),
                discovery,
            }),
        }
    }

    /// Build the client for a configuration entry and create the cluster
    pub async fn connect(config: &ClusterConfig, retry: RetryPolicy) -> Result<Self> {
        let cluster = config.normalized_name();

        let kube_config = match &config.provider {
            Provider::InCluster => {
                kube::Config::incluster().map_err(|source| Error::InCluster {
                    cluster: cluster.clone(),
                    source,
                })?
            }
            Provider::Kubeconfig { path, context } => {
                let kubeconfig = match path {
                    Some(path) => Kubeconfig::read_from(path),
                    None => Kubeconfig::read(),
                }
                .map_err(|source| Error::Kubeconfig {
                    cluster: cluster.clone(),
                    source,
                })?;

                kube::Config::from_custom_kubeconfig(
                    kubeconfig,
                    &KubeConfigOptions {
                        context: context.clone(),
                        ..Default::default()
                    },
                )
                .await
                .map_err(|source| Error::Kubeconfig {
                    cluster: cluster.clone(),
                    source,
                })?
            }
        };

        let client = kube::Client::try_from(kube_config).map_err(|source| Error::Connect {
            cluster: cluster.clone(),
            source,
        })?;

        tracing::debug!(cluster = %cluster, "cluster client created");
        Ok(Self::new(&config.name, Arc::new(KubeApi::new(client)), retry))
    }

    /// Normalized cluster name
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The cluster's API connection
    pub fn api(&self) -> &dyn ClusterApi {
        self.inner.api.as_ref()
    }

    /// Snapshot of the discovered CRDs.
    ///
    /// Empty while discovery is still running or keeps failing.
    pub fn crds(&self) -> Arc<[Crd]> {
        self.inner
            .crds
            .borrow()
            .clone()
            .unwrap_or_else(|| Arc::from(Vec::new()))
    }

    /// Whether CRD discovery has completed
    pub fn crds_loaded(&self) -> bool {
        self.inner.crds.borrow().is_some()
    }

    /// Wait until CRD discovery has completed and return the catalog
    pub async fn wait_for_crds(&self) -> Arc<[Crd]> {
        let mut rx = self.inner.crds.subscribe();
        match rx.wait_for(Option::is_some).await {
            Ok(snapshot) => snapshot.clone().unwrap_or_else(|| Arc::from(Vec::new())),
            Err(_) => Arc::from(Vec::new()),
        }
    }

    /// All namespace names, served from cache while it is younger than `ttl`
    pub async fn namespaces(&self, ttl: Duration) -> Result<Vec<String>> {
        tracing::trace!(cluster = %self.name(), last_fetch = ?self.inner.namespaces.last_fetch(), "get namespaces");

        let mut refreshed = false;
        let namespaces = self
            .inner
            .namespaces
            .get_or_refresh(ttl, || {
                refreshed = true;
                self.api().list_namespaces()
            })
            .await
            .map_err(|source| self.upstream_error(None, "namespaces", source))?;

        if refreshed {
            tracing::debug!(cluster = %self.name(), count = namespaces.len(), "namespaces loaded from Kubernetes API");
        } else {
            tracing::debug!(cluster = %self.name(), "namespaces served from cache");
        }
        Ok(namespaces.to_vec())
    }

    /// Tag an upstream error with this cluster and the request's context
    pub fn upstream_error(
        &self,
        namespace: Option<&str>,
        resource: &str,
        source: kube::Error,
    ) -> Error {
        Error::Api {
            cluster: self.name().to_string(),
            namespace: namespace.map(String::from),
            resource: resource.to_string(),
            source,
        }
    }
}

impl std::fmt::Debug for Cluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cluster")
            .field("name", &self.inner.name)
            .field("crds_loaded", &self.crds_loaded())
            .finish()
    }
}
