use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use kubegate_types::{ClusterConfig, normalize_name};

use crate::cluster::Cluster;
use crate::discovery::RetryPolicy;
use crate::error::{Error, Result};

/// The fixed set of clusters the gateway operates on.
///
/// Built once; lookups need no locking because the set never changes after
/// construction.
#[derive(Debug, Clone, Default)]
pub struct ClusterRegistry {
    clusters: Vec<Cluster>,
    index: HashMap<String, usize>,
}

impl ClusterRegistry {
    /// Connect to every configured cluster.
    ///
    /// Fails on the first cluster that cannot be constructed; no partially
    /// initialized registry is returned.
    pub async fn load(configs: &[ClusterConfig], retry: RetryPolicy) -> Result<Self> {
        check_unique_names(configs)?;

        let mut clusters = Vec::with_capacity(configs.len());
        for config in configs {
            let cluster = Cluster::connect(config, retry.clone()).await.inspect_err(|err| {
                tracing::error!(cluster = %config.name, error = %err, "could not load cluster");
            })?;
            clusters.push(cluster);
        }

        let registry = Self::from_clusters(clusters)?;
        tracing::info!(count = registry.len(), "clusters loaded");
        Ok(registry)
    }

    /// Build a registry from existing clusters, rejecting duplicate names
    pub fn from_clusters(clusters: Vec<Cluster>) -> Result<Self> {
        let mut index = HashMap::with_capacity(clusters.len());
        for (position, cluster) in clusters.iter().enumerate() {
            if index.insert(cluster.name().to_string(), position).is_some() {
                return Err(Error::DuplicateCluster {
                    name: cluster.name().to_string(),
                    normalized: cluster.name().to_string(),
                });
            }
        }
        Ok(Self { clusters, index })
    }

    /// Look a cluster up by name; the name is normalized first
    pub fn get(&self, name: &str) -> Option<&Cluster> {
        let position = match self.index.get(name) {
            Some(position) => *position,
            None => *self.index.get(&normalize_name(name))?,
        };
        self.clusters.get(position)
    }

    /// Like [`get`](Self::get), but a missing cluster is an error
    pub fn cluster(&self, name: &str) -> Result<&Cluster> {
        self.get(name)
            .ok_or_else(|| Error::ClusterNotFound(name.to_string()))
    }

    /// All clusters in configuration order
    pub fn clusters(&self) -> &[Cluster] {
        &self.clusters
    }

    /// Names of all clusters in configuration order
    pub fn names(&self) -> Vec<String> {
        self.clusters.iter().map(|c| c.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    /// Namespaces of several clusters, sorted and deduplicated.
    ///
    /// Fails if any of the clusters is unknown or its namespace list can't be
    /// loaded.
    pub async fn namespaces(&self, names: &[String], ttl: Duration) -> Result<Vec<String>> {
        let mut namespaces = BTreeSet::new();
        for name in names {
            namespaces.extend(self.cluster(name)?.namespaces(ttl).await?);
        }
        Ok(namespaces.into_iter().collect())
    }
}

/// Detect configuration entries whose names normalize to the same identifier
pub fn check_unique_names(configs: &[ClusterConfig]) -> Result<()> {
    let mut seen = HashMap::new();
    for config in configs {
        let normalized = config.normalized_name();
        if let Some(previous) = seen.insert(normalized.clone(), &config.name) {
            tracing::warn!(first = %previous, second = %config.name, normalized = %normalized, "cluster names collide");
            return Err(Error::DuplicateCluster {
                name: config.name.clone(),
                normalized,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use kubegate_types::Provider;

    use crate::testing::FakeApi;

    fn fake_cluster(name: &str, namespaces: &[&str]) -> Cluster {
        let api = Arc::new(FakeApi::new());
        api.set_namespaces(namespaces);
        Cluster::new(name, api, RetryPolicy::default())
    }

    #[tokio::test]
    async fn test_lookup_and_order() {
        let registry = ClusterRegistry::from_clusters(vec![
            fake_cluster("Prod EU", &[]),
            fake_cluster("dev", &[]),
            fake_cluster("staging", &[]),
        ])
        .unwrap();

        assert_eq!(registry.names(), vec!["prod-eu", "dev", "staging"]);
        assert_eq!(registry.get("prod-eu").unwrap().name(), "prod-eu");
        assert_eq!(registry.get("Prod EU").unwrap().name(), "prod-eu");
        assert!(registry.get("missing").is_none());
        assert!(matches!(
            registry.cluster("missing"),
            Err(Error::ClusterNotFound(name)) if name == "missing"
        ));
    }

    #[tokio::test]
    async fn test_duplicate_names_are_rejected() {
        let result = ClusterRegistry::from_clusters(vec![
            fake_cluster("Dev Cluster", &[]),
            fake_cluster("dev_cluster", &[]),
        ]);
        assert!(matches!(result, Err(Error::DuplicateCluster { .. })));
    }

    #[test]
    fn test_colliding_configs_are_detected() {
        let configs = vec![
            ClusterConfig::new("Dev Cluster", Provider::InCluster),
            ClusterConfig::new("dev_cluster", Provider::InCluster),
        ];
        match check_unique_names(&configs) {
            Err(Error::DuplicateCluster { name, normalized }) => {
                assert_eq!(name, "dev_cluster");
                assert_eq!(normalized, "dev-cluster");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_aggregated_namespaces() {
        let registry = ClusterRegistry::from_clusters(vec![
            fake_cluster("dev", &["default", "team-a"]),
            fake_cluster("prod", &["default", "team-b"]),
        ])
        .unwrap();

        let namespaces = registry
            .namespaces(&["dev".to_string(), "prod".to_string()], Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(namespaces, vec!["default", "team-a", "team-b"]);

        let err = registry
            .namespaces(&["unknown".to_string()], Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ClusterNotFound(_)));
    }
}
