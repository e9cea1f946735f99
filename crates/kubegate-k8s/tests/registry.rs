use std::path::PathBuf;
use std::sync::Arc;

use kubegate_k8s::testing::FakeApi;
use kubegate_k8s::{Cluster, ClusterConfig, ClusterRegistry, Error, Provider, RetryPolicy};

#[tokio::test]
async fn test_load_fails_fast_on_unreadable_kubeconfig() {
    let configs = vec![ClusterConfig::new(
        "dev",
        Provider::Kubeconfig {
            path: Some(PathBuf::from("/nonexistent/kubegate/kubeconfig.yaml")),
            context: None,
        },
    )];

    let err = ClusterRegistry::load(&configs, RetryPolicy::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Kubeconfig { cluster, .. } if cluster == "dev"));
}

#[tokio::test]
async fn test_load_rejects_colliding_names_before_connecting() {
    let configs = vec![
        ClusterConfig::new(
            "Dev Cluster",
            Provider::Kubeconfig {
                path: Some(PathBuf::from("/nonexistent/a.yaml")),
                context: None,
            },
        ),
        ClusterConfig::new(
            "dev-cluster",
            Provider::Kubeconfig {
                path: Some(PathBuf::from("/nonexistent/b.yaml")),
                context: None,
            },
        ),
    ];

    let err = ClusterRegistry::load(&configs, RetryPolicy::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::DuplicateCluster { .. }));
}

#[tokio::test]
async fn test_empty_configuration_loads_empty_registry() {
    let registry = ClusterRegistry::load(&[], RetryPolicy::default()).await.unwrap();
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_clusters_snapshot_keeps_insertion_order() {
    let names = ["zeta", "alpha", "mid"];
    let clusters = names
        .iter()
        .map(|name| Cluster::new(name, Arc::new(FakeApi::new()), RetryPolicy::default()))
        .collect();
    let registry = ClusterRegistry::from_clusters(clusters).unwrap();

    let snapshot: Vec<&str> = registry.clusters().iter().map(Cluster::name).collect();
    assert_eq!(snapshot, names);
}
