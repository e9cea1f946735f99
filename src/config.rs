use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use kubegate_k8s::{ClusterConfig, RetryPolicy};

fn default_namespace_ttl() -> u64 {
    300
}

fn default_crd_retry() -> u64 {
    30
}

/// Gateway configuration file
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    #[serde(default)]
    pub clusters: Vec<ClusterConfig>,

    /// How long a cluster's namespace list is served from cache
    #[serde(default = "default_namespace_ttl")]
    pub namespace_cache_ttl_secs: u64,

    /// First delay between failed CRD discovery attempts
    #[serde(default = "default_crd_retry")]
    pub crd_retry_initial_secs: u64,
}

impl GatewayConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    pub fn namespace_ttl(&self) -> Duration {
        Duration::from_secs(self.namespace_cache_ttl_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default().with_initial_delay(Duration::from_secs(self.crd_retry_initial_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kubegate_k8s::Provider;

    #[test]
    fn test_defaults() {
        let config: GatewayConfig = toml::from_str("").unwrap();
        assert!(config.clusters.is_empty());
        assert_eq!(config.namespace_ttl(), Duration::from_secs(300));
        assert_eq!(config.retry_policy().initial_delay, Duration::from_secs(30));
    }

    #[test]
    fn test_parse_clusters() {
        let config: GatewayConfig = toml::from_str(
            r#"
            namespace_cache_ttl_secs = 60
            crd_retry_initial_secs = 5

            [[clusters]]
            name = "Production EU"
            provider = { type = "kubeconfig", context = "prod-eu" }

            [[clusters]]
            name = "local"
            provider = { type = "incluster" }
            "#,
        )
        .unwrap();

        assert_eq!(config.namespace_ttl(), Duration::from_secs(60));
        assert_eq!(config.retry_policy().initial_delay, Duration::from_secs(5));
        assert_eq!(config.clusters.len(), 2);
        assert_eq!(config.clusters[0].normalized_name(), "production-eu");
        assert_eq!(
            config.clusters[0].provider,
            Provider::Kubeconfig {
                path: None,
                context: Some("prod-eu".to_string()),
            }
        );
        assert_eq!(config.clusters[1].provider, Provider::InCluster);
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let result: Result<GatewayConfig, _> = toml::from_str("namespace_ttl = 10");
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_file() {
        let err = GatewayConfig::load(Path::new("/nonexistent/kubegate.toml")).unwrap_err();
        assert!(format!("{err:#}").contains("failed to read config file"));
    }
}
