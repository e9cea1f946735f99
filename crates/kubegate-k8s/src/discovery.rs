//! Background discovery of a cluster's custom resource definitions

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use tokio::sync::watch;

use kubegate_types::{Crd, CrdColumn, CrdScope};

use crate::api::ClusterApi;

/// Published CRD catalog; `None` until discovery succeeded
pub(crate) type CrdSnapshot = Option<Arc<[Crd]>>;

/// Retry schedule for CRD discovery.
///
/// Delays start at `initial_delay` and are multiplied by `multiplier` after
/// every failure, capped at `max_delay` when set. With `max_attempts` unset
/// discovery retries until it succeeds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub multiplier: u32,
    pub max_delay: Option<Duration>,
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(30),
            multiplier: 2,
            max_delay: None,
            max_attempts: None,
        }
    }
}

impl RetryPolicy {
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Delay to wait after the given number of failed attempts (1-based)
    pub fn delay_after(&self, failures: u32) -> Duration {
        let factor = self
            .multiplier
            .checked_pow(failures.saturating_sub(1))
            .unwrap_or(u32::MAX);
        let delay = self.initial_delay.saturating_mul(factor);
        match self.max_delay {
            Some(max) => delay.min(max),
            None => delay,
        }
    }

    /// Whether another attempt is allowed after `failures` failed attempts
    pub fn should_retry(&self, failures: u32) -> bool {
        self.max_attempts.is_none_or(|max| failures < max)
    }
}

/// Flatten definitions into one catalog entry per served version
pub fn flatten_crds(definitions: &[CustomResourceDefinition]) -> Vec<Crd> {
    definitions
        .iter()
        .flat_map(|definition| {
            let spec = &definition.spec;
            spec.versions
                .iter()
                .filter(|version| version.served)
                .map(move |version| {
                    let description = version
                        .schema
                        .as_ref()
                        .and_then(|schema| schema.open_api_v3_schema.as_ref())
                        .and_then(|props| props.description.clone())
                        .unwrap_or_default();

                    let columns = version
                        .additional_printer_columns
                        .iter()
                        .flatten()
                        .map(|column| CrdColumn {
                            description: column.description.clone().unwrap_or_default(),
                            json_path: column.json_path.clone(),
                            name: column.name.clone(),
                            type_: column.type_.clone(),
                        })
                        .collect();

                    Crd {
                        path: format!("{}/{}", spec.group, version.name),
                        resource: spec.names.plural.clone(),
                        title: spec.names.kind.clone(),
                        description,
                        scope: CrdScope::from(spec.scope.as_str()),
                        columns,
                    }
                })
        })
        .collect()
}

/// Runs CRD discovery for one cluster until it succeeds or the policy gives
/// up, then publishes the catalog. This is the only writer of the snapshot.
pub(crate) async fn discover(
    cluster: String,
    api: Arc<dyn ClusterApi>,
    policy: RetryPolicy,
    publish: Arc<watch::Sender<CrdSnapshot>>,
) {
    let mut failures = 0u32;

    loop {
        tracing::trace!(cluster = %cluster, attempt = failures + 1, "loading custom resource definitions");

        match api.list_crds().await {
            Ok(definitions) => {
                let crds = flatten_crds(&definitions);
                tracing::info!(
                    cluster = %cluster,
                    definitions = definitions.len(),
                    count = crds.len(),
                    "custom resource definitions loaded"
                );
                publish.send_replace(Some(crds.into()));
                return;
            }
            Err(err) => {
                failures += 1;
                if !policy.should_retry(failures) {
                    tracing::error!(cluster = %cluster, error = %err, failures, "giving up loading custom resource definitions");
                    return;
                }
                let delay = policy.delay_after(failures);
                tracing::error!(
                    cluster = %cluster,
                    error = %err,
                    retry_in = ?delay,
                    "could not load custom resource definitions"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
