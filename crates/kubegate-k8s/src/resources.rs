//! Generic resource operations forwarded verbatim to a cluster's REST API

use http::{Method, Request, header};
use serde::de::DeserializeOwned;

use crate::cluster::Cluster;
use crate::error::{Error, Result};

const JSON: &str = "application/json";
const JSON_PATCH: &str = "application/json-patch+json";

/// Address of an object or a collection below an API path.
///
/// Segments are joined in the order the API server expects them:
/// `/<path>/namespaces/<namespace>/<resource>/<name>/<subresource>?<param>`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceUri<'a> {
    pub path: &'a str,
    pub resource: &'a str,
    pub namespace: Option<&'a str>,
    pub name: Option<&'a str>,
    pub subresource: Option<&'a str>,
    pub param: Option<(&'a str, &'a str)>,
}

impl<'a> ResourceUri<'a> {
    pub fn new(path: &'a str, resource: &'a str) -> Self {
        Self {
            path,
            resource,
            ..Default::default()
        }
    }

    pub fn namespace(mut self, namespace: Option<&'a str>) -> Self {
        self.namespace = namespace.filter(|ns| !ns.is_empty());
        self
    }

    pub fn name(mut self, name: Option<&'a str>) -> Self {
        self.name = name.filter(|n| !n.is_empty());
        self
    }

    pub fn subresource(mut self, subresource: Option<&'a str>) -> Self {
        self.subresource = subresource.filter(|s| !s.is_empty());
        self
    }

    pub fn param(mut self, name: Option<&'a str>, value: Option<&'a str>) -> Self {
        self.param = match (name, value) {
            (Some(name), Some(value)) if !name.is_empty() => Some((name, value)),
            _ => None,
        };
        self
    }

    pub fn build(&self) -> String {
        let mut uri = String::from("/");
        uri.push_str(self.path.trim_matches('/'));

        if let Some(namespace) = self.namespace {
            uri.push_str("/namespaces/");
            uri.push_str(namespace);
        }
        if !self.resource.is_empty() {
            uri.push('/');
            uri.push_str(self.resource);
        }
        if let Some(name) = self.name {
            uri.push('/');
            uri.push_str(name);
        }
        if let Some(subresource) = self.subresource {
            uri.push('/');
            uri.push_str(subresource);
        }
        if let Some((name, value)) = self.param {
            let query = url::form_urlencoded::Serializer::new(String::new())
                .append_pair(name, value)
                .finish();
            uri.push('?');
            uri.push_str(&query);
        }
        uri
    }
}

fn request(
    method: Method,
    uri: &ResourceUri<'_>,
    content_type: Option<&str>,
    body: Vec<u8>,
) -> Result<Request<Vec<u8>>> {
    let mut builder = Request::builder().method(method).uri(uri.build());
    if let Some(content_type) = content_type {
        builder = builder.header(header::CONTENT_TYPE, content_type);
    }
    Ok(builder.body(body)?)
}

impl Cluster {
    async fn forward(
        &self,
        operation: &'static str,
        uri: ResourceUri<'_>,
        request: Request<Vec<u8>>,
    ) -> Result<Vec<u8>> {
        match self.api().send(request).await {
            Ok(body) => Ok(body),
            Err(source) => {
                tracing::error!(
                    cluster = %self.name(),
                    namespace = ?uri.namespace,
                    name = ?uri.name,
                    path = %uri.path,
                    resource = %uri.resource,
                    subresource = ?uri.subresource,
                    error = %source,
                    "{operation} failed"
                );
                Err(self.upstream_error(uri.namespace, uri.resource, source))
            }
        }
    }

    /// Get a single object when `name` is set, otherwise list the objects of
    /// `resource`, optionally filtered by one query parameter (for example
    /// `labelSelector`). The raw response body is returned unmodified.
    pub async fn get_resources(
        &self,
        namespace: Option<&str>,
        name: Option<&str>,
        path: &str,
        resource: &str,
        param_name: Option<&str>,
        param_value: Option<&str>,
    ) -> Result<Vec<u8>> {
        let mut uri = ResourceUri::new(path, resource)
            .namespace(namespace)
            .name(name);
        if uri.name.is_none() {
            uri = uri.param(param_name, param_value);
        }
        let request = request(Method::GET, &uri, None, Vec::new())?;
        self.forward("get resources", uri, request).await
    }

    /// Delete an object; `body` is sent as delete options when present
    pub async fn delete_resource(
        &self,
        namespace: Option<&str>,
        name: &str,
        path: &str,
        resource: &str,
        body: Option<Vec<u8>>,
    ) -> Result<()> {
        let uri = ResourceUri::new(path, resource)
            .namespace(namespace)
            .name(Some(name));
        let content_type = body.as_ref().map(|_| JSON);
        let request = request(Method::DELETE, &uri, content_type, body.unwrap_or_default())?;
        self.forward("delete resource", uri, request).await?;
        Ok(())
    }

    /// Apply a JSON patch to an object
    pub async fn patch_resource(
        &self,
        namespace: Option<&str>,
        name: &str,
        path: &str,
        resource: &str,
        body: Vec<u8>,
    ) -> Result<()> {
        let uri = ResourceUri::new(path, resource)
            .namespace(namespace)
            .name(Some(name));
        let request = request(Method::PATCH, &uri, Some(JSON_PATCH), body)?;
        self.forward("patch resource", uri, request).await?;
        Ok(())
    }

    /// Create an object. When both `name` and `subresource` are set the
    /// subresource of that object is replaced instead (for example `scale`).
    pub async fn create_resource(
        &self,
        namespace: Option<&str>,
        name: Option<&str>,
        path: &str,
        resource: &str,
        subresource: Option<&str>,
        body: Vec<u8>,
    ) -> Result<()> {
        let uri = ResourceUri::new(path, resource).namespace(namespace);
        let (method, uri) = match (name.filter(|n| !n.is_empty()), subresource) {
            (Some(name), Some(subresource)) if !subresource.is_empty() => (
                Method::PUT,
                uri.name(Some(name)).subresource(Some(subresource)),
            ),
            _ => (Method::POST, uri),
        };
        let request = request(method, &uri, Some(JSON), body)?;
        self.forward("create resource", uri, request).await?;
        Ok(())
    }
}

// ============================================================================
// Typed custom resources
// ============================================================================

/// A custom resource kind served below an API path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CustomKind {
    pub path: &'static str,
    pub resource: &'static str,
}

impl CustomKind {
    pub const fn new(path: &'static str, resource: &'static str) -> Self {
        Self { path, resource }
    }
}

/// Where an object was read from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectOrigin {
    pub cluster: String,
    pub namespace: String,
    pub name: String,
}

/// Custom resource specs that carry their own origin.
///
/// Users don't have to repeat cluster, namespace and name inside the spec of
/// a custom resource; they are filled in after reading the object.
pub trait Stamped {
    fn stamp(&mut self, origin: &ObjectOrigin);
}

#[derive(serde::Deserialize)]
struct ObjectList<T> {
    #[serde(default = "Vec::new")]
    items: Vec<Object<T>>,
}

#[derive(serde::Deserialize)]
struct Object<T> {
    #[serde(default)]
    metadata: ObjectMeta,
    spec: T,
}

#[derive(serde::Deserialize, Default)]
struct ObjectMeta {
    #[serde(default)]
    name: String,
    #[serde(default)]
    namespace: String,
}

impl Cluster {
    fn decode<T: DeserializeOwned>(&self, body: &[u8]) -> Result<T> {
        serde_json::from_slice(body).map_err(|source| Error::Decode {
            cluster: self.name().to_string(),
            source,
        })
    }

    fn origin(&self, metadata: ObjectMeta, namespace: Option<&str>) -> ObjectOrigin {
        let namespace = if metadata.namespace.is_empty() {
            namespace.unwrap_or_default().to_string()
        } else {
            metadata.namespace
        };
        ObjectOrigin {
            cluster: self.name().to_string(),
            namespace,
            name: metadata.name,
        }
    }

    /// List the specs of all objects of a custom kind, stamped with their
    /// origin. `namespace` of `None` lists across all namespaces.
    pub async fn list_custom<T>(&self, kind: CustomKind, namespace: Option<&str>) -> Result<Vec<T>>
    where
        T: DeserializeOwned + Stamped,
    {
        let body = self
            .get_resources(namespace, None, kind.path, kind.resource, None, None)
            .await?;
        let list: ObjectList<T> = self.decode(&body)?;

        Ok(list
            .items
            .into_iter()
            .map(|object| {
                let origin = self.origin(object.metadata, namespace);
                let mut spec = object.spec;
                spec.stamp(&origin);
                spec
            })
            .collect())
    }

    /// Get the spec of one object of a custom kind, stamped with its origin
    pub async fn get_custom<T>(&self, kind: CustomKind, namespace: &str, name: &str) -> Result<T>
    where
        T: DeserializeOwned + Stamped,
    {
        let body = self
            .get_resources(Some(namespace), Some(name), kind.path, kind.resource, None, None)
            .await?;
        let object: Object<T> = self.decode(&body)?;

        let mut origin = self.origin(object.metadata, Some(namespace));
        if origin.name.is_empty() {
            origin.name = name.to_string();
        }
        let mut spec = object.spec;
        spec.stamp(&origin);
        Ok(spec)
    }
}
