//! The seam between kubegate and a Kubernetes API server

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use k8s_openapi::api::core::v1::{Namespace, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Status;
use kube::Api;
use kube::api::{AttachParams, ListParams, LogParams};
use tokio::io::{AsyncRead, AsyncWrite};

/// Byte stream of a pod's log endpoint
pub type LogReader = Box<dyn futures::AsyncRead + Send + Unpin>;

/// Writer half of an exec stream
pub type ExecWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Reader half of an exec stream
pub type ExecReader = Box<dyn AsyncRead + Send + Unpin>;

/// Operations kubegate needs from one Kubernetes API server.
///
/// Errors are returned exactly as the client produced them; callers attach
/// cluster context.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Send a raw REST request and return the response body
    async fn send(&self, request: http::Request<Vec<u8>>) -> kube::Result<Vec<u8>>;

    /// Names of all namespaces
    async fn list_namespaces(&self) -> kube::Result<Vec<String>>;

    /// All custom resource definitions
    async fn list_crds(&self) -> kube::Result<Vec<CustomResourceDefinition>>;

    /// One complete log payload of a container
    async fn pod_logs(&self, namespace: &str, pod: &str, params: &LogParams)
    -> kube::Result<String>;

    /// A continuous read stream of a container's log
    async fn pod_log_stream(
        &self,
        namespace: &str,
        pod: &str,
        params: &LogParams,
    ) -> kube::Result<LogReader>;

    /// Run a command inside a container
    async fn exec(&self, request: ExecRequest) -> kube::Result<ExecSession>;
}

// ============================================================================
// Exec
// ============================================================================

/// Terminal size sent over an exec session's resize channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TerminalSize {
    pub cols: u16,
    pub rows: u16,
}

impl TerminalSize {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self { cols, rows }
    }
}

impl From<TerminalSize> for kube::api::TerminalSize {
    fn from(size: TerminalSize) -> Self {
        kube::api::TerminalSize {
            width: size.cols,
            height: size.rows,
        }
    }
}

/// A container inside a pod
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodTarget {
    pub namespace: String,
    pub pod: String,
    /// `None` selects the pod's default container
    pub container: Option<String>,
}

impl PodTarget {
    pub fn new(namespace: impl Into<String>, pod: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            pod: pod.into(),
            container: None,
        }
    }

    pub fn container(mut self, container: impl Into<String>) -> Self {
        self.container = Some(container.into()).filter(|c: &String| !c.is_empty());
        self
    }
}

/// Command to run in a container, and which streams to attach
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRequest {
    pub target: PodTarget,
    pub command: Vec<String>,
    pub stdin: bool,
    pub stdout: bool,
    pub stderr: bool,
    pub tty: bool,
}

impl ExecRequest {
    /// Interactive session with a pseudo-terminal
    pub fn interactive(target: PodTarget, command: Vec<String>) -> Self {
        Self {
            target,
            command,
            stdin: true,
            stdout: true,
            stderr: false,
            tty: true,
        }
    }

    /// Non-interactive session with separate stdout and stderr
    pub fn piped(target: PodTarget, command: Vec<String>) -> Self {
        Self {
            target,
            command,
            stdin: true,
            stdout: true,
            stderr: true,
            tty: false,
        }
    }

    fn attach_params(&self) -> AttachParams {
        let mut params = AttachParams::default()
            .stdin(self.stdin)
            .stdout(self.stdout)
            .stderr(self.stderr)
            .tty(self.tty);
        if let Some(container) = &self.target.container {
            params = params.container(container.clone());
        }
        params
    }
}

/// A running exec session.
///
/// Streams are taken out once by the bridge that drives the session. The
/// upstream connection is closed when the session is dropped.
pub struct ExecSession {
    stdin: Option<ExecWriter>,
    stdout: Option<ExecReader>,
    stderr: Option<ExecReader>,
    resize: Option<futures::channel::mpsc::Sender<kube::api::TerminalSize>>,
    status: Option<BoxFuture<'static, Option<Status>>>,
    on_close: Option<Box<dyn FnOnce() + Send>>,
}

impl ExecSession {
    /// Create a session; `on_close` runs exactly once when it is dropped
    pub fn new(on_close: impl FnOnce() + Send + 'static) -> Self {
        Self {
            stdin: None,
            stdout: None,
            stderr: None,
            resize: None,
            status: None,
            on_close: Some(Box::new(on_close)),
        }
    }

    pub fn with_stdin(mut self, stdin: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        self.stdin = Some(Box::new(stdin));
        self
    }

    pub fn with_stdout(mut self, stdout: impl AsyncRead + Send + Unpin + 'static) -> Self {
        self.stdout = Some(Box::new(stdout));
        self
    }

    pub fn with_stderr(mut self, stderr: impl AsyncRead + Send + Unpin + 'static) -> Self {
        self.stderr = Some(Box::new(stderr));
        self
    }

    pub fn with_resize(
        mut self,
        resize: futures::channel::mpsc::Sender<kube::api::TerminalSize>,
    ) -> Self {
        self.resize = Some(resize);
        self
    }

    pub fn with_status(
        mut self,
        status: impl Future<Output = Option<Status>> + Send + 'static,
    ) -> Self {
        self.status = Some(status.boxed());
        self
    }

    pub fn take_stdin(&mut self) -> Option<ExecWriter> {
        self.stdin.take()
    }

    pub fn take_stdout(&mut self) -> Option<ExecReader> {
        self.stdout.take()
    }

    pub fn take_stderr(&mut self) -> Option<ExecReader> {
        self.stderr.take()
    }

    /// Size-change channel, only present for sessions with a pseudo-terminal
    pub fn take_resize(
        &mut self,
    ) -> Option<futures::channel::mpsc::Sender<kube::api::TerminalSize>> {
        self.resize.take()
    }

    /// Future resolving to the remote command's final status
    pub fn take_status(&mut self) -> Option<BoxFuture<'static, Option<Status>>> {
        self.status.take()
    }
}

impl Drop for ExecSession {
    fn drop(&mut self) {
        if let Some(on_close) = self.on_close.take() {
            on_close();
        }
    }
}

impl std::fmt::Debug for ExecSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecSession")
            .field("stdin", &self.stdin.is_some())
            .field("stdout", &self.stdout.is_some())
            .field("stderr", &self.stderr.is_some())
            .field("resize", &self.resize.is_some())
            .finish()
    }
}

// ============================================================================
// kube-backed implementation
// ============================================================================

/// [`ClusterApi`] backed by a `kube::Client`
#[derive(Clone)]
pub struct KubeApi {
    client: kube::Client,
}

impl KubeApi {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ClusterApi for KubeApi {
    async fn send(&self, request: http::Request<Vec<u8>>) -> kube::Result<Vec<u8>> {
        self.client.request_text(request).await.map(String::into_bytes)
    }

    async fn list_namespaces(&self) -> kube::Result<Vec<String>> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        let list = namespaces.list(&ListParams::default()).await?;
        Ok(list
            .items
            .into_iter()
            .filter_map(|ns| ns.metadata.name)
            .collect())
    }

    async fn list_crds(&self) -> kube::Result<Vec<CustomResourceDefinition>> {
        let crds: Api<CustomResourceDefinition> = Api::all(self.client.clone());
        Ok(crds.list(&ListParams::default()).await?.items)
    }

    async fn pod_logs(
        &self,
        namespace: &str,
        pod: &str,
        params: &LogParams,
    ) -> kube::Result<String> {
        self.pods(namespace).logs(pod, params).await
    }

    async fn pod_log_stream(
        &self,
        namespace: &str,
        pod: &str,
        params: &LogParams,
    ) -> kube::Result<LogReader> {
        let stream = self.pods(namespace).log_stream(pod, params).await?;
        Ok(Box::new(stream))
    }

    async fn exec(&self, request: ExecRequest) -> kube::Result<ExecSession> {
        let params = request.attach_params();
        let mut process = self
            .pods(&request.target.namespace)
            .exec(&request.target.pod, request.command, &params)
            .await?;

        let stdin = process.stdin();
        let stdout = process.stdout();
        let stderr = process.stderr();
        let resize = process.terminal_size();
        let status = process.take_status();

        let mut session = ExecSession::new(move || process.abort());
        if let Some(stdin) = stdin {
            session = session.with_stdin(stdin);
        }
        if let Some(stdout) = stdout {
            session = session.with_stdout(stdout);
        }
        if let Some(stderr) = stderr {
            session = session.with_stderr(stderr);
        }
        if let Some(resize) = resize {
            session = session.with_resize(resize);
        }
        if let Some(status) = status {
            session = session.with_status(status);
        }
        Ok(session)
    }
}
