//! In-memory cluster API for tests

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::{
    CustomResourceColumnDefinition, CustomResourceDefinition, CustomResourceDefinitionNames,
    CustomResourceDefinitionSpec, CustomResourceDefinitionVersion, CustomResourceValidation,
    JSONSchemaProps,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Status;
use kube::api::LogParams;
use parking_lot::Mutex;
use tokio::io::DuplexStream;
use tokio::sync::oneshot;

use crate::api::{ClusterApi, ExecRequest, ExecSession, LogReader};

/// A request recorded by [`FakeApi::send`]
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: http::Method,
    pub uri: String,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

/// Scripted [`ClusterApi`] that counts and records calls
#[derive(Default)]
pub struct FakeApi {
    responses: Mutex<VecDeque<kube::Result<Vec<u8>>>>,
    requests: Mutex<Vec<RecordedRequest>>,

    namespaces: Mutex<Vec<String>>,
    namespace_error: Mutex<Option<(u16, String)>>,
    namespace_delay: Mutex<Duration>,
    namespace_calls: AtomicUsize,

    crds: Mutex<Vec<CustomResourceDefinition>>,
    crd_failures: AtomicU32,
    crd_calls: AtomicUsize,

    logs: Mutex<String>,
    log_stream: Mutex<Option<LogReader>>,
    log_params: Mutex<Vec<LogParams>>,

    exec_sessions: Mutex<VecDeque<ExecSession>>,
    exec_requests: Mutex<Vec<ExecRequest>>,
}

impl FakeApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the result of the next `send`; an empty queue answers `{}`
    pub fn push_response(&self, response: kube::Result<Vec<u8>>) {
        self.responses.lock().push_back(response);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    pub fn set_namespaces(&self, namespaces: &[&str]) {
        *self.namespaces.lock() = namespaces.iter().map(|ns| ns.to_string()).collect();
    }

    pub fn set_namespace_delay(&self, delay: Duration) {
        *self.namespace_delay.lock() = delay;
    }

    pub fn fail_namespaces(&self, code: u16, reason: &str) {
        *self.namespace_error.lock() = Some((code, reason.to_string()));
    }

    pub fn namespace_calls(&self) -> usize {
        self.namespace_calls.load(Ordering::SeqCst)
    }

    pub fn set_crds(&self, crds: Vec<CustomResourceDefinition>) {
        *self.crds.lock() = crds;
    }

    /// Fail the next `count` CRD list calls
    pub fn fail_crds(&self, count: u32) {
        self.crd_failures.store(count, Ordering::SeqCst);
    }

    pub fn crd_calls(&self) -> usize {
        self.crd_calls.load(Ordering::SeqCst)
    }

    pub fn set_logs(&self, logs: &str) {
        *self.logs.lock() = logs.to_string();
    }

    /// Serve `reader` as the next log stream. The returned flag is set once
    /// the stream has been dropped.
    pub fn set_log_stream(
        &self,
        reader: impl futures::AsyncRead + Send + Unpin + 'static,
    ) -> Arc<AtomicBool> {
        let closed = Arc::new(AtomicBool::new(false));
        *self.log_stream.lock() = Some(Box::new(TrackedReader {
            inner: reader,
            closed: Arc::clone(&closed),
        }));
        closed
    }

    pub fn log_params(&self) -> Vec<LogParams> {
        self.log_params.lock().clone()
    }

    pub fn push_exec(&self, session: ExecSession) {
        self.exec_sessions.lock().push_back(session);
    }

    pub fn exec_requests(&self) -> Vec<ExecRequest> {
        self.exec_requests.lock().clone()
    }
}

#[async_trait]
impl ClusterApi for FakeApi {
    async fn send(&self, request: http::Request<Vec<u8>>) -> kube::Result<Vec<u8>> {
        let (parts, body) = request.into_parts();
        self.requests.lock().push(RecordedRequest {
            method: parts.method,
            uri: parts.uri.to_string(),
            content_type: parts
                .headers
                .get(http::header::CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .map(String::from),
            body,
        });
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(b"{}".to_vec()))
    }

    async fn list_namespaces(&self) -> kube::Result<Vec<String>> {
        self.namespace_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.namespace_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some((code, reason)) = self.namespace_error.lock().clone() {
            return Err(api_error(code, &reason));
        }
        Ok(self.namespaces.lock().clone())
    }

    async fn list_crds(&self) -> kube::Result<Vec<CustomResourceDefinition>> {
        self.crd_calls.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .crd_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failed {
            return Err(api_error(503, "ServiceUnavailable"));
        }
        Ok(self.crds.lock().clone())
    }

    async fn pod_logs(
        &self,
        _namespace: &str,
        _pod: &str,
        params: &LogParams,
    ) -> kube::Result<String> {
        self.log_params.lock().push(params.clone());
        Ok(self.logs.lock().clone())
    }

    async fn pod_log_stream(
        &self,
        _namespace: &str,
        pod: &str,
        params: &LogParams,
    ) -> kube::Result<LogReader> {
        self.log_params.lock().push(params.clone());
        self.log_stream
            .lock()
            .take()
            .ok_or_else(|| api_error(404, &format!("pods \"{pod}\" not found")))
    }

    async fn exec(&self, request: ExecRequest) -> kube::Result<ExecSession> {
        self.exec_requests.lock().push(request);
        self.exec_sessions
            .lock()
            .pop_front()
            .ok_or_else(|| api_error(500, "exec not scripted"))
    }
}

struct TrackedReader<R> {
    inner: R,
    closed: Arc<AtomicBool>,
}

impl<R: futures::AsyncRead + Unpin> futures::AsyncRead for TrackedReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<R> Drop for TrackedReader<R> {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// The container side of a scripted exec session
pub struct RemoteProcess {
    /// Reads what the bridge wrote to the session's stdin
    pub stdin: DuplexStream,
    /// Writes to the session's stdout
    pub stdout: Option<DuplexStream>,
    /// Writes to the session's stderr
    pub stderr: Option<DuplexStream>,
    pub resize: Option<futures::channel::mpsc::Receiver<kube::api::TerminalSize>>,
    pub status: Option<oneshot::Sender<Status>>,
    closed: Arc<AtomicBool>,
}

impl RemoteProcess {
    /// Whether the session has been dropped by its bridge
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Report the command's final status
    pub fn finish(&mut self, success: bool, message: &str) {
        if let Some(tx) = self.status.take() {
            let _ = tx.send(Status {
                status: Some(if success { "Success" } else { "Failure" }.to_string()),
                message: Some(message.to_string()).filter(|m| !m.is_empty()),
                ..Default::default()
            });
        }
    }
}

/// Build an exec session connected to in-memory pipes.
///
/// With `tty` the session has a resize channel and no stderr, like an
/// interactive session; otherwise stdout and stderr are separate.
pub fn exec_pipes(tty: bool) -> (ExecSession, RemoteProcess) {
    let closed = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&closed);

    let (local_stdin, remote_stdin) = tokio::io::duplex(64 * 1024);
    let (local_stdout, remote_stdout) = tokio::io::duplex(64 * 1024);
    let (status_tx, status_rx) = oneshot::channel();

    let mut session = ExecSession::new(move || flag.store(true, Ordering::SeqCst))
        .with_stdin(local_stdin)
        .with_stdout(local_stdout)
        .with_status(async move { status_rx.await.ok() });

    let mut remote = RemoteProcess {
        stdin: remote_stdin,
        stdout: Some(remote_stdout),
        stderr: None,
        resize: None,
        status: Some(status_tx),
        closed,
    };

    if tty {
        let (resize_tx, resize_rx) = futures::channel::mpsc::channel(8);
        session = session.with_resize(resize_tx);
        remote.resize = Some(resize_rx);
    } else {
        let (local_stderr, remote_stderr) = tokio::io::duplex(64 * 1024);
        session = session.with_stderr(local_stderr);
        remote.stderr = Some(remote_stderr);
    }

    (session, remote)
}

/// An API error response as the server would return it
pub fn api_error(code: u16, reason: &str) -> kube::Error {
    kube::Error::Api(kube::core::ErrorResponse {
        status: "Failure".to_string(),
        message: reason.to_string(),
        reason: reason.to_string(),
        code,
    })
}

/// A definition with one served version per entry of `versions`
pub fn crd_definition(
    group: &str,
    plural: &str,
    kind: &str,
    versions: &[&str],
) -> CustomResourceDefinition {
    CustomResourceDefinition {
        spec: CustomResourceDefinitionSpec {
            group: group.to_string(),
            names: CustomResourceDefinitionNames {
                kind: kind.to_string(),
                plural: plural.to_string(),
                ..Default::default()
            },
            scope: "Namespaced".to_string(),
            versions: versions
                .iter()
                .map(|version| CustomResourceDefinitionVersion {
                    name: version.to_string(),
                    served: true,
                    storage: true,
                    schema: Some(CustomResourceValidation {
                        open_api_v3_schema: Some(JSONSchemaProps {
                            description: Some(format!("{kind} {version}")),
                            ..Default::default()
                        }),
                    }),
                    additional_printer_columns: Some(vec![CustomResourceColumnDefinition {
                        json_path: ".status.phase".to_string(),
                        name: "Phase".to_string(),
                        type_: "string".to_string(),
                        ..Default::default()
                    }]),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        },
        ..Default::default()
    }
}
