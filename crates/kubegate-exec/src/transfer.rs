use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use kubegate_k8s::{Cluster, Error, ExecReader, ExecRequest, ExecSession, PodTarget, Result};

/// Copies files between a client and a container over exec streams.
///
/// Downloads run `tar cf - <path>` and relay the archive; uploads run
/// `cp /dev/stdin <destination>` and feed it the client's bytes.
pub struct FileTransfer<'a> {
    cluster: &'a Cluster,
}

impl<'a> FileTransfer<'a> {
    pub fn new(cluster: &'a Cluster) -> Self {
        Self { cluster }
    }

    /// Stream a tar archive of `path` into `sink`.
    ///
    /// Bytes are forwarded as they arrive. Returns the archive size once the
    /// remote command has exited successfully.
    pub async fn download<W>(
        &self,
        target: &PodTarget,
        path: &str,
        sink: &mut W,
        cancel: &CancellationToken,
    ) -> Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        let command = ["tar", "cf", "-", path].map(String::from).to_vec();
        let request = ExecRequest {
            stdin: false,
            ..ExecRequest::piped(target.clone(), command)
        };
        tracing::info!(cluster = %self.cluster.name(), namespace = %target.namespace, pod = %target.pod, path = %path, "download started");

        let mut session = self.attach(request, cancel).await?;
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            result = relay_download(self.cluster.name(), &mut session, sink) => result,
        };
        drop(session);

        self.log_result("download", target, &result);
        result
    }

    /// Write everything from `source` to `destination` in the container.
    ///
    /// The end of `source` marks the end of the file. Returns the number of
    /// bytes sent once the remote command has exited successfully.
    pub async fn upload<R>(
        &self,
        target: &PodTarget,
        destination: &str,
        source: &mut R,
        cancel: &CancellationToken,
    ) -> Result<u64>
    where
        R: AsyncRead + Unpin,
    {
        let command = ["cp", "/dev/stdin", destination].map(String::from).to_vec();
        let request = ExecRequest {
            stdout: false,
            ..ExecRequest::piped(target.clone(), command)
        };
        tracing::info!(cluster = %self.cluster.name(), namespace = %target.namespace, pod = %target.pod, destination = %destination, "upload started");

        let mut session = self.attach(request, cancel).await?;
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            result = relay_upload(self.cluster.name(), &mut session, source) => result,
        };
        drop(session);

        self.log_result("upload", target, &result);
        result
    }

    async fn attach(
        &self,
        request: ExecRequest,
        cancel: &CancellationToken,
    ) -> Result<ExecSession> {
        let namespace = request.target.namespace.clone();
        let attach = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            attach = self.cluster.api().exec(request) => attach,
        };
        attach.map_err(|source| {
            self.cluster
                .upstream_error(Some(&namespace), "pods/exec", source)
        })
    }

    fn log_result(&self, kind: &str, target: &PodTarget, result: &Result<u64>) {
        match result {
            Ok(bytes) => {
                tracing::info!(cluster = %self.cluster.name(), pod = %target.pod, bytes, "{kind} finished");
            }
            Err(err) => {
                tracing::warn!(cluster = %self.cluster.name(), pod = %target.pod, error = %err, "{kind} failed");
            }
        }
    }
}

async fn relay_download<W>(cluster: &str, session: &mut ExecSession, sink: &mut W) -> Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let mut stdout = session
        .take_stdout()
        .ok_or_else(|| Error::Exec("exec session has no stdout".to_string()))?;
    let stderr = session.take_stderr();

    let copy = async {
        let copied = tokio::io::copy(&mut stdout, sink).await?;
        sink.flush().await?;
        Ok::<_, io::Error>(copied)
    };
    let (copied, errors) = tokio::try_join!(copy, collect(stderr))
        .map_err(|source| stream_error(cluster, source))?;

    check_status(session, &errors).await?;
    Ok(copied)
}

async fn relay_upload<R>(cluster: &str, session: &mut ExecSession, source: &mut R) -> Result<u64>
where
    R: AsyncRead + Unpin,
{
    let mut stdin = session
        .take_stdin()
        .ok_or_else(|| Error::Exec("exec session has no stdin".to_string()))?;
    let stderr = session.take_stderr();

    let copy = async {
        let copied = tokio::io::copy(source, &mut stdin).await?;
        stdin.shutdown().await?;
        Ok::<_, io::Error>(copied)
    };
    let (copied, errors) = tokio::try_join!(copy, collect(stderr))
        .map_err(|source| stream_error(cluster, source))?;

    check_status(session, &errors).await?;
    Ok(copied)
}

/// Most stderr output kept for error messages; the rest is drained
const STDERR_LIMIT: u64 = 64 * 1024;

async fn collect(stderr: Option<ExecReader>) -> io::Result<Vec<u8>> {
    let mut output = Vec::new();
    if let Some(mut stderr) = stderr {
        (&mut stderr).take(STDERR_LIMIT).read_to_end(&mut output).await?;
        tokio::io::copy(&mut stderr, &mut tokio::io::sink()).await?;
    }
    Ok(output)
}

/// Fail if the remote command reported a failure status.
///
/// Without a status (the connection closes once stdin ends) any stderr output
/// counts as a failure.
async fn check_status(session: &mut ExecSession, stderr: &[u8]) -> Result<()> {
    let stderr = String::from_utf8_lossy(stderr).trim().to_string();
    let status = match session.take_status() {
        Some(status) => status.await,
        None => None,
    };

    let Some(status) = status else {
        if stderr.is_empty() {
            return Ok(());
        }
        return Err(Error::Exec(stderr));
    };
    if status.status.as_deref() != Some("Failure") {
        return Ok(());
    }

    let message = match (status.message.filter(|m| !m.is_empty()), stderr.is_empty()) {
        (Some(message), true) => message,
        (Some(message), false) => format!("{message}: {stderr}"),
        (None, false) => stderr,
        (None, true) => "command failed".to_string(),
    };
    Err(Error::Exec(message))
}

fn stream_error(cluster: &str, source: io::Error) -> Error {
    Error::Stream {
        cluster: cluster.to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use kubegate_k8s::RetryPolicy;
    use kubegate_k8s::testing::{FakeApi, exec_pipes};

    fn target() -> PodTarget {
        PodTarget::new("default", "web-0")
    }

    fn setup() -> (Arc<FakeApi>, Cluster) {
        let api = Arc::new(FakeApi::new());
        let cluster = Cluster::new("dev", api.clone(), RetryPolicy::default());
        (api, cluster)
    }

    #[tokio::test]
    async fn test_download_relays_archive() {
        let (api, cluster) = setup();
        let (session, mut remote) = exec_pipes(false);
        api.push_exec(session);

        let target = target();
        let cancel = CancellationToken::new();
        let archive = vec![7u8; 200 * 1024];
        let mut sink = Vec::new();

        let transfer = FileTransfer::new(&cluster);
        let download = transfer.download(&target, "/var/log/app.log", &mut sink, &cancel);
        let script = async {
            let mut stdout = remote.stdout.take().unwrap();
            stdout.write_all(&archive).await.unwrap();
            drop(stdout);
            drop(remote.stderr.take());
            remote.finish(true, "");
        };

        let (result, ()) = tokio::join!(download, script);
        assert_eq!(result.unwrap(), archive.len() as u64);
        assert_eq!(sink, archive);
        assert!(remote.is_closed());

        let request = &api.exec_requests()[0];
        assert_eq!(request.command, vec!["tar", "cf", "-", "/var/log/app.log"]);
        assert!(!request.tty);
        assert!(!request.stdin);
        assert!(request.stdout && request.stderr);
    }

    #[tokio::test]
    async fn test_download_failure_reports_stderr() {
        let (api, cluster) = setup();
        let (session, mut remote) = exec_pipes(false);
        api.push_exec(session);

        let target = target();
        let cancel = CancellationToken::new();
        let mut sink = Vec::new();

        let transfer = FileTransfer::new(&cluster);
        let download = transfer.download(&target, "/missing", &mut sink, &cancel);
        let script = async {
            let mut stderr = remote.stderr.take().unwrap();
            stderr.write_all(b"tar: /missing: Cannot stat\n").await.unwrap();
            drop(stderr);
            drop(remote.stdout.take());
            remote.finish(false, "command terminated with non-zero exit code");
        };

        let (result, ()) = tokio::join!(download, script);
        match result.unwrap_err() {
            Error::Exec(message) => {
                assert_eq!(
                    message,
                    "command terminated with non-zero exit code: tar: /missing: Cannot stat"
                );
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_download_stderr_is_capped() {
        let (api, cluster) = setup();
        let (session, mut remote) = exec_pipes(false);
        api.push_exec(session);

        let target = target();
        let cancel = CancellationToken::new();
        let mut sink = Vec::new();

        let transfer = FileTransfer::new(&cluster);
        let download = transfer.download(&target, "/data", &mut sink, &cancel);
        let script = async {
            let mut stderr = remote.stderr.take().unwrap();
            let warning = b"tar: file changed as we read it\n";
            for _ in 0..10_000 {
                stderr.write_all(warning).await.unwrap();
            }
            drop(stderr);
            drop(remote.stdout.take());
            remote.finish(false, "");
        };

        let (result, ()) = tokio::join!(download, script);
        match result.unwrap_err() {
            Error::Exec(message) => {
                assert!(message.len() <= STDERR_LIMIT as usize);
                assert!(message.starts_with("tar: file changed"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_download_cancel_closes_session() {
        let (api, cluster) = setup();
        let (session, remote) = exec_pipes(false);
        api.push_exec(session);

        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let target = target();
        let mut sink = Vec::new();
        let transfer = FileTransfer::new(&cluster);
        let result = tokio::time::timeout(
            Duration::from_secs(1),
            transfer.download(&target, "/data", &mut sink, &cancel),
        )
        .await
        .expect("download should end after cancel");

        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(remote.is_closed());
    }

    #[tokio::test]
    async fn test_upload_sends_source() {
        let (api, cluster) = setup();
        let (session, mut remote) = exec_pipes(false);
        api.push_exec(session);

        let target = target();
        let cancel = CancellationToken::new();
        let payload = b"#!/bin/sh\necho hello\n".to_vec();
        let mut source = std::io::Cursor::new(payload.clone());

        let transfer = FileTransfer::new(&cluster);
        let upload = transfer.upload(&target, "/tmp/hello.sh", &mut source, &cancel);
        let script = async {
            let mut received = Vec::new();
            remote.stdin.read_to_end(&mut received).await.unwrap();
            drop(remote.stderr.take());
            remote.finish(true, "");
            received
        };

        let (result, received) = tokio::join!(upload, script);
        assert_eq!(result.unwrap(), payload.len() as u64);
        assert_eq!(received, payload);
        assert!(remote.is_closed());

        let request = &api.exec_requests()[0];
        assert_eq!(request.command, vec!["cp", "/dev/stdin", "/tmp/hello.sh"]);
        assert!(request.stdin);
        assert!(!request.stdout);
    }

    #[tokio::test]
    async fn test_upload_without_status_fails_on_stderr() {
        let (api, cluster) = setup();
        let (session, mut remote) = exec_pipes(false);
        api.push_exec(session);

        let target = target();
        let cancel = CancellationToken::new();
        let mut source = std::io::Cursor::new(b"data".to_vec());

        let transfer = FileTransfer::new(&cluster);
        let upload = transfer.upload(&target, "/root/x", &mut source, &cancel);
        let script = async {
            let mut received = Vec::new();
            remote.stdin.read_to_end(&mut received).await.unwrap();
            let mut stderr = remote.stderr.take().unwrap();
            stderr
                .write_all(b"cp: can't create '/root/x': Permission denied\n")
                .await
                .unwrap();
            drop(stderr);
            // connection closes without a status frame
            drop(remote.status.take());
        };

        let (result, ()) = tokio::join!(upload, script);
        match result.unwrap_err() {
            Error::Exec(message) => {
                assert_eq!(message, "cp: can't create '/root/x': Permission denied");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_upload_without_status_succeeds_when_quiet() {
        let (api, cluster) = setup();
        let (session, mut remote) = exec_pipes(false);
        api.push_exec(session);

        let target = target();
        let cancel = CancellationToken::new();
        let mut source = std::io::Cursor::new(b"data".to_vec());

        let transfer = FileTransfer::new(&cluster);
        let upload = transfer.upload(&target, "/tmp/x", &mut source, &cancel);
        let script = async {
            let mut received = Vec::new();
            remote.stdin.read_to_end(&mut received).await.unwrap();
            drop(remote.stderr.take());
            drop(remote.status.take());
        };

        let (result, ()) = tokio::join!(upload, script);
        assert_eq!(result.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_upload_empty_source() {
        let (api, cluster) = setup();
        let (session, mut remote) = exec_pipes(false);
        api.push_exec(session);

        let target = target();
        let cancel = CancellationToken::new();
        let mut source = tokio::io::empty();

        let transfer = FileTransfer::new(&cluster);
        let upload = transfer.upload(&target, "/tmp/empty", &mut source, &cancel);
        let script = async {
            let mut received = Vec::new();
            remote.stdin.read_to_end(&mut received).await.unwrap();
            drop(remote.stderr.take());
            remote.finish(true, "");
            received
        };

        let (result, received) = tokio::join!(upload, script);
        assert_eq!(result.unwrap(), 0);
        assert!(received.is_empty());
    }

    #[tokio::test]
    async fn test_attach_failure_is_tagged() {
        let (_api, cluster) = setup();

        let mut sink = Vec::new();
        let err = FileTransfer::new(&cluster)
            .download(&target(), "/data", &mut sink, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::Api { ref cluster, ref resource, .. } if cluster == "dev" && resource == "pods/exec"
        ));
    }
}
