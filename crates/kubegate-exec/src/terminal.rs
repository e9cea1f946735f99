use futures::SinkExt;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use kubegate_k8s::{Cluster, Error, ExecRequest, ExecSession, PodTarget, Result, TerminalSize};

use crate::shell::is_valid_shell;

/// Why a terminal session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// One side closed or the session was cancelled
    Normal,
    /// Validation, attach or a stream failed
    Error,
}

/// Lifecycle of a terminal session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalState {
    Requested,
    Validated,
    Attached,
    Closed(CloseReason),
}

/// The client side of a terminal session
pub struct TerminalConnection<R, W> {
    /// Keystrokes from the client
    pub input: R,
    /// Terminal output for the client
    pub output: W,
    /// Terminal size changes from the client
    pub resize: mpsc::Receiver<TerminalSize>,
}

/// Bridges a client connection to an interactive shell in a container
pub struct TerminalBridge<'a> {
    cluster: &'a Cluster,
    target: PodTarget,
    shell: String,
    state: TerminalState,
}

impl<'a> TerminalBridge<'a> {
    pub fn new(cluster: &'a Cluster, target: PodTarget, shell: impl Into<String>) -> Self {
        Self {
            cluster,
            target,
            shell: shell.into(),
            state: TerminalState::Requested,
        }
    }

    pub fn state(&self) -> TerminalState {
        self.state
    }

    /// Run the session until either side closes, a stream fails or `cancel`
    /// fires.
    ///
    /// The shell is checked before anything is sent to the cluster. Both the
    /// client connection and the exec session are released when this returns.
    pub async fn run<R, W>(
        &mut self,
        connection: TerminalConnection<R, W>,
        cancel: &CancellationToken,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let cluster = self.cluster;
        if !is_valid_shell(&self.shell) {
            tracing::warn!(cluster = %cluster.name(), shell = %self.shell, "shell is not allowed");
            self.close(CloseReason::Error);
            return Err(Error::InvalidShell(self.shell.clone()));
        }
        self.transition(TerminalState::Validated);

        let request = ExecRequest::interactive(self.target.clone(), vec![self.shell.clone()]);
        let attach = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.close(CloseReason::Normal);
                return Ok(());
            }
            attach = cluster.api().exec(request) => attach,
        };

        let mut session = match attach {
            Ok(session) => session,
            Err(source) => {
                self.close(CloseReason::Error);
                return Err(cluster.upstream_error(
                    Some(&self.target.namespace),
                    "pods/exec",
                    source,
                ));
            }
        };
        self.transition(TerminalState::Attached);

        let result = bridge(cluster.name(), &mut session, connection, cancel).await;
        drop(session);

        match &result {
            Ok(()) => self.close(CloseReason::Normal),
            Err(err) => {
                tracing::warn!(cluster = %cluster.name(), pod = %self.target.pod, error = %err, "terminal session failed");
                self.close(CloseReason::Error);
            }
        }
        result
    }

    fn transition(&mut self, state: TerminalState) {
        tracing::debug!(
            cluster = %self.cluster.name(),
            namespace = %self.target.namespace,
            pod = %self.target.pod,
            from = ?self.state,
            to = ?state,
            "terminal state changed"
        );
        self.state = state;
    }

    fn close(&mut self, reason: CloseReason) {
        self.transition(TerminalState::Closed(reason));
    }
}

async fn bridge<R, W>(
    cluster: &str,
    session: &mut ExecSession,
    connection: TerminalConnection<R, W>,
    cancel: &CancellationToken,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let TerminalConnection {
        mut input,
        mut output,
        mut resize,
    } = connection;

    let mut stdin = session
        .take_stdin()
        .ok_or_else(|| Error::Exec("exec session has no stdin".to_string()))?;
    let mut stdout = session
        .take_stdout()
        .ok_or_else(|| Error::Exec("exec session has no stdout".to_string()))?;
    let mut resize_tx = session.take_resize();

    let upstream = async {
        tokio::io::copy(&mut stdout, &mut output).await?;
        output.flush().await
    };

    let downstream = async {
        tokio::io::copy(&mut input, &mut stdin).await?;
        stdin.shutdown().await
    };

    // Never completes: a closed resize channel doesn't end the session
    let resizes = async {
        while let Some(size) = resize.recv().await {
            let Some(tx) = resize_tx.as_mut() else {
                continue;
            };
            if tx.send(size.into()).await.is_err() {
                resize_tx = None;
            }
        }
        futures::future::pending::<()>().await
    };

    let stream_error = |source| Error::Stream {
        cluster: cluster.to_string(),
        source,
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            tracing::debug!(cluster = %cluster, "terminal session cancelled");
            Ok(())
        }
        result = upstream => {
            tracing::debug!(cluster = %cluster, "remote side closed the terminal");
            result.map_err(stream_error)
        }
        result = downstream => {
            tracing::debug!(cluster = %cluster, "client closed the terminal");
            result.map_err(stream_error)
        }
        _ = resizes => Ok(()),
    }
}
