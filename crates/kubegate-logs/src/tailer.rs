use std::fmt::Display;

use futures::{AsyncReadExt, Sink, SinkExt};
use tokio_util::sync::CancellationToken;

use kubegate_k8s::{Cluster, Error, LogParams, PodTarget, Result};

use crate::filter::LineFilter;
use crate::lines::LineAssembler;

/// Line terminator of the text returned by [`LogTailer::get_logs`], suitable
/// for writing straight into a terminal emulator
pub const LINE_TERMINATOR: &str = "\n\r";

/// Read size for streamed logs. Smaller than a typical line, so lines are
/// routinely reassembled from several reads.
pub const STREAM_CHUNK_SIZE: usize = 16;

/// Which part of a container's log to read
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LogQuery {
    /// Only logs newer than this many seconds; `0` for no limit
    pub since_seconds: i64,
    /// Only the last lines; `0` for all
    pub tail_lines: i64,
    /// Read the log of the previous container instance
    pub previous: bool,
    /// Keep the stream open for new lines
    pub follow: bool,
}

impl LogQuery {
    pub fn since(mut self, seconds: i64) -> Self {
        self.since_seconds = seconds;
        self
    }

    pub fn tail(mut self, lines: i64) -> Self {
        self.tail_lines = lines;
        self
    }

    pub fn previous(mut self, previous: bool) -> Self {
        self.previous = previous;
        self
    }

    pub fn follow(mut self, follow: bool) -> Self {
        self.follow = follow;
        self
    }

    fn params(&self, target: &PodTarget) -> LogParams {
        LogParams {
            container: target.container.clone(),
            follow: self.follow,
            previous: self.previous,
            since_seconds: (self.since_seconds > 0).then_some(self.since_seconds),
            tail_lines: (self.tail_lines > 0).then_some(self.tail_lines),
            ..Default::default()
        }
    }
}

/// One-shot and continuous log retrieval for the containers of a cluster
pub struct LogTailer<'a> {
    cluster: &'a Cluster,
}

impl<'a> LogTailer<'a> {
    pub fn new(cluster: &'a Cluster) -> Self {
        Self { cluster }
    }

    /// Fetch one log payload, keep the lines matching `filter` and join them
    /// with [`LINE_TERMINATOR`].
    ///
    /// A malformed filter fails before any request is made.
    pub async fn get_logs(
        &self,
        target: &PodTarget,
        filter: Option<&str>,
        query: &LogQuery,
    ) -> Result<String> {
        let filter = LineFilter::new(filter.unwrap_or_default())?;
        let params = LogQuery {
            follow: false,
            ..query.clone()
        }
        .params(target);

        let logs = self
            .cluster
            .api()
            .pod_logs(&target.namespace, &target.pod, &params)
            .await
            .map_err(|source| {
                self.cluster
                    .upstream_error(Some(&target.namespace), "pods/log", source)
            })?;

        let mut output = String::with_capacity(logs.len() + logs.len() / 8);
        if !logs.is_empty() {
            for line in logs.strip_suffix('\n').unwrap_or(&logs).split('\n') {
                if filter.matches(line) {
                    output.push_str(line);
                    output.push_str(LINE_TERMINATOR);
                }
            }
        }

        tracing::debug!(
            cluster = %self.cluster.name(),
            namespace = %target.namespace,
            pod = %target.pod,
            filter = %filter.pattern(),
            bytes = output.len(),
            "logs retrieved"
        );
        Ok(output)
    }

    /// Stream a container's log into `sink`, one message per line, until the
    /// log ends, a read or write fails, or `cancel` fires.
    ///
    /// The upstream stream is dropped before this returns on every path.
    /// Lines already delivered stay delivered when the stream fails later.
    pub async fn stream_logs<S>(
        &self,
        mut sink: S,
        target: &PodTarget,
        query: &LogQuery,
        cancel: &CancellationToken,
    ) -> Result<()>
    where
        S: Sink<String> + Unpin,
        S::Error: Display,
    {
        let params = query.params(target);
        let open = self
            .cluster
            .api()
            .pod_log_stream(&target.namespace, &target.pod, &params);
        let mut stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            stream = open => stream.map_err(|source| {
                self.cluster
                    .upstream_error(Some(&target.namespace), "pods/log", source)
            })?,
        };

        tracing::debug!(
            cluster = %self.cluster.name(),
            namespace = %target.namespace,
            pod = %target.pod,
            follow = query.follow,
            "log stream opened"
        );

        let mut assembler = LineAssembler::new();
        let mut chunk = [0u8; STREAM_CHUNK_SIZE];
        let mut delivered = 0usize;

        let result = loop {
            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => break Ok(()),
                read = stream.read(&mut chunk) => read,
            };

            let lines = match read {
                Ok(0) => {
                    let rest = assembler.finish();
                    match deliver(&mut sink, rest, cancel).await {
                        Ok(count) => delivered += count,
                        Err(err) => break Err(err),
                    }
                    break Ok(());
                }
                Ok(n) => assembler.push(&chunk[..n]),
                Err(source) => {
                    break Err(Error::Stream {
                        cluster: self.cluster.name().to_string(),
                        source,
                    });
                }
            };

            match deliver(&mut sink, lines, cancel).await {
                Ok(count) => delivered += count,
                Err(err) => break Err(err),
            }
        };

        drop(stream);
        tracing::debug!(
            cluster = %self.cluster.name(),
            namespace = %target.namespace,
            pod = %target.pod,
            lines = delivered,
            cancelled = cancel.is_cancelled(),
            ok = result.is_ok(),
            "log stream closed"
        );
        result
    }
}

/// Push lines into the sink in order; stops early when cancelled
async fn deliver<S, I>(sink: &mut S, lines: I, cancel: &CancellationToken) -> Result<usize>
where
    S: Sink<String> + Unpin,
    S::Error: Display,
    I: IntoIterator<Item = String>,
{
    let mut count = 0;
    for line in lines {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            sent = sink.send(line) => {
                sent.map_err(|err| Error::Sink(err.to_string()))?;
                count += 1;
            }
        }
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::sync::Arc;
    use std::sync::atomic::Ordering;
    use std::task::{Context, Poll};
    use std::time::Duration;

    use futures::StreamExt;
    use futures::channel::mpsc;
    use kubegate_k8s::RetryPolicy;
    use kubegate_k8s::testing::FakeApi;

    fn cluster(api: &Arc<FakeApi>) -> Cluster {
        Cluster::new("dev", api.clone(), RetryPolicy::default())
    }

    fn target() -> PodTarget {
        PodTarget::new("default", "web-0").container("app")
    }

    /// A log stream that never produces data
    struct Stalled;

    impl futures::AsyncRead for Stalled {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut [u8],
        ) -> Poll<std::io::Result<usize>> {
            Poll::Pending
        }
    }

    /// A log stream that yields some bytes and then fails
    struct Broken {
        data: Option<&'static [u8]>,
    }

    impl futures::AsyncRead for Broken {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut [u8],
        ) -> Poll<std::io::Result<usize>> {
            match self.data.take() {
                Some(data) => {
                    let n = data.len().min(buf.len());
                    buf[..n].copy_from_slice(&data[..n]);
                    Poll::Ready(Ok(n))
                }
                None => Poll::Ready(Err(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "connection reset",
                ))),
            }
        }
    }

    #[test]
    fn test_query_params() {
        let params = LogQuery::default().params(&target());
        assert_eq!(params.container.as_deref(), Some("app"));
        assert_eq!(params.since_seconds, None);
        assert_eq!(params.tail_lines, None);

        let params = LogQuery::default()
            .since(3600)
            .tail(100)
            .previous(true)
            .follow(true)
            .params(&target());
        assert_eq!(params.since_seconds, Some(3600));
        assert_eq!(params.tail_lines, Some(100));
        assert!(params.previous);
        assert!(params.follow);
    }

    #[tokio::test]
    async fn test_get_logs_joins_lines() {
        let api = Arc::new(FakeApi::new());
        api.set_logs("first\nsecond\nthird\n");
        let cluster = cluster(&api);

        let logs = LogTailer::new(&cluster)
            .get_logs(&target(), None, &LogQuery::default().follow(true))
            .await
            .unwrap();
        assert_eq!(logs, "first\n\rsecond\n\rthird\n\r");
        assert!(!api.log_params()[0].follow);
    }

    #[tokio::test]
    async fn test_get_logs_empty_payload() {
        let api = Arc::new(FakeApi::new());
        let cluster = cluster(&api);

        let logs = LogTailer::new(&cluster)
            .get_logs(&target(), None, &LogQuery::default())
            .await
            .unwrap();
        assert_eq!(logs, "");
    }

    #[tokio::test]
    async fn test_get_logs_filters_lines() {
        let api = Arc::new(FakeApi::new());
        api.set_logs("level=info msg=start\nlevel=error msg=boom\nlevel=info msg=done");
        let cluster = cluster(&api);

        let logs = LogTailer::new(&cluster)
            .get_logs(&target(), Some("level=(error|warn)"), &LogQuery::default())
            .await
            .unwrap();
        assert_eq!(logs, "level=error msg=boom\n\r");
    }

    #[tokio::test]
    async fn test_get_logs_rejects_malformed_filter() {
        let api = Arc::new(FakeApi::new());
        let cluster = cluster(&api);

        let err = LogTailer::new(&cluster)
            .get_logs(&target(), Some("level=(error"), &LogQuery::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidFilter(_)));
        assert!(api.log_params().is_empty());
    }

    #[tokio::test]
    async fn test_stream_reassembles_lines() {
        let api = Arc::new(FakeApi::new());
        let log = "2024-01-15T10:30:00Z starting a fairly long line\r\nprogress 10%\rprogress 100%\ndone";
        let closed = api.set_log_stream(futures::io::Cursor::new(log.as_bytes().to_vec()));
        let cluster = cluster(&api);

        let (tx, rx) = mpsc::unbounded();
        LogTailer::new(&cluster)
            .stream_logs(
                tx,
                &target(),
                &LogQuery::default().follow(true),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let lines: Vec<String> = rx.collect().await;
        assert_eq!(
            lines,
            vec![
                "2024-01-15T10:30:00Z starting a fairly long line",
                "progress 10%",
                "progress 100%",
                "done",
            ]
        );
        assert!(closed.load(Ordering::SeqCst));
        assert!(api.log_params()[0].follow);
    }

    #[tokio::test]
    async fn test_cancel_releases_stream() {
        let api = Arc::new(FakeApi::new());
        let closed = api.set_log_stream(Stalled);
        let cluster = cluster(&api);
        let cancel = CancellationToken::new();

        let (tx, _rx) = mpsc::unbounded::<String>();
        let task = {
            let cluster = cluster.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                LogTailer::new(&cluster)
                    .stream_logs(tx, &target(), &LogQuery::default().follow(true), &cancel)
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!closed.load(Ordering::SeqCst));

        cancel.cancel();
        let result = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("stream did not stop after cancel")
            .unwrap();
        assert!(result.is_ok());
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_read_error_ends_stream_after_partial_output() {
        let api = Arc::new(FakeApi::new());
        let closed = api.set_log_stream(Broken {
            data: Some(b"one\ntwo\nthr"),
        });
        let cluster = cluster(&api);

        let (tx, rx) = mpsc::unbounded();
        let err = LogTailer::new(&cluster)
            .stream_logs(tx, &target(), &LogQuery::default(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Stream { .. }));
        assert_eq!(rx.collect::<Vec<_>>().await, vec!["one", "two"]);
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_closed_connection_ends_stream() {
        let api = Arc::new(FakeApi::new());
        let closed = api.set_log_stream(futures::io::Cursor::new(b"a\nb\nc\n".to_vec()));
        let cluster = cluster(&api);

        let (tx, rx) = mpsc::unbounded::<String>();
        drop(rx);
        let err = LogTailer::new(&cluster)
            .stream_logs(tx, &target(), &LogQuery::default(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Sink(_)));
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_unavailable_pod_is_an_upstream_error() {
        let api = Arc::new(FakeApi::new());
        let cluster = cluster(&api);

        let (tx, _rx) = mpsc::unbounded::<String>();
        let err = LogTailer::new(&cluster)
            .stream_logs(tx, &target(), &LogQuery::default(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Api { resource, .. } if resource == "pods/log"));
    }
}
