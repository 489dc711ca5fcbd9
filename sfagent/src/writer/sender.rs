/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::anyhow;
use bytes::Bytes;
use http::{Request, StatusCode};
use http_body_util::{BodyExt, Full};
use log::debug;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::httpclient::HttpsClient;

/// Outcome of one delivery attempt, as classified by the worker.
#[derive(Debug)]
pub(crate) enum SendOutcome {
    Ok,
    Status(StatusCode, Bytes),
    Transport(String),
    Cancelled,
}

impl SendOutcome {
    pub(crate) fn succeeded(&self) -> bool {
        matches!(self, SendOutcome::Ok)
    }

    /// 404 and 5xx responses and transport failures may succeed on resend.
    /// Other client errors and local cancellation are terminal.
    pub(crate) fn retriable(&self) -> bool {
        match self {
            SendOutcome::Ok => false,
            SendOutcome::Status(status, _) => {
                *status == StatusCode::NOT_FOUND || status.is_server_error()
            }
            SendOutcome::Transport(_) => true,
            SendOutcome::Cancelled => false,
        }
    }
}

pub(crate) struct QueuedRequest {
    pub(crate) inner: Request<Full<Bytes>>,
    pub(crate) done: oneshot::Sender<SendOutcome>,
}

#[derive(Default)]
pub(crate) struct SenderStats {
    running_workers: AtomicUsize,
    requests_started: AtomicU64,
    requests_completed: AtomicU64,
    requests_failed: AtomicU64,
}

impl SenderStats {
    pub(crate) fn running_workers(&self) -> usize {
        self.running_workers.load(Ordering::Relaxed)
    }

    pub(crate) fn requests_started(&self) -> u64 {
        self.requests_started.load(Ordering::Relaxed)
    }

    pub(crate) fn requests_completed(&self) -> u64 {
        self.requests_completed.load(Ordering::Relaxed)
    }

    pub(crate) fn requests_failed(&self) -> u64 {
        self.requests_failed.load(Ordering::Relaxed)
    }
}

/// Worker pool that serializes outbound requests through a rendezvous
/// channel. Workers are spawned lazily on submit contention, up to
/// `max_workers`, and only retire when the owning token is cancelled.
#[derive(Clone)]
pub(crate) struct HttpSenderPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    client: HttpsClient,
    sender: kanal::AsyncSender<QueuedRequest>,
    receiver: kanal::AsyncReceiver<QueuedRequest>,
    max_workers: usize,
    request_timeout: Duration,
    stats: Arc<SenderStats>,
    cancel: CancellationToken,
}

impl HttpSenderPool {
    pub(crate) fn new(
        client: HttpsClient,
        max_workers: usize,
        request_timeout: Duration,
        cancel: CancellationToken,
    ) -> Self {
        let (sender, receiver) = kanal::bounded_async(0);
        HttpSenderPool {
            inner: Arc::new(PoolInner {
                client,
                sender,
                receiver,
                max_workers: max_workers.max(1),
                request_timeout,
                stats: Arc::new(SenderStats::default()),
                cancel,
            }),
        }
    }

    pub(crate) fn stats(&self) -> Arc<SenderStats> {
        self.inner.stats.clone()
    }

    /// Hand a prepared request to the pool. Blocks only when all workers are
    /// busy and the worker cap is already reached.
    pub(crate) async fn submit(&self, request: QueuedRequest) -> anyhow::Result<()> {
        if self.inner.cancel.is_cancelled() {
            return Err(anyhow!("sender pool is shut down"));
        }

        let mut msg = Some(request);
        match self.inner.sender.try_send_option(&mut msg) {
            Ok(true) => return Ok(()),
            Ok(false) => {}
            Err(e) => return Err(anyhow!("request channel closed: {e}")),
        }

        // no worker was idle, grow the pool before waiting
        self.spawn_worker();

        let Some(request) = msg.take() else {
            return Ok(());
        };
        tokio::select! {
            biased;
            _ = self.inner.cancel.cancelled() => Err(anyhow!("sender pool is shut down")),
            r = self.inner.sender.send(request) => {
                r.map_err(|e| anyhow!("request channel closed: {e}"))
            }
        }
    }

    fn spawn_worker(&self) {
        // reserve the slot first so concurrent submits never overshoot the cap
        let mut running = self.inner.stats.running_workers();
        loop {
            if running >= self.inner.max_workers {
                return;
            }
            match self.inner.stats.running_workers.compare_exchange(
                running,
                running + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => running = actual,
            }
        }

        let inner = self.inner.clone();
        debug!("starting sender worker #{running}");
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = inner.cancel.cancelled() => break,
                    r = inner.receiver.recv() => {
                        match r {
                            Ok(req) => inner.handle(req).await,
                            Err(_) => break,
                        }
                    }
                }
            }
            inner.stats.running_workers.fetch_sub(1, Ordering::Relaxed);
        });
    }
}

impl PoolInner {
    async fn handle(&self, request: QueuedRequest) {
        self.stats.requests_started.fetch_add(1, Ordering::Relaxed);
        let outcome = self.do_call(request.inner).await;
        if outcome.succeeded() {
            self.stats.requests_completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.requests_failed.fetch_add(1, Ordering::Relaxed);
        }
        let _ = request.done.send(outcome);
    }

    async fn do_call(&self, request: Request<Full<Bytes>>) -> SendOutcome {
        let call = tokio::time::timeout(self.request_timeout, self.client.request(request));
        let rsp = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return SendOutcome::Cancelled,
            r = call => r,
        };

        match rsp {
            Err(_) => SendOutcome::Transport("request timed out".to_string()),
            Ok(Err(e)) => SendOutcome::Transport(e.to_string()),
            Ok(Ok(rsp)) => {
                let status = rsp.status();
                let body = match rsp.into_body().collect().await {
                    Ok(collected) => collected.to_bytes(),
                    Err(e) => return SendOutcome::Transport(e.to_string()),
                };
                if status == StatusCode::OK {
                    SendOutcome::Ok
                } else {
                    SendOutcome::Status(status, body)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::Semaphore;

    async fn read_request(stream: &mut tokio::net::TcpStream) {
        let mut buf = [0u8; 4096];
        let mut data = Vec::new();
        loop {
            let n = stream.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            data.extend_from_slice(&buf[..n]);
            if data.windows(4).any(|w| w == b"\r\n\r\n") {
                break;
            }
        }
    }

    async fn write_status(stream: &mut tokio::net::TcpStream, status: u16) {
        let rsp = format!(
            "HTTP/1.1 {status} X\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
        );
        stream.write_all(rsp.as_bytes()).await.unwrap();
    }

    fn request_to(addr: SocketAddr) -> (QueuedRequest, oneshot::Receiver<SendOutcome>) {
        let req = Request::builder()
            .method(Method::POST)
            .uri(format!("http://{addr}/v2/datapoint"))
            .body(Full::from(Bytes::from_static(b"{}")))
            .unwrap();
        let (tx, rx) = oneshot::channel();
        (QueuedRequest { inner: req, done: tx }, rx)
    }

    fn test_pool(max_workers: usize) -> (HttpSenderPool, CancellationToken) {
        let cancel = CancellationToken::new();
        let client = crate::httpclient::build_https_client().unwrap();
        let pool = HttpSenderPool::new(
            client,
            max_workers,
            Duration::from_secs(5),
            cancel.clone(),
        );
        (pool, cancel)
    }

    #[tokio::test]
    async fn classify_success_and_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            for status in [200u16, 500] {
                let (mut stream, _) = listener.accept().await.unwrap();
                read_request(&mut stream).await;
                write_status(&mut stream, status).await;
            }
        });

        let (pool, cancel) = test_pool(1);

        let (req, rx) = request_to(addr);
        pool.submit(req).await.unwrap();
        assert!(rx.await.unwrap().succeeded());

        let (req, rx) = request_to(addr);
        pool.submit(req).await.unwrap();
        let outcome = rx.await.unwrap();
        assert!(!outcome.succeeded());
        assert!(outcome.retriable());

        let stats = pool.stats();
        assert_eq!(stats.requests_started(), 2);
        assert_eq!(stats.requests_completed(), 1);
        assert_eq!(stats.requests_failed(), 1);
        assert_eq!(stats.running_workers(), 1);
        cancel.cancel();
    }

    #[tokio::test]
    async fn lazy_spawn_up_to_cap() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let gate = Arc::new(Semaphore::new(0));
        let server_gate = gate.clone();
        tokio::spawn(async move {
            loop {
                let (mut stream, _) = match listener.accept().await {
                    Ok(v) => v,
                    Err(_) => break,
                };
                let gate = server_gate.clone();
                tokio::spawn(async move {
                    read_request(&mut stream).await;
                    let _permit = gate.acquire().await.unwrap();
                    write_status(&mut stream, 200).await;
                });
            }
        });

        let (pool, cancel) = test_pool(3);

        let mut waiters = Vec::new();
        for _ in 0..5 {
            let pool = pool.clone();
            let (req, rx) = request_to(addr);
            waiters.push(rx);
            tokio::spawn(async move {
                pool.submit(req).await.unwrap();
            });
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(pool.stats().running_workers(), 3);

        gate.add_permits(5);
        for rx in waiters {
            assert!(rx.await.unwrap().succeeded());
        }

        let stats = pool.stats();
        assert_eq!(stats.requests_completed(), 5);
        assert_eq!(stats.running_workers(), 3);

        cancel.cancel();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(pool.stats().running_workers(), 0);
    }

    #[test]
    fn outcome_classification() {
        assert!(SendOutcome::Ok.succeeded());
        assert!(SendOutcome::Status(StatusCode::NOT_FOUND, Bytes::new()).retriable());
        assert!(SendOutcome::Status(StatusCode::BAD_GATEWAY, Bytes::new()).retriable());
        assert!(!SendOutcome::Status(StatusCode::FORBIDDEN, Bytes::new()).retriable());
        assert!(SendOutcome::Transport("reset".to_string()).retriable());
        assert!(!SendOutcome::Cancelled.retriable());
    }
}
