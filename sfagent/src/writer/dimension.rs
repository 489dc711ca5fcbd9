/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::collections::hash_map::Entry;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ahash::AHashMap;
use bytes::Bytes;
use http::{Method, Request, header};
use http_body_util::Full;
use log::{debug, warn};
use thiserror::Error;
use tokio::sync::{Notify, oneshot};
use tokio_util::sync::CancellationToken;

use super::dedup::DedupHistory;
use super::sender::{HttpSenderPool, QueuedRequest, SendOutcome};
use crate::types::{DataPoint, DimensionKey, DimensionUpdate, MetricType, MetricValue};

#[derive(Debug, Error)]
pub enum AcceptError {
    #[error("writer is shutting down")]
    ShuttingDown,
    #[error("invalid dimension update: {0}")]
    Invalid(&'static str),
}

pub struct DimensionClientConfig {
    pub(crate) api_base: String,
    pub(crate) token: Option<String>,
    pub(crate) delay: Duration,
    pub(crate) max_buffered: usize,
    pub(crate) max_encoded_size: usize,
    pub(crate) dedup_capacity: NonZeroUsize,
    pub(crate) flap_window: Duration,
    pub(crate) backoff_base: Duration,
    pub(crate) backoff_max: Duration,
}

#[derive(Default)]
pub(crate) struct DimensionStats {
    started: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
    invalid: AtomicU64,
    flappy: AtomicU64,
    duplicates: AtomicU64,
    client_errors: AtomicU64,
    retries: AtomicU64,
    currently_delayed: AtomicUsize,
}

struct PendingKey {
    desired: DimensionUpdate,
    fingerprint: u64,
    dirty: bool,
}

/// Client that turns a stream of dimension updates into a well behaved
/// stream of api requests: per key coalescing during a delay window, dedup
/// against recently sent state, and classified retry with capped backoff.
/// At most one request per natural key is ever outstanding.
#[derive(Clone)]
pub struct DimensionClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: DimensionClientConfig,
    pool: HttpSenderPool,
    dedup: Mutex<DedupHistory>,
    keys: Mutex<AHashMap<DimensionKey, PendingKey>>,
    stats: DimensionStats,
    cancel: CancellationToken,
    drained: Notify,
}

impl DimensionClient {
    pub(crate) fn new(
        mut config: DimensionClientConfig,
        pool: HttpSenderPool,
        cancel: CancellationToken,
    ) -> Self {
        while config.api_base.ends_with('/') {
            config.api_base.pop();
        }
        let dedup = DedupHistory::new(config.dedup_capacity, config.flap_window);
        DimensionClient {
            inner: Arc::new(ClientInner {
                config,
                pool,
                dedup: Mutex::new(dedup),
                keys: Mutex::new(AHashMap::new()),
                stats: DimensionStats::default(),
                cancel,
                drained: Notify::new(),
            }),
        }
    }

    /// Enqueue an update. Returns promptly; transmission is asynchronous.
    /// A later update for the same key overwrites the queued one.
    pub fn accept_update(&self, update: DimensionUpdate) -> Result<(), AcceptError> {
        let inner = &self.inner;
        if inner.cancel.is_cancelled() {
            return Err(AcceptError::ShuttingDown);
        }

        if let Err(reason) = update.validate() {
            inner.stats.add_invalid();
            return Err(AcceptError::Invalid(reason));
        }
        let encoded_len = update.encode_body().to_string().len();
        if encoded_len > inner.config.max_encoded_size {
            inner.stats.add_invalid();
            return Err(AcceptError::Invalid("encoded update exceeds size limit"));
        }

        let fingerprint = update.fingerprint();
        let key = update.key();

        let mut keys = inner.keys.lock().unwrap();
        let buffered = keys.len();
        match keys.entry(key) {
            Entry::Occupied(mut o) => {
                let pending = o.get_mut();
                if pending.fingerprint == fingerprint {
                    inner.stats.add_duplicate();
                    return Ok(());
                }
                pending.desired = update;
                pending.fingerprint = fingerprint;
                pending.dirty = true;
            }
            Entry::Vacant(v) => {
                if inner.dedup.lock().unwrap().seen(fingerprint) {
                    inner.stats.add_duplicate();
                    return Ok(());
                }
                if buffered >= inner.config.max_buffered {
                    inner.stats.add_dropped();
                    warn!("dimension update buffer is full ({buffered} keys), dropping update");
                    return Ok(());
                }
                let key = v.key().clone();
                v.insert(PendingKey {
                    desired: update,
                    fingerprint,
                    dirty: false,
                });
                inner.stats.currently_delayed.fetch_add(1, Ordering::Relaxed);
                let inner = inner.clone();
                tokio::spawn(async move { inner.run_key(key).await });
            }
        }
        Ok(())
    }

    /// Wait until all pending keys have drained, or the timeout expires.
    /// Returns true when everything was flushed.
    pub async fn flush(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let mut notified = std::pin::pin!(self.inner.drained.notified());
            // register before the emptiness check so no wakeup is lost
            notified.as_mut().enable();
            if self.inner.keys.lock().unwrap().is_empty() {
                return true;
            }
            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(deadline) => {
                    return self.inner.keys.lock().unwrap().is_empty();
                }
            }
        }
    }

    pub fn internal_metrics(&self) -> Vec<DataPoint> {
        let stats = &self.inner.stats;
        let dedup_size = self.inner.dedup.lock().unwrap().len();

        let counter = |name: &'static str, v: &AtomicU64| {
            DataPoint::new(
                name,
                MetricType::CumulativeCounter,
                MetricValue::Int(v.load(Ordering::Relaxed) as i64),
            )
        };
        let gauge = |name: &'static str, v: usize| {
            DataPoint::new(name, MetricType::Gauge, MetricValue::Int(v as i64))
        };

        vec![
            counter("dim_updates_started", &stats.started),
            counter("dim_updates_completed", &stats.completed),
            counter("dim_updates_failed", &stats.failed),
            counter("dim_updates_dropped", &stats.dropped),
            counter("dim_updates_invalid", &stats.invalid),
            counter("dim_updates_flappy_total", &stats.flappy),
            counter("dim_updates_duplicates", &stats.duplicates),
            counter("dim_updates_client_errors", &stats.client_errors),
            counter("dim_updates_retries", &stats.retries),
            gauge(
                "dim_updates_currently_delayed",
                stats.currently_delayed.load(Ordering::Relaxed),
            ),
            gauge("dim_updates_deduplicator_size", dedup_size),
        ]
    }

    #[cfg(test)]
    pub(crate) fn stats(&self) -> &DimensionStats {
        &self.inner.stats
    }
}

impl ClientInner {
    /// Drive one key through Delayed -> Sending -> (Retrying ->) done.
    /// The task exits when the key has no unsent state left.
    async fn run_key(self: Arc<Self>, key: DimensionKey) {
        'pending: loop {
            // delay window; shutdown skips straight to the drain send
            tokio::select! {
                _ = tokio::time::sleep(self.config.delay) => {}
                _ = self.cancel.cancelled() => {}
            }

            let (update, fingerprint) = {
                let mut keys = self.keys.lock().unwrap();
                let Some(pending) = keys.get_mut(&key) else {
                    return;
                };
                pending.dirty = false;
                (pending.desired.clone(), pending.fingerprint)
            };

            let mut backoff = self.config.backoff_base;
            'send: loop {
                self.stats.started.fetch_add(1, Ordering::Relaxed);
                let outcome = self.send_update(&update).await;

                if outcome.succeeded() {
                    self.stats.completed.fetch_add(1, Ordering::Relaxed);
                    if self.dedup.lock().unwrap().insert(fingerprint) {
                        self.stats.flappy.fetch_add(1, Ordering::Relaxed);
                        debug!("flappy dimension update on {key}");
                    }
                    break 'send;
                }

                if outcome.retriable() && !self.cancel.is_cancelled() {
                    self.stats.retries.fetch_add(1, Ordering::Relaxed);
                    let wait = backoff.mul_f64(0.9 + 0.2 * fastrand::f64());
                    backoff = (backoff * 2).min(self.config.backoff_max);
                    tokio::select! {
                        _ = tokio::time::sleep(wait) => {}
                        _ = self.cancel.cancelled() => {}
                    }
                    if self.overwritten(&key) {
                        continue 'pending;
                    }
                    continue 'send;
                }

                if let SendOutcome::Status(status, body) = &outcome {
                    if status.is_client_error() {
                        self.stats.client_errors.fetch_add(1, Ordering::Relaxed);
                        warn!(
                            "dimension update on {key} rejected with {status}: {}",
                            String::from_utf8_lossy(body)
                        );
                    }
                } else {
                    debug!("dimension update on {key} failed: {outcome:?}");
                }
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                break 'send;
            }

            if !self.remove_if_clean(&key) {
                continue 'pending;
            }
            return;
        }
    }

    fn overwritten(&self, key: &DimensionKey) -> bool {
        let keys = self.keys.lock().unwrap();
        keys.get(key).map(|p| p.dirty).unwrap_or(false)
    }

    /// Drop the key state unless a newer update arrived during the send.
    fn remove_if_clean(&self, key: &DimensionKey) -> bool {
        let mut keys = self.keys.lock().unwrap();
        if let Some(pending) = keys.get(key) {
            if pending.dirty {
                return false;
            }
            keys.remove(key);
            self.stats.currently_delayed.fetch_sub(1, Ordering::Relaxed);
        }
        if keys.is_empty() {
            self.drained.notify_waiters();
        }
        true
    }

    async fn send_update(&self, update: &DimensionUpdate) -> SendOutcome {
        let request = match self.build_request(update) {
            Ok(r) => r,
            Err(e) => return SendOutcome::Transport(e.to_string()),
        };
        let (done, rsp) = oneshot::channel();
        if let Err(e) = self.pool.submit(QueuedRequest { inner: request, done }).await {
            return SendOutcome::Transport(e.to_string());
        }
        match rsp.await {
            Ok(outcome) => outcome,
            Err(_) => SendOutcome::Cancelled,
        }
    }

    fn build_request(&self, update: &DimensionUpdate) -> anyhow::Result<Request<Full<Bytes>>> {
        let uri = format!("{}{}", self.config.api_base, update.request_path());
        let method = if update.merge_into_existing {
            Method::PATCH
        } else {
            Method::PUT
        };
        let body = serde_json::to_vec(&update.encode_body())?;

        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = &self.config.token {
            builder = builder.header("X-SF-Token", token.as_str());
        }
        Ok(builder.body(Full::from(Bytes::from(body)))?)
    }
}

impl DimensionStats {
    fn add_invalid(&self) {
        self.invalid.fetch_add(1, Ordering::Relaxed);
    }

    fn add_duplicate(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    fn add_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[cfg(test)]
    pub(crate) fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    pub(crate) fn duplicates(&self) -> u64 {
        self.duplicates.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    pub(crate) fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    pub(crate) fn client_errors(&self) -> u64 {
        self.client_errors.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    pub(crate) fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    pub(crate) fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, BTreeSet};
    use std::net::SocketAddr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn update() -> DimensionUpdate {
        DimensionUpdate {
            name: "host".to_string(),
            value: "h1".to_string(),
            properties: BTreeMap::from([("region".to_string(), "us-east".to_string())]),
            tags: BTreeSet::new(),
            merge_into_existing: false,
        }
    }

    fn client(addr: SocketAddr, cancel: CancellationToken) -> DimensionClient {
        client_with(addr, cancel, Duration::from_millis(1), 100)
    }

    fn client_with(
        addr: SocketAddr,
        cancel: CancellationToken,
        delay: Duration,
        max_buffered: usize,
    ) -> DimensionClient {
        let pool = HttpSenderPool::new(
            crate::httpclient::build_https_client().unwrap(),
            1,
            Duration::from_secs(5),
            cancel.clone(),
        );
        let config = DimensionClientConfig {
            api_base: format!("http://{addr}"),
            token: Some("abc".to_string()),
            delay,
            max_buffered,
            max_encoded_size: 64 * 1024,
            dedup_capacity: NonZeroUsize::new(100).unwrap(),
            flap_window: Duration::from_secs(60),
            backoff_base: Duration::from_millis(1),
            backoff_max: Duration::from_millis(10),
        };
        DimensionClient::new(config, pool, cancel)
    }

    /// serve the given statuses one connection each, counting requests
    async fn serve(statuses: Vec<u16>) -> (SocketAddr, tokio::task::JoinHandle<usize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handler = tokio::spawn(async move {
            let mut served = 0;
            for status in statuses {
                let Ok((mut stream, _)) = listener.accept().await else {
                    break;
                };
                let mut buf = [0u8; 8192];
                let mut data = Vec::new();
                loop {
                    let n = stream.read(&mut buf).await.unwrap();
                    if n == 0 {
                        break;
                    }
                    data.extend_from_slice(&buf[..n]);
                    if let Some(p) = data.windows(4).position(|w| w == b"\r\n\r\n") {
                        let head = String::from_utf8_lossy(&data[..p]).to_string();
                        let body_len: usize = head
                            .lines()
                            .find_map(|l| {
                                l.to_ascii_lowercase()
                                    .strip_prefix("content-length:")
                                    .map(|v| v.trim().parse().unwrap())
                            })
                            .unwrap_or(0);
                        if data.len() >= p + 4 + body_len {
                            break;
                        }
                    }
                }
                let rsp = format!(
                    "HTTP/1.1 {status} X\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                );
                stream.write_all(rsp.as_bytes()).await.unwrap();
                served += 1;
            }
            served
        });
        (addr, handler)
    }

    #[tokio::test]
    async fn dedup_suppresses_resend() {
        let (addr, server) = serve(vec![200]).await;
        let cancel = CancellationToken::new();
        let client = client(addr, cancel.clone());

        client.accept_update(update()).unwrap();
        assert!(client.flush(Duration::from_secs(5)).await);

        // identical update after the first send went out
        client.accept_update(update()).unwrap();
        assert!(client.flush(Duration::from_secs(1)).await);

        assert_eq!(client.stats().duplicates(), 1);
        assert_eq!(client.stats().completed(), 1);
        cancel.cancel();
        assert_eq!(server.await.unwrap(), 1);
    }

    #[tokio::test]
    async fn retries_on_404_then_succeeds() {
        let (addr, server) = serve(vec![404, 404, 200]).await;
        let cancel = CancellationToken::new();
        let client = client(addr, cancel.clone());

        client.accept_update(update()).unwrap();
        assert!(client.flush(Duration::from_secs(5)).await);

        assert_eq!(client.stats().retries(), 2);
        assert_eq!(client.stats().completed(), 1);
        cancel.cancel();
        assert_eq!(server.await.unwrap(), 3);
    }

    #[tokio::test]
    async fn terminal_403_is_not_retried() {
        let (addr, server) = serve(vec![403]).await;
        let cancel = CancellationToken::new();
        let client = client(addr, cancel.clone());

        client.accept_update(update()).unwrap();
        assert!(client.flush(Duration::from_secs(5)).await);

        assert_eq!(client.stats().client_errors(), 1);
        assert_eq!(client.stats().retries(), 0);
        assert_eq!(client.stats().failed(), 1);
        cancel.cancel();
        assert_eq!(server.await.unwrap(), 1);
    }

    #[tokio::test]
    async fn newer_update_overwrites_queued() {
        let (addr, server) = serve(vec![200]).await;
        let cancel = CancellationToken::new();
        let client = client(addr, cancel.clone());

        let mut first = update();
        first.properties.insert("stale".to_string(), "yes".to_string());
        client.accept_update(first).unwrap();
        client.accept_update(update()).unwrap();
        assert!(client.flush(Duration::from_secs(5)).await);

        // only the coalesced final state went out
        assert_eq!(client.stats().completed(), 1);
        cancel.cancel();
        assert_eq!(server.await.unwrap(), 1);
    }

    #[tokio::test]
    async fn drops_when_buffer_full() {
        let (addr, _server) = serve(vec![]).await;
        let cancel = CancellationToken::new();
        let client = client_with(addr, cancel.clone(), Duration::from_secs(30), 1);

        client.accept_update(update()).unwrap();
        let mut second = update();
        second.value = "h2".to_string();
        client.accept_update(second).unwrap();

        assert_eq!(client.stats().dropped(), 1);
        cancel.cancel();
    }

    #[tokio::test]
    async fn rejects_invalid_updates() {
        let (addr, _server) = serve(vec![]).await;
        let cancel = CancellationToken::new();
        let client = client(addr, cancel.clone());

        let mut bad = update();
        bad.name.clear();
        assert!(matches!(
            client.accept_update(bad),
            Err(AcceptError::Invalid(_))
        ));

        cancel.cancel();
        assert!(matches!(
            client.accept_update(update()),
            Err(AcceptError::ShuttingDown)
        ));
    }
}
