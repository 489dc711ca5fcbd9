/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use http::{Method, Request, header};
use http_body_util::Full;
use log::{debug, warn};
use serde_json::json;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::sender::{HttpSenderPool, QueuedRequest};
use crate::config::SplunkConfig;
use crate::types::{DataPoint, Event};

const EGRESS_CHANNEL_SIZE: usize = 4096;

pub(crate) enum EgressItem {
    Datapoint(DataPoint),
    Event(Event),
}

#[derive(Default)]
pub struct EgressStats {
    datapoints_sent: AtomicU64,
    events_sent: AtomicU64,
    dropped: AtomicU64,
    flush_errors: AtomicU64,
}

impl EgressStats {
    pub fn datapoints_sent(&self) -> u64 {
        self.datapoints_sent.load(Ordering::Relaxed)
    }

    pub fn events_sent(&self) -> u64 {
        self.events_sent.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn flush_errors(&self) -> u64 {
        self.flush_errors.load(Ordering::Relaxed)
    }
}

/// Intake side handed to monitors. Overflow drops instead of blocking the
/// producer, the drop is counted.
#[derive(Clone)]
pub struct EgressSender {
    sender: mpsc::Sender<EgressItem>,
    stats: Arc<EgressStats>,
}

impl EgressSender {
    pub fn send_datapoint(&self, dp: DataPoint) {
        if self.sender.try_send(EgressItem::Datapoint(dp)).is_err() {
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn send_event(&self, ev: Event) {
        if self.sender.try_send(EgressItem::Event(ev)).is_err() {
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn stats(&self) -> Arc<EgressStats> {
        self.stats.clone()
    }
}

pub(crate) struct EgressConfig {
    pub(crate) ingest_base: String,
    pub(crate) token: Option<String>,
    pub(crate) flush_interval: Duration,
    pub(crate) max_batch_size: usize,
    pub(crate) splunk: Option<SplunkConfig>,
}

/// Batches datapoints and events on a ticker and ships the json bodies
/// through the sender pool.
pub(super) struct EgressRuntime {
    config: EgressConfig,
    receiver: mpsc::Receiver<EgressItem>,
    pool: HttpSenderPool,
    cancel: CancellationToken,
    stats: Arc<EgressStats>,

    datapoints: Vec<DataPoint>,
    events: Vec<Event>,
}

impl EgressRuntime {
    pub(super) fn new(
        mut config: EgressConfig,
        pool: HttpSenderPool,
        cancel: CancellationToken,
    ) -> (EgressSender, Self) {
        while config.ingest_base.ends_with('/') {
            config.ingest_base.pop();
        }
        let (sender, receiver) = mpsc::channel(EGRESS_CHANNEL_SIZE);
        let stats = Arc::new(EgressStats::default());
        let intake = EgressSender {
            sender,
            stats: stats.clone(),
        };
        let runtime = EgressRuntime {
            config,
            receiver,
            pool,
            cancel,
            stats,
            datapoints: Vec::new(),
            events: Vec::new(),
        };
        (intake, runtime)
    }

    pub(super) async fn into_running(mut self) {
        let mut interval = tokio::time::interval(self.config.flush_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    while let Ok(item) = self.receiver.try_recv() {
                        self.buffer(item);
                    }
                    self.flush().await;
                    break;
                }
                _ = interval.tick() => self.flush().await,
                r = self.receiver.recv() => {
                    match r {
                        Some(item) => {
                            self.buffer(item);
                            if self.datapoints.len() + self.events.len()
                                >= self.config.max_batch_size
                            {
                                self.flush().await;
                            }
                        }
                        None => {
                            self.flush().await;
                            break;
                        }
                    }
                }
            }
        }
        debug!("egress runtime stopped");
    }

    fn buffer(&mut self, item: EgressItem) {
        match item {
            EgressItem::Datapoint(dp) => self.datapoints.push(dp),
            EgressItem::Event(ev) => self.events.push(ev),
        }
    }

    async fn flush(&mut self) {
        if self.datapoints.is_empty() && self.events.is_empty() {
            return;
        }
        let datapoints = std::mem::take(&mut self.datapoints);
        let events = std::mem::take(&mut self.events);

        if !datapoints.is_empty() {
            let body = encode_datapoint_body(&datapoints);
            let uri = format!("{}/v2/datapoint", self.config.ingest_base);
            if self.post_json(&uri, body).await {
                self.stats
                    .datapoints_sent
                    .fetch_add(datapoints.len() as u64, Ordering::Relaxed);
            }
        }
        if !events.is_empty() {
            let body = serde_json::Value::Array(events.iter().map(Event::to_json).collect());
            let uri = format!("{}/v2/event", self.config.ingest_base);
            if self.post_json(&uri, body).await {
                self.stats
                    .events_sent
                    .fetch_add(events.len() as u64, Ordering::Relaxed);
            }
        }

        if let Some(splunk) = &self.config.splunk {
            let body = encode_hec_body(&datapoints, &events);
            if body.is_empty() {
                return;
            }
            let uri = format!("{}/services/collector/event", splunk.url.trim_end_matches('/'));
            let request = Request::builder()
                .method(Method::POST)
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .header(header::AUTHORIZATION, format!("Splunk {}", splunk.token))
                .body(Full::from(Bytes::from(body)));
            match request {
                Ok(request) => {
                    self.submit(request).await;
                }
                Err(e) => warn!("failed to build splunk hec request: {e}"),
            }
        }
    }

    async fn post_json(&self, uri: &str, body: serde_json::Value) -> bool {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = &self.config.token {
            builder = builder.header("X-SF-Token", token.as_str());
        }
        match builder.body(Full::from(Bytes::from(body.to_string()))) {
            Ok(request) => self.submit(request).await,
            Err(e) => {
                warn!("failed to build ingest request: {e}");
                false
            }
        }
    }

    async fn submit(&self, request: Request<Full<Bytes>>) -> bool {
        let (done, rsp) = oneshot::channel();
        if let Err(e) = self.pool.submit(QueuedRequest { inner: request, done }).await {
            self.stats.flush_errors.fetch_add(1, Ordering::Relaxed);
            warn!("failed to submit ingest request: {e}");
            return false;
        }
        match rsp.await {
            Ok(outcome) if outcome.succeeded() => true,
            Ok(outcome) => {
                self.stats.flush_errors.fetch_add(1, Ordering::Relaxed);
                warn!("ingest request failed: {outcome:?}");
                false
            }
            Err(_) => {
                self.stats.flush_errors.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }
}

fn encode_datapoint_body(datapoints: &[DataPoint]) -> serde_json::Value {
    let mut body = serde_json::Map::new();
    for dp in datapoints {
        let list = body
            .entry(dp.r#type.wire_key())
            .or_insert_with(|| serde_json::Value::Array(Vec::new()));
        if let Some(list) = list.as_array_mut() {
            list.push(dp.to_json());
        }
    }
    serde_json::Value::Object(body)
}

fn encode_hec_body(datapoints: &[DataPoint], events: &[Event]) -> String {
    let mut lines = Vec::new();
    for dp in datapoints {
        let mut fields = dp.to_json();
        if let Some(fields) = fields.as_object_mut() {
            fields.remove("timestamp");
        }
        lines.push(
            json!({
                "time": dp.time.timestamp_millis() as f64 / 1000.0,
                "event": "metric",
                "fields": fields,
            })
            .to_string(),
        );
    }
    for ev in events {
        lines.push(
            json!({
                "time": ev.time.timestamp_millis() as f64 / 1000.0,
                "event": ev.to_json(),
            })
            .to_string(),
        );
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MetricType, MetricValue};

    #[test]
    fn datapoint_body_groups_by_type() {
        let dps = vec![
            DataPoint::new("a", MetricType::Gauge, MetricValue::Int(1)),
            DataPoint::new("b", MetricType::Gauge, MetricValue::Int(2)),
            DataPoint::new("c", MetricType::CumulativeCounter, MetricValue::Int(3)),
        ];
        let body = encode_datapoint_body(&dps);
        assert_eq!(body["gauge"].as_array().unwrap().len(), 2);
        assert_eq!(body["cumulative_counter"].as_array().unwrap().len(), 1);
        assert!(body.get("counter").is_none());
    }

    #[test]
    fn hec_body_is_line_delimited() {
        let dps = vec![
            DataPoint::new("a", MetricType::Gauge, MetricValue::Int(1)),
            DataPoint::new("b", MetricType::Counter, MetricValue::Int(2)),
        ];
        let body = encode_hec_body(&dps, &[]);
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["event"], "metric");
        assert_eq!(first["fields"]["metric"], "a");
        assert!(first["fields"].get("timestamp").is_none());
    }
}
