/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::sync::Arc;
use std::time::Duration;

use log::debug;
use tokio_util::sync::CancellationToken;

use super::datapoint::{EgressSender, EgressStats};
use super::dimension::DimensionClient;
use super::sender::SenderStats;
use crate::types::{DataPoint, MetricType, MetricValue};

/// Samples the writer's own counters on a ticker and pushes them through
/// the regular datapoint egress, so the agent reports its health to the
/// same backend as user metrics.
pub(super) struct InternalEmitter {
    interval: Duration,
    egress: EgressSender,
    dimensions: DimensionClient,
    sender_stats: Arc<SenderStats>,
    egress_stats: Arc<EgressStats>,
    cancel: CancellationToken,
}

impl InternalEmitter {
    pub(super) fn new(
        interval: Duration,
        egress: EgressSender,
        dimensions: DimensionClient,
        sender_stats: Arc<SenderStats>,
        cancel: CancellationToken,
    ) -> Self {
        let egress_stats = egress.stats();
        InternalEmitter {
            interval,
            egress,
            dimensions,
            sender_stats,
            egress_stats,
            cancel,
        }
    }

    pub(super) async fn into_running(self) {
        let mut interval = tokio::time::interval(self.interval);
        // the first tick fires immediately, skip it so counters have data
        interval.tick().await;
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = interval.tick() => self.emit(),
            }
        }
        debug!("internal metrics emitter stopped");
    }

    fn emit(&self) {
        let counter = |name: &'static str, v: u64| {
            DataPoint::new(name, MetricType::CumulativeCounter, MetricValue::Int(v as i64))
        };

        let mut datapoints = self.dimensions.internal_metrics();
        datapoints.push(counter(
            "requests_started",
            self.sender_stats.requests_started(),
        ));
        datapoints.push(counter(
            "requests_completed",
            self.sender_stats.requests_completed(),
        ));
        datapoints.push(counter(
            "requests_failed",
            self.sender_stats.requests_failed(),
        ));
        datapoints.push(DataPoint::new(
            "requests_running_workers",
            MetricType::Gauge,
            MetricValue::Int(self.sender_stats.running_workers() as i64),
        ));
        datapoints.push(counter(
            "datapoints_sent",
            self.egress_stats.datapoints_sent(),
        ));
        datapoints.push(counter("events_sent", self.egress_stats.events_sent()));
        datapoints.push(counter("datapoints_dropped", self.egress_stats.dropped()));
        datapoints.push(counter("flush_errors", self.egress_stats.flush_errors()));

        for dp in datapoints {
            self.egress
                .send_datapoint(dp.with_dimension("location", "writer"));
        }
    }
}
