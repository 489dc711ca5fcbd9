/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, anyhow};
use log::{info, warn};
use tokio_util::sync::CancellationToken;

use crate::config::AgentConfig;

mod dedup;
mod sender;
use sender::HttpSenderPool;

mod dimension;
pub use dimension::{AcceptError, DimensionClient};
pub(crate) use dimension::DimensionClientConfig;

mod datapoint;
pub use datapoint::{EgressSender, EgressStats};
pub(crate) use datapoint::EgressConfig;
use datapoint::EgressRuntime;

mod internal;
use internal::InternalEmitter;

static RUNTIME_WRITER: Mutex<Option<Writer>> = Mutex::new(None);

/// Interface handed to monitors and observers.
#[derive(Clone)]
pub struct WriterHandle {
    pub egress: EgressSender,
    pub dimensions: DimensionClient,
}

pub(crate) struct Writer {
    handle: WriterHandle,
    // components stop first so the pool can drain the dimension queues
    component_cancel: CancellationToken,
    pool_cancel: CancellationToken,
    flush_timeout: Duration,
}

impl Writer {
    fn spawn(config: &AgentConfig) -> anyhow::Result<Writer> {
        let component_cancel = CancellationToken::new();
        let pool_cancel = CancellationToken::new();

        let wc = &config.writer;
        let client =
            crate::httpclient::build_https_client().context("failed to build http client")?;
        let pool = HttpSenderPool::new(
            client,
            wc.max_requests,
            wc.request_timeout,
            pool_cancel.clone(),
        );

        let dimensions = DimensionClient::new(
            DimensionClientConfig {
                api_base: wc.api_url.clone(),
                token: wc.access_token.clone(),
                delay: wc.dimension_update_buffer,
                max_buffered: wc.dimension_max_buffered,
                max_encoded_size: wc.dimension_max_encoded_size,
                dedup_capacity: wc.dedup_history_size,
                flap_window: wc.dedup_flap_window,
                backoff_base: wc.retry_backoff_base,
                backoff_max: wc.retry_backoff_max,
            },
            pool.clone(),
            component_cancel.clone(),
        );

        let (egress, egress_runtime) = EgressRuntime::new(
            EgressConfig {
                ingest_base: wc.ingest_url.clone(),
                token: wc.access_token.clone(),
                flush_interval: wc.datapoint_flush_interval,
                max_batch_size: wc.datapoint_max_batch_size,
                splunk: config.splunk.clone(),
            },
            pool.clone(),
            component_cancel.clone(),
        );
        tokio::spawn(egress_runtime.into_running());

        let emitter = InternalEmitter::new(
            wc.internal_metrics_interval,
            egress.clone(),
            dimensions.clone(),
            pool.stats(),
            component_cancel.clone(),
        );
        tokio::spawn(emitter.into_running());

        Ok(Writer {
            handle: WriterHandle { egress, dimensions },
            component_cancel,
            pool_cancel,
            flush_timeout: wc.shutdown_flush_timeout,
        })
    }

    async fn shutdown(self) {
        self.component_cancel.cancel();
        if !self.handle.dimensions.flush(self.flush_timeout).await {
            warn!("dimension update queue did not drain before shutdown deadline");
        }
        self.pool_cancel.cancel();
    }
}

pub(crate) async fn spawn_all() -> anyhow::Result<()> {
    let config = crate::config::get().ok_or_else(|| anyhow!("no config loaded"))?;
    stop_all().await;
    let writer = Writer::spawn(&config)?;
    *RUNTIME_WRITER.lock().unwrap() = Some(writer);
    info!("writer started");
    Ok(())
}

pub(crate) async fn stop_all() {
    let writer = RUNTIME_WRITER.lock().unwrap().take();
    if let Some(writer) = writer {
        writer.shutdown().await;
        info!("writer stopped");
    }
}

pub fn handle() -> Option<WriterHandle> {
    RUNTIME_WRITER
        .lock()
        .unwrap()
        .as_ref()
        .map(|w| w.handle.clone())
}
