/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::num::NonZeroUsize;
use std::time::Duration;

use anyhow::anyhow;
use yaml_rust::Yaml;

const DEFAULT_INGEST_URL: &str = "https://ingest.signalfx.com";
const DEFAULT_API_URL: &str = "https://api.signalfx.com";

pub(crate) struct WriterConfig {
    pub(crate) max_requests: usize,
    pub(crate) request_timeout: Duration,
    pub(crate) ingest_url: String,
    pub(crate) api_url: String,
    pub(crate) access_token: Option<String>,
    pub(crate) dimension_update_buffer: Duration,
    pub(crate) dimension_max_buffered: usize,
    pub(crate) dimension_max_encoded_size: usize,
    pub(crate) dedup_history_size: NonZeroUsize,
    pub(crate) dedup_flap_window: Duration,
    pub(crate) retry_backoff_base: Duration,
    pub(crate) retry_backoff_max: Duration,
    pub(crate) datapoint_flush_interval: Duration,
    pub(crate) datapoint_max_batch_size: usize,
    pub(crate) internal_metrics_interval: Duration,
    pub(crate) shutdown_flush_timeout: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        WriterConfig {
            max_requests: 10,
            request_timeout: Duration::from_secs(10),
            ingest_url: DEFAULT_INGEST_URL.to_string(),
            api_url: DEFAULT_API_URL.to_string(),
            access_token: None,
            dimension_update_buffer: Duration::from_secs(30),
            dimension_max_buffered: 10000,
            dimension_max_encoded_size: 64 * 1024,
            dedup_history_size: NonZeroUsize::new(10000).unwrap(),
            dedup_flap_window: Duration::from_secs(60),
            retry_backoff_base: Duration::from_secs(1),
            retry_backoff_max: Duration::from_secs(300),
            datapoint_flush_interval: Duration::from_secs(5),
            datapoint_max_batch_size: 1000,
            internal_metrics_interval: Duration::from_secs(10),
            shutdown_flush_timeout: Duration::from_secs(10),
        }
    }
}

impl WriterConfig {
    pub(crate) fn parse(value: &Yaml) -> anyhow::Result<Self> {
        let Yaml::Hash(map) = value else {
            return Err(anyhow!("the writer section should be a map"));
        };
        let mut config = WriterConfig::default();
        sf_yaml::foreach_kv(map, |k, v| {
            config.set_by_yaml_kv(&sf_yaml::key::normalize(k), v)
        })?;
        config.check()?;
        Ok(config)
    }

    fn set_by_yaml_kv(&mut self, k: &str, v: &Yaml) -> anyhow::Result<()> {
        match k {
            "maxrequests" | "max_requests" => {
                self.max_requests = sf_yaml::value::as_usize(v)?;
            }
            "requesttimeoutseconds" | "request_timeout" => {
                self.request_timeout = sf_yaml::humanize::as_duration(v)?;
            }
            "ingesturl" | "ingest_url" => {
                self.ingest_url = sf_yaml::value::as_string(v)?;
            }
            "apiurl" | "api_url" => {
                self.api_url = sf_yaml::value::as_string(v)?;
            }
            "signalfxaccesstoken" | "access_token" => {
                self.access_token = Some(sf_yaml::value::as_string(v)?);
            }
            "dimensionupdatebuffer" => {
                self.dimension_update_buffer = sf_yaml::humanize::as_duration(v)?;
            }
            "dimensionmaxbuffered" => {
                self.dimension_max_buffered = sf_yaml::value::as_usize(v)?;
            }
            "dimensionmaxencodedsize" => {
                self.dimension_max_encoded_size = sf_yaml::humanize::as_usize(v)?;
            }
            "deduphistorysize" => {
                self.dedup_history_size = sf_yaml::value::as_nonzero_usize(v)?;
            }
            "dedupflapwindow" => {
                self.dedup_flap_window = sf_yaml::humanize::as_duration(v)?;
            }
            "retrybackoffbase" => {
                self.retry_backoff_base = sf_yaml::humanize::as_duration(v)?;
            }
            "retrybackoffmax" => {
                self.retry_backoff_max = sf_yaml::humanize::as_duration(v)?;
            }
            "datapointflushinterval" => {
                self.datapoint_flush_interval = sf_yaml::humanize::as_duration(v)?;
            }
            "datapointmaxbatchsize" => {
                self.datapoint_max_batch_size = sf_yaml::value::as_usize(v)?;
            }
            "internalmetricsinterval" => {
                self.internal_metrics_interval = sf_yaml::humanize::as_duration(v)?;
            }
            "shutdownflushtimeout" => {
                self.shutdown_flush_timeout = sf_yaml::humanize::as_duration(v)?;
            }
            _ => return Err(anyhow!("invalid key {k}")),
        }
        Ok(())
    }

    fn check(&self) -> anyhow::Result<()> {
        if self.max_requests == 0 {
            return Err(anyhow!("maxRequests should be positive"));
        }
        if self.ingest_url.is_empty() {
            return Err(anyhow!("ingestURL should not be empty"));
        }
        if self.api_url.is_empty() {
            return Err(anyhow!("apiURL should not be empty"));
        }
        if self.datapoint_max_batch_size == 0 {
            return Err(anyhow!("datapointMaxBatchSize should be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use yaml_rust::YamlLoader;

    fn doc(s: &str) -> Yaml {
        YamlLoader::load_from_str(s).unwrap().remove(0)
    }

    #[test]
    fn defaults() {
        let config = WriterConfig::default();
        assert_eq!(config.max_requests, 10);
        assert_eq!(config.dimension_update_buffer, Duration::from_secs(30));
        assert_eq!(config.dedup_history_size.get(), 10000);
        assert_eq!(config.ingest_url, DEFAULT_INGEST_URL);
    }

    #[test]
    fn camel_case_keys() {
        let value = doc(
            "maxRequests: 4\n\
             requestTimeoutSeconds: 5\n\
             signalFxAccessToken: abc\n\
             dimensionUpdateBuffer: 1s\n\
             dedupHistorySize: 100\n\
             ingestURL: http://127.0.0.1:1080",
        );
        let config = WriterConfig::parse(&value).unwrap();
        assert_eq!(config.max_requests, 4);
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.access_token.as_deref(), Some("abc"));
        assert_eq!(config.dimension_update_buffer, Duration::from_secs(1));
        assert_eq!(config.dedup_history_size.get(), 100);
        assert_eq!(config.ingest_url, "http://127.0.0.1:1080");
    }

    #[test]
    fn unknown_key_is_rejected() {
        let value = doc("maxGoroutines: 4");
        assert!(WriterConfig::parse(&value).is_err());
    }

    #[test]
    fn zero_workers_is_rejected() {
        let value = doc("maxRequests: 0");
        assert!(WriterConfig::parse(&value).is_err());
    }
}
