/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::collections::BTreeMap;

use anyhow::anyhow;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use http::{Method, Request, StatusCode};
use http_body_util::Full;
use yaml_rust::Yaml;

use super::ConfigSource;
use crate::httpclient::HttpsClient;
use crate::resolve::error::SourceError;

/// Consul KV store source, read through the HTTP API with `recurse` so a
/// prefix path returns the whole subtree. Values come back base64 encoded.
pub(super) struct ConsulSource {
    endpoint: String,
    client: HttpsClient,
}

impl ConsulSource {
    pub(super) fn new(endpoint: impl Into<String>, client: HttpsClient) -> Self {
        ConsulSource {
            endpoint: endpoint.into(),
            client,
        }
    }

    pub(super) fn parse(value: &Yaml, client: HttpsClient) -> anyhow::Result<Self> {
        let Yaml::Hash(map) = value else {
            return Err(anyhow!("the consul source config should be a map"));
        };
        let mut endpoint = String::new();
        sf_yaml::foreach_kv(map, |k, v| match sf_yaml::key::normalize(k).as_str() {
            "endpoint" => {
                endpoint = sf_yaml::value::as_string(v)?;
                Ok(())
            }
            "cachettl" => Ok(()),
            _ => Err(anyhow!("invalid key {k}")),
        })?;
        if endpoint.is_empty() {
            return Err(anyhow!("no endpoint set"));
        }
        while endpoint.ends_with('/') {
            endpoint.pop();
        }
        Ok(ConsulSource { endpoint, client })
    }
}

#[async_trait]
impl ConfigSource for ConsulSource {
    async fn get(&self, path: &str) -> Result<BTreeMap<String, Bytes>, SourceError> {
        let uri = format!(
            "{}/v1/kv/{}?recurse=true",
            self.endpoint,
            path.trim_start_matches('/')
        );
        let request = Request::builder()
            .method(Method::GET)
            .uri(uri)
            .body(Full::from(Bytes::new()))
            .map_err(|e| SourceError::Other(e.to_string()))?;

        let (status, body) = super::call_kv_api(&self.client, request).await?;
        match status {
            StatusCode::OK => {}
            StatusCode::NOT_FOUND => return Err(SourceError::NotFound),
            _ => return Err(SourceError::Status(status)),
        }

        let entries: serde_json::Value = serde_json::from_slice(&body)
            .map_err(|e| SourceError::Other(format!("invalid kv response: {e}")))?;
        let Some(entries) = entries.as_array() else {
            return Err(SourceError::Other(
                "kv response is not an array".to_string(),
            ));
        };

        let mut content = BTreeMap::new();
        for entry in entries {
            let Some(key) = entry.get("Key").and_then(|v| v.as_str()) else {
                continue;
            };
            let Some(value) = entry.get("Value").and_then(|v| v.as_str()) else {
                continue;
            };
            let decoded = BASE64
                .decode(value)
                .map_err(|e| SourceError::Other(format!("invalid value for key {key}: {e}")))?;
            content.insert(key.to_string(), Bytes::from(decoded));
        }
        if content.is_empty() {
            return Err(SourceError::NotFound);
        }
        Ok(content)
    }
}
