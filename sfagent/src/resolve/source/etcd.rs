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
use http::{Method, Request, StatusCode, header};
use http_body_util::Full;
use serde_json::json;
use yaml_rust::Yaml;

use super::ConfigSource;
use crate::httpclient::HttpsClient;
use crate::resolve::error::SourceError;

/// etcd v3 source, read through the grpc-gateway range endpoint. A path
/// ending in `/` is treated as a prefix range.
pub(super) struct EtcdSource {
    endpoint: String,
    client: HttpsClient,
}

impl EtcdSource {
    pub(super) fn new(endpoint: impl Into<String>, client: HttpsClient) -> Self {
        EtcdSource {
            endpoint: endpoint.into(),
            client,
        }
    }

    pub(super) fn parse(value: &Yaml, client: HttpsClient) -> anyhow::Result<Self> {
        let Yaml::Hash(map) = value else {
            return Err(anyhow!("the etcd source config should be a map"));
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
        Ok(EtcdSource { endpoint, client })
    }
}

#[async_trait]
impl ConfigSource for EtcdSource {
    async fn get(&self, path: &str) -> Result<BTreeMap<String, Bytes>, SourceError> {
        let mut body = json!({ "key": BASE64.encode(path) });
        if path.ends_with('/') {
            // prefix range: range_end is the key with its last byte + 1
            let mut end = path.as_bytes().to_vec();
            if let Some(last) = end.last_mut() {
                *last += 1;
            }
            body["range_end"] = json!(BASE64.encode(end));
        }

        let uri = format!("{}/v3/kv/range", self.endpoint);
        let request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Full::from(Bytes::from(body.to_string())))
            .map_err(|e| SourceError::Other(e.to_string()))?;

        let (status, body) = super::call_kv_api(&self.client, request).await?;
        if status != StatusCode::OK {
            return Err(SourceError::Status(status));
        }

        let rsp: serde_json::Value = serde_json::from_slice(&body)
            .map_err(|e| SourceError::Other(format!("invalid range response: {e}")))?;
        let kvs = rsp.get("kvs").and_then(|v| v.as_array());
        let Some(kvs) = kvs else {
            return Err(SourceError::NotFound);
        };

        let mut content = BTreeMap::new();
        for kv in kvs {
            let (Some(key), Some(value)) = (
                kv.get("key").and_then(|v| v.as_str()),
                kv.get("value").and_then(|v| v.as_str()),
            ) else {
                continue;
            };
            let key = BASE64
                .decode(key)
                .map_err(|e| SourceError::Other(format!("invalid key encoding: {e}")))?;
            let value = BASE64
                .decode(value)
                .map_err(|e| SourceError::Other(format!("invalid value encoding: {e}")))?;
            content.insert(
                String::from_utf8_lossy(&key).to_string(),
                Bytes::from(value),
            );
        }
        if content.is_empty() {
            return Err(SourceError::NotFound);
        }
        Ok(content)
    }
}
