/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::collections::BTreeMap;

use anyhow::anyhow;
use async_trait::async_trait;
use bytes::Bytes;
use http::{Method, Request, StatusCode};
use http_body_util::Full;
use yaml_rust::Yaml;

use super::ConfigSource;
use crate::httpclient::HttpsClient;
use crate::resolve::error::SourceError;

/// Vault KV v1 source. The secret's data map is returned as one JSON blob
/// under the requested path, which decodes fine as YAML downstream.
pub(super) struct VaultSource {
    endpoint: String,
    token: String,
    client: HttpsClient,
}

impl VaultSource {
    pub(super) fn new(
        endpoint: impl Into<String>,
        token: impl Into<String>,
        client: HttpsClient,
    ) -> Self {
        VaultSource {
            endpoint: endpoint.into(),
            token: token.into(),
            client,
        }
    }

    pub(super) fn parse(value: &Yaml, client: HttpsClient) -> anyhow::Result<Self> {
        let Yaml::Hash(map) = value else {
            return Err(anyhow!("the vault source config should be a map"));
        };
        let mut endpoint = String::new();
        let mut token = String::new();
        sf_yaml::foreach_kv(map, |k, v| match sf_yaml::key::normalize(k).as_str() {
            "vaultaddr" | "endpoint" => {
                endpoint = sf_yaml::value::as_string(v)?;
                Ok(())
            }
            "vaulttoken" | "token" => {
                token = sf_yaml::value::as_string(v)?;
                Ok(())
            }
            "cachettl" => Ok(()),
            _ => Err(anyhow!("invalid key {k}")),
        })?;
        if endpoint.is_empty() {
            return Err(anyhow!("no vaultAddr set"));
        }
        if token.is_empty() {
            return Err(anyhow!("no vaultToken set"));
        }
        while endpoint.ends_with('/') {
            endpoint.pop();
        }
        Ok(VaultSource {
            endpoint,
            token,
            client,
        })
    }
}

#[async_trait]
impl ConfigSource for VaultSource {
    async fn get(&self, path: &str) -> Result<BTreeMap<String, Bytes>, SourceError> {
        let uri = format!("{}/v1/{}", self.endpoint, path.trim_start_matches('/'));
        let request = Request::builder()
            .method(Method::GET)
            .uri(uri)
            .header("X-Vault-Token", self.token.as_str())
            .body(Full::from(Bytes::new()))
            .map_err(|e| SourceError::Other(e.to_string()))?;

        let (status, body) = super::call_kv_api(&self.client, request).await?;
        match status {
            StatusCode::OK => {}
            StatusCode::NOT_FOUND => return Err(SourceError::NotFound),
            _ => return Err(SourceError::Status(status)),
        }

        let rsp: serde_json::Value = serde_json::from_slice(&body)
            .map_err(|e| SourceError::Other(format!("invalid secret response: {e}")))?;
        let Some(data) = rsp.get("data").filter(|d| d.is_object()) else {
            return Err(SourceError::Other(
                "secret response has no data map".to_string(),
            ));
        };

        let encoded = serde_json::to_vec(data)
            .map_err(|e| SourceError::Other(format!("failed to encode secret data: {e}")))?;
        Ok(BTreeMap::from([(path.to_string(), Bytes::from(encoded))]))
    }
}
