/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use yaml_rust::Yaml;

use super::error::SourceError;
use crate::httpclient::HttpsClient;

mod file;
use file::FileSource;

mod env;
use env::EnvSource;

mod consul;
use consul::ConsulSource;

mod vault;
use vault::VaultSource;

mod etcd;
use etcd::EtcdSource;

mod zookeeper;
use zookeeper::ZookeeperSource;

const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60);

/// Shared request helper for the KV store drivers.
pub(super) async fn call_kv_api(
    client: &HttpsClient,
    request: http::Request<http_body_util::Full<Bytes>>,
) -> Result<(http::StatusCode, Bytes), SourceError> {
    use http_body_util::BodyExt;

    let rsp = client
        .request(request)
        .await
        .map_err(|e| SourceError::Other(e.to_string()))?;
    let status = rsp.status();
    let body = rsp
        .into_body()
        .collect()
        .await
        .map_err(|e| SourceError::Other(e.to_string()))?
        .to_bytes();
    Ok((status, body))
}

/// A named provider of configuration bytes. `get` returns one entry for a
/// single blob, multiple entries when the path denotes a glob or tree.
#[async_trait]
pub(crate) trait ConfigSource: Send + Sync {
    async fn get(&self, path: &str) -> Result<BTreeMap<String, Bytes>, SourceError>;

    /// Change notification stream for `path`. None when the driver has no
    /// watch capability.
    fn watch(&self, _path: &str, _cancel: CancellationToken) -> Option<mpsc::Receiver<()>> {
        None
    }
}

pub(crate) struct RegisteredSource {
    pub(crate) name: String,
    pub(crate) source: Arc<dyn ConfigSource>,
    pub(crate) ttl: Duration,
}

/// The source names registered with or without a `configSources` section.
/// Referencing any other name is an unconfigured-source error.
const DEFAULT_SOURCE_NAMES: &[&str] = &["file", "env", "consul", "vault", "etcd", "zookeeper"];

/// Build the source registry from the `configSources` section. Every
/// default source name stays registered, the section only overrides their
/// settings.
pub(crate) fn build_registry(
    value: Option<&Yaml>,
    client: &HttpsClient,
) -> anyhow::Result<Vec<RegisteredSource>> {
    let mut registry: Vec<RegisteredSource> = Vec::new();

    if let Some(value) = value {
        if let Yaml::Hash(map) = value {
            for (k, v) in map.iter() {
                let name = sf_yaml::key::normalize(
                    k.as_str()
                        .ok_or_else(|| anyhow!("source names should be strings"))?,
                );
                let registered = build_source(&name, v, client)
                    .context(format!("invalid config for source {name}"))?;
                registry.push(registered);
            }
        } else {
            return Err(anyhow!("the configSources section should be a map"));
        }
    }

    for name in DEFAULT_SOURCE_NAMES {
        if !registry.iter().any(|r| r.name == *name) {
            registry.push(RegisteredSource {
                name: name.to_string(),
                source: default_source(name, client),
                ttl: DEFAULT_CACHE_TTL,
            });
        }
    }

    Ok(registry)
}

fn default_source(name: &str, client: &HttpsClient) -> Arc<dyn ConfigSource> {
    match name {
        "env" => Arc::new(EnvSource {}),
        "consul" => Arc::new(ConsulSource::new("http://127.0.0.1:8500", client.clone())),
        "vault" => {
            let endpoint = std::env::var("VAULT_ADDR")
                .unwrap_or_else(|_| "https://127.0.0.1:8200".to_string());
            let token = std::env::var("VAULT_TOKEN").unwrap_or_default();
            Arc::new(VaultSource::new(endpoint, token, client.clone()))
        }
        "etcd" => Arc::new(EtcdSource::new("http://127.0.0.1:2379", client.clone())),
        "zookeeper" => Arc::new(ZookeeperSource::default()),
        _ => Arc::new(FileSource::default()),
    }
}

fn build_source(name: &str, value: &Yaml, client: &HttpsClient) -> anyhow::Result<RegisteredSource> {
    let mut ttl = DEFAULT_CACHE_TTL;
    if let Yaml::Hash(map) = value {
        sf_yaml::foreach_kv(map, |k, v| {
            if sf_yaml::key::normalize(k) == "cachettl" {
                ttl = sf_yaml::humanize::as_duration(v)?;
            }
            Ok(())
        })?;
    }

    let source: Arc<dyn ConfigSource> = match name {
        "file" => Arc::new(FileSource::parse(value)?),
        "env" => Arc::new(EnvSource {}),
        "consul" => Arc::new(ConsulSource::parse(value, client.clone())?),
        "vault" => Arc::new(VaultSource::parse(value, client.clone())?),
        "etcd" => Arc::new(EtcdSource::parse(value, client.clone())?),
        "zookeeper" => Arc::new(ZookeeperSource::parse(value)?),
        _ => return Err(anyhow!("unknown config source {name}")),
    };

    Ok(RegisteredSource {
        name: name.to_string(),
        source,
        ttl,
    })
}
