/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

use anyhow::{Context, anyhow};
use arc_swap::ArcSwapOption;
use log::{debug, info};
use tokio_util::sync::CancellationToken;
use yaml_rust::{Yaml, yaml};

use crate::resolve::{self, SourceCache};

mod writer;
pub(crate) use writer::WriterConfig;

mod splunk;
pub(crate) use splunk::SplunkConfig;

static CONFIG_FILE: OnceLock<PathBuf> = OnceLock::new();
static AGENT_CONFIG: ArcSwapOption<AgentConfig> = ArcSwapOption::const_empty();
static WATCH_GEN: Mutex<Option<CancellationToken>> = Mutex::new(None);

pub(crate) struct AgentConfig {
    pub(crate) writer: WriterConfig,
    pub(crate) splunk: Option<SplunkConfig>,
}

impl AgentConfig {
    fn parse(value: &Yaml) -> anyhow::Result<Self> {
        let Yaml::Hash(map) = value else {
            return Err(anyhow!("the root config node should be a map"));
        };
        let mut writer = None;
        let mut splunk = None;
        sf_yaml::foreach_kv(map, |k, v| match sf_yaml::key::normalize(k).as_str() {
            "writer" => {
                writer = Some(WriterConfig::parse(v).context("invalid writer config")?);
                Ok(())
            }
            "splunk" => {
                splunk = Some(SplunkConfig::parse(v).context("invalid splunk config")?);
                Ok(())
            }
            // sections consumed by collaborators outside this build
            _ => {
                debug!("ignoring config section {k}");
                Ok(())
            }
        })?;
        Ok(AgentConfig {
            writer: writer.unwrap_or_default(),
            splunk,
        })
    }
}

pub fn set_config_file(path: &Path) -> anyhow::Result<()> {
    if !path.is_file() {
        return Err(anyhow!("{} is not a regular file", path.display()));
    }
    let path = path
        .canonicalize()
        .context(format!("invalid config file path {}", path.display()))?;
    CONFIG_FILE
        .set(path)
        .map_err(|_| anyhow!("the config file has already been set"))
}

pub(crate) fn config_file() -> Option<&'static Path> {
    CONFIG_FILE.get().map(|p| p.as_path())
}

pub(crate) fn get() -> Option<Arc<AgentConfig>> {
    AGENT_CONFIG.load_full()
}

/// Read, resolve and install the agent config. Called at startup and again
/// on each reload trigger.
pub(crate) async fn load() -> anyhow::Result<()> {
    let Some(path) = config_file() else {
        return Err(anyhow!("no config file set"));
    };
    let mut docs = tokio::task::spawn_blocking(move || sf_yaml::load_doc(path))
        .await
        .map_err(|e| anyhow!("failed to join config load task: {e}"))??;
    if docs.is_empty() {
        return Err(anyhow!("no yaml document found in {}", path.display()));
    }

    let (config, cache) = resolve_and_parse(docs.remove(0))
        .await
        .context(format!("failed to load config file {}", path.display()))?;

    AGENT_CONFIG.store(Some(Arc::new(config)));
    spawn_watchers(cache);
    info!("loaded config file {}", path.display());
    Ok(())
}

async fn resolve_and_parse(doc: Yaml) -> anyhow::Result<(AgentConfig, SourceCache)> {
    let Yaml::Hash(root) = doc else {
        return Err(anyhow!("the root yaml node should be a map"));
    };

    // the configSources section must come out before resolution, dynamic
    // values inside it would be self referential
    let mut sources_value = None;
    let mut rest = yaml::Hash::new();
    for (k, v) in root.into_iter() {
        match &k {
            Yaml::String(key) if sf_yaml::key::normalize(key) == "configsources" => {
                sources_value = Some(v);
            }
            _ => {
                rest.insert(k, v);
            }
        }
    }

    let client = crate::httpclient::build_https_client()?;
    let registry = resolve::build_registry(sources_value.as_ref(), &client)
        .context("invalid configSources section")?;
    let cache = SourceCache::new(registry);

    let resolved = resolve::resolve_doc(&Yaml::Hash(rest), &cache)
        .await
        .context("failed to resolve dynamic config values")?;

    let config = AgentConfig::parse(&resolved)?;
    Ok((config, cache))
}

/// Start a watcher task per watch-capable (source, path) used during the
/// load. A change event runs the same reload path as SIGHUP. Watchers of
/// the previous load are cancelled first.
fn spawn_watchers(cache: SourceCache) {
    let token = CancellationToken::new();
    {
        let mut guard = WATCH_GEN.lock().unwrap();
        if let Some(old) = guard.replace(token.clone()) {
            old.cancel();
        }
    }

    for (source, path) in cache.used_paths() {
        let Some(mut rx) = cache.watch(&source, &path, token.clone()) else {
            continue;
        };
        let token = token.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    r = rx.recv() => {
                        match r {
                            Some(()) => {
                                info!("content of {source}:{path} changed, reloading");
                                crate::signal::do_reload().await;
                            }
                            None => break,
                        }
                    }
                }
            }
        });
    }
}

pub(crate) fn stop_watchers() {
    if let Some(token) = WATCH_GEN.lock().unwrap().take() {
        token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use yaml_rust::YamlLoader;

    async fn load_str(contents: &str) -> anyhow::Result<(AgentConfig, SourceCache)> {
        let doc = YamlLoader::load_from_str(contents).unwrap().remove(0);
        resolve_and_parse(doc).await
    }

    #[tokio::test]
    async fn full_config_with_dynamic_value() {
        let contents = "\
writer:
  maxRequests: 2
  dimensionUpdateBuffer: 1s
  signalFxAccessToken:
    '#from': \"env:SFAGENT_SURELY_UNSET_VARIABLE\"
    optional: true
    default: from-default
splunk:
  url: https://splunk.example.com:8088
  token: hec-token
monitors:
  - type: cpu
";
        let (config, _cache) = load_str(contents).await.unwrap();
        assert_eq!(config.writer.max_requests, 2);
        assert_eq!(
            config.writer.dimension_update_buffer,
            Duration::from_secs(1)
        );
        assert_eq!(config.writer.access_token.as_deref(), Some("from-default"));
        let splunk = config.splunk.unwrap();
        assert_eq!(splunk.url, "https://splunk.example.com:8088");
    }

    #[tokio::test]
    async fn empty_config_gets_defaults() {
        let (config, _cache) = load_str("writer: {}\n").await.unwrap();
        assert_eq!(config.writer.max_requests, 10);
        assert!(config.splunk.is_none());
    }

    #[tokio::test]
    async fn source_section_is_parsed() {
        let contents = "\
configSources:
  zookeeper:
    endpoint: 127.0.0.1:2181
writer: {}
";
        assert!(load_str(contents).await.is_ok());
    }

    #[tokio::test]
    async fn unknown_config_source_is_rejected() {
        let contents = "\
configSources:
  redis:
    endpoint: 127.0.0.1:6379
";
        assert!(load_str(contents).await.is_err());
    }
}
