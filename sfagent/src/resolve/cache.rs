/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use ahash::AHashMap;
use bytes::Bytes;
use foldhash::fast::FixedState;
use log::debug;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::error::{ResolveError, SourceError};
use super::source::{ConfigSource, RegisteredSource};

struct CachedContent {
    content: Arc<BTreeMap<String, Bytes>>,
    fetched: Instant,
}

struct SourceSlot {
    source: Arc<dyn ConfigSource>,
    ttl: Duration,
    // readers swap the whole Arc, never see a half updated mapping
    cache: RwLock<AHashMap<String, CachedContent>>,
}

/// Mediates source lookups for one resolution pass, caching path content
/// per source until the TTL expires or a watch event invalidates it. Also
/// remembers which (source, path) pairs were used, so the runtime can set
/// up change watchers afterwards.
pub(crate) struct SourceCache {
    slots: HashMap<String, SourceSlot, FixedState>,
    used: Mutex<Vec<(String, String)>>,
}

impl SourceCache {
    pub(crate) fn new(registry: Vec<RegisteredSource>) -> Self {
        let mut slots = HashMap::with_hasher(FixedState::with_seed(0));
        for r in registry {
            slots.insert(
                r.name,
                SourceSlot {
                    source: r.source,
                    ttl: r.ttl,
                    cache: RwLock::new(AHashMap::new()),
                },
            );
        }
        SourceCache {
            slots,
            used: Mutex::new(Vec::new()),
        }
    }

    pub(crate) async fn get(
        &self,
        source: &str,
        path: &str,
        optional: bool,
    ) -> Result<Arc<BTreeMap<String, Bytes>>, ResolveError> {
        let Some(slot) = self.slots.get(source) else {
            return Err(ResolveError::UnconfiguredSource(source.to_string()));
        };

        {
            let mut used = self.used.lock().unwrap();
            let pair = (source.to_string(), path.to_string());
            if !used.contains(&pair) {
                used.push(pair);
            }
        }

        {
            let cache = slot.cache.read().unwrap();
            if let Some(cached) = cache.get(path) {
                if cached.fetched.elapsed() < slot.ttl {
                    return Ok(cached.content.clone());
                }
            }
        }

        let content = match slot.source.get(path).await {
            Ok(content) => Arc::new(content),
            Err(SourceError::NotFound) => {
                // a miss is never cached: content appearing later must be
                // picked up, and a later non-optional lookup must still fail
                return if optional {
                    Ok(Arc::new(BTreeMap::new()))
                } else {
                    Err(ResolveError::NotFound {
                        source_name: source.to_string(),
                        path: path.to_string(),
                    })
                };
            }
            Err(e) => {
                return Err(ResolveError::Source {
                    source_name: source.to_string(),
                    path: path.to_string(),
                    reason: e.to_string(),
                });
            }
        };
        debug!("fetched {} path(s) from {source}:{path}", content.len());

        let mut cache = slot.cache.write().unwrap();
        cache.insert(
            path.to_string(),
            CachedContent {
                content: content.clone(),
                fetched: Instant::now(),
            },
        );
        Ok(content)
    }

    #[allow(unused)]
    pub(crate) fn invalidate(&self, source: &str, path: &str) {
        if let Some(slot) = self.slots.get(source) {
            slot.cache.write().unwrap().remove(path);
        }
    }

    pub(crate) fn used_paths(&self) -> Vec<(String, String)> {
        self.used.lock().unwrap().clone()
    }

    /// Watch stream for a used path, when the driver supports watching.
    pub(crate) fn watch(
        &self,
        source: &str,
        path: &str,
        cancel: CancellationToken,
    ) -> Option<mpsc::Receiver<()>> {
        self.slots.get(source)?.source.watch(path, cancel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolve::source::build_registry;
    use std::io::Write;

    fn cache() -> SourceCache {
        let client = crate::httpclient::build_https_client().unwrap();
        SourceCache::new(build_registry(None, &client).unwrap())
    }

    #[tokio::test]
    async fn unknown_source_is_rejected() {
        let cache = cache();
        assert!(matches!(
            cache.get("redis", "/a/b", false).await,
            Err(ResolveError::UnconfiguredSource(_))
        ));
    }

    #[tokio::test]
    async fn optional_miss_is_empty() {
        let cache = cache();
        let content = cache
            .get("env", "SFAGENT_SURELY_UNSET_VARIABLE", true)
            .await
            .unwrap();
        assert!(content.is_empty());

        assert!(matches!(
            cache.get("env", "SFAGENT_SURELY_UNSET_VARIABLE", false).await,
            Err(ResolveError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn miss_is_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("later.yaml");
        let path = path.to_str().unwrap().to_string();

        let cache = cache();
        let content = cache.get("file", &path, true).await.unwrap();
        assert!(content.is_empty());

        // the optional miss must not satisfy a non-optional lookup
        assert!(matches!(
            cache.get("file", &path, false).await,
            Err(ResolveError::NotFound { .. })
        ));

        // nor hide content that shows up afterwards
        std::fs::write(&path, b"v1").unwrap();
        let content = cache.get("file", &path, false).await.unwrap();
        assert_eq!(content.get(&path).unwrap().as_ref(), b"v1");
    }

    #[tokio::test]
    async fn cached_content_is_reused() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"v1").unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let cache = cache();
        let first = cache.get("file", &path, false).await.unwrap();
        assert_eq!(first.get(&path).unwrap().as_ref(), b"v1");

        // rewrite the file, the cached content must still be served
        std::fs::write(file.path(), b"v2").unwrap();
        let second = cache.get("file", &path, false).await.unwrap();
        assert_eq!(second.get(&path).unwrap().as_ref(), b"v1");

        cache.invalidate("file", &path);
        let third = cache.get("file", &path, false).await.unwrap();
        assert_eq!(third.get(&path).unwrap().as_ref(), b"v2");

        assert_eq!(cache.used_paths(), vec![("file".to_string(), path)]);
    }
}
