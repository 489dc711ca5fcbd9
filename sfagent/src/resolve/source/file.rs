/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::anyhow;
use async_trait::async_trait;
use bytes::Bytes;
use log::debug;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use yaml_rust::Yaml;

use super::ConfigSource;
use crate::resolve::error::SourceError;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Local file source. The final path component may contain `*` and `?`
/// wildcards, in which case all matching files in the directory are
/// returned. Watching is mtime polling.
pub(super) struct FileSource {
    poll_interval: Duration,
}

impl Default for FileSource {
    fn default() -> Self {
        FileSource {
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl FileSource {
    pub(super) fn parse(value: &Yaml) -> anyhow::Result<Self> {
        let mut source = FileSource::default();
        match value {
            Yaml::Hash(map) => {
                sf_yaml::foreach_kv(map, |k, v| match sf_yaml::key::normalize(k).as_str() {
                    "pollrateseconds" | "poll_interval" => {
                        source.poll_interval = sf_yaml::humanize::as_duration(v)?;
                        Ok(())
                    }
                    "cachettl" => Ok(()),
                    _ => Err(anyhow!("invalid key {k}")),
                })?;
                Ok(source)
            }
            Yaml::Null => Ok(source),
            _ => Err(anyhow!("the file source config should be a map")),
        }
    }
}

#[async_trait]
impl ConfigSource for FileSource {
    async fn get(&self, path: &str) -> Result<BTreeMap<String, Bytes>, SourceError> {
        let mut content = BTreeMap::new();
        for file in expand_paths(path).await? {
            let data = tokio::fs::read(&file).await?;
            content.insert(file.to_string_lossy().to_string(), Bytes::from(data));
        }
        Ok(content)
    }

    fn watch(&self, path: &str, cancel: CancellationToken) -> Option<mpsc::Receiver<()>> {
        let (tx, rx) = mpsc::channel(1);
        let path = path.to_string();
        let interval = self.poll_interval;
        tokio::spawn(async move {
            let mut last = snapshot_mtimes(&path).await;
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                let now = snapshot_mtimes(&path).await;
                if now != last {
                    debug!("files under {path} changed");
                    last = now;
                    if tx.try_send(()).is_err() && tx.is_closed() {
                        break;
                    }
                }
            }
        });
        Some(rx)
    }
}

/// Expand a path whose final component may contain wildcards into the
/// sorted list of existing files it denotes.
async fn expand_paths(path: &str) -> Result<Vec<PathBuf>, SourceError> {
    let path = Path::new(path);
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return Err(SourceError::Other(format!(
            "invalid file path {}",
            path.display()
        )));
    };

    if !name.contains(['*', '?']) {
        return match tokio::fs::metadata(path).await {
            Ok(_) => Ok(vec![path.to_path_buf()]),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(SourceError::NotFound),
            Err(e) => Err(SourceError::Io(e)),
        };
    }

    let dir = path.parent().unwrap_or(Path::new("."));
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Err(SourceError::NotFound),
        Err(e) => return Err(SourceError::Io(e)),
    };

    let mut matched = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if let Some(file_name) = entry.file_name().to_str() {
            if wildcard_match(name, file_name) && entry.file_type().await?.is_file() {
                matched.push(entry.path());
            }
        }
    }
    if matched.is_empty() {
        return Err(SourceError::NotFound);
    }
    matched.sort();
    Ok(matched)
}

async fn snapshot_mtimes(path: &str) -> BTreeMap<PathBuf, SystemTime> {
    let mut mtimes = BTreeMap::new();
    let Ok(files) = expand_paths(path).await else {
        return mtimes;
    };
    for file in files {
        if let Ok(meta) = tokio::fs::metadata(&file).await {
            if let Ok(mtime) = meta.modified() {
                mtimes.insert(file, mtime);
            }
        }
    }
    mtimes
}

/// `*` matches any run of characters, `?` exactly one.
pub(super) fn wildcard_match(pattern: &str, name: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let n: Vec<char> = name.chars().collect();
    let mut pi = 0;
    let mut ni = 0;
    let mut star: Option<usize> = None;
    let mut mark = 0;
    while ni < n.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == n[ni]) {
            pi += 1;
            ni += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some(pi);
            mark = ni;
            pi += 1;
        } else if let Some(s) = star {
            pi = s + 1;
            mark += 1;
            ni = mark;
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn wildcard() {
        assert!(wildcard_match("*", "anything"));
        assert!(wildcard_match("*.yaml", "svc.yaml"));
        assert!(!wildcard_match("*.yaml", "svc.yml"));
        assert!(wildcard_match("svc-?.yaml", "svc-1.yaml"));
        assert!(!wildcard_match("svc-?.yaml", "svc-10.yaml"));
        assert!(wildcard_match("a*b*c", "aXbYc"));
        assert!(!wildcard_match("a*b*c", "aXbY"));
    }

    #[tokio::test]
    async fn glob_get() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a.yaml", "b.yaml", "c.txt"] {
            let mut f = std::fs::File::create(dir.path().join(name)).unwrap();
            f.write_all(b"x: 1\n").unwrap();
        }

        let source = FileSource::default();
        let pattern = dir.path().join("*.yaml");
        let content = source.get(pattern.to_str().unwrap()).await.unwrap();
        assert_eq!(content.len(), 2);

        let missing = dir.path().join("*.json");
        assert!(matches!(
            source.get(missing.to_str().unwrap()).await,
            Err(SourceError::NotFound)
        ));
    }

    #[tokio::test]
    async fn single_file_get() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"hello").unwrap();

        let source = FileSource::default();
        let path = file.path().to_str().unwrap();
        let content = source.get(path).await.unwrap();
        assert_eq!(content.len(), 1);
        assert_eq!(content.get(path).unwrap().as_ref(), b"hello");
    }
}
