/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::Bytes;

use super::ConfigSource;
use crate::resolve::error::SourceError;

/// Process environment source. The path is the variable name.
pub(super) struct EnvSource {}

#[async_trait]
impl ConfigSource for EnvSource {
    async fn get(&self, path: &str) -> Result<BTreeMap<String, Bytes>, SourceError> {
        match std::env::var(path) {
            Ok(value) => Ok(BTreeMap::from([(
                path.to_string(),
                Bytes::from(value.into_bytes()),
            )])),
            Err(std::env::VarError::NotPresent) => Err(SourceError::NotFound),
            Err(e) => Err(SourceError::Other(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn present_and_missing() {
        let source = EnvSource {};
        // PATH is always set in the test environment
        let content = source.get("PATH").await.unwrap();
        assert_eq!(content.len(), 1);

        assert!(matches!(
            source.get("SFAGENT_SURELY_UNSET_VARIABLE").await,
            Err(SourceError::NotFound)
        ));
    }
}
