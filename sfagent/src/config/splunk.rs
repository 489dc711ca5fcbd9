/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use anyhow::anyhow;
use yaml_rust::Yaml;

/// Optional secondary sink: the same batches are also shipped to a Splunk
/// HTTP Event Collector endpoint.
#[derive(Clone)]
pub(crate) struct SplunkConfig {
    pub(crate) url: String,
    pub(crate) token: String,
}

impl SplunkConfig {
    pub(crate) fn parse(value: &Yaml) -> anyhow::Result<Self> {
        let Yaml::Hash(map) = value else {
            return Err(anyhow!("the splunk section should be a map"));
        };
        let mut url = String::new();
        let mut token = String::new();
        sf_yaml::foreach_kv(map, |k, v| match sf_yaml::key::normalize(k).as_str() {
            "url" => {
                url = sf_yaml::value::as_string(v)?;
                Ok(())
            }
            "token" => {
                token = sf_yaml::value::as_string(v)?;
                Ok(())
            }
            _ => Err(anyhow!("invalid key {k}")),
        })?;
        if url.is_empty() {
            return Err(anyhow!("no url set"));
        }
        if token.is_empty() {
            return Err(anyhow!("no token set"));
        }
        Ok(SplunkConfig { url, token })
    }
}
