/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::path::Path;

use anyhow::anyhow;
use yaml_rust::{Yaml, YamlLoader};

pub fn load_doc(path: &Path) -> anyhow::Result<Vec<Yaml>> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read file {}: {e}", path.display()))?;
    YamlLoader::load_from_str(&contents)
        .map_err(|e| anyhow!("invalid yaml file {}: {e}", path.display()))
}
