/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

#[cfg(test)]
macro_rules! yaml_doc {
    ($content:expr) => {
        yaml_rust::YamlLoader::load_from_str($content)
            .unwrap()
            .pop()
            .unwrap()
    };
}
