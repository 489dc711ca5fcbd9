/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::hash::{BuildHasher, Hash, Hasher};

use foldhash::fast::FixedState;
use serde_json::{Value, json};

/// natural key of a dimension update, one in-flight request per key
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DimensionKey {
    pub name: String,
    pub value: String,
}

impl fmt::Display for DimensionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.value)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DimensionUpdate {
    pub name: String,
    pub value: String,
    pub properties: BTreeMap<String, String>,
    pub tags: BTreeSet<String>,
    pub merge_into_existing: bool,
}

impl DimensionUpdate {
    pub fn key(&self) -> DimensionKey {
        DimensionKey {
            name: self.name.clone(),
            value: self.value.clone(),
        }
    }

    /// Stable in-process hash over the canonical encoding. The maps are
    /// ordered, so equal updates always hash equal.
    pub fn fingerprint(&self) -> u64 {
        let mut h = FixedState::with_seed(0).build_hasher();
        self.name.hash(&mut h);
        self.value.hash(&mut h);
        for (k, v) in &self.properties {
            k.hash(&mut h);
            v.hash(&mut h);
        }
        for t in &self.tags {
            t.hash(&mut h);
        }
        self.merge_into_existing.hash(&mut h);
        h.finish()
    }

    pub fn validate(&self) -> Result<(), &'static str> {
        if self.name.is_empty() {
            return Err("empty dimension name");
        }
        if self.value.is_empty() {
            return Err("empty dimension value");
        }
        if name_needs_escape(&self.name) || name_needs_escape(&self.value) {
            return Err("dimension name or value is not url safe");
        }
        for k in self.properties.keys() {
            if k.is_empty() {
                return Err("empty property key");
            }
        }
        Ok(())
    }

    /// PATCH merges into the server side state, PUT replaces it
    pub(crate) fn request_path(&self) -> String {
        if self.merge_into_existing {
            format!("/v2/dimension/{}/{}/_update", self.name, self.value)
        } else {
            format!("/v2/dimension/{}/{}", self.name, self.value)
        }
    }

    pub(crate) fn encode_body(&self) -> Value {
        json!({
            "key": self.name,
            "value": self.value,
            "customProperties": self.properties,
            "tags": self.tags,
        })
    }
}

fn name_needs_escape(s: &str) -> bool {
    s.bytes()
        .any(|c| !(c.is_ascii_alphanumeric() || matches!(c, b'.' | b'_' | b'-' | b':')))
}
