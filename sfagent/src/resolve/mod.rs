/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use async_recursion::async_recursion;
use yaml_rust::{Yaml, YamlLoader, yaml};

mod error;
pub(crate) use error::ResolveError;

mod spec;
use spec::DynamicValueSpec;

mod cache;
pub(crate) use cache::SourceCache;

mod source;
pub(crate) use source::build_registry;

// hard cap on nested dynamic value loads, a spec chain deeper than this
// is treated as a reference cycle
const MAX_RESOLVE_DEPTH: usize = 10;

/// Materialize a configuration tree by expanding every `#from` mapping in
/// place. A tree without `#from` comes back unchanged. Any failure aborts
/// the whole pass.
pub(crate) async fn resolve_doc(doc: &Yaml, cache: &SourceCache) -> Result<Yaml, ResolveError> {
    match resolve_node(doc, cache, 0).await? {
        Resolved::One(v) => Ok(v),
        Resolved::Many(items) => Ok(collapse(items)),
    }
}

/// A resolved node is either a single substitute value, or a run of values
/// to splice into the parent sequence.
enum Resolved {
    One(Yaml),
    Many(Vec<Yaml>),
}

fn collapse(items: Vec<Yaml>) -> Yaml {
    if items.is_empty() {
        Yaml::Null
    } else {
        Yaml::Array(items)
    }
}

#[async_recursion]
async fn resolve_node(
    node: &Yaml,
    cache: &SourceCache,
    depth: usize,
) -> Result<Resolved, ResolveError> {
    match node {
        Yaml::Hash(map) => {
            if let Some(spec) = DynamicValueSpec::parse_map(map)? {
                return resolve_spec(&spec, cache, depth).await;
            }
            let mut out = yaml::Hash::new();
            for (k, v) in map.iter() {
                let resolved = match resolve_node(v, cache, depth).await? {
                    Resolved::One(v) => v,
                    Resolved::Many(items) => collapse(items),
                };
                out.insert(k.clone(), resolved);
            }
            Ok(Resolved::One(Yaml::Hash(out)))
        }
        Yaml::Array(seq) => {
            let mut out = Vec::new();
            for item in seq.iter() {
                match resolve_node(item, cache, depth).await? {
                    Resolved::One(v) => out.push(v),
                    Resolved::Many(items) => out.extend(items),
                }
            }
            Ok(Resolved::One(Yaml::Array(out)))
        }
        _ => Ok(Resolved::One(node.clone())),
    }
}

async fn resolve_spec(
    spec: &DynamicValueSpec,
    cache: &SourceCache,
    depth: usize,
) -> Result<Resolved, ResolveError> {
    if depth >= MAX_RESOLVE_DEPTH {
        return Err(ResolveError::CycleDetected);
    }

    let content = cache.get(&spec.source, &spec.path, spec.optional).await?;

    let mut items = Vec::new();
    for (sub_path, bytes) in content.iter() {
        let text = std::str::from_utf8(bytes).map_err(|e| ResolveError::Deserialization {
            path: sub_path.clone(),
            reason: e.to_string(),
        })?;
        if spec.raw {
            items.push(Yaml::String(text.to_string()));
            continue;
        }
        let docs =
            YamlLoader::load_from_str(text).map_err(|e| ResolveError::Deserialization {
                path: sub_path.clone(),
                reason: e.to_string(),
            })?;
        // loaded content may itself carry dynamic values
        for doc in &docs {
            match resolve_node(doc, cache, depth + 1).await? {
                Resolved::One(v) => items.push(v),
                Resolved::Many(vs) => items.extend(vs),
            }
        }
    }

    if items.is_empty() {
        if let Some(default) = &spec.default {
            items.push(default.clone());
        }
    }

    if spec.flatten {
        let mut flat = Vec::new();
        for item in items {
            match item {
                Yaml::Array(seq) => flat.extend(seq),
                other => flat.push(other),
            }
        }
        return Ok(Resolved::Many(flat));
    }

    match items.len() {
        0 => Ok(Resolved::Many(Vec::new())),
        1 => Ok(Resolved::One(items.swap_remove(0))),
        _ => Ok(Resolved::One(Yaml::Array(items))),
    }
}
