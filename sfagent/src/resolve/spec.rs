/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use yaml_rust::Yaml;
use yaml_rust::yaml::Hash;

use super::error::ResolveError;

pub(crate) const FROM_KEY: &str = "#from";

/// A mapping node carrying a `#from` key, parsed into its recognized
/// options. The `#from` string is `source ":" path`; with no colon the
/// source defaults to `file`.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct DynamicValueSpec {
    pub(crate) source: String,
    pub(crate) path: String,
    pub(crate) flatten: bool,
    pub(crate) optional: bool,
    pub(crate) raw: bool,
    pub(crate) default: Option<Yaml>,
}

impl DynamicValueSpec {
    /// Returns Ok(None) when the mapping has no `#from` key and is a plain
    /// config node.
    pub(crate) fn parse_map(map: &Hash) -> Result<Option<DynamicValueSpec>, ResolveError> {
        let from_key = Yaml::String(FROM_KEY.to_string());
        let Some(from) = map.get(&from_key) else {
            return Ok(None);
        };
        let Yaml::String(from) = from else {
            return Err(ResolveError::InvalidSpec(
                "value of '#from' should be a string".to_string(),
            ));
        };

        let (source, path) = match from.split_once(':') {
            Some((source, path)) => (source.to_string(), path.to_string()),
            None => ("file".to_string(), from.to_string()),
        };
        if path.is_empty() {
            return Err(ResolveError::InvalidSpec(
                "value of '#from' has an empty path".to_string(),
            ));
        }

        let mut spec = DynamicValueSpec {
            source,
            path,
            flatten: false,
            optional: false,
            raw: false,
            default: None,
        };

        for (k, v) in map.iter() {
            let Yaml::String(k) = k else {
                return Err(ResolveError::InvalidSpec(
                    "keys of a dynamic value spec should be strings".to_string(),
                ));
            };
            match k.as_str() {
                FROM_KEY => {}
                "flatten" => spec.flatten = as_bool(v, "flatten")?,
                "optional" => spec.optional = as_bool(v, "optional")?,
                "raw" => spec.raw = as_bool(v, "raw")?,
                "default" => spec.default = Some(v.clone()),
                _ => {
                    return Err(ResolveError::InvalidSpec(format!(
                        "unrecognized key '{k}' next to '#from'"
                    )));
                }
            }
        }

        Ok(Some(spec))
    }
}

fn as_bool(v: &Yaml, key: &str) -> Result<bool, ResolveError> {
    match v {
        Yaml::Boolean(b) => Ok(*b),
        _ => Err(ResolveError::InvalidSpec(format!(
            "value of '{key}' should be a boolean"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use yaml_rust::YamlLoader;

    fn map_of(s: &str) -> Hash {
        let docs = YamlLoader::load_from_str(s).unwrap();
        match &docs[0] {
            Yaml::Hash(h) => h.clone(),
            _ => panic!("fixture is not a mapping"),
        }
    }

    #[test]
    fn plain_map_is_not_a_spec() {
        let map = map_of("a: 1\nb: 2");
        assert!(DynamicValueSpec::parse_map(&map).unwrap().is_none());
    }

    #[test]
    fn source_defaults_to_file() {
        let map = map_of("'#from': /etc/motd");
        let spec = DynamicValueSpec::parse_map(&map).unwrap().unwrap();
        assert_eq!(spec.source, "file");
        assert_eq!(spec.path, "/etc/motd");
        assert!(!spec.flatten);
    }

    #[test]
    fn options_are_parsed() {
        let map = map_of("'#from': \"env:FOO\"\noptional: true\ndefault: anon");
        let spec = DynamicValueSpec::parse_map(&map).unwrap().unwrap();
        assert_eq!(spec.source, "env");
        assert_eq!(spec.path, "FOO");
        assert!(spec.optional);
        assert_eq!(spec.default, Some(Yaml::String("anon".to_string())));
    }

    #[test]
    fn unknown_key_is_rejected() {
        let map = map_of("'#from': \"env:FOO\"\nsplice: true");
        assert!(matches!(
            DynamicValueSpec::parse_map(&map),
            Err(ResolveError::InvalidSpec(_))
        ));
    }
}
