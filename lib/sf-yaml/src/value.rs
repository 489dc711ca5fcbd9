/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::num::NonZeroUsize;
use std::str::FromStr;

use anyhow::anyhow;
use yaml_rust::Yaml;

pub fn as_usize(v: &Yaml) -> anyhow::Result<usize> {
    match v {
        Yaml::String(s) => Ok(usize::from_str(s)?),
        Yaml::Integer(i) => Ok(usize::try_from(*i)?),
        _ => Err(anyhow!(
            "yaml value type for 'usize' should be 'string' or 'integer'"
        )),
    }
}

pub fn as_nonzero_usize(v: &Yaml) -> anyhow::Result<NonZeroUsize> {
    let u = as_usize(v)?;
    NonZeroUsize::new(u).ok_or_else(|| anyhow!("value should be nonzero"))
}

pub fn as_string(v: &Yaml) -> anyhow::Result<String> {
    match v {
        Yaml::String(s) => Ok(s.to_string()),
        Yaml::Integer(i) => Ok(i.to_string()),
        Yaml::Real(s) => Ok(s.to_string()),
        _ => Err(anyhow!(
            "yaml value type for 'string' should be 'string' / 'integer' / 'real'"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn t_usize() {
        assert_eq!(as_usize(&Yaml::Integer(1024)).unwrap(), 1024);
        assert_eq!(as_usize(&Yaml::String("1024".to_string())).unwrap(), 1024);
        assert!(as_usize(&Yaml::Integer(-1)).is_err());
        assert!(as_usize(&Yaml::Boolean(true)).is_err());
    }

    #[test]
    fn t_nonzero_usize() {
        assert_eq!(
            as_nonzero_usize(&Yaml::Integer(10)).unwrap(),
            NonZeroUsize::new(10).unwrap()
        );
        assert!(as_nonzero_usize(&Yaml::Integer(0)).is_err());
    }

    #[test]
    fn t_string() {
        assert_eq!(
            as_string(&Yaml::String("v".to_string())).unwrap(),
            "v".to_string()
        );
        assert_eq!(as_string(&Yaml::Integer(3)).unwrap(), "3".to_string());
        assert!(as_string(&Yaml::Null).is_err());
    }
}
