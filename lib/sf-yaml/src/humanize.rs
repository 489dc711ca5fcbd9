/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::str::FromStr;
use std::time::Duration;

use anyhow::anyhow;
use humanize_rs::ParseError;
use humanize_rs::bytes::Bytes;
use yaml_rust::Yaml;

pub fn as_duration(v: &Yaml) -> anyhow::Result<Duration> {
    match v {
        Yaml::String(value) => match humanize_rs::duration::parse(value) {
            Ok(v) => Ok(v),
            Err(ParseError::MissingUnit) => {
                if let Ok(u) = u64::from_str(value) {
                    Ok(Duration::from_secs(u))
                } else if let Ok(f) = f64::from_str(value) {
                    Duration::try_from_secs_f64(f).map_err(anyhow::Error::new)
                } else {
                    Err(anyhow!("invalid duration string"))
                }
            }
            Err(e) => Err(anyhow!("invalid humanize duration string: {e}")),
        },
        Yaml::Integer(value) => {
            if let Ok(u) = u64::try_from(*value) {
                Ok(Duration::from_secs(u))
            } else {
                Err(anyhow!("unsupported duration string"))
            }
        }
        Yaml::Real(s) => {
            let f = f64::from_str(s).map_err(|e| anyhow!("invalid f64 value: {e}"))?;
            Duration::try_from_secs_f64(f).map_err(anyhow::Error::new)
        }
        _ => Err(anyhow!(
            "yaml value type for humanize duration should be 'string' or 'integer' or 'real'"
        )),
    }
}

pub fn as_usize(v: &Yaml) -> anyhow::Result<usize> {
    match v {
        Yaml::String(value) => match value.parse::<Bytes>() {
            Ok(v) => Ok(v.size()),
            Err(ParseError::MissingUnit) => usize::from_str(value)
                .map_err(|e| anyhow!("invalid usize string: {e}")),
            Err(e) => Err(anyhow!("invalid humanize size string: {e}")),
        },
        Yaml::Integer(i) => Ok(usize::try_from(*i)?),
        _ => Err(anyhow!(
            "yaml value type for humanize usize should be 'string' or 'integer'"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn t_duration() {
        let v = Yaml::String("1h2m".to_string());
        assert_eq!(as_duration(&v).unwrap(), Duration::from_secs(3600 + 120));

        let v = Yaml::String("1000".to_string());
        assert_eq!(as_duration(&v).unwrap(), Duration::from_secs(1000));

        let v = Yaml::Integer(30);
        assert_eq!(as_duration(&v).unwrap(), Duration::from_secs(30));

        let v = Yaml::String("-1000h".to_string());
        assert!(as_duration(&v).is_err());

        let v = Yaml::Boolean(true);
        assert!(as_duration(&v).is_err());
    }

    #[test]
    fn t_usize() {
        let v = Yaml::String("64KB".to_string());
        assert_eq!(as_usize(&v).unwrap(), 64000);

        let v = Yaml::Integer(1024);
        assert_eq!(as_usize(&v).unwrap(), 1024);

        let v = Yaml::String("4096".to_string());
        assert_eq!(as_usize(&v).unwrap(), 4096);
    }
}
