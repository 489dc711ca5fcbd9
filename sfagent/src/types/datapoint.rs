/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value, json};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MetricType {
    Gauge,
    Counter,
    CumulativeCounter,
}

impl MetricType {
    /// key of the per-type list in the ingest json body
    pub(crate) fn wire_key(&self) -> &'static str {
        match self {
            MetricType::Gauge => "gauge",
            MetricType::Counter => "counter",
            MetricType::CumulativeCounter => "cumulative_counter",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MetricValue {
    Double(f64),
    Int(i64),
    Bool(bool),
}

impl MetricValue {
    fn to_json(self) -> Value {
        match self {
            MetricValue::Double(v) => json!(v),
            MetricValue::Int(v) => json!(v),
            // booleans go out as 0/1 so all backends can graph them
            MetricValue::Bool(v) => json!(v as i64),
        }
    }
}

#[derive(Clone, Debug)]
pub struct DataPoint {
    pub metric: String,
    pub dimensions: BTreeMap<String, String>,
    pub value: MetricValue,
    pub time: DateTime<Utc>,
    pub r#type: MetricType,
}

impl DataPoint {
    pub fn new(
        metric: impl Into<String>,
        r#type: MetricType,
        value: MetricValue,
    ) -> Self {
        DataPoint {
            metric: metric.into(),
            dimensions: BTreeMap::new(),
            value,
            time: Utc::now(),
            r#type,
        }
    }

    pub fn with_dimension(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.dimensions.insert(key.into(), value.into());
        self
    }

    pub(crate) fn to_json(&self) -> Value {
        json!({
            "metric": self.metric,
            "dimensions": self.dimensions,
            "value": self.value.to_json(),
            "timestamp": self.time.timestamp_millis(),
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventCategory {
    UserDefined,
    Alert,
    Audit,
    Job,
    Exception,
    AgentStatus,
}

impl EventCategory {
    fn as_str(&self) -> &'static str {
        match self {
            EventCategory::UserDefined => "USER_DEFINED",
            EventCategory::Alert => "ALERT",
            EventCategory::Audit => "AUDIT",
            EventCategory::Job => "JOB",
            EventCategory::Exception => "EXCEPTION",
            EventCategory::AgentStatus => "AGENT_STATUS",
        }
    }
}

#[derive(Clone, Debug)]
pub struct Event {
    pub event_type: String,
    pub category: EventCategory,
    pub dimensions: BTreeMap<String, String>,
    pub properties: Map<String, Value>,
    pub time: DateTime<Utc>,
}

impl Event {
    pub(crate) fn to_json(&self) -> Value {
        json!({
            "eventType": self.event_type,
            "category": self.category.as_str(),
            "dimensions": self.dimensions,
            "properties": self.properties,
            "timestamp": self.time.timestamp_millis(),
        })
    }
}
