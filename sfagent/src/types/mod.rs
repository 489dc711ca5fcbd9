/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

mod datapoint;
pub use datapoint::{DataPoint, Event, EventCategory, MetricType, MetricValue};

mod dimension;
pub use dimension::{DimensionKey, DimensionUpdate};
