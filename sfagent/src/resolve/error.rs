/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use thiserror::Error;

/// Failure of one source driver lookup, before path annotation.
#[derive(Debug, Error)]
pub(crate) enum SourceError {
    #[error("not found")]
    NotFound,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unexpected status {0}")]
    Status(http::StatusCode),
    #[error("{0}")]
    Other(String),
}

/// Any of these aborts the whole resolution pass. Partial trees are never
/// returned.
#[derive(Debug, Error)]
pub(crate) enum ResolveError {
    #[error("config source {0} is not configured")]
    UnconfiguredSource(String),
    // field is named source_name so thiserror does not take it for a
    // std::error::Error source
    #[error("could not resolve path {source_name}:{path}")]
    NotFound { source_name: String, path: String },
    #[error("failed to deserialize content of {path}: {reason}")]
    Deserialization { path: String, reason: String },
    #[error("dynamic value references nest too deeply, cycle suspected")]
    CycleDetected,
    #[error("invalid dynamic value spec: {0}")]
    InvalidSpec(String),
    #[error("source {source_name} failed on path {path}: {reason}")]
    Source {
        source_name: String,
        path: String,
        reason: String,
    },
}
