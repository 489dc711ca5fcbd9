/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::sync::LazyLock;

use tokio_util::sync::CancellationToken;

static QUIT_TOKEN: LazyLock<CancellationToken> = LazyLock::new(CancellationToken::new);

pub(crate) fn trigger_shutdown() {
    QUIT_TOKEN.cancel();
}

pub(crate) async fn wait_shutdown() {
    QUIT_TOKEN.cancelled().await
}
