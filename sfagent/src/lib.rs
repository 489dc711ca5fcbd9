/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use ::log::info;
use anyhow::Context;

pub mod build;
pub mod log;
pub mod opts;

pub mod types;
pub mod writer;

mod config;
mod control;
mod httpclient;
mod resolve;
mod signal;

pub use opts::ProcArgs;

pub async fn run(proc_args: &ProcArgs) -> anyhow::Result<()> {
    config::load().await.context("failed to load config")?;

    if proc_args.test_config {
        info!("the format of the config file is ok");
        config::stop_watchers();
        return Ok(());
    }

    writer::spawn_all()
        .await
        .context("failed to spawn writer")?;
    signal::register().context("failed to setup signal handler")?;

    control::wait_shutdown().await;
    info!("shutting down");

    config::stop_watchers();
    writer::stop_all().await;
    Ok(())
}
