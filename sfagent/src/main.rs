/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use anyhow::Context;
use log::error;

fn main() -> anyhow::Result<()> {
    let Some(proc_args) =
        sfagent::opts::parse_clap().context("failed to parse command line options")?
    else {
        return Ok(());
    };

    sfagent::log::setup(proc_args.verbose_level).context("failed to setup logger")?;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start runtime")?;
    let ret = rt.block_on(sfagent::run(&proc_args));

    if let Err(e) = &ret {
        error!("{e:?}");
    }
    ret
}
