/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::path::PathBuf;

use anyhow::Context;
use clap::{Arg, ArgAction, Command, ValueHint, value_parser};

const ARGS_VERSION: &str = "version";
const ARGS_VERBOSE: &str = "verbose";
const ARGS_TEST_CONFIG: &str = "test-config";
const ARGS_CONFIG_FILE: &str = "config-file";

const DEFAULT_CONFIG_FILE: &str = "/etc/signalfx/agent.yaml";

#[derive(Debug)]
pub struct ProcArgs {
    pub verbose_level: u8,
    pub test_config: bool,
}

fn build_cli_args() -> Command {
    Command::new(crate::build::PKG_NAME)
        .disable_version_flag(true)
        .arg(
            Arg::new(ARGS_VERSION)
                .help("Show version")
                .action(ArgAction::SetTrue)
                .short('V')
                .long("version"),
        )
        .arg(
            Arg::new(ARGS_VERBOSE)
                .help("Show more log, will scale up to trace level")
                .action(ArgAction::Count)
                .short('v')
                .long("verbose"),
        )
        .arg(
            Arg::new(ARGS_TEST_CONFIG)
                .help("Test the format of the config file and exit")
                .action(ArgAction::SetTrue)
                .short('t')
                .long("test-config"),
        )
        .arg(
            Arg::new(ARGS_CONFIG_FILE)
                .help("Config file path")
                .num_args(1)
                .value_name("CONFIG FILE")
                .value_hint(ValueHint::FilePath)
                .value_parser(value_parser!(PathBuf))
                .default_value(DEFAULT_CONFIG_FILE)
                .short('c')
                .long("config-file"),
        )
}

pub fn parse_clap() -> anyhow::Result<Option<ProcArgs>> {
    let args_parser = build_cli_args();
    let args = args_parser.get_matches();

    if args.get_flag(ARGS_VERSION) {
        crate::build::print_version();
        return Ok(None);
    }

    let proc_args = ProcArgs {
        verbose_level: args.get_count(ARGS_VERBOSE),
        test_config: args.get_flag(ARGS_TEST_CONFIG),
    };

    if let Some(config_file) = args.get_one::<PathBuf>(ARGS_CONFIG_FILE) {
        crate::config::set_config_file(config_file).context(format!(
            "failed to set config file {}",
            config_file.display()
        ))?;
    }

    Ok(Some(proc_args))
}
