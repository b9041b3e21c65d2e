/*
 * SPDX-FileCopyrightText: 2023 Andrew Gunnerson
 * SPDX-License-Identifier: GPL-3.0-only
 */

use std::{
    io::{self, IsTerminal},
    path::PathBuf,
    sync::atomic::{AtomicBool, Ordering},
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{Level, debug};

use crate::{
    cli::{completion, kernel, part},
    config::Config,
    tool::ToolSet,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Self::TRACE,
            LogLevel::Debug => Self::DEBUG,
            LogLevel::Info => Self::INFO,
            LogLevel::Warn => Self::WARN,
            LogLevel::Error => Self::ERROR,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Message only.
    Short,
    /// Timestamp, level, and message.
    #[default]
    Medium,
    /// Timestamp, level, module, and message.
    Long,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    Part(part::PartCli),
    Kernel(kernel::KernelCli),
    Completion(completion::CompletionCli),
}

#[derive(Debug, Parser)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Path to TOML config file.
    ///
    /// If unset, the path in the CROSIMAGE_CONFIG environment variable is used.
    /// If that is also unset, the built-in defaults are used.
    #[arg(long, global = true, value_name = "FILE", value_parser)]
    pub config: Option<PathBuf>,

    /// Lowest log message severity to output.
    #[arg(long, global = true, value_name = "LEVEL", default_value = "info")]
    pub log_level: LogLevel,

    /// Output format for log messages.
    #[arg(long, global = true, value_name = "FORMAT", default_value = "medium")]
    pub log_format: LogFormat,
}

/// Log to stderr so that stdout stays clean for partition data.
pub fn init_logging(log_level: LogLevel, log_format: LogFormat) {
    let builder = tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .with_max_level(Level::from(log_level));

    match log_format {
        LogFormat::Short => builder
            .without_time()
            .with_level(false)
            .with_target(false)
            .init(),
        LogFormat::Medium => builder.with_target(false).init(),
        LogFormat::Long => builder.init(),
    }
}

fn load_tools(cli: &Cli) -> Result<ToolSet> {
    let config = Config::load(cli.config.as_deref()).context("Failed to load config")?;
    debug!("Config: {config:?}");

    Ok(ToolSet::system(config))
}

pub fn main(logging_initialized: &AtomicBool, cancel_signal: &AtomicBool) -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.log_level, cli.log_format);
    logging_initialized.store(true, Ordering::SeqCst);

    match &cli.command {
        Command::Part(c) => part::part_main(c, &load_tools(&cli)?, cancel_signal),
        Command::Kernel(c) => kernel::kernel_main(c, &load_tools(&cli)?, cancel_signal),
        Command::Completion(c) => completion::completion_main(c),
    }
}
