mod capabilities;
mod config;
mod context;
mod create;
mod engine;
mod error;
mod init;
mod list;
mod migrate;
mod mount;
mod probe;
mod prompt;
mod records;
mod reference;
mod remove;
mod run;
mod session;
#[cfg(test)]
mod testing;
mod utils;

use anyhow::{Result, bail};
use clap::Parser;
use config::{Command, Config, LogLevel};
use context::Context;
use remove::Kind;
use run::RunOptions;
use std::{env, io, process::ExitCode};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

fn main() -> Result<ExitCode> {
    let config = Config::parse();
    init_logging(config.global.effective_log_level());

    if config.global.verbose {
        warn!("--verbose is deprecated, use --log-level=debug instead");
    }

    let context = Context::new(&config.global)?;
    guard_host(&context, &config.command)?;

    let code = match &config.command {
        Command::Create(args) => {
            create::create(&context, args)?;
            0
        }
        Command::Enter(args) => run::run(&context, &RunOptions::enter(args, context.shell()))?,
        Command::Run(args) => run::run(&context, &RunOptions::from_args(args)?)?,
        Command::List(args) => {
            list::list(context.engine(), args)?;
            0
        }
        Command::Rm(args) => {
            remove::remove(context.engine(), Kind::Container, args)?;
            0
        }
        Command::Rmi(args) => {
            remove::remove(context.engine(), Kind::Image, args)?;
            0
        }
        Command::InitContainer(args) => {
            init::init_container(&context, args)?;
            0
        }
    };

    debug!("Exiting with status {}", code);
    Ok(ExitCode::from(u8::try_from(code).unwrap_or(1)))
}

fn init_logging(level: LogLevel) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("toolbox={}", level.as_str())));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .without_time()
        .init();
}

/// Only `init-container` runs inside containers; everything else needs the
/// host and keeps the engine's containers migrated.
fn guard_host(context: &Context, command: &Command) -> Result<()> {
    if probe::is_inside_container() {
        if !command.is_init_container() {
            if !probe::is_inside_toolbox() {
                bail!("this is not a toolbox container");
            }

            bail!("toolbox currently does not work inside of a container");
        }

        if env::var_os("TOOLBOX_PATH").is_none() {
            bail!("TOOLBOX_PATH not set");
        }

        return Ok(());
    }

    if command.is_init_container() {
        return Ok(());
    }

    migrate::migrate(context)
}
