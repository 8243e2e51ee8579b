mod api;
mod apply;
mod cli;
mod cloud;
mod commands;
mod config;
mod model;
mod progress;
mod registry;
mod tasks;
mod ui;
mod vfs;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use config::Config;
use registry::Registry;
use std::io;
use std::process::ExitCode;

/// Global context for the application
pub struct Context {
    pub quiet: bool,
    /// `--state` or `CLUSTERUP_STATE_STORE`
    pub state: Option<String>,
    pub config: Config,
}

impl Context {
    /// Open the configuration store the flags and config name
    pub fn registry(&self) -> Result<Registry> {
        let uri = self.config.state_store(self.state.as_deref())?;
        log::debug!("using state store {uri}");
        Ok(Registry::new(vfs::open_store(&uri)?))
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    match run(cli) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            ui::error(&format!("{e:#}"));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<u8> {
    if let Command::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "clusterup", &mut io::stdout());
        return Ok(0);
    }

    let ctx = Context {
        quiet: cli.quiet,
        state: cli.state,
        config: Config::load()?,
    };

    match cli.command {
        Command::Create(args) => commands::create::run(&ctx, args).map(|()| 0),
        Command::Update(cmd) => commands::update::run(&ctx, cmd),
        Command::Delete(cmd) => commands::delete::run(&ctx, cmd),
        Command::Completions { .. } => Ok(0),
    }
}
