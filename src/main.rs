mod cli;
mod commands;
mod format;
mod paths;
mod progress;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

/// Global context for the application
pub struct Context {
    pub quiet: bool,
    pub config: Option<PathBuf>,
    pub region: Option<String>,
    pub profile: Option<String>,
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

    let ctx = Context {
        quiet: cli.quiet,
        config: cli.config,
        region: cli.region,
        profile: cli.profile,
    };

    match run(&ctx, cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report(&e);
            ExitCode::FAILURE
        }
    }
}

fn run(ctx: &Context, command: Command) -> Result<()> {
    match command {
        Command::Deploy(args) => commands::deploy::run(ctx, args),
        Command::Status(args) => commands::status::run(ctx, args),
        Command::ListConfigurations { app } => commands::configurations::list(ctx, app.as_deref()),
        Command::CleanupConfigurations(args) => commands::configurations::cleanup(ctx, args),
        Command::Regenerate { app } => commands::fleet::regenerate(ctx, &app),
        Command::Resume { app } => commands::fleet::resume(ctx, &app),
        Command::Maintenance(cmd) => commands::fleet::maintenance(ctx, cmd),
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "forseti", &mut io::stdout());
            Ok(())
        }
    }
}

/// Print the error kind, message and advice for engine errors.
fn report(error: &anyhow::Error) {
    match error.chain().find_map(|e| e.downcast_ref::<rollout::Error>()) {
        Some(engine) => {
            let category = engine.category();
            ui::error(&format!("{}: {error:#}", category.description()));
            ui::dim(engine.advice());
        }
        None => ui::error(&format!("{error:#}")),
    }
}
