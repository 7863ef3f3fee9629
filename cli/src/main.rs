use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use companion_host::{probe, Notifier};
use std::sync::Arc;
use tracing::debug;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod cli;
mod config;
mod output;
mod session;

use crate::cli::{Cli, Commands, ConfigCommands};
use crate::output::{print_probe_outcome, ConsoleNotifier};

fn setup_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    debug!("Starting companionctl with arguments: {:#?}", cli);

    let store = config::open_store(cli.config.as_deref())?;
    let notifier: Arc<dyn Notifier> = Arc::new(ConsoleNotifier);

    match cli.command {
        Commands::Config(cmd) => match cmd {
            ConfigCommands::Show => config::show(&store)?,
            ConfigCommands::SetPath { path } => config::set_path(&store, &path)?,
            ConfigCommands::Path => {
                println!("{}", config::settings_file(cli.config.as_deref())?.display())
            }
        },
        Commands::Probe { path } => {
            let settings = store.snapshot();
            let path = match path {
                Some(path) => path,
                None => settings
                    .resolved_companion_path()
                    .context("No companion path configured; use `config set-path` first")?,
            };
            let outcome = probe(&path, &settings.runtime_launcher, settings.probe_timeout()).await;
            print_probe_outcome(&path, &outcome);
            if !outcome.is_compatible() {
                std::process::exit(1);
            }
        }
        Commands::Open { file, module } => {
            session::open(store, notifier, &module, &file).await?;
        }
        Commands::Session { module } => {
            session::run(store, notifier, &module).await?;
            println!("{}", "Session closed".dimmed());
        }
    }

    Ok(())
}
