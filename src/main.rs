mod cli;
mod download;
mod error;
mod extractor;
mod files;
mod inbox;
mod ledger;
mod models;
mod payment_id;
mod pipeline;
mod settings;
mod validator;
mod webhook;

use clap::Parser;
use log::LevelFilter;

use cli::{Cli, Commands, LedgerCommands};
use settings::load_settings;

fn level_from(name: &str) -> LevelFilter {
    name.parse().unwrap_or(LevelFilter::Info)
}

// The level from the settings file is only known after loading it, and
// loading can itself warn. Start at `Warn`, then narrow or widen once
// settings are in. An explicit RUST_LOG or --verbose wins throughout.
fn init_logging(verbose: bool) -> bool {
    let mut logger = env_logger::Builder::from_default_env();
    let from_env = std::env::var_os("RUST_LOG").is_some();
    if verbose {
        logger.filter_level(LevelFilter::Debug);
    } else if !from_env {
        logger.filter_level(LevelFilter::Trace);
    }
    logger.init();
    if !verbose && !from_env {
        log::set_max_level(LevelFilter::Warn);
    }
    !verbose && !from_env
}

fn main() {
    let cli = Cli::parse();
    let use_settings_level = init_logging(cli.verbose);
    let settings = load_settings(cli.config.as_deref());
    if use_settings_level {
        log::set_max_level(level_from(&settings.log_level));
    }

    let config_path = cli.config.clone();
    let result = match cli.command {
        Commands::Init { force } => cli::init::run(config_path.as_deref(), force),
        Commands::Extract { file } => cli::extract::run(&settings, &file),
        Commands::Send { paths } => cli::send::run(&settings, &paths),
        Commands::Run => cli::run::run(&settings),
        Commands::Ledger { command } => match command {
            LedgerCommands::Status => cli::ledger::status(&settings),
            LedgerCommands::Mark { id } => cli::ledger::mark(&settings, id),
            LedgerCommands::Check { id } => cli::ledger::check(&settings, id),
            LedgerCommands::Cleanup { keep } => cli::ledger::cleanup(&settings, keep),
        },
        Commands::Ping => cli::ping::run(&settings),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
