mod config;
mod health;
mod invoke;
mod providers;

use aigate_core::{AppConfig, Gateway, ProviderRegistry};
use serde_json::Value;
use tracing::info;

use crate::cli::{Cli, Command, ConfigCommand};
use crate::error::CliError;

pub async fn run(cli: &Cli) -> Result<Value, CliError> {
    match &cli.command {
        Command::Config(args) => match args.command {
            ConfigCommand::Check => config::check(cli),
        },
        Command::Invoke(args) => {
            let config = load_config(cli)?;
            invoke::run(args, &build_gateway(cli, &config)?).await
        }
        Command::Health(args) => {
            let config = load_config(cli)?;
            health::run(args, &build_gateway(cli, &config)?, &config).await
        }
        Command::Providers => {
            let config = load_config(cli)?;
            providers::run(&build_gateway(cli, &config)?)
        }
    }
}

pub(crate) fn load_config(cli: &Cli) -> Result<AppConfig, CliError> {
    match &cli.config {
        Some(path) => Ok(AppConfig::load(path)?),
        None => Ok(AppConfig::demo()),
    }
}

fn build_gateway(cli: &Cli, config: &AppConfig) -> Result<Gateway, CliError> {
    config.validate()?;
    if cli.config.is_none() {
        info!("no --config given; using the built-in scripted demo providers");
    }

    let builder = ProviderRegistry::builder().with_config(config);
    let builder = if cli.mock_outage {
        builder.with_mock_outage()
    } else if cli.mock {
        builder.with_mock_mode()
    } else {
        builder
    };

    Ok(Gateway::new(builder.build()?).with_cache_settings(&config.cache))
}
