use serde_json::{json, Value};

use crate::cli::Cli;
use crate::error::CliError;

use super::load_config;

/// Validates without building adapters, so missing credentials are reported, not fatal.
pub fn check(cli: &Cli) -> Result<Value, CliError> {
    let config = load_config(cli)?;
    config.validate()?;

    let missing_credentials = config
        .providers
        .iter()
        .filter(|provider| provider.api_key_env.is_some() && provider.api_key().is_none())
        .map(|provider| provider.name.clone())
        .collect::<Vec<_>>();

    Ok(json!({
        "valid": true,
        "source": cli
            .config
            .as_ref()
            .map_or_else(|| String::from("built-in demo"), |path| path.display().to_string()),
        "providers": config.providers.iter().map(|provider| &provider.name).collect::<Vec<_>>(),
        "missing_credentials": missing_credentials,
        "cache_enabled": config.cache.enabled,
    }))
}
