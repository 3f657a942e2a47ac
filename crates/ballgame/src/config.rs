//! Client configuration assembly
//!
//! Defaults, then the optional JSON file, then command line flags.

use alloy::primitives::Address;
use anyhow::{Context, Result};
use game_client::ClientConfig;
use std::path::Path;

/// Values given on the command line
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub rpc_url: Option<String>,
    pub ws_url: Option<String>,
    pub contract: Option<String>,
    pub chain_id: Option<u64>,
}

/// Build the effective configuration
pub fn load(file: Option<&Path>, overrides: &Overrides) -> Result<ClientConfig> {
    let mut config = match file {
        Some(path) => ClientConfig::from_file(path)?,
        None => ClientConfig::default(),
    };

    if let Some(url) = &overrides.rpc_url {
        config.rpc_url = url.clone();
    }
    if let Some(url) = &overrides.ws_url {
        config.ws_url = url.clone();
    }
    if let Some(contract) = &overrides.contract {
        config.contract = contract
            .parse::<Address>()
            .with_context(|| format!("invalid contract address {}", contract))?;
    }
    if let Some(chain_id) = overrides.chain_id {
        config.chain_id = chain_id;
    }

    config.validate()?;
    Ok(config)
}
