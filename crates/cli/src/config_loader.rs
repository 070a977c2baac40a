use anyhow::Result;
use crossvault_core::config::EngineConfig;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};

/// Loads engine configuration: documented defaults, overridden by the TOML
/// file when present, overridden by `CROSSVAULT_`-prefixed environment
/// variables.
pub fn load(path: &str) -> Result<EngineConfig> {
    let config: EngineConfig = Figment::from(Serialized::defaults(EngineConfig::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("CROSSVAULT_"))
        .extract()?;
    Ok(config)
}
