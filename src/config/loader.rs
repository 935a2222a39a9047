// Configuration loader
// Loads ~/.magpie/config.toml, falling back to the environment.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::PathBuf;

use super::settings::Config;

/// Load configuration from the magpie config file or environment.
pub fn load_config() -> Result<Config> {
    if let Some(config) = try_load_from_file()? {
        return Ok(config);
    }

    if let Ok(api_key) = std::env::var("ANTHROPIC_API_KEY") {
        if !api_key.is_empty() {
            return Ok(Config::with_api_key(api_key));
        }
    }

    bail!(
        "No configuration found. Create ~/.magpie/config.toml:\n\n\
        [llm]\n\
        api_key = \"sk-ant-...\"\n\n\
        [cluster]\n\
        cluster_script = \"scripts/clustering-linkage.py\"\n\
        distance_script = \"scripts/distances.py\"\n\n\
        Alternatively, set the environment variable:\n\
        export ANTHROPIC_API_KEY=\"sk-ant-...\""
    );
}

fn config_path() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".magpie/config.toml"))
}

fn try_load_from_file() -> Result<Option<Config>> {
    let path = config_path()?;
    if !path.exists() {
        return Ok(None);
    }

    let contents = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config: {}", path.display()))?;
    let config: Config = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config: {}", path.display()))?;
    Ok(Some(config))
}
