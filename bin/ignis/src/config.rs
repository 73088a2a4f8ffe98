use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use alloy_core::primitives::{Address, address};
use anyhow::{Context, Result};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use ignis_core::{ArtifactDirectory, ModuleParams, StaticAccounts, parameter_values};
use serde::{Deserialize, Serialize};

/// The default configuration file name.
pub const CONFIG_FILENAME: &str = "Ignis.toml";

/// First account of the default hardhat/anvil mnemonic.
const DEFAULT_ACCOUNT: Address = address!("f39Fd6e51aad88F6F4ce6aB8827279cffFb92266");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IgnisConfig {
    /// Directory holding compiled artifact JSON files.
    pub artifacts: PathBuf,
    /// Journal of the deployment run.
    pub journal: PathBuf,
    /// Accounts available on the target chain. The first one is the default sender.
    #[serde(default)]
    pub accounts: Vec<Address>,
    /// Module parameters, by module id then parameter name.
    #[serde(default)]
    pub parameters: BTreeMap<String, BTreeMap<String, toml::Value>>,
}

impl Default for IgnisConfig {
    fn default() -> Self {
        Self {
            artifacts: PathBuf::from("artifacts"),
            journal: PathBuf::from("ignis").join("journal.jsonl"),
            accounts: vec![DEFAULT_ACCOUNT],
            parameters: BTreeMap::new(),
        }
    }
}

impl IgnisConfig {
    /// Merge the defaults, the config file (if present) and `IGNIS_` environment variables.
    pub fn load(path: &Path) -> Result<Self> {
        let config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("IGNIS_").ignore(&["verbosity", "config"]))
            .extract()
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?;

        tracing::debug!(
            path = %path.display(),
            artifacts = %config.artifacts.display(),
            journal = %config.journal.display(),
            accounts = config.accounts.len(),
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Save the configuration to a TOML file.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;
        tracing::info!(path = %path.display(), "Configuration saved");
        Ok(())
    }

    pub fn artifacts(&self) -> Result<ArtifactDirectory> {
        ArtifactDirectory::open(&self.artifacts)
    }

    pub fn accounts(&self) -> StaticAccounts {
        StaticAccounts(self.accounts.clone())
    }

    pub fn module_params(&self) -> Result<ModuleParams> {
        parameter_values(&self.parameters)
    }
}
