mod env;
mod types;


pub use types::*;

use std::path::Path;

use anyhow::{Context, ensure};
use termgate_tools::PolicyRuleSet;

impl Config {
    /// Load configuration from a TOML file with env var overrides.
    ///
    /// Falls back to defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str::<Self>(&content).context("failed to parse config file")?
        } else {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Reject values that would make every command fail or every policy build fail.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first invalid setting.
    pub fn validate(&self) -> anyhow::Result<()> {
        let shell = &self.tools.shell;
        ensure!(!shell.program.trim().is_empty(), "tools.shell.program must not be empty");
        ensure!(shell.timeout_ms > 0, "tools.shell.timeout_ms must be greater than 0");
        ensure!(
            shell.max_output_bytes > 0,
            "tools.shell.max_output_bytes must be greater than 0"
        );
        ensure!(
            self.tools.format.max_chars > 0,
            "tools.format.max_chars must be greater than 0"
        );
        PolicyRuleSet::from_config(shell).context("invalid tools.shell policy rules")?;
        Ok(())
    }
}
