use serde::Deserialize;
use termgate_tools::ToolsConfig;

use crate::prompt::PromptMode;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub tools: ToolsConfig,
    pub prompt: PromptConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    pub mode: PromptMode,
}
