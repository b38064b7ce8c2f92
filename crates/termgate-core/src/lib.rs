//! Configuration loading, the terminal service and prompt assembly.

pub mod config;
pub mod prompt;
pub mod service;

pub use config::Config;
pub use prompt::PromptMode;
pub use service::TerminalService;
