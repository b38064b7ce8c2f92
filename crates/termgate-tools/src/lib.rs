//! Command safety policy, bounded shell execution, batches, meta-commands and formatting.

pub mod audit;
pub mod batch;
pub mod config;
pub mod error;
pub mod executor;
pub mod format;
pub mod meta;
pub mod policy;
mod process_group;
pub mod shell;

pub use audit::{AuditEntry, AuditLogger, AuditResult};
pub use batch::{BatchOptions, BatchRunner};
pub use config::{AuditConfig, FormatConfig, MetaConfig, ShellConfig, ToolsConfig};
pub use error::ToolError;
pub use executor::{
    BLOCKED_EXIT_CODE, Captured, CommandRequest, CommandRunner, ExecutionResult, ResultKind,
    RunOptions, SPAWN_FAILURE_EXIT_CODE, TIMEOUT_EXIT_CODE, truncate_output,
};
pub use format::ResultFormatter;
pub use meta::{MetaCommand, MetaContext, MetaDispatcher};
pub use policy::{CommandPolicy, DenyRule, PolicyRuleSet, Verdict};
pub use shell::ShellExecutor;
