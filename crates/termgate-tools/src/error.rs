/// Errors raised while building the execution stack.
///
/// Runtime failures (blocked commands, spawn errors, timeouts, nonzero exits) are never
/// raised; they are captured into an `ExecutionResult`.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("invalid deny pattern `{pattern}`: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("allow-prefix must not be blank")]
    EmptyPrefix,

    #[error("audit log unavailable: {0}")]
    Audit(#[from] std::io::Error),
}
