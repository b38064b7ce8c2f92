use std::path::Path;

use crate::config::AuditConfig;
use crate::error::ToolError;
use crate::executor::{ExecutionResult, ResultKind};

#[derive(Debug)]
pub struct AuditLogger {
    destination: AuditDestination,
}

#[derive(Debug)]
enum AuditDestination {
    Stdout,
    File(tokio::sync::Mutex<tokio::fs::File>),
}

#[derive(serde::Serialize)]
pub struct AuditEntry {
    pub timestamp: String,
    pub command: String,
    pub result: AuditResult,
    pub duration_ms: u64,
}

#[derive(serde::Serialize)]
#[serde(tag = "type")]
pub enum AuditResult {
    #[serde(rename = "success")]
    Success,
    #[serde(rename = "failure")]
    Failure { exit_code: i32 },
    #[serde(rename = "blocked")]
    Blocked { reason: String },
    #[serde(rename = "error")]
    Error { message: String },
    #[serde(rename = "timeout")]
    Timeout,
}

impl AuditEntry {
    #[must_use]
    pub fn from_result(result: &ExecutionResult) -> Self {
        let reason = result.reason.clone().unwrap_or_default();
        let outcome = match result.kind() {
            ResultKind::Success => AuditResult::Success,
            ResultKind::NonZeroExit => AuditResult::Failure {
                exit_code: result.exit_code,
            },
            ResultKind::Blocked => AuditResult::Blocked { reason },
            ResultKind::SpawnFailure => AuditResult::Error { message: reason },
            ResultKind::Timeout => AuditResult::Timeout,
        };
        Self {
            timestamp: unix_now(),
            command: result.command.clone(),
            result: outcome,
            duration_ms: result.duration_ms,
        }
    }
}

impl AuditLogger {
    /// Create a new `AuditLogger` from config.
    ///
    /// # Errors
    ///
    /// Returns `ToolError::Audit` if a file destination cannot be opened.
    pub async fn from_config(config: &AuditConfig) -> Result<Self, ToolError> {
        let destination = if config.destination == "stdout" {
            AuditDestination::Stdout
        } else {
            let file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(Path::new(&config.destination))
                .await?;
            AuditDestination::File(tokio::sync::Mutex::new(file))
        };

        Ok(Self { destination })
    }

    pub async fn record(&self, result: &ExecutionResult) {
        self.log(&AuditEntry::from_result(result)).await;
    }

    pub async fn log(&self, entry: &AuditEntry) {
        let Ok(json) = serde_json::to_string(entry) else {
            return;
        };

        match &self.destination {
            AuditDestination::Stdout => {
                tracing::info!(target: "audit", "{json}");
            }
            AuditDestination::File(file) => {
                use tokio::io::AsyncWriteExt;
                let mut f = file.lock().await;
                let line = format!("{json}\n");
                if let Err(e) = f.write_all(line.as_bytes()).await {
                    tracing::error!("failed to write audit log: {e}");
                }
            }
        }
    }
}

fn unix_now() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    format!("{secs}")
}
