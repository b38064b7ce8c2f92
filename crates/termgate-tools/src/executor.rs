use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

pub const BLOCKED_EXIT_CODE: i32 = 126;
pub const SPAWN_FAILURE_EXIT_CODE: i32 = 127;
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Per-call execution options. `None` fields fall back to the executor defaults.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub cwd: Option<PathBuf>,
    pub env: HashMap<String, String>,
    pub timeout: Option<Duration>,
    pub max_output_bytes: Option<usize>,
    pub skip_safety_check: bool,
}

impl RunOptions {
    #[must_use]
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_max_output_bytes(mut self, bytes: usize) -> Self {
        self.max_output_bytes = Some(bytes);
        self
    }

    /// Bypass the policy entirely. Only for fixed commands issued by termgate itself.
    #[must_use]
    pub fn trusted(mut self) -> Self {
        self.skip_safety_check = true;
        self
    }
}

/// Raw command text plus its options.
#[derive(Debug, Clone)]
pub struct CommandRequest {
    pub command: String,
    pub options: RunOptions,
}

impl CommandRequest {
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            options: RunOptions::default(),
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultKind {
    Success,
    NonZeroExit,
    Blocked,
    Timeout,
    SpawnFailure,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_false(flag: &bool) -> bool {
    !*flag
}

/// Outcome of one command. Every failure mode is represented here rather than raised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub command: String,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "is_false")]
    pub blocked: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub truncated: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub timed_out: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub error: bool,
    /// Block reason or error description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ExecutionResult {
    #[must_use]
    pub fn completed(
        command: impl Into<String>,
        stdout: Captured,
        stderr: Captured,
        exit_code: i32,
        duration_ms: u64,
    ) -> Self {
        Self {
            command: command.into(),
            truncated: stdout.truncated || stderr.truncated,
            stdout: stdout.text,
            stderr: stderr.text,
            exit_code,
            duration_ms,
            blocked: false,
            timed_out: false,
            error: false,
            reason: None,
        }
    }

    #[must_use]
    pub fn blocked(command: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            stdout: String::new(),
            stderr: String::new(),
            exit_code: BLOCKED_EXIT_CODE,
            duration_ms: 0,
            blocked: true,
            truncated: false,
            timed_out: false,
            error: false,
            reason: Some(reason.into()),
        }
    }

    #[must_use]
    pub fn spawn_failure(
        command: impl Into<String>,
        message: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            command: command.into(),
            stdout: String::new(),
            stderr: String::new(),
            exit_code: SPAWN_FAILURE_EXIT_CODE,
            duration_ms,
            blocked: false,
            truncated: false,
            timed_out: false,
            error: true,
            reason: Some(message.into()),
        }
    }

    /// Result for a process killed at its deadline; keeps whatever output was captured.
    #[must_use]
    pub fn timed_out(
        command: impl Into<String>,
        stdout: Captured,
        stderr: Captured,
        timeout: Duration,
        duration_ms: u64,
    ) -> Self {
        Self {
            exit_code: TIMEOUT_EXIT_CODE,
            timed_out: true,
            error: true,
            reason: Some(format!("command timed out after {}ms", timeout.as_millis())),
            ..Self::completed(command, stdout, stderr, TIMEOUT_EXIT_CODE, duration_ms)
        }
    }

    #[must_use]
    pub fn kind(&self) -> ResultKind {
        if self.blocked {
            ResultKind::Blocked
        } else if self.timed_out {
            ResultKind::Timeout
        } else if self.error {
            ResultKind::SpawnFailure
        } else if self.exit_code != 0 {
            ResultKind::NonZeroExit
        } else {
            ResultKind::Success
        }
    }

    #[must_use]
    pub fn success(&self) -> bool {
        self.kind() == ResultKind::Success
    }
}

/// Captured stream text and whether the raw stream exceeded its budget.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Captured {
    pub text: String,
    pub truncated: bool,
}

const INVALID_BYTE: char = '?';

#[must_use]
pub fn truncation_marker(omitted: usize) -> String {
    format!("\n[truncated: {omitted} bytes omitted]")
}

/// Byte sink that keeps at most `budget` bytes and counts the rest.
#[derive(Debug)]
pub struct CappedBuffer {
    buf: Vec<u8>,
    budget: usize,
    total: usize,
}

impl CappedBuffer {
    #[must_use]
    pub fn new(budget: usize) -> Self {
        Self {
            buf: Vec::with_capacity(budget.min(64 * 1024)),
            budget,
            total: 0,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        let room = self.budget.saturating_sub(self.buf.len());
        self.buf.extend_from_slice(&chunk[..chunk.len().min(room)]);
        self.total += chunk.len();
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.total
    }

    #[must_use]
    pub fn finish(self) -> Captured {
        let truncated = self.total > self.budget;
        let mut text = decode_in_place(&self.buf, truncated);
        if truncated {
            text.push_str(&truncation_marker(self.total - self.budget));
        }
        Captured { text, truncated }
    }
}

/// Decode without growing: each invalid byte becomes one `?`.
///
/// When `cut` is set, an invalid tail (a char split at the budget) is dropped.
fn decode_in_place(bytes: &[u8], cut: bool) -> String {
    let mut text = String::with_capacity(bytes.len());
    let mut chunks = bytes.utf8_chunks().peekable();
    while let Some(chunk) = chunks.next() {
        text.push_str(chunk.valid());
        if cut && chunks.peek().is_none() {
            break;
        }
        text.extend(std::iter::repeat_n(INVALID_BYTE, chunk.invalid().len()));
    }
    text
}

/// Bound raw bytes to `budget`, appending a marker when cut.
#[must_use]
pub fn truncate_output(raw: &[u8], budget: usize) -> Captured {
    let mut sink = CappedBuffer::new(budget);
    sink.push(raw);
    sink.finish()
}

/// Async seam for anything that turns a command string into an `ExecutionResult`.
pub trait CommandRunner: Send + Sync {
    fn run(
        &self,
        command: &str,
        options: &RunOptions,
    ) -> impl Future<Output = ExecutionResult> + Send;
}
