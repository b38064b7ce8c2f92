use std::process::Stdio;
use std::sync::{Arc, mpsc};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

use crate::audit::AuditLogger;
use crate::config::ShellConfig;
use crate::executor::{CappedBuffer, Captured, CommandRunner, ExecutionResult, RunOptions};
use crate::policy::{CommandPolicy, Verdict};
use crate::process_group::kill_process_group;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
/// How long pipes may stay open once the shell has exited and its group was killed.
const OUTPUT_GRACE: Duration = Duration::from_millis(100);
const READ_CHUNK: usize = 8 * 1024;

/// Runs policy-checked commands through `<program> -c` with bounded time and output.
#[derive(Debug, Clone)]
pub struct ShellExecutor {
    policy: CommandPolicy,
    program: String,
    timeout: Duration,
    max_output_bytes: usize,
    audit_logger: Option<Arc<AuditLogger>>,
}

impl ShellExecutor {
    #[must_use]
    pub fn new(policy: CommandPolicy, config: &ShellConfig) -> Self {
        Self {
            policy,
            program: config.program.clone(),
            timeout: Duration::from_millis(config.timeout_ms),
            max_output_bytes: config.max_output_bytes,
            audit_logger: None,
        }
    }

    #[must_use]
    pub fn with_audit(mut self, logger: Arc<AuditLogger>) -> Self {
        self.audit_logger = Some(logger);
        self
    }

    #[must_use]
    pub fn policy(&self) -> &CommandPolicy {
        &self.policy
    }

    #[must_use]
    pub fn default_timeout(&self) -> Duration {
        self.timeout
    }

    /// Classify, then run `command` if allowed. Never fails: blocked commands, spawn
    /// errors and timeouts all come back as an `ExecutionResult`.
    pub async fn execute(&self, command: &str, options: &RunOptions) -> ExecutionResult {
        let result = match self.policy.evaluate(command, options.skip_safety_check) {
            Verdict::Blocked { reason } => {
                tracing::warn!(command, %reason, "command blocked");
                ExecutionResult::blocked(command, reason)
            }
            Verdict::Allowed => self.spawn_and_wait(command, options).await,
        };
        self.log_audit(&result).await;
        result
    }

    /// Blocking variant for short availability checks.
    ///
    /// Same gating as [`execute`](Self::execute). On timeout the child is killed and no
    /// partial output is returned. Call through `spawn_blocking` from async code.
    #[must_use]
    pub fn probe(&self, command: &str, options: &RunOptions) -> ExecutionResult {
        if let Verdict::Blocked { reason } =
            self.policy.evaluate(command, options.skip_safety_check)
        {
            tracing::warn!(command, %reason, "probe blocked");
            return ExecutionResult::blocked(command, reason);
        }

        let timeout = options.timeout.unwrap_or(PROBE_TIMEOUT);
        let budget = options.max_output_bytes.unwrap_or(self.max_output_bytes);
        let start = Instant::now();

        let mut cmd = std::process::Command::new(&self.program);
        cmd.arg("-c")
            .arg(command)
            .envs(&options.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(ref cwd) = options.cwd {
            cmd.current_dir(cwd);
        }
        #[cfg(unix)]
        std::os::unix::process::CommandExt::process_group(&mut cmd, 0);

        let mut child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(command, error = %e, "probe spawn failed");
                return ExecutionResult::spawn_failure(
                    command,
                    format!("failed to spawn: {e}"),
                    elapsed_ms(start),
                );
            }
        };
        let pgid = child.id();

        let stdout_reader = spawn_reader(child.stdout.take(), budget);
        let stderr_reader = spawn_reader(child.stderr.take(), budget);

        match wait_timeout::ChildExt::wait_timeout(&mut child, timeout) {
            Ok(Some(status)) => {
                kill_group(Some(pgid), command);
                let deadline = Instant::now() + OUTPUT_GRACE;
                ExecutionResult::completed(
                    command,
                    collect_reader(stdout_reader, deadline),
                    collect_reader(stderr_reader, deadline),
                    exit_code_of(status),
                    elapsed_ms(start),
                )
            }
            Ok(None) => {
                kill_group(Some(pgid), command);
                let _ = child.kill();
                let _ = child.wait();
                tracing::warn!(command, ?timeout, "probe timed out");
                ExecutionResult::timed_out(
                    command,
                    Captured::default(),
                    Captured::default(),
                    timeout,
                    elapsed_ms(start),
                )
            }
            Err(e) => {
                kill_group(Some(pgid), command);
                let _ = child.kill();
                ExecutionResult::spawn_failure(
                    command,
                    format!("failed to wait: {e}"),
                    elapsed_ms(start),
                )
            }
        }
    }

    /// Whether `name` resolves to an executable, via a trusted `command -v` probe.
    #[must_use]
    pub fn command_exists(&self, name: &str) -> bool {
        let Ok(quoted) = shlex::try_quote(name) else {
            return false;
        };
        let options = RunOptions::default()
            .with_timeout(PROBE_TIMEOUT)
            .trusted();
        self.probe(&format!("command -v {quoted}"), &options)
            .success()
    }

    async fn spawn_and_wait(&self, command: &str, options: &RunOptions) -> ExecutionResult {
        let timeout = options.timeout.unwrap_or(self.timeout);
        let budget = options.max_output_bytes.unwrap_or(self.max_output_bytes);
        let start = Instant::now();

        let mut cmd = Command::new(&self.program);
        cmd.arg("-c")
            .arg(command)
            .envs(&options.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(ref cwd) = options.cwd {
            cmd.current_dir(cwd);
        }
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(command, error = %e, "spawn failed");
                return ExecutionResult::spawn_failure(
                    command,
                    format!("failed to spawn: {e}"),
                    elapsed_ms(start),
                );
            }
        };
        let pgid = child.id();

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            kill_group(pgid, command);
            let _ = child.kill().await;
            return ExecutionResult::spawn_failure(
                command,
                "output pipes unavailable",
                elapsed_ms(start),
            );
        };

        let mut out = CappedBuffer::new(budget);
        let mut err = CappedBuffer::new(budget);
        let waited = {
            let pipes = async {
                tokio::join!(drain(stdout, &mut out), drain(stderr, &mut err));
            };
            tokio::pin!(pipes);
            let deadline = tokio::time::sleep(timeout);
            tokio::pin!(deadline);

            // completion is the shell exiting, not its pipes closing
            let mut pipes_closed = false;
            let waited = loop {
                tokio::select! {
                    () = &mut pipes, if !pipes_closed => pipes_closed = true,
                    status = child.wait() => break Some(status),
                    () = &mut deadline => break None,
                }
            };

            // background jobs and subshells share the group and may hold the pipes open
            kill_group(pgid, command);
            if !pipes_closed && tokio::time::timeout(OUTPUT_GRACE, &mut pipes).await.is_err() {
                tracing::debug!(command, "output pipes still open after exit");
            }
            waited
        };

        let result = match waited {
            Some(Ok(status)) => ExecutionResult::completed(
                command,
                out.finish(),
                err.finish(),
                exit_code_of(status),
                elapsed_ms(start),
            ),
            Some(Err(e)) => ExecutionResult::spawn_failure(
                command,
                format!("failed to wait: {e}"),
                elapsed_ms(start),
            ),
            None => {
                if let Err(e) = child.kill().await {
                    tracing::debug!(command, error = %e, "kill after timeout failed");
                }
                tracing::warn!(command, ?timeout, "command timed out");
                ExecutionResult::timed_out(
                    command,
                    out.finish(),
                    err.finish(),
                    timeout,
                    elapsed_ms(start),
                )
            }
        };

        tracing::debug!(
            command,
            exit_code = result.exit_code,
            duration_ms = result.duration_ms,
            truncated = result.truncated,
            "command finished"
        );
        result
    }

    async fn log_audit(&self, result: &ExecutionResult) {
        if let Some(ref logger) = self.audit_logger {
            logger.record(result).await;
        }
    }
}

impl CommandRunner for ShellExecutor {
    async fn run(&self, command: &str, options: &RunOptions) -> ExecutionResult {
        self.execute(command, options).await
    }
}

async fn drain<R: AsyncRead + Unpin>(mut reader: R, sink: &mut CappedBuffer) {
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => sink.push(&chunk[..n]),
            Err(e) => {
                tracing::debug!(error = %e, "output pipe read failed");
                break;
            }
        }
    }
}

fn drain_blocking<R: std::io::Read>(mut reader: R, budget: usize) -> CappedBuffer {
    let mut sink = CappedBuffer::new(budget);
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => sink.push(&chunk[..n]),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => {
                tracing::debug!(error = %e, "output pipe read failed");
                break;
            }
        }
    }
    sink
}

fn spawn_reader<R>(pipe: Option<R>, budget: usize) -> Option<mpsc::Receiver<CappedBuffer>>
where
    R: std::io::Read + Send + 'static,
{
    let pipe = pipe?;
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let _ = tx.send(drain_blocking(pipe, budget));
    });
    Some(rx)
}

/// The reader's capture, or nothing if its pipe is still open at `deadline`.
fn collect_reader(reader: Option<mpsc::Receiver<CappedBuffer>>, deadline: Instant) -> Captured {
    reader
        .and_then(|rx| {
            rx.recv_timeout(deadline.saturating_duration_since(Instant::now()))
                .ok()
        })
        .map(CappedBuffer::finish)
        .unwrap_or_default()
}

fn kill_group(pgid: Option<u32>, command: &str) {
    if let Some(pgid) = pgid
        && let Err(e) = kill_process_group(pgid)
    {
        tracing::debug!(command, pgid, error = %e, "process group kill failed");
    }
}

fn exit_code_of(status: std::process::ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

#[allow(clippy::cast_possible_truncation)]
fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}
