use std::fmt::Write;

use crate::config::FormatConfig;
use crate::executor::{ExecutionResult, ResultKind};

pub const SUCCESS_INDICATOR: char = '✓';
pub const FAILURE_INDICATOR: char = '✗';
pub const BLOCKED_INDICATOR: char = '⊘';

/// Renders results into one bounded text block for display or prompt embedding.
#[derive(Debug, Clone)]
pub struct ResultFormatter {
    max_chars: usize,
}

impl Default for ResultFormatter {
    fn default() -> Self {
        Self::from(&FormatConfig::default())
    }
}

impl From<&FormatConfig> for ResultFormatter {
    fn from(config: &FormatConfig) -> Self {
        Self::new(config.max_chars)
    }
}

impl ResultFormatter {
    #[must_use]
    pub fn new(max_chars: usize) -> Self {
        Self { max_chars }
    }

    #[must_use]
    pub fn max_chars(&self) -> usize {
        self.max_chars
    }

    #[must_use]
    pub fn format(&self, results: &[ExecutionResult]) -> String {
        bound(&render_all(results), self.max_chars)
    }

    /// Like [`format`](Self::format), listing the commands a stopped batch never attempted.
    #[must_use]
    pub fn format_batch<S: AsRef<str>>(
        &self,
        requested: &[S],
        results: &[ExecutionResult],
    ) -> String {
        let mut out = render_all(results);
        if let Some(skipped) = requested.get(results.len()..)
            && !skipped.is_empty()
        {
            if !out.is_empty() {
                out.push('\n');
            }
            let _ = writeln!(out, "not attempted (batch stopped after a failure):");
            for command in skipped {
                let _ = writeln!(out, "- `{}`", command.as_ref());
            }
        }
        bound(&out, self.max_chars)
    }
}

#[must_use]
pub fn indicator(result: &ExecutionResult) -> char {
    match result.kind() {
        ResultKind::Success => SUCCESS_INDICATOR,
        ResultKind::Blocked => BLOCKED_INDICATOR,
        ResultKind::NonZeroExit | ResultKind::Timeout | ResultKind::SpawnFailure => {
            FAILURE_INDICATOR
        }
    }
}

fn render_all(results: &[ExecutionResult]) -> String {
    let mut out = String::new();
    for (i, result) in results.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        render_one(&mut out, result);
    }
    out
}

fn render_one(out: &mut String, r: &ExecutionResult) {
    let _ = writeln!(out, "{} `{}` ({}ms)", indicator(r), r.command, r.duration_ms);

    if r.blocked {
        let reason = r.reason.as_deref().unwrap_or("no reason given");
        let _ = writeln!(out, "blocked for safety: {reason}");
        return;
    }

    let _ = writeln!(out, "exit code: {}", r.exit_code);
    if r.error
        && let Some(ref reason) = r.reason
    {
        let _ = writeln!(out, "error: {reason}");
    }
    if !r.stdout.is_empty() {
        fenced(out, "output", &r.stdout);
    }
    if !r.stderr.is_empty() && r.exit_code != 0 {
        fenced(out, "stderr", &r.stderr);
    }
    if r.truncated {
        let _ = writeln!(out, "(output truncated)");
    }
}

fn fenced(out: &mut String, label: &str, body: &str) {
    let _ = writeln!(out, "{label}:\n```\n{}\n```", body.trim_end_matches('\n'));
}

/// Keep the first and last ~`max/2` bytes of `text`, noting how much was cut.
#[must_use]
pub fn bound(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_owned();
    }

    let half = max / 2;
    let head_end = floor_char_boundary(text, half);
    let tail_start = ceil_char_boundary(text, text.len() - half);
    let head = &text[..head_end];
    let tail = &text[tail_start..];
    let cut = tail_start - head_end;

    format!("{head}\n\n... [truncated {cut} chars, showing first and last ~{half} chars] ...\n\n{tail}")
}

fn floor_char_boundary(s: &str, mut i: usize) -> usize {
    while !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn ceil_char_boundary(s: &str, mut i: usize) -> usize {
    while !s.is_char_boundary(i) {
        i += 1;
    }
    i
}
