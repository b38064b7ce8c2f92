//! Synthetic `<name> <argument>` commands that expand into fixed probe batches.
//!
//! Each recognized name runs an ordered sub-batch through the wrapped runner with
//! `continue_on_error`, then condenses the raw streams into a short report. Sub-batch
//! commands are classified by the policy like any other command. Text that is not a
//! recognized meta-command falls through to the wrapped runner unchanged.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Instant;

use termgate_llm::{LlmError, LlmProvider, Message};

use crate::batch::{BatchOptions, BatchRunner};
use crate::config::MetaConfig;
use crate::executor::{Captured, CommandRunner, ExecutionResult, ResultKind, RunOptions};

const EXPLAIN_SYSTEM_PROMPT: &str = "You explain source files to a developer working in a \
terminal. Summarize what the file does, its main parts and anything surprising. Be concise.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetaCommand {
    Search { pattern: String },
    Overview { path: String },
    Explain { path: String },
}

impl MetaCommand {
    /// Recognize `search|overview|explain <argument>`. Anything else, including a bare name
    /// with no argument, is not a meta-command.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let (name, argument) = text.split_once(char::is_whitespace)?;
        let argument = argument.trim();
        if argument.is_empty() || argument.contains('\0') {
            return None;
        }
        let argument = argument.to_owned();
        match name {
            "search" => Some(Self::Search { pattern: argument }),
            "overview" => Some(Self::Overview { path: argument }),
            "explain" => Some(Self::Explain { path: argument }),
            _ => None,
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Search { .. } => "search",
            Self::Overview { .. } => "overview",
            Self::Explain { .. } => "explain",
        }
    }

    /// Primitive commands for this meta-command, in execution order.
    ///
    /// Returns `None` when an argument cannot be shell-quoted.
    #[must_use]
    pub fn expand(&self, root: &Path, preview_lines: usize) -> Option<Vec<String>> {
        match self {
            Self::Search { pattern } => {
                let root = quote(&root.to_string_lossy())?;
                let needle = quote(pattern)?;
                let name_glob = quote(&format!("*{pattern}*"))?;
                let grep = quote(&format!("--grep={pattern}"))?;
                Some(vec![
                    format!("grep -rnI --exclude-dir=.git -e {needle} -- {root}"),
                    format!("find {root} -path '*/.git' -prune -o -iname {name_glob} -print"),
                    format!("git -C {root} log --oneline -i {grep}"),
                ])
            }
            Self::Overview { path } => {
                let dir = quote(&root.join(path).to_string_lossy())?;
                Some(vec![
                    format!("ls -la {dir}"),
                    format!("git -C {dir} status --short --branch"),
                    format!("git -C {dir} log --oneline -n {preview_lines}"),
                    format!("find {dir} -type f -not -path '*/.git/*'"),
                ])
            }
            Self::Explain { path } => {
                let file = quote(&root.join(path).to_string_lossy())?;
                Some(vec![format!("cat -- {file}")])
            }
        }
    }
}

fn quote(s: &str) -> Option<String> {
    shlex::try_quote(s).ok().map(std::borrow::Cow::into_owned)
}

/// Search root and preview size for meta-command expansion.
#[derive(Debug, Clone)]
pub struct MetaContext {
    pub root: PathBuf,
    pub preview_lines: usize,
}

impl Default for MetaContext {
    fn default() -> Self {
        Self::from(&MetaConfig::default())
    }
}

impl From<&MetaConfig> for MetaContext {
    fn from(config: &MetaConfig) -> Self {
        Self {
            root: PathBuf::from(&config.root),
            preview_lines: config.preview_lines,
        }
    }
}

impl MetaContext {
    /// Sub-batches run in the caller's `cwd` when one is given, so the root becomes `.`.
    fn root_for(&self, options: &RunOptions) -> PathBuf {
        if options.cwd.is_some() {
            PathBuf::from(".")
        } else {
            self.root.clone()
        }
    }
}

/// Count and head of one probe's non-blank output lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeSummary {
    pub count: usize,
    pub preview: Vec<String>,
    /// Why the probe produced nothing usable, if it never ran.
    pub unavailable: Option<String>,
}

impl ProbeSummary {
    fn from_result(result: &ExecutionResult, preview_lines: usize) -> Self {
        if let Some(why) = unavailable_reason(result) {
            return Self {
                unavailable: Some(why),
                ..Self::default()
            };
        }
        let lines: Vec<&str> = content_lines(result).collect();
        Self {
            count: lines.len(),
            preview: lines
                .iter()
                .take(preview_lines)
                .map(|l| (*l).to_owned())
                .collect(),
            unavailable: None,
        }
    }

    fn render(&self, f: &mut fmt::Formatter<'_>, label: &str) -> fmt::Result {
        if let Some(ref why) = self.unavailable {
            return writeln!(f, "{label}: unavailable ({why})");
        }
        writeln!(f, "{label}: {}", self.count)?;
        for line in &self.preview {
            writeln!(f, "  {line}")?;
        }
        if self.count > self.preview.len() {
            writeln!(f, "  ... {} more", self.count - self.preview.len())?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchReport {
    pub pattern: String,
    pub content: ProbeSummary,
    pub files: ProbeSummary,
    pub commits: ProbeSummary,
    /// Some probe output hit the byte budget, so counts are lower bounds.
    pub partial: bool,
}

impl SearchReport {
    #[must_use]
    pub fn from_results(pattern: &str, results: &[ExecutionResult], preview_lines: usize) -> Self {
        let summary = |i: usize| {
            results
                .get(i)
                .map(|r| ProbeSummary::from_result(r, preview_lines))
                .unwrap_or_default()
        };
        Self {
            pattern: pattern.to_owned(),
            content: summary(0),
            files: summary(1),
            commits: summary(2),
            partial: results.iter().any(|r| r.truncated),
        }
    }
}

impl fmt::Display for SearchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "search: {}", self.pattern)?;
        self.content.render(f, "content matches")?;
        self.files.render(f, "file name matches")?;
        self.commits.render(f, "commit matches")?;
        if self.partial {
            writeln!(f, "(partial: output truncated, counts are lower bounds)")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverviewReport {
    pub path: String,
    pub entries: Option<usize>,
    pub branch: Option<String>,
    pub changed_files: Option<usize>,
    pub recent_commits: Vec<String>,
    pub file_count: Option<usize>,
    /// Some probe output hit the byte budget, so counts are lower bounds.
    pub partial: bool,
}

impl OverviewReport {
    #[must_use]
    pub fn from_results(path: &str, results: &[ExecutionResult]) -> Self {
        let ok = |i: usize| results.get(i).filter(|r| r.success());

        let entries = ok(0).map(|r| {
            content_lines(r)
                .filter(|l| !l.starts_with("total "))
                .filter(|l| !matches!(l.split_whitespace().last(), Some("." | "..")))
                .count()
        });

        let (branch, changed_files) = match ok(1) {
            Some(r) => {
                let mut lines = content_lines(r).peekable();
                let branch = lines
                    .next_if(|l| l.starts_with("## "))
                    .map(|l| l.trim_start_matches("## ").to_owned());
                (branch, Some(lines.count()))
            }
            None => (None, None),
        };

        Self {
            path: path.to_owned(),
            entries,
            branch,
            changed_files,
            recent_commits: ok(2)
                .map(|r| content_lines(r).map(str::to_owned).collect())
                .unwrap_or_default(),
            file_count: ok(3).map(|r| content_lines(r).count()),
            partial: results.iter().any(|r| r.truncated),
        }
    }
}

impl fmt::Display for OverviewReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn count(value: Option<usize>) -> String {
            value.map_or_else(|| "unknown".to_owned(), |n| n.to_string())
        }

        writeln!(f, "overview: {}", self.path)?;
        writeln!(f, "entries: {}", count(self.entries))?;
        writeln!(f, "files: {}", count(self.file_count))?;
        match self.branch {
            Some(ref branch) => {
                writeln!(f, "branch: {branch}")?;
                writeln!(f, "changed files: {}", count(self.changed_files))?;
            }
            // a failed listing says nothing about git
            None if self.entries.is_some() => writeln!(f, "branch: not a git repository")?,
            None => {}
        }
        if !self.recent_commits.is_empty() {
            writeln!(f, "recent commits:")?;
            for commit in &self.recent_commits {
                writeln!(f, "  {commit}")?;
            }
        }
        if self.partial {
            writeln!(f, "(partial: output truncated, counts are lower bounds)")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExplainReport {
    pub path: String,
    pub explanation: String,
    /// The file was cut at the byte budget before it reached the model.
    pub input_truncated: bool,
}

impl fmt::Display for ExplainReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "explain: {}", self.path)?;
        if self.input_truncated {
            writeln!(f, "(file truncated before explanation)")?;
        }
        writeln!(f)?;
        writeln!(f, "{}", self.explanation.trim_end())
    }
}

/// Expands meta-commands and passes everything else to the wrapped runner.
#[derive(Debug, Clone)]
pub struct MetaDispatcher<R, P> {
    runner: R,
    provider: P,
    context: MetaContext,
}

impl<R: CommandRunner, P: LlmProvider> MetaDispatcher<R, P> {
    #[must_use]
    pub fn new(runner: R, provider: P, context: MetaContext) -> Self {
        Self {
            runner,
            provider,
            context,
        }
    }

    #[must_use]
    pub fn runner(&self) -> &R {
        &self.runner
    }

    #[must_use]
    pub fn context(&self) -> &MetaContext {
        &self.context
    }

    /// Run `command`, expanding it first if it is a meta-command.
    pub async fn dispatch(&self, command: &str, options: &RunOptions) -> ExecutionResult {
        match MetaCommand::parse(command) {
            Some(meta) => self.run_meta(command, &meta, options).await,
            None => self.runner.run(command, options).await,
        }
    }

    async fn run_meta(
        &self,
        command: &str,
        meta: &MetaCommand,
        options: &RunOptions,
    ) -> ExecutionResult {
        let start = Instant::now();
        let root = self.context.root_for(options);
        let Some(probes) = meta.expand(&root, self.context.preview_lines) else {
            return ExecutionResult::spawn_failure(command, "argument cannot be shell-quoted", 0);
        };
        tracing::debug!(command, meta = meta.name(), probes = probes.len(), "expanding");

        let sub_options = BatchOptions {
            continue_on_error: true,
            run: RunOptions {
                skip_safety_check: false,
                ..options.clone()
            },
        };
        let results = BatchRunner::new(&self.runner)
            .run_sequence(&probes, &sub_options)
            .await;

        let (stdout, stderr, exit_code) = match meta {
            MetaCommand::Search { pattern } => {
                let report =
                    SearchReport::from_results(pattern, &results, self.context.preview_lines);
                let answered = search_answered(&results);
                (report.to_string(), probe_failures(&results, answered), exit_code(answered))
            }
            MetaCommand::Overview { path } => {
                let report = OverviewReport::from_results(path, &results);
                let answered = results.iter().any(ExecutionResult::success);
                (report.to_string(), probe_failures(&results, answered), exit_code(answered))
            }
            MetaCommand::Explain { path } => match results.first() {
                Some(read) if read.success() => match self.explain(path, read).await {
                    Ok(report) => (report.to_string(), String::new(), 0),
                    Err(message) => (String::new(), message, 1),
                },
                Some(read) => (String::new(), read_failure(path, read), 1),
                None => (String::new(), format!("cannot read {path}"), 1),
            },
        };

        ExecutionResult::completed(
            command,
            text(stdout),
            text(stderr),
            exit_code,
            elapsed_ms(start),
        )
    }

    async fn explain(&self, path: &str, read: &ExecutionResult) -> Result<ExplainReport, String> {
        let content = content_text(read);
        let messages = [
            Message::system(EXPLAIN_SYSTEM_PROMPT),
            Message::user(format!("Explain the file `{path}`:\n\n```\n{content}\n```")),
        ];
        let reply = self.provider.chat(&messages).await.and_then(|answer| {
            if answer.trim().is_empty() {
                Err(LlmError::EmptyResponse {
                    provider: self.provider.name().to_owned(),
                })
            } else {
                Ok(answer)
            }
        });
        match reply {
            Ok(explanation) => Ok(ExplainReport {
                path: path.to_owned(),
                explanation,
                input_truncated: read.truncated,
            }),
            Err(e) => {
                tracing::warn!(path, provider = self.provider.name(), error = %e, "explain failed");
                Err(format!("cannot explain {path}: {e}"))
            }
        }
    }
}

impl<R: CommandRunner, P: LlmProvider> CommandRunner for MetaDispatcher<R, P> {
    async fn run(&self, command: &str, options: &RunOptions) -> ExecutionResult {
        self.dispatch(command, options).await
    }
}

fn unavailable_reason(result: &ExecutionResult) -> Option<String> {
    match result.kind() {
        ResultKind::Blocked | ResultKind::SpawnFailure => {
            Some(result.reason.clone().unwrap_or_else(|| "not run".to_owned()))
        }
        _ => None,
    }
}

/// Any probe succeeded, counting grep's "no match" exit as an answer.
fn search_answered(results: &[ExecutionResult]) -> bool {
    let grep_no_match = results
        .first()
        .is_some_and(|r| r.kind() == ResultKind::NonZeroExit && r.exit_code == 1);
    grep_no_match || results.iter().any(ExecutionResult::success)
}

fn exit_code(answered: bool) -> i32 {
    i32::from(!answered)
}

/// First failing probe's diagnostics, reported only when no probe answered.
fn probe_failures(results: &[ExecutionResult], answered: bool) -> String {
    if answered {
        return String::new();
    }
    results
        .iter()
        .map(|r| r.reason.clone().unwrap_or_else(|| r.stderr.trim().to_owned()))
        .find(|detail| !detail.is_empty())
        .unwrap_or_default()
}

fn read_failure(path: &str, read: &ExecutionResult) -> String {
    let detail = read
        .reason
        .clone()
        .unwrap_or_else(|| read.stderr.trim().to_owned());
    if detail.is_empty() {
        format!("cannot read {path}: exit code {}", read.exit_code)
    } else {
        format!("cannot read {path}: {detail}")
    }
}

/// Captured stdout without the truncation marker.
fn content_text(result: &ExecutionResult) -> &str {
    if result.truncated
        && let Some(idx) = result.stdout.rfind("\n[truncated: ")
    {
        return &result.stdout[..idx];
    }
    &result.stdout
}

fn content_lines(result: &ExecutionResult) -> impl Iterator<Item = &str> {
    content_text(result)
        .lines()
        .filter(|line| !line.trim().is_empty())
}

fn text(s: String) -> Captured {
    Captured {
        text: s,
        truncated: false,
    }
}

#[allow(clippy::cast_possible_truncation)]
fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}
