use std::sync::Arc;

use anyhow::Context;
use termgate_llm::{LlmProvider, Message};
use termgate_tools::{
    AuditLogger, BatchOptions, BatchRunner, CommandPolicy, CommandRequest, ExecutionResult,
    MetaContext, MetaDispatcher, PolicyRuleSet, ResultFormatter, RunOptions, ShellExecutor,
    Verdict,
};

use crate::config::Config;
use crate::prompt::{self, PromptMode};

/// The single entry point for gated command execution.
///
/// Built once from [`Config`]; the policy rule set is shared read-only by every call.
pub struct TerminalService<P> {
    rules: Arc<PolicyRuleSet>,
    dispatcher: MetaDispatcher<ShellExecutor, P>,
    formatter: ResultFormatter,
    prompt_mode: PromptMode,
}

impl<P: LlmProvider> TerminalService<P> {
    /// # Errors
    ///
    /// Returns an error if the config is invalid or the audit log cannot be opened.
    pub async fn from_config(config: &Config, provider: P) -> anyhow::Result<Self> {
        config.validate()?;

        let rules = Arc::new(
            PolicyRuleSet::from_config(&config.tools.shell).context("failed to build policy")?,
        );
        let mut executor =
            ShellExecutor::new(CommandPolicy::new(Arc::clone(&rules)), &config.tools.shell);
        if config.tools.audit.enabled {
            let logger = AuditLogger::from_config(&config.tools.audit)
                .await
                .context("failed to open audit log")?;
            executor = executor.with_audit(Arc::new(logger));
        }

        tracing::debug!(
            deny_rules = rules.deny_rules().len(),
            allow_prefixes = rules.allow_prefixes().len(),
            "terminal service ready"
        );

        Ok(Self {
            dispatcher: MetaDispatcher::new(
                executor,
                provider,
                MetaContext::from(&config.tools.meta),
            ),
            formatter: ResultFormatter::from(&config.tools.format),
            prompt_mode: config.prompt.mode,
            rules,
        })
    }

    #[must_use]
    pub fn rules(&self) -> &PolicyRuleSet {
        &self.rules
    }

    #[must_use]
    pub fn executor(&self) -> &ShellExecutor {
        self.dispatcher.runner()
    }

    #[must_use]
    pub fn prompt_mode(&self) -> PromptMode {
        self.prompt_mode
    }

    #[must_use]
    pub fn classify(&self, command: &str) -> Verdict {
        self.executor().policy().classify(command)
    }

    /// Run one command; meta-commands are expanded.
    pub async fn run(&self, request: &CommandRequest) -> ExecutionResult {
        self.dispatcher
            .dispatch(&request.command, &request.options)
            .await
    }

    pub async fn run_batch<S: AsRef<str>>(
        &self,
        commands: &[S],
        options: &BatchOptions,
    ) -> Vec<ExecutionResult> {
        BatchRunner::new(&self.dispatcher)
            .run_sequence(commands, options)
            .await
    }

    /// Blocking single-command probe. Do not call from an async context.
    #[must_use]
    pub fn probe(&self, command: &str, options: &RunOptions) -> ExecutionResult {
        self.executor().probe(command, options)
    }

    /// Availability of each binary in `names`, probed off the async runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the blocking probe task panics.
    pub async fn available_commands(
        &self,
        names: &[String],
    ) -> anyhow::Result<Vec<(String, bool)>> {
        let executor = self.executor().clone();
        let names = names.to_vec();
        tokio::task::spawn_blocking(move || {
            names
                .into_iter()
                .map(|name| {
                    let found = executor.command_exists(&name);
                    (name, found)
                })
                .collect::<Vec<_>>()
        })
        .await
        .context("availability probe task failed")
    }

    #[must_use]
    pub fn render(&self, results: &[ExecutionResult]) -> String {
        self.formatter.format(results)
    }

    #[must_use]
    pub fn render_batch<S: AsRef<str>>(
        &self,
        requested: &[S],
        results: &[ExecutionResult],
    ) -> String {
        self.formatter.format_batch(requested, results)
    }

    /// Messages embedding `results` for the text-generation step.
    #[must_use]
    pub fn prompt_messages(
        &self,
        mode: Option<PromptMode>,
        results: &[ExecutionResult],
        request: Option<&str>,
    ) -> Vec<Message> {
        let rendered = self.render(results);
        prompt::build_messages(mode.unwrap_or(self.prompt_mode), &rendered, request)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use termgate_llm::DisabledProvider;
    use termgate_llm::mock::MockProvider;
    use termgate_tools::ResultKind;

    use super::*;

    async fn service() -> TerminalService<DisabledProvider> {
        TerminalService::from_config(&Config::default(), DisabledProvider)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn classify_uses_builtin_rules() {
        let svc = service().await;
        assert!(svc.classify("git status").is_allowed());
        assert!(!svc.classify("rm -rf /").is_allowed());
        assert!(svc.rules().deny_rules().len() >= 4);
    }

    #[tokio::test]
    async fn run_plain_and_meta() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "needle here\n").unwrap();
        let svc = service().await;
        let options = RunOptions::default().with_cwd(dir.path());

        let r = svc
            .run(&CommandRequest::new("cat notes.txt").with_options(options.clone()))
            .await;
        assert_eq!(r.stdout, "needle here\n");

        let r = svc
            .run(&CommandRequest::new("search needle").with_options(options))
            .await;
        assert_eq!(r.command, "search needle");
        assert!(r.stdout.contains("content matches: 1\n"));
        assert!(r.stdout.contains("file name matches: 0\n"));
    }

    #[tokio::test]
    async fn explain_without_provider_fails_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("lib.rs"), "fn main() {}\n").unwrap();
        let svc = service().await;
        let r = svc
            .run(
                &CommandRequest::new("explain lib.rs")
                    .with_options(RunOptions::default().with_cwd(dir.path())),
            )
            .await;
        assert_eq!(r.exit_code, 1);
        assert!(r.stderr.contains("cannot explain lib.rs"));
    }

    #[tokio::test]
    async fn explain_with_provider() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("lib.rs"), "fn main() {}\n").unwrap();
        let provider = MockProvider::with_responses(vec!["An empty entry point.".into()]);
        let svc = TerminalService::from_config(&Config::default(), provider.clone())
            .await
            .unwrap();
        let r = svc
            .run(
                &CommandRequest::new("explain lib.rs")
                    .with_options(RunOptions::default().with_cwd(dir.path())),
            )
            .await;
        assert_eq!(r.kind(), ResultKind::Success);
        assert!(r.stdout.contains("An empty entry point."));
        assert!(provider.received()[0][1].content.contains("fn main() {}"));
    }

    #[tokio::test]
    async fn batch_stops_and_render_lists_skipped() {
        let svc = service().await;
        let commands = ["echo one", "false", "echo three"];
        let results = svc.run_batch(&commands, &BatchOptions::default()).await;
        assert_eq!(results.len(), 2);

        let text = svc.render_batch(&commands, &results);
        assert!(text.starts_with("✓ `echo one`"));
        assert!(text.contains("✗ `false`"));
        assert!(text.contains("- `echo three`"));
    }

    #[tokio::test]
    async fn available_commands_probe() {
        let svc = service().await;
        let found = svc
            .available_commands(&["sh".into(), "termgate-missing-binary".into()])
            .await
            .unwrap();
        assert_eq!(
            found,
            [
                ("sh".to_owned(), true),
                ("termgate-missing-binary".to_owned(), false)
            ]
        );
    }

    #[tokio::test]
    async fn invalid_config_rejected() {
        let mut config = Config::default();
        config.tools.shell.deny_patterns = vec!["[".into()];
        assert!(
            TerminalService::from_config(&config, DisabledProvider)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn prompt_messages_follow_configured_mode() {
        let svc = service().await;
        let results = [svc.run(&CommandRequest::new("echo hi")).await];
        let messages = svc.prompt_messages(None, &results, Some("why?"));
        assert_eq!(messages.len(), 2);
        assert!(messages[0].content.contains("`echo hi`"));

        let messages =
            svc.prompt_messages(Some(PromptMode::UserRequest), &results, Some("why?"));
        assert_eq!(messages.len(), 1);
        assert!(messages[0].content.starts_with("why?"));
    }
}
