use crate::executor::{CommandRunner, ExecutionResult, RunOptions};

/// Options shared by every command of one batch.
#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    pub continue_on_error: bool,
    pub run: RunOptions,
}

impl BatchOptions {
    #[must_use]
    pub fn continue_on_error(mut self, yes: bool) -> Self {
        self.continue_on_error = yes;
        self
    }

    #[must_use]
    pub fn with_run(mut self, run: RunOptions) -> Self {
        self.run = run;
        self
    }
}

/// Runs commands strictly in order through a [`CommandRunner`].
pub struct BatchRunner<'a, R> {
    runner: &'a R,
}

impl<'a, R: CommandRunner> BatchRunner<'a, R> {
    #[must_use]
    pub fn new(runner: &'a R) -> Self {
        Self { runner }
    }

    /// Run `commands` one after another.
    ///
    /// Without `continue_on_error`, stops after the first non-successful result and returns
    /// the partial list; a shorter output means the remaining commands were not attempted.
    pub async fn run_sequence<S: AsRef<str>>(
        &self,
        commands: &[S],
        options: &BatchOptions,
    ) -> Vec<ExecutionResult> {
        let mut results = Vec::with_capacity(commands.len());
        for (index, command) in commands.iter().enumerate() {
            let result = self.runner.run(command.as_ref(), &options.run).await;
            let failed = !result.success();
            results.push(result);
            if failed && !options.continue_on_error {
                let skipped = commands.len() - index - 1;
                if skipped > 0 {
                    tracing::info!(failed_at = index, skipped, "batch stopped early");
                }
                break;
            }
        }
        results
    }
}
