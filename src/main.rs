use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use termgate_core::{Config, PromptMode, TerminalService};
use termgate_llm::DisabledProvider;
use termgate_tools::{BatchOptions, ExecutionResult, RunOptions, Verdict};

/// Safety-gated terminal command execution
#[derive(Parser, Debug)]
#[command(name = "termgate", version)]
#[command(about = "Classify, run and format shell commands for an AI research assistant")]
struct Cli {
    /// Config file (falls back to TERMGATE_CONFIG, then config/default.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run commands in order; meta-commands (search, overview, explain) are expanded
    Run {
        #[command(flatten)]
        batch: BatchArgs,

        /// Print results as JSON instead of formatted text
        #[arg(long)]
        json: bool,
    },
    /// Print the policy verdict for a command without running it
    Check { command: String },
    /// Report whether each named binary is available
    Which {
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// Run commands and print the messages that would be sent for text generation
    Prompt {
        #[command(flatten)]
        batch: BatchArgs,

        /// Where the results go: system or user
        #[arg(long)]
        mode: Option<PromptMode>,

        /// The user's request text
        #[arg(long)]
        request: Option<String>,
    },
}

#[derive(clap::Args, Debug)]
struct BatchArgs {
    /// Keep going after a command fails
    #[arg(long)]
    continue_on_error: bool,

    /// Working directory for every command
    #[arg(long)]
    cwd: Option<PathBuf>,

    /// Per-command timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Per-stream output budget in bytes
    #[arg(long)]
    max_output_bytes: Option<usize>,

    #[arg(required = true)]
    commands: Vec<String>,
}

impl BatchArgs {
    fn options(&self) -> BatchOptions {
        let mut run = RunOptions::default();
        if let Some(ref cwd) = self.cwd {
            run = run.with_cwd(cwd);
        }
        if let Some(ms) = self.timeout_ms {
            run = run.with_timeout(Duration::from_millis(ms));
        }
        if let Some(bytes) = self.max_output_bytes {
            run = run.with_max_output_bytes(bytes);
        }
        BatchOptions::default()
            .continue_on_error(self.continue_on_error)
            .with_run(run)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    init_subscriber();

    let cli = Cli::parse();
    let config_path = resolve_config_path(cli.config);
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    tracing::debug!(path = %config_path.display(), "config loaded");
    let service = TerminalService::from_config(&config, DisabledProvider).await?;

    match cli.command {
        Command::Run { batch, json } => {
            let results = service.run_batch(&batch.commands, &batch.options()).await;
            if json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else {
                print!("{}", service.render_batch(&batch.commands, &results));
            }
            Ok(exit_code(batch_succeeded(&batch.commands, &results)))
        }
        Command::Check { command } => {
            let verdict = service.classify(&command);
            match verdict {
                Verdict::Allowed => println!("allowed"),
                Verdict::Blocked { ref reason } => println!("blocked: {reason}"),
            }
            Ok(exit_code(verdict.is_allowed()))
        }
        Command::Which { names } => {
            let found = service.available_commands(&names).await?;
            for (name, present) in &found {
                println!("{name}: {}", if *present { "found" } else { "missing" });
            }
            Ok(exit_code(found.iter().all(|(_, present)| *present)))
        }
        Command::Prompt {
            batch,
            mode,
            request,
        } => {
            let results = service.run_batch(&batch.commands, &batch.options()).await;
            let messages = service.prompt_messages(mode, &results, request.as_deref());
            println!("{}", serde_json::to_string_pretty(&messages)?);
            Ok(exit_code(batch_succeeded(&batch.commands, &results)))
        }
    }
}

/// Every requested command was attempted and succeeded.
fn batch_succeeded(requested: &[String], results: &[ExecutionResult]) -> bool {
    results.len() == requested.len() && results.iter().all(ExecutionResult::success)
}

fn exit_code(ok: bool) -> ExitCode {
    if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE }
}

fn resolve_config_path(flag: Option<PathBuf>) -> PathBuf {
    if let Some(path) = flag {
        return path;
    }
    if let Ok(path) = std::env::var("TERMGATE_CONFIG") {
        return PathBuf::from(path);
    }
    PathBuf::from("config/default.toml")
}

fn init_subscriber() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
