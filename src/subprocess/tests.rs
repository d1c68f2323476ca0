use super::*;
use std::time::Duration;

#[tokio::test]
async fn test_production_runner_success() {
    let runner = TokioProcessRunner;
    let command = ProcessCommandBuilder::new("echo")
        .arg("hello world")
        .build();

    let output = runner.run(command).await.unwrap();
    assert!(output.status.success());
    assert_eq!(output.stdout.trim(), "hello world");
    assert!(output.stderr.is_empty());
}

#[tokio::test]
async fn test_production_runner_failure() {
    let runner = TokioProcessRunner;
    let command = ProcessCommandBuilder::new("false").build();

    let output = runner.run(command).await.unwrap();
    assert!(!output.status.success());
    assert_eq!(output.status.code(), Some(1));
}

#[tokio::test]
async fn test_production_runner_command_not_found() {
    let runner = TokioProcessRunner;
    let command = ProcessCommandBuilder::new("nonexistent-command-12345").build();

    let result = runner.run(command).await;
    assert!(matches!(
        result.unwrap_err(),
        ProcessError::CommandNotFound(_)
    ));
}

#[tokio::test]
async fn test_production_runner_timeout() {
    let runner = TokioProcessRunner;
    let command = ProcessCommandBuilder::new("sleep")
        .arg("5")
        .timeout(Some(Duration::from_millis(100)))
        .build();

    let result = runner.run(command).await;
    let err = result.unwrap_err();
    assert!(matches!(err, ProcessError::Timeout(_)));
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_mock_runner_sequenced_expectations() {
    let mock = MockProcessRunner::new();

    mock.expect_command("Analyzer")
        .returns_exit_code(1)
        .times(2)
        .finish();
    mock.expect_command("Analyzer").returns_success().finish();

    let command = ProcessCommandBuilder::new("Analyzer").arg("out.root").build();
    let first = mock.run(command.clone()).await.unwrap();
    let second = mock.run(command.clone()).await.unwrap();
    let third = mock.run(command).await.unwrap();

    assert_eq!(first.status.code(), Some(1));
    assert_eq!(second.status.code(), Some(1));
    assert!(third.status.success());
    assert!(mock.verify_called("Analyzer", 3));
}

#[tokio::test]
async fn test_mock_runner_args_matcher() {
    let mock = MockProcessRunner::new();

    mock.expect_command("bjobs")
        .with_args(|args| args == ["-J", "job_1"])
        .returns_stdout("Job <job_1> is not found\n")
        .finish();

    let output = mock
        .run(ProcessCommandBuilder::new("bjobs").args(["-J", "job_1"]).build())
        .await
        .unwrap();
    assert!(output.stdout.contains("is not found"));

    let unmatched = mock
        .run(ProcessCommandBuilder::new("bjobs").args(["-J", "job_2"]).build())
        .await;
    assert!(matches!(
        unmatched.unwrap_err(),
        ProcessError::MockExpectationNotMet(_)
    ));
}

#[tokio::test]
async fn test_dry_run_runner_never_executes() {
    let runner = DryRunProcessRunner::new();
    let output = runner
        .run(ProcessCommandBuilder::new("definitely-not-installed-xyz").build())
        .await
        .unwrap();

    assert!(output.status.success());
    assert_eq!(runner.commands_seen(), 1);
}

#[test]
fn test_builder_from_configured_line() {
    let line = vec!["hadd".to_string(), "-f".to_string(), "-v".to_string()];
    let command = ProcessCommandBuilder::from_line(&line)
        .unwrap()
        .path_arg(std::path::Path::new("merged/TT.root"))
        .arg("TT_1.root")
        .timeout(None)
        .build();

    assert_eq!(command.display_line(), "hadd -f -v merged/TT.root TT_1.root");
    assert!(ProcessCommandBuilder::from_line(&[]).is_none());
}
