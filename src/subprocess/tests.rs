use super::*;
use crate::console::Console;
use crate::session::{Session, SessionGuard};
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const POLL: Duration = Duration::from_millis(20);

fn session(temp: &TempDir) -> SessionGuard {
    Session::begin(temp.path(), "test").unwrap()
}

fn real_executor(session: &SessionGuard) -> CommandExecutor {
    CommandExecutor::new(
        Arc::new(TokioProcessRunner),
        session.handle(),
        Console::buffered().0,
    )
    .with_poll_interval(POLL)
}

fn mock_executor(session: &SessionGuard, mock: &MockProcessRunner) -> CommandExecutor {
    CommandExecutor::new(Arc::new(mock.clone()), session.handle(), Console::buffered().0)
        .with_poll_interval(POLL)
}

fn sh(script: &str) -> ProcessCommandBuilder {
    ProcessCommandBuilder::new("sh").args(["-c", script])
}

#[tokio::test]
async fn test_text_capture_and_artifacts() {
    let temp = TempDir::new().unwrap();
    let session = session(&temp);
    let executor = real_executor(&session);
    let command = sh("echo hello; echo oops >&2")
        .capture(CaptureMode::Text)
        .build();
    let command_line = command.command_line();

    let output = executor.run(command).await.unwrap();

    assert_eq!(output, CommandOutput::Text("hello\n".to_string()));
    let stdout_path = session.artifact_path(1, StreamName::Stdout, &command_line);
    let stderr_path = session.artifact_path(1, StreamName::Stderr, &command_line);
    assert_eq!(std::fs::read_to_string(stdout_path).unwrap(), "hello\n");
    assert_eq!(std::fs::read_to_string(stderr_path).unwrap(), "oops\n");
}

#[tokio::test]
async fn test_invocation_indices_increase() {
    let temp = TempDir::new().unwrap();
    let session = session(&temp);
    let executor = real_executor(&session);

    executor.run(sh("true").build()).await.unwrap();
    let failure = executor.run(sh("exit 4").build()).await.unwrap_err();

    assert_eq!(failure.index, 2);
    assert_eq!(session.invocation_count(), 2);
}

#[tokio::test]
async fn test_non_zero_exit_raises() {
    let temp = TempDir::new().unwrap();
    let session = session(&temp);
    let executor = real_executor(&session);

    let failure = executor.run(sh("exit 3").build()).await.unwrap_err();

    assert_eq!(failure.index, 1);
    assert_eq!(failure.exit_code, Some(3));
    assert_eq!(failure.kind, FailureKind::ExitCode);
    assert_eq!(failure.command, "sh -c exit 3");
    assert!(failure.to_string().contains("[0001]"));
}

#[tokio::test]
async fn test_non_zero_exit_allowed() {
    let temp = TempDir::new().unwrap();
    let session = session(&temp);
    let executor = real_executor(&session);

    let output = executor
        .run(sh("echo partial; exit 3").allow_non_zero().capture(CaptureMode::Text).build())
        .await
        .unwrap();

    assert_eq!(output.into_text().as_deref(), Some("partial\n"));
}

#[tokio::test]
async fn test_missing_executable() {
    let temp = TempDir::new().unwrap();
    let session = session(&temp);
    let executor = real_executor(&session);

    let failure = executor
        .run(ProcessCommandBuilder::new("dk-installer-missing-tool-12345").build())
        .await
        .unwrap_err();

    assert_eq!(failure.exit_code, None);
    assert_eq!(failure.kind, FailureKind::NotFound);
    let cause = failure.source().unwrap();
    assert!(matches!(
        cause.downcast_ref::<ProcessError>(),
        Some(ProcessError::CommandNotFound(_))
    ));
}

#[tokio::test]
async fn test_json_capture() {
    let temp = TempDir::new().unwrap();
    let session = session(&temp);
    let executor = real_executor(&session);

    let output = executor
        .run(sh(r#"printf '{"status": "running",\n "port": 8501}'"#).capture(CaptureMode::Json).build())
        .await
        .unwrap();
    assert_eq!(
        output.into_json().unwrap(),
        serde_json::json!({"status": "running", "port": 8501})
    );

    let output = executor
        .run(sh("echo not json").capture(CaptureMode::Json).build())
        .await
        .unwrap();
    assert_eq!(output.into_json().unwrap(), serde_json::json!({}));
}

#[tokio::test]
async fn test_json_lines_skip_malformed() {
    let temp = TempDir::new().unwrap();
    let session = session(&temp);
    let executor = real_executor(&session);

    let output = executor
        .run(
            sh(r#"printf '{"Name": "db"}\nwarning: not json\n{"Name": "ui"}\n'"#)
                .capture(CaptureMode::JsonLines)
                .build(),
        )
        .await
        .unwrap();

    let values = output.into_json_lines().unwrap();
    assert_eq!(
        values,
        vec![
            serde_json::json!({"Name": "db"}),
            serde_json::json!({"Name": "ui"})
        ]
    );
}

#[tokio::test]
async fn test_echo_capture_writes_to_console() {
    let temp = TempDir::new().unwrap();
    let session = session(&temp);
    let (console, buffer) = Console::buffered();
    let executor = CommandExecutor::new(Arc::new(TokioProcessRunner), session.handle(), console)
        .with_poll_interval(POLL);

    let output = executor
        .run(sh("echo '  first  '; echo; echo second").capture(CaptureMode::Echo).build())
        .await
        .unwrap();

    assert_eq!(output, CommandOutput::None);
    assert_eq!(buffer.contents(), "   | first\n   | second\n");
}

#[tokio::test]
async fn test_stdin_payload() {
    let temp = TempDir::new().unwrap();
    let session = session(&temp);
    let executor = real_executor(&session);

    let output = executor
        .run(
            ProcessCommandBuilder::new("cat")
                .stdin("admin:secret\n")
                .capture(CaptureMode::Text)
                .build(),
        )
        .await
        .unwrap();

    assert_eq!(output.into_text().as_deref(), Some("admin:secret\n"));
}

#[tokio::test]
async fn test_concurrent_streams_do_not_block() {
    let temp = TempDir::new().unwrap();
    let session = session(&temp);
    let executor = real_executor(&session);
    let script = "i=0; while [ $i -lt 3000 ]; do echo err $i >&2; echo out $i; i=$((i+1)); done";
    let command = sh(script).capture(CaptureMode::Text).build();
    let command_line = command.command_line();

    let output = executor.run(command).await.unwrap().into_text().unwrap();

    assert_eq!(output.lines().count(), 3000);
    let stderr = std::fs::read_to_string(session.artifact_path(
        1,
        StreamName::Stderr,
        &command_line,
    ))
    .unwrap();
    assert_eq!(stderr.lines().count(), 3000);
    assert!(stderr.ends_with("err 2999\n"));
}

#[tokio::test]
async fn test_caller_consumes_streams_and_fails() {
    let temp = TempDir::new().unwrap();
    let session = session(&temp);
    let executor = real_executor(&session);

    let mut running = executor
        .start(sh("echo 'version: 1.2'; echo trailing").build())
        .await
        .unwrap();
    let first = running.stdout().next_line().await.unwrap();
    assert_eq!(first.as_deref(), Some("version: 1.2\n"));

    let failure = running
        .fail(std::io::Error::other("unexpected version format"))
        .await;

    assert_eq!(failure.kind, FailureKind::Consumer);
    assert_eq!(failure.exit_code, Some(0));
    assert_eq!(
        failure.source().unwrap().to_string(),
        "unexpected version format"
    );
    // Remaining output still reaches the artifact
    let stdout = std::fs::read_to_string(session.artifact_path(
        1,
        StreamName::Stdout,
        "sh -c echo 'version: 1.2'; echo trailing",
    ))
    .unwrap();
    assert_eq!(stdout, "version: 1.2\ntrailing\n");
}

#[tokio::test]
async fn test_concurrent_commands_get_distinct_indices() {
    let temp = TempDir::new().unwrap();
    let session = session(&temp);
    let executor = real_executor(&session);

    let (a, b) = tokio::join!(
        executor.run(sh("echo a").build()),
        executor.run(sh("echo b").build())
    );
    a.unwrap();
    b.unwrap();

    let mut names = std::fs::read_dir(session.folder())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.contains("-stdout-"))
        .collect::<Vec<_>>();
    names.sort();
    assert_eq!(names.len(), 2);
    assert!(names[0].starts_with("0001-stdout-"));
    assert!(names[1].starts_with("0002-stdout-"));
}

#[tokio::test]
async fn test_mock_runner_scripted_output() {
    let temp = TempDir::new().unwrap();
    let session = session(&temp);
    let mock = MockProcessRunner::new();
    mock.expect_command("docker")
        .with_args(|args| args == &["compose", "ls"])
        .returns_stdout("NAME STATUS\ntestgen running\n")
        .finish();
    let executor = mock_executor(&session, &mock);

    let output = executor
        .run(
            ProcessCommandBuilder::new("docker")
                .args(["compose", "ls"])
                .capture(CaptureMode::Text)
                .build(),
        )
        .await
        .unwrap();

    assert_eq!(
        output.into_text().as_deref(),
        Some("NAME STATUS\ntestgen running\n")
    );
    assert!(mock.verify_called("docker", 1));
}

#[tokio::test]
async fn test_retries_stop_at_first_success() {
    let temp = TempDir::new().unwrap();
    let session = session(&temp);
    let mock = MockProcessRunner::new();
    mock.expect_command("curl").returns_exit_code(7).times(1).finish();
    mock.expect_command("curl").hangs().times(1).finish();
    mock.expect_command("curl").returns_success().finish();
    let executor = mock_executor(&session, &mock);

    executor
        .run_with_retries(
            ProcessCommandBuilder::new("curl").arg("localhost").build(),
            Duration::from_millis(50),
            5,
        )
        .await
        .unwrap();

    assert!(mock.verify_called("curl", 3));
}

#[tokio::test]
async fn test_retries_exhausted_by_timeouts() {
    let temp = TempDir::new().unwrap();
    let session = session(&temp);
    let mock = MockProcessRunner::new();
    mock.expect_command("curl").hangs().finish();
    let executor = mock_executor(&session, &mock);

    let failure = executor
        .run_with_retries(
            ProcessCommandBuilder::new("curl").allow_non_zero().build(),
            Duration::from_millis(30),
            3,
        )
        .await
        .unwrap_err();

    assert!(failure.is_timeout());
    assert_eq!(failure.kind, FailureKind::Timeout);
    assert_eq!(failure.index, 3);
    assert!(mock.verify_called("curl", 3));
}

#[tokio::test]
async fn test_retries_non_zero_respects_raise_flag() {
    let temp = TempDir::new().unwrap();
    let session = session(&temp);
    let mock = MockProcessRunner::new();
    mock.expect_command("probe").returns_exit_code(1).finish();
    let executor = mock_executor(&session, &mock);

    executor
        .run_with_retries(
            ProcessCommandBuilder::new("probe").allow_non_zero().build(),
            Duration::from_secs(5),
            2,
        )
        .await
        .unwrap();
    assert!(mock.verify_called("probe", 2));

    let failure = executor
        .run_with_retries(
            ProcessCommandBuilder::new("probe").build(),
            Duration::from_secs(5),
            2,
        )
        .await
        .unwrap_err();
    assert_eq!(failure.kind, FailureKind::ExitCode);
    assert_eq!(failure.exit_code, Some(1));
    assert!(!failure.is_timeout());
}

#[tokio::test]
async fn test_cancellation_stops_retries() {
    let temp = TempDir::new().unwrap();
    let session = session(&temp);
    let mock = MockProcessRunner::new();
    mock.expect_command("sleeper").hangs().finish();
    let cancel = CancellationToken::new();
    let executor = mock_executor(&session, &mock).with_cancellation(cancel.clone());

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let failure = executor
        .run_with_retries(
            ProcessCommandBuilder::new("sleeper").build(),
            Duration::from_secs(30),
            3,
        )
        .await
        .unwrap_err();

    assert_eq!(failure.kind, FailureKind::Interrupted);
    assert!(mock.verify_called("sleeper", 1));
}

#[tokio::test]
async fn test_nothing_starts_after_interrupt() {
    let temp = TempDir::new().unwrap();
    let session = session(&temp);
    let mock = MockProcessRunner::new();
    mock.expect_command("docker").returns_success().finish();
    let cancel = CancellationToken::new();
    let executor = mock_executor(&session, &mock).with_cancellation(cancel.clone());

    cancel.cancel();
    let failure = executor
        .run(ProcessCommandBuilder::new("docker").args(["compose", "down"]).build())
        .await
        .unwrap_err();

    assert_eq!(failure.kind, FailureKind::Interrupted);
    assert_eq!(failure.exit_code, None);
    assert_eq!(failure.index, 1);
    assert!(mock.verify_called("docker", 0));
    assert!(!session
        .artifact_path(1, StreamName::Stdout, "docker compose down")
        .exists());
}

#[tokio::test]
async fn test_dropped_command_is_terminated() {
    let temp = TempDir::new().unwrap();
    let session = session(&temp);
    let executor = real_executor(&session);

    let running = executor.start(sh("sleep 30").build()).await.unwrap();
    let pid = running.pid();
    assert!(pid.is_some());
    assert!(running.is_running());

    let started = std::time::Instant::now();
    running.terminate().await;
    assert!(!running.is_running());
    assert!(started.elapsed() < Duration::from_secs(10));
    drop(running);
}
