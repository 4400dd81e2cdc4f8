#![cfg(unix)]

use std::path::Path;
use std::time::Duration;

use assert_matches::assert_matches;
use mcctl_core::LaunchSpec;
use mcctl_core::LifecycleState;
use mcctl_core::LogSink;
use mcctl_core::Supervisor;
use mcctl_core::SupervisorError;
use mcctl_core::SupervisorMode;
use mcctl_core::SupervisorOptions;
use pretty_assertions::assert_eq;
use tempfile::TempDir;

const WINDOW: Duration = Duration::from_millis(300);

/// Behaves like a vanilla server console: decorated output, one reply per
/// command, `stop` ends the process.
const FAKE_SERVER: &str = r#"
echo "[12:00:00] [Server thread/INFO]: Starting minecraft server"
while IFS= read -r line; do
  case "$line" in
    stop)
      echo "[12:00:01] [Server thread/INFO]: Stopping server"
      exit 0
      ;;
    crash)
      exit 3
      ;;
    list)
      echo "[12:00:01] [Server thread/INFO]: Done (1.2s)!"
      ;;
    err)
      echo "[12:00:01] [Server thread/WARN]: written to stderr" >&2
      ;;
    *)
      echo "[12:00:01] [Server thread/INFO]: echo $line"
      ;;
  esac
done
"#;

fn fake_server(cwd: &Path) -> LaunchSpec {
    script_server(cwd, FAKE_SERVER)
}

fn script_server(cwd: &Path, script: &str) -> LaunchSpec {
    LaunchSpec {
        program: "sh".into(),
        args: vec!["-c".to_string(), script.to_string()],
        cwd: cwd.to_path_buf(),
    }
}

fn spawn_supervisor(launch: LaunchSpec, mode: SupervisorMode) -> Supervisor {
    spawn_with_stop_grace(launch, mode, Duration::from_secs(5))
}

fn spawn_with_stop_grace(
    launch: LaunchSpec,
    mode: SupervisorMode,
    stop_grace: Duration,
) -> Supervisor {
    Supervisor::spawn(
        SupervisorOptions {
            launch,
            mode,
            capture_window: WINDOW,
            stop_command: "stop".to_string(),
            stop_grace,
        },
        LogSink::new(),
    )
}

fn live_supervisor() -> anyhow::Result<(TempDir, Supervisor)> {
    let dir = tempfile::tempdir()?;
    let supervisor = spawn_supervisor(fake_server(dir.path()), SupervisorMode::Live);
    Ok((dir, supervisor))
}

#[tokio::test]
async fn start_returns_start_window_output_and_rejects_second_start() -> anyhow::Result<()> {
    let (_dir, supervisor) = live_supervisor()?;

    let output = supervisor.start().await?;
    assert_eq!(output, "Starting minecraft server");
    assert_eq!(supervisor.status().await?.state, LifecycleState::Running);

    assert_matches!(supervisor.start().await, Err(SupervisorError::AlreadyRunning));

    assert_eq!(supervisor.stop().await?, "Stopping server");
    Ok(())
}

#[tokio::test]
async fn send_returns_stripped_response() -> anyhow::Result<()> {
    let (_dir, supervisor) = live_supervisor()?;
    supervisor.start().await?;

    assert_eq!(supervisor.send("list").await?, "Done (1.2s)!");
    assert_eq!(supervisor.send("err").await?, "written to stderr");

    supervisor.stop().await?;
    Ok(())
}

#[tokio::test]
async fn operations_on_stopped_server_are_rejected() -> anyhow::Result<()> {
    let (_dir, supervisor) = live_supervisor()?;

    assert_matches!(supervisor.send("list").await, Err(SupervisorError::NotRunning));
    assert_matches!(supervisor.stop().await, Err(SupervisorError::NotRunning));

    let status = supervisor.status().await?;
    assert_eq!(status.state, LifecycleState::Stopped);
    assert_eq!(status.run_id, None);
    assert_eq!(supervisor.logs().snapshot(), Vec::<String>::new());
    Ok(())
}

#[tokio::test]
async fn concurrent_commands_receive_only_their_own_output() -> anyhow::Result<()> {
    let (_dir, supervisor) = live_supervisor()?;
    supervisor.start().await?;

    let (alpha, beta, gamma) = tokio::join!(
        supervisor.send("alpha"),
        supervisor.send("beta"),
        supervisor.send("gamma"),
    );

    assert_eq!(alpha?, "echo alpha");
    assert_eq!(beta?, "echo beta");
    assert_eq!(gamma?, "echo gamma");

    supervisor.stop().await?;
    Ok(())
}

#[tokio::test]
async fn log_sink_records_every_line_in_order() -> anyhow::Result<()> {
    let (_dir, supervisor) = live_supervisor()?;

    supervisor.start().await?;
    supervisor.send("one").await?;
    supervisor.send("two").await?;
    supervisor.stop().await?;

    assert_eq!(
        supervisor.logs().snapshot(),
        vec![
            "[12:00:00] [Server thread/INFO]: Starting minecraft server",
            "[12:00:01] [Server thread/INFO]: echo one",
            "[12:00:01] [Server thread/INFO]: echo two",
            "[12:00:01] [Server thread/INFO]: Stopping server",
        ]
    );
    Ok(())
}

#[tokio::test]
async fn unexpected_exit_returns_to_stopped_and_allows_restart() -> anyhow::Result<()> {
    let (_dir, supervisor) = live_supervisor()?;
    supervisor.start().await?;

    let output = supervisor.send("crash").await?;
    assert_eq!(output, "");

    let status = supervisor.status().await?;
    assert_eq!(status.state, LifecycleState::Stopped);
    assert_eq!(status.pid, None);
    assert_matches!(supervisor.send("list").await, Err(SupervisorError::NotRunning));

    assert_eq!(supervisor.start().await?, "Starting minecraft server");
    let status = supervisor.status().await?;
    assert_eq!(status.state, LifecycleState::Running);
    assert_eq!(status.run_id, Some(2));

    supervisor.stop().await?;
    Ok(())
}

#[tokio::test]
async fn stop_during_start_waits_for_start_window() -> anyhow::Result<()> {
    let (_dir, supervisor) = live_supervisor()?;

    let (started, stopped) = tokio::join!(supervisor.start(), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        supervisor.stop().await
    });

    assert_eq!(started?, "Starting minecraft server");
    assert_eq!(stopped?, "Stopping server");
    assert_eq!(supervisor.status().await?.state, LifecycleState::Stopped);
    Ok(())
}

#[tokio::test]
async fn spawn_failure_leaves_supervisor_stopped() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let launch = LaunchSpec {
        program: dir.path().join("no-such-java"),
        args: Vec::new(),
        cwd: dir.path().to_path_buf(),
    };
    let supervisor = spawn_supervisor(launch, SupervisorMode::Live);

    assert_matches!(supervisor.start().await, Err(SupervisorError::Spawn { .. }));
    assert_eq!(supervisor.status().await?.state, LifecycleState::Stopped);
    Ok(())
}

#[tokio::test]
async fn development_mode_never_spawns() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let launch = LaunchSpec {
        program: dir.path().join("no-such-java"),
        args: Vec::new(),
        cwd: dir.path().join("server"),
    };
    let supervisor = spawn_supervisor(launch, SupervisorMode::Development);

    assert_eq!(supervisor.start().await?, "");
    assert_eq!(supervisor.send("list").await?, "");
    assert_eq!(supervisor.stop().await?, "");

    let status = supervisor.status().await?;
    assert!(status.development);
    assert_eq!(status.pid, None);
    assert_eq!(
        supervisor.logs().snapshot(),
        vec!["Starting server in development mode"]
    );
    assert_eq!(std::fs::read_dir(dir.path())?.count(), 0);
    Ok(())
}

#[tokio::test]
async fn shutdown_stops_server_and_closes_handle() -> anyhow::Result<()> {
    let (_dir, supervisor) = live_supervisor()?;
    supervisor.start().await?;

    supervisor.shutdown().await?;

    assert_matches!(supervisor.status().await, Err(SupervisorError::Closed));
    assert_eq!(
        supervisor.logs().snapshot().last().map(String::as_str),
        Some("[12:00:01] [Server thread/INFO]: Stopping server")
    );
    Ok(())
}

#[tokio::test]
async fn stop_lets_the_server_finish_saving() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let script = r#"
echo "[12:00:00] [Server thread/INFO]: Starting minecraft server"
while IFS= read -r line; do
  if [ "$line" = stop ]; then
    echo "[12:00:01] [Server thread/INFO]: Stopping server"
    sleep 0.6
    touch saved
    exit 0
  fi
done
"#;
    let supervisor = spawn_supervisor(script_server(dir.path(), script), SupervisorMode::Live);
    supervisor.start().await?;

    assert_eq!(supervisor.stop().await?, "Stopping server");

    assert!(dir.path().join("saved").exists());
    assert_eq!(supervisor.status().await?.state, LifecycleState::Stopped);
    Ok(())
}

#[tokio::test]
async fn stop_kills_a_server_that_outlives_its_grace_period() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let script = r#"
echo "[12:00:00] [Server thread/INFO]: Starting minecraft server"
exec sleep 30
"#;
    let supervisor = spawn_with_stop_grace(
        script_server(dir.path(), script),
        SupervisorMode::Live,
        Duration::from_millis(200),
    );
    supervisor.start().await?;

    let stopped = tokio::time::timeout(Duration::from_secs(5), supervisor.stop()).await?;

    assert_eq!(stopped?, "");
    assert_eq!(supervisor.status().await?.state, LifecycleState::Stopped);
    Ok(())
}

#[tokio::test]
async fn stdin_failure_kills_server_and_reports_stream_error() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let script = r#"
exec 0<&-
echo "[12:00:00] [Server thread/INFO]: Starting minecraft server"
sleep 30
"#;
    let supervisor = spawn_supervisor(script_server(dir.path(), script), SupervisorMode::Live);
    assert_eq!(supervisor.start().await?, "Starting minecraft server");

    assert_matches!(supervisor.send("list").await, Err(SupervisorError::Stream { .. }));

    let status = supervisor.status().await?;
    assert_eq!(status.state, LifecycleState::Stopped);
    assert_eq!(status.pid, None);
    assert_matches!(supervisor.send("list").await, Err(SupervisorError::NotRunning));
    Ok(())
}
