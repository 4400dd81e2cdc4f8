//! Supervision of the game server process.
//!
//! A single coordinator task owns the child process, its stdin, the lifecycle
//! state machine and the queue of pending operations. Stream reader tasks
//! forward output lines to the coordinator, which appends every line to the
//! [`LogSink`] and, while a capture window is open, to that window's
//! response. [`Supervisor`] is the cloneable handle used to talk to it.
//!
//! Commands have no request identifiers, so a response is whatever decorated
//! output arrives between the write and the end of the capture window.
//! Commands are executed one at a time: a window never overlaps another
//! command's window, but unrelated server chatter inside the window is still
//! reported as part of the response.

mod coordinator;
mod launch;
pub(crate) mod lines;
#[cfg(target_os = "linux")]
mod process_death;

use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::oneshot;

use crate::error::SupervisorError;
use crate::log_sink::LogSink;
use crate::response::clamp_window;

pub use launch::LaunchSpec;

use coordinator::Coordinator;
use coordinator::Request;

const REQUEST_QUEUE_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SupervisorMode {
    /// Spawn and drive a real server process.
    Live,
    /// Never spawn anything; every operation is a logged no-op.
    Development,
}

#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    pub launch: LaunchSpec,
    pub mode: SupervisorMode,
    /// Default capture window for `start`, `stop` and `send`.
    pub capture_window: Duration,
    /// Line written to the server to ask it to shut down.
    pub stop_command: String,
    /// How long the server gets to exit on its own after the stop window
    /// before it is killed.
    pub stop_grace: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisorStatus {
    pub state: LifecycleState,
    /// Launch counter of the current (or last) server process.
    pub run_id: Option<u64>,
    pub pid: Option<u32>,
    pub development: bool,
    pub queued_commands: usize,
}

#[derive(Debug, Clone)]
pub struct Supervisor {
    requests: mpsc::Sender<Request>,
    logs: LogSink,
    capture_window: Duration,
}

impl Supervisor {
    /// Spawns the coordinator task. Must be called from within a tokio
    /// runtime.
    pub fn spawn(options: SupervisorOptions, logs: LogSink) -> Self {
        let (requests, request_rx) = mpsc::channel(REQUEST_QUEUE_CAPACITY);
        let capture_window = clamp_window(options.capture_window);
        let coordinator = Coordinator::new(options, logs.clone());
        tokio::spawn(coordinator.run(request_rx));
        Self {
            requests,
            logs,
            capture_window,
        }
    }

    /// Launches the server and returns the output captured during the start
    /// window.
    pub async fn start(&self) -> Result<String, SupervisorError> {
        self.call(|reply| Request::Start { reply }).await?
    }

    /// Sends the stop command, waits for its response window, then kills the
    /// process.
    pub async fn stop(&self) -> Result<String, SupervisorError> {
        self.call(|reply| Request::Stop { reply }).await?
    }

    pub async fn send(&self, text: impl Into<String>) -> Result<String, SupervisorError> {
        self.send_with_window(text, self.capture_window).await
    }

    pub async fn send_with_window(
        &self,
        text: impl Into<String>,
        window: Duration,
    ) -> Result<String, SupervisorError> {
        let text = text.into();
        let window = clamp_window(window);
        self.call(|reply| Request::Send {
            text,
            window,
            reply,
        })
        .await?
    }

    pub async fn status(&self) -> Result<SupervisorStatus, SupervisorError> {
        self.call(|reply| Request::Status { reply }).await
    }

    /// Stops the server if it is running and ends the coordinator task.
    pub async fn shutdown(&self) -> Result<(), SupervisorError> {
        self.call(|reply| Request::Shutdown { reply }).await
    }

    pub fn logs(&self) -> &LogSink {
        &self.logs
    }

    async fn call<T>(
        &self,
        request: impl FnOnce(oneshot::Sender<T>) -> Request,
    ) -> Result<T, SupervisorError> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(request(reply))
            .await
            .map_err(|_| SupervisorError::Closed)?;
        response.await.map_err(|_| SupervisorError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn status_serializes_with_lowercase_state() {
        let status = SupervisorStatus {
            state: LifecycleState::Running,
            run_id: Some(3),
            pid: Some(4242),
            development: false,
            queued_commands: 0,
        };

        assert_eq!(
            serde_json::to_value(&status).expect("serialize"),
            serde_json::json!({
                "state": "running",
                "run_id": 3,
                "pid": 4242,
                "development": false,
                "queued_commands": 0,
            })
        );
    }
}
