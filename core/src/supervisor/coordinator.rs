use std::collections::VecDeque;
use std::process::ExitStatus;
use std::time::Duration;

use tokio::io::AsyncRead;
use tokio::io::AsyncWriteExt;
use tokio::process::Child;
use tokio::process::ChildStdin;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio::time::sleep_until;
use tokio::time::timeout;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::LifecycleState;
use super::SupervisorMode;
use super::SupervisorOptions;
use super::SupervisorStatus;
use super::lines::LineReader;
use crate::error::SupervisorError;
use crate::log_sink::LogSink;
use crate::response::ResponseCapture;
use crate::response::clamp_window;

const OUTPUT_EVENT_CAPACITY: usize = 1024;
/// How long a process whose streams closed gets to exit before it is killed.
const EXIT_GRACE: Duration = Duration::from_secs(2);
const DEVELOPMENT_START_LINE: &str = "Starting server in development mode";

type Reply<T> = oneshot::Sender<Result<T, SupervisorError>>;

pub(super) enum Request {
    Start {
        reply: Reply<String>,
    },
    Stop {
        reply: Reply<String>,
    },
    Send {
        text: String,
        window: Duration,
        reply: Reply<String>,
    },
    Status {
        reply: oneshot::Sender<SupervisorStatus>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamKind {
    Stdout,
    Stderr,
}

impl StreamKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

#[derive(Debug)]
enum OutputEvent {
    Line {
        run_id: u64,
        line: String,
    },
    Closed {
        run_id: u64,
        stream: StreamKind,
        error: Option<std::io::Error>,
    },
}

/// Operations waiting for the current capture window to close.
enum Pending {
    Send {
        text: String,
        window: Duration,
        reply: Reply<String>,
    },
    Stop {
        reply: Reply<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CaptureKind {
    Start,
    Command,
    Stop,
}

struct Capture {
    kind: CaptureKind,
    response: ResponseCapture,
    deadline: Instant,
    reply: Reply<String>,
}

struct ServerProcess {
    run_id: u64,
    child: Child,
    stdin: ChildStdin,
    pid: Option<u32>,
    open_streams: usize,
}

pub(super) struct Coordinator {
    options: SupervisorOptions,
    capture_window: Duration,
    logs: LogSink,
    state: LifecycleState,
    last_run_id: Option<u64>,
    process: Option<ServerProcess>,
    capture: Option<Capture>,
    pending: VecDeque<Pending>,
    events_tx: mpsc::Sender<OutputEvent>,
    events_rx: mpsc::Receiver<OutputEvent>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl Coordinator {
    pub(super) fn new(options: SupervisorOptions, logs: LogSink) -> Self {
        let (events_tx, events_rx) = mpsc::channel(OUTPUT_EVENT_CAPACITY);
        Self {
            capture_window: clamp_window(options.capture_window),
            options,
            logs,
            state: LifecycleState::Stopped,
            last_run_id: None,
            process: None,
            capture: None,
            pending: VecDeque::new(),
            events_tx,
            events_rx,
            shutdown: None,
        }
    }

    pub(super) async fn run(mut self, mut requests: mpsc::Receiver<Request>) {
        debug!(mode = ?self.options.mode, "supervisor coordinator started");
        loop {
            let deadline = self.capture.as_ref().map(|capture| capture.deadline);
            // A chatty server must not keep a window open past its deadline.
            if deadline.is_some_and(|deadline| deadline <= Instant::now()) {
                self.close_capture().await;
                continue;
            }

            tokio::select! {
                biased;
                Some(event) = self.events_rx.recv() => self.handle_event(event).await,
                _ = wait_for_deadline(deadline) => self.close_capture().await,
                request = requests.recv() => match request {
                    Some(request) => self.handle_request(request).await,
                    None => {
                        self.fail_process(None).await;
                        break;
                    }
                },
            }

            if self.state == LifecycleState::Stopped
                && let Some(reply) = self.shutdown.take()
            {
                let _ = reply.send(());
                break;
            }
        }
        debug!("supervisor coordinator finished");
    }

    fn development(&self) -> bool {
        self.options.mode == SupervisorMode::Development
    }

    fn status(&self) -> SupervisorStatus {
        SupervisorStatus {
            state: self.state,
            run_id: self.last_run_id,
            pid: self.process.as_ref().and_then(|process| process.pid),
            development: self.development(),
            queued_commands: self.pending.len(),
        }
    }

    async fn handle_request(&mut self, request: Request) {
        match request {
            Request::Start { reply } => self.start(reply).await,
            Request::Stop { reply } => self.stop(reply).await,
            Request::Send {
                text,
                window,
                reply,
            } => self.send(text, window, reply).await,
            Request::Status { reply } => {
                let _ = reply.send(self.status());
            }
            Request::Shutdown { reply } => self.begin_shutdown(reply).await,
        }
    }

    async fn start(&mut self, reply: Reply<String>) {
        if self.development() {
            info!("development mode: not launching a server process");
            self.logs.append(DEVELOPMENT_START_LINE);
            respond(reply, Ok(String::new()));
            return;
        }
        if self.state != LifecycleState::Stopped {
            respond(reply, Err(SupervisorError::AlreadyRunning));
            return;
        }
        if let Err(err) = self.launch() {
            error!(error = %err, "failed to launch server process");
            respond(reply, Err(err));
            return;
        }
        self.state = LifecycleState::Starting;
        self.open_capture(CaptureKind::Start, self.capture_window, reply);
    }

    async fn stop(&mut self, reply: Reply<String>) {
        if self.development() {
            info!("development mode: no server process to stop");
            respond(reply, Ok(String::new()));
            return;
        }
        match self.state {
            LifecycleState::Stopped | LifecycleState::Stopping => {
                respond(reply, Err(SupervisorError::NotRunning));
            }
            LifecycleState::Starting | LifecycleState::Running => {
                self.pending.push_back(Pending::Stop { reply });
                self.dispatch_pending().await;
            }
        }
    }

    async fn send(&mut self, text: String, window: Duration, reply: Reply<String>) {
        if self.development() {
            info!(command = %text, "development mode: command not sent");
            respond(reply, Ok(String::new()));
            return;
        }
        match self.state {
            LifecycleState::Stopped | LifecycleState::Stopping => {
                respond(reply, Err(SupervisorError::NotRunning));
            }
            LifecycleState::Starting | LifecycleState::Running => {
                self.pending.push_back(Pending::Send {
                    text,
                    window,
                    reply,
                });
                self.dispatch_pending().await;
            }
        }
    }

    async fn begin_shutdown(&mut self, reply: oneshot::Sender<()>) {
        self.shutdown = Some(reply);
        let active = matches!(
            self.state,
            LifecycleState::Starting | LifecycleState::Running
        );
        if self.development() || !active {
            return;
        }
        info!("stopping server before shutdown");
        let (stop_reply, _) = oneshot::channel();
        self.pending.push_back(Pending::Stop { reply: stop_reply });
        self.dispatch_pending().await;
    }

    /// Starts queued operations, one capture window at a time.
    async fn dispatch_pending(&mut self) {
        while self.capture.is_none() && self.state == LifecycleState::Running {
            let Some(next) = self.pending.pop_front() else {
                break;
            };
            match next {
                Pending::Send {
                    text,
                    window,
                    reply,
                } => {
                    self.write_command(CaptureKind::Command, &text, window, reply)
                        .await;
                }
                Pending::Stop { reply } => {
                    info!(run_id = self.last_run_id, "stopping server");
                    self.state = LifecycleState::Stopping;
                    let stop_command = self.options.stop_command.clone();
                    self.write_command(CaptureKind::Stop, &stop_command, self.capture_window, reply)
                        .await;
                }
            }
        }
    }

    async fn write_command(
        &mut self,
        kind: CaptureKind,
        text: &str,
        window: Duration,
        reply: Reply<String>,
    ) {
        // Output already queued was written before this command.
        self.drain_ready_events().await;

        let result = match self.process.as_mut() {
            Some(process) => write_line(&mut process.stdin, text).await,
            None => {
                respond(reply, Err(SupervisorError::NotRunning));
                return;
            }
        };

        match result {
            Ok(()) => {
                debug!(
                    command = text,
                    window_ms = window.as_millis() as u64,
                    "command written"
                );
                self.open_capture(kind, window, reply);
            }
            Err(err) => {
                error!(error = %err, "failed to write to server stdin");
                respond(reply, Err(SupervisorError::stream(err)));
                self.fail_process(None).await;
            }
        }
    }

    fn open_capture(&mut self, kind: CaptureKind, window: Duration, reply: Reply<String>) {
        self.capture = Some(Capture {
            kind,
            response: ResponseCapture::default(),
            deadline: Instant::now() + window,
            reply,
        });
    }

    async fn close_capture(&mut self) {
        let Some(Capture {
            kind,
            response,
            reply,
            ..
        }) = self.capture.take()
        else {
            return;
        };
        let output = response.finish();

        match kind {
            CaptureKind::Start => {
                if self.state == LifecycleState::Starting {
                    self.state = LifecycleState::Running;
                    info!(run_id = self.last_run_id, "server is running");
                }
                respond(reply, Ok(output));
            }
            CaptureKind::Command => respond(reply, Ok(output)),
            CaptureKind::Stop => {
                if let Some(process) = self.process.take() {
                    let run_id = process.run_id;
                    let status = reap(process, self.options.stop_grace).await;
                    info!(run_id, status = %describe_exit(status), "server stopped");
                }
                self.state = LifecycleState::Stopped;
                respond(reply, Ok(output));
                self.reject_pending();
            }
        }

        self.dispatch_pending().await;
    }

    async fn drain_ready_events(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event).await;
        }
    }

    async fn handle_event(&mut self, event: OutputEvent) {
        match event {
            OutputEvent::Line { run_id, line } => {
                if self.is_current(run_id)
                    && let Some(capture) = self.capture.as_mut()
                {
                    capture.response.observe(&line);
                }
                self.logs.append(line);
            }
            OutputEvent::Closed {
                run_id,
                stream,
                error,
            } => {
                if !self.is_current(run_id) {
                    debug!(run_id, stream = stream.as_str(), "stale stream closed");
                    return;
                }
                if let Some(err) = error {
                    warn!(run_id, stream = stream.as_str(), error = %err, "server stream failed");
                    self.fail_process(Some(SupervisorError::stream(err))).await;
                    return;
                }
                let Some(process) = self.process.as_mut() else {
                    return;
                };
                process.open_streams = process.open_streams.saturating_sub(1);
                debug!(run_id, stream = stream.as_str(), "server stream closed");
                if process.open_streams == 0 {
                    self.process_exited().await;
                }
            }
        }
    }

    fn is_current(&self, run_id: u64) -> bool {
        self.process
            .as_ref()
            .is_some_and(|process| process.run_id == run_id)
    }

    /// Both output streams reached end of file.
    async fn process_exited(&mut self) {
        if self.state == LifecycleState::Stopping {
            // The server honoured the stop command; the stop window still
            // runs to completion and reaps the child.
            return;
        }
        let Some(process) = self.process.take() else {
            return;
        };
        let run_id = process.run_id;
        let status = reap(process, EXIT_GRACE).await;
        warn!(run_id, status = %describe_exit(status), "server process exited unexpectedly");

        self.state = LifecycleState::Stopped;
        if let Some(capture) = self.capture.take() {
            respond(capture.reply, Ok(capture.response.finish()));
        }
        self.reject_pending();
    }

    /// Kills the current process (if any) after a stream failure and returns
    /// to `Stopped`. `error` is delivered to the open capture, if any.
    async fn fail_process(&mut self, error: Option<SupervisorError>) {
        if let Some(process) = self.process.take() {
            let run_id = process.run_id;
            let status = terminate(process).await;
            info!(run_id, status = %describe_exit(status), "server process terminated");
        }
        self.state = LifecycleState::Stopped;
        if let Some(capture) = self.capture.take() {
            let result = match error {
                Some(err) => Err(err),
                None => Ok(capture.response.finish()),
            };
            respond(capture.reply, result);
        }
        self.reject_pending();
    }

    fn reject_pending(&mut self) {
        for pending in self.pending.drain(..) {
            let reply = match pending {
                Pending::Send { reply, .. } | Pending::Stop { reply } => reply,
            };
            respond(reply, Err(SupervisorError::NotRunning));
        }
    }

    fn launch(&mut self) -> Result<(), SupervisorError> {
        let spec = &self.options.launch;
        let mut child = spec.command().spawn().map_err(SupervisorError::spawn)?;
        let stdin = child.stdin.take().ok_or_else(|| missing_pipe("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing_pipe("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing_pipe("stderr"))?;

        let run_id = self.last_run_id.map_or(1, |id| id + 1);
        self.last_run_id = Some(run_id);
        spawn_reader(run_id, StreamKind::Stdout, stdout, self.events_tx.clone());
        spawn_reader(run_id, StreamKind::Stderr, stderr, self.events_tx.clone());

        let pid = child.id();
        info!(
            run_id,
            pid,
            command = %spec.display(),
            cwd = %spec.cwd.display(),
            "server process launched"
        );
        self.process = Some(ServerProcess {
            run_id,
            child,
            stdin,
            pid,
            open_streams: 2,
        });
        Ok(())
    }
}

fn spawn_reader<R>(run_id: u64, stream: StreamKind, reader: R, events: mpsc::Sender<OutputEvent>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = LineReader::new(reader);
        let error = loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if events.send(OutputEvent::Line { run_id, line }).await.is_err() {
                        return;
                    }
                }
                Ok(None) => break None,
                Err(err) => break Some(err),
            }
        };
        let _ = events
            .send(OutputEvent::Closed {
                run_id,
                stream,
                error,
            })
            .await;
    });
}

async fn write_line(stdin: &mut ChildStdin, text: &str) -> std::io::Result<()> {
    let mut line = String::with_capacity(text.len() + 1);
    line.push_str(text);
    line.push('\n');
    stdin.write_all(line.as_bytes()).await?;
    stdin.flush().await
}

async fn wait_for_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Gives the process `grace` to exit on its own, then kills it.
async fn reap(process: ServerProcess, grace: Duration) -> Option<ExitStatus> {
    let ServerProcess {
        mut child, stdin, ..
    } = process;
    drop(stdin);
    match timeout(grace, child.wait()).await {
        Ok(Ok(status)) => return Some(status),
        Ok(Err(err)) => debug!(error = %err, "failed to wait for server process"),
        Err(_) => warn!(grace = ?grace, "server process did not exit in time, killing it"),
    }
    kill_and_wait(child).await
}

/// Forcibly ends the process unless it already exited.
async fn terminate(process: ServerProcess) -> Option<ExitStatus> {
    let ServerProcess {
        mut child, stdin, ..
    } = process;
    drop(stdin);
    if let Ok(Some(status)) = child.try_wait() {
        return Some(status);
    }
    kill_and_wait(child).await
}

async fn kill_and_wait(mut child: Child) -> Option<ExitStatus> {
    if let Err(err) = child.start_kill() {
        debug!(error = %err, "failed to signal server process");
    }
    match child.wait().await {
        Ok(status) => Some(status),
        Err(err) => {
            warn!(error = %err, "failed to reap server process");
            None
        }
    }
}

fn describe_exit(status: Option<ExitStatus>) -> String {
    match status {
        Some(status) => status.to_string(),
        None => "unknown".to_string(),
    }
}

fn missing_pipe(name: &str) -> SupervisorError {
    SupervisorError::spawn(std::io::Error::other(format!(
        "child {name} was not captured"
    )))
}

fn respond<T>(reply: Reply<T>, result: Result<T, SupervisorError>) {
    if reply.send(result).is_err() {
        debug!("caller went away before its response was ready");
    }
}
