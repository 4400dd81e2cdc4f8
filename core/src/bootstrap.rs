//! One-time provisioning of a fresh server installation.
//!
//! Everything happens inside `<server_dir>.partial`, which is renamed to the
//! server directory only once the jar is downloaded, the first run has
//! generated the server's files and the license has been accepted. A failed
//! bootstrap leaves no server directory behind and is retried from scratch.

use std::ffi::OsString;
use std::path::Path;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use regex_lite::Regex;
use tokio::io::AsyncRead;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::config::Config;
use crate::error::BootstrapError;
use crate::log_sink::LogSink;
use crate::supervisor::LaunchSpec;
use crate::supervisor::lines::LineReader;

const EULA_FILE: &str = "eula.txt";
const STAGING_SUFFIX: &str = ".partial";

#[allow(clippy::expect_used)]
static LICENSE_FLAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("(?i)false").expect("valid license flag regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapOutcome {
    SkippedDevelopment,
    AlreadyInstalled,
    Installed,
}

#[derive(Debug, Clone)]
pub struct Bootstrap {
    server_dir: PathBuf,
    jar_name: String,
    download_url: String,
    first_run: LaunchSpec,
    timeout: Duration,
    development: bool,
}

impl Bootstrap {
    pub fn from_config(config: &Config) -> Self {
        Self {
            server_dir: config.server_dir.clone(),
            jar_name: config.jar_name.clone(),
            download_url: config.download_url.clone(),
            first_run: config.first_run_launch(),
            timeout: config.first_run_timeout(),
            development: config.dev,
        }
    }

    /// Replaces the program and arguments of the throwaway first run.
    pub fn with_first_run(mut self, program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        self.first_run.program = program.into();
        self.first_run.args = args;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn staging_dir(&self) -> PathBuf {
        let mut name = OsString::from(self.server_dir.as_os_str());
        name.push(STAGING_SUFFIX);
        PathBuf::from(name)
    }

    /// Installs the server unless running in development mode or an
    /// installation already exists. Output of the first run goes to `sink`.
    pub async fn ensure_installed(
        &self,
        sink: &LogSink,
    ) -> Result<BootstrapOutcome, BootstrapError> {
        if self.development {
            info!("development mode, skipping server download");
            return Ok(BootstrapOutcome::SkippedDevelopment);
        }
        if tokio::fs::try_exists(&self.server_dir).await.unwrap_or(false) {
            debug!(dir = %self.server_dir.display(), "server already installed");
            return Ok(BootstrapOutcome::AlreadyInstalled);
        }

        let staging = self.staging_dir();
        match self.install_into(&staging, sink).await {
            Ok(()) => {}
            Err(err) => {
                if let Err(cleanup) = tokio::fs::remove_dir_all(&staging).await {
                    warn!(dir = %staging.display(), "failed to remove staging directory: {cleanup}");
                }
                return Err(err);
            }
        }

        tokio::fs::rename(&staging, &self.server_dir)
            .await
            .map_err(|error| BootstrapError::Finalize {
                path: self.server_dir.clone(),
                error,
            })?;
        info!(dir = %self.server_dir.display(), "server installed");
        Ok(BootstrapOutcome::Installed)
    }

    async fn install_into(&self, staging: &Path, sink: &LogSink) -> Result<(), BootstrapError> {
        if tokio::fs::try_exists(staging).await.unwrap_or(false) {
            debug!(dir = %staging.display(), "removing leftover staging directory");
            tokio::fs::remove_dir_all(staging)
                .await
                .map_err(|err| BootstrapError::create_dir(staging, err))?;
        }
        tokio::fs::create_dir_all(staging)
            .await
            .map_err(|err| BootstrapError::create_dir(staging, err))?;

        self.download(&staging.join(&self.jar_name)).await?;
        self.first_run(staging, sink).await?;
        accept_license_file(&staging.join(EULA_FILE)).await
    }

    async fn download(&self, destination: &Path) -> Result<(), BootstrapError> {
        let url = self.download_url.as_str();
        info!(%url, "downloading server");
        let mut response = reqwest::get(url)
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|err| BootstrapError::download(url, err))?;

        let mut file = tokio::fs::File::create(destination)
            .await
            .map_err(|err| BootstrapError::write_artifact(destination, err))?;
        let mut written = 0usize;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|err| BootstrapError::download(url, err))?
        {
            file.write_all(&chunk)
                .await
                .map_err(|err| BootstrapError::write_artifact(destination, err))?;
            written += chunk.len();
        }
        file.flush()
            .await
            .map_err(|err| BootstrapError::write_artifact(destination, err))?;
        info!(bytes = written, path = %destination.display(), "server downloaded");
        Ok(())
    }

    async fn first_run(&self, dir: &Path, sink: &LogSink) -> Result<(), BootstrapError> {
        let launch = self.first_run.clone().with_cwd(dir);
        info!(command = %launch.display(), "running server once to generate its files");

        let mut command = launch.command();
        command.stdin(Stdio::null());
        let mut child = command
            .spawn()
            .map_err(|error| BootstrapError::Launch { error })?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let run = async {
            tokio::join!(forward_lines(stdout, sink), forward_lines(stderr, sink));
            child.wait().await
        };
        match tokio::time::timeout(self.timeout, run).await {
            Ok(Ok(status)) => {
                info!(%status, "first run completed");
                Ok(())
            }
            Ok(Err(error)) => Err(BootstrapError::Launch { error }),
            Err(_) => {
                warn!(timeout = ?self.timeout, "first run timed out, killing it");
                if let Err(err) = child.start_kill() {
                    debug!("first run already gone: {err}");
                }
                if let Err(err) = child.wait().await {
                    debug!("failed to reap first run: {err}");
                }
                Err(BootstrapError::FirstRunTimeout {
                    timeout_secs: self.timeout.as_secs(),
                })
            }
        }
    }
}

/// Rewrites every case-insensitive `false` in the license file to `true`.
pub fn accept_license(contents: &str) -> String {
    LICENSE_FLAG.replace_all(contents, "true").into_owned()
}

async fn accept_license_file(path: &Path) -> Result<(), BootstrapError> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|err| BootstrapError::patch_eula(path, err))?;
    tokio::fs::write(path, accept_license(&contents))
        .await
        .map_err(|err| BootstrapError::patch_eula(path, err))?;
    info!(path = %path.display(), "license accepted");
    Ok(())
}

async fn forward_lines<R>(stream: Option<R>, sink: &LogSink)
where
    R: AsyncRead + Unpin,
{
    let Some(stream) = stream else {
        return;
    };
    let mut reader = LineReader::new(stream);
    loop {
        match reader.next_line().await {
            Ok(Some(line)) => sink.append(line),
            Ok(None) => break,
            Err(err) => {
                warn!("failed to read first run output: {err}");
                break;
            }
        }
    }
}
