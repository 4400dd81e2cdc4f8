use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("server is already running")]
    AlreadyRunning,
    #[error("server is not running")]
    NotRunning,
    #[error("failed to launch server process: {error}")]
    Spawn {
        #[source]
        error: std::io::Error,
    },
    #[error("server process stream failed: {error}")]
    Stream {
        #[source]
        error: std::io::Error,
    },
    #[error("supervisor task is no longer running")]
    Closed,
}

impl SupervisorError {
    pub(crate) fn spawn(error: std::io::Error) -> Self {
        Self::Spawn { error }
    }

    pub(crate) fn stream(error: std::io::Error) -> Self {
        Self::Stream { error }
    }

    /// Rejections that leave the supervisor untouched, as opposed to
    /// failures of the supervised process itself.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::AlreadyRunning | Self::NotRunning)
    }
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("failed to prepare installation directory {}: {error}", .path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        error: std::io::Error,
    },
    #[error("failed to download server artifact from {url}: {error}")]
    Download {
        url: String,
        #[source]
        error: reqwest::Error,
    },
    #[error("failed to write server artifact to {}: {error}", .path.display())]
    WriteArtifact {
        path: PathBuf,
        #[source]
        error: std::io::Error,
    },
    #[error("failed to launch first run: {error}")]
    Launch {
        #[source]
        error: std::io::Error,
    },
    #[error("first run did not exit within {timeout_secs}s")]
    FirstRunTimeout { timeout_secs: u64 },
    #[error("failed to accept license in {}: {error}", .path.display())]
    PatchEula {
        path: PathBuf,
        #[source]
        error: std::io::Error,
    },
    #[error("failed to move installation into {}: {error}", .path.display())]
    Finalize {
        path: PathBuf,
        #[source]
        error: std::io::Error,
    },
}

impl BootstrapError {
    pub(crate) fn create_dir(path: impl Into<PathBuf>, error: std::io::Error) -> Self {
        Self::CreateDir {
            path: path.into(),
            error,
        }
    }

    pub(crate) fn download(url: &str, error: reqwest::Error) -> Self {
        Self::Download {
            url: url.to_string(),
            error,
        }
    }

    pub(crate) fn write_artifact(path: impl Into<PathBuf>, error: std::io::Error) -> Self {
        Self::WriteArtifact {
            path: path.into(),
            error,
        }
    }

    pub(crate) fn patch_eula(path: impl Into<PathBuf>, error: std::io::Error) -> Self {
        Self::PatchEula {
            path: path.into(),
            error,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {error}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        error: std::io::Error,
    },
    #[error("failed to parse config {}: {error}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        error: toml::de::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_state_conflicts_are_rejections() {
        assert!(SupervisorError::AlreadyRunning.is_rejection());
        assert!(SupervisorError::NotRunning.is_rejection());
        assert!(!SupervisorError::Closed.is_rejection());
        let broken_pipe = std::io::Error::from(std::io::ErrorKind::BrokenPipe);
        assert!(!SupervisorError::stream(broken_pipe).is_rejection());
    }
}
