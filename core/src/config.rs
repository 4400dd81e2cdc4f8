//! Layered configuration: built-in defaults, then an optional TOML file, then
//! command-line/environment overrides.

use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use tracing::info;

use crate::error::ConfigError;
use crate::log_sink::DEFAULT_LOG_CAPACITY;
use crate::supervisor::LaunchSpec;
use crate::supervisor::SupervisorMode;
use crate::supervisor::SupervisorOptions;

/// Looked up in the working directory when no explicit path is given.
pub const DEFAULT_CONFIG_FILE: &str = "mcctl.toml";
pub const DEFAULT_PORT: u16 = 3002;
pub const DEFAULT_DOWNLOAD_URL: &str = "https://piston-data.mojang.com/v1/objects/f69c284232d7c7580bd89a5a4931c3581eae1378/server.jar";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub port: u16,
    /// Development mode: never spawn the server, never download anything.
    pub dev: bool,
    /// Launch the server as soon as the control plane is up.
    pub autostart: bool,
    pub server_dir: PathBuf,
    pub static_dir: PathBuf,
    pub java: PathBuf,
    pub jar_name: String,
    pub download_url: String,
    pub max_memory: String,
    pub min_memory: String,
    pub first_run_max_memory: String,
    pub first_run_min_memory: String,
    pub first_run_timeout_secs: u64,
    pub capture_window_ms: u64,
    pub stop_command: String,
    /// Seconds the server gets to save and exit after the stop window.
    pub stop_grace_secs: u64,
    pub log_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            dev: false,
            autostart: true,
            server_dir: PathBuf::from("server"),
            static_dir: PathBuf::from("public"),
            java: PathBuf::from("java"),
            jar_name: "minecraft_server.jar".to_string(),
            download_url: DEFAULT_DOWNLOAD_URL.to_string(),
            max_memory: "1024M".to_string(),
            min_memory: "1024M".to_string(),
            first_run_max_memory: "512M".to_string(),
            first_run_min_memory: "256M".to_string(),
            first_run_timeout_secs: 300,
            capture_window_ms: 250,
            stop_command: "stop".to_string(),
            stop_grace_secs: 30,
            log_capacity: DEFAULT_LOG_CAPACITY,
        }
    }
}

/// Values supplied on the command line or through the environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub port: Option<u16>,
    pub dev: Option<bool>,
    pub autostart: Option<bool>,
    pub server_dir: Option<PathBuf>,
    pub static_dir: Option<PathBuf>,
}

impl Config {
    /// Loads `path` (which must exist) or, when `None`, `mcctl.toml` from the
    /// working directory if present, then applies `overrides`.
    pub fn load_with_overrides(
        path: Option<&Path>,
        overrides: ConfigOverrides,
    ) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                if default_path.is_file() {
                    Self::from_file(default_path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply(overrides);
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|error| ConfigError::Read {
            path: path.to_path_buf(),
            error,
        })?;
        let config = Self::from_toml_str(&contents).map_err(|error| ConfigError::Parse {
            path: path.to_path_buf(),
            error,
        })?;
        info!(path = %path.display(), "loaded config");
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    pub fn apply(&mut self, overrides: ConfigOverrides) {
        let ConfigOverrides {
            port,
            dev,
            autostart,
            server_dir,
            static_dir,
        } = overrides;
        if let Some(port) = port {
            self.port = port;
        }
        if let Some(dev) = dev {
            self.dev = dev;
        }
        if let Some(autostart) = autostart {
            self.autostart = autostart;
        }
        if let Some(server_dir) = server_dir {
            self.server_dir = server_dir;
        }
        if let Some(static_dir) = static_dir {
            self.static_dir = static_dir;
        }
    }

    pub fn capture_window(&self) -> Duration {
        Duration::from_millis(self.capture_window_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }

    pub fn first_run_timeout(&self) -> Duration {
        Duration::from_secs(self.first_run_timeout_secs)
    }

    pub fn mode(&self) -> SupervisorMode {
        if self.dev {
            SupervisorMode::Development
        } else {
            SupervisorMode::Live
        }
    }

    /// Steady-state launch of the installed server.
    pub fn server_launch(&self) -> LaunchSpec {
        LaunchSpec::java_server(
            &self.java,
            &self.jar_name,
            &self.max_memory,
            &self.min_memory,
            &self.server_dir,
        )
    }

    /// Throwaway launch that lets the server generate its files. The working
    /// directory is chosen by the bootstrap.
    pub fn first_run_launch(&self) -> LaunchSpec {
        LaunchSpec::java_server(
            &self.java,
            &self.jar_name,
            &self.first_run_max_memory,
            &self.first_run_min_memory,
            &self.server_dir,
        )
    }

    pub fn supervisor_options(&self) -> SupervisorOptions {
        SupervisorOptions {
            launch: self.server_launch(),
            mode: self.mode(),
            capture_window: self.capture_window(),
            stop_command: self.stop_command.clone(),
            stop_grace: self.stop_grace(),
        }
    }
}
