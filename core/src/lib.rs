//! Root of the `mcctl-core` library.
//!
//! The core owns everything that touches the supervised game server: the
//! in-memory log sink, the process supervisor with its command channel, and
//! the one-time first-run bootstrap of a fresh installation.

pub mod bootstrap;
pub mod config;
mod error;
mod log_sink;
mod response;
mod supervisor;

pub use bootstrap::Bootstrap;
pub use bootstrap::BootstrapOutcome;
pub use config::Config;
pub use config::ConfigOverrides;
pub use error::BootstrapError;
pub use error::ConfigError;
pub use error::SupervisorError;
pub use log_sink::DEFAULT_LOG_CAPACITY;
pub use log_sink::LogSink;
pub use response::RESPONSE_DELIMITER;
pub use response::clamp_window;
pub use response::strip_decoration;
pub use supervisor::LaunchSpec;
pub use supervisor::LifecycleState;
pub use supervisor::Supervisor;
pub use supervisor::SupervisorMode;
pub use supervisor::SupervisorOptions;
pub use supervisor::SupervisorStatus;
