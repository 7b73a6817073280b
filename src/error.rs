use std::io;
use std::time::Duration;

/// Startup errors for the webhook listener. All of them are fatal.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Failed to bind {address}: {source}")]
    BindError {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParseError(#[from] toml::de::Error),
}

/// Failure of a single deployment run. Only ever logged.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("Deployment command failed to start: {0}")]
    Spawn(#[source] io::Error),

    #[error("Deployment command exited with {}\n{stderr}", exit_label(.code))]
    Failed { code: Option<i32>, stderr: String },

    #[error("Deployment timed out after {}s", .0.as_secs())]
    TimedOut(Duration),
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("code {}", code),
        None => "no exit code (killed by signal)".to_string(),
    }
}

/// Helper type for Results that use ListenerError
pub type Result<T> = std::result::Result<T, ListenerError>;
