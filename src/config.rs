//! Listener configuration, loaded once at startup
//!
//! Values come from an optional TOML file and are overridden by environment
//! variables. The result is immutable for the lifetime of the process.

use serde::Deserialize;
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::WEBHOOK_PATH;
use crate::error::{ListenerError, Result};

pub const DEFAULT_CONFIG_PATH: &str = "webhook_listener.toml";
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:3001";
pub const DEFAULT_DEPLOY_SCRIPT: &str = "git pull origin master && docker compose up -d --build";
pub const DEFAULT_DEPLOY_TIMEOUT_SECS: u64 = 600;
/// Used when no secret is configured. Anyone who knows it can trigger deploys.
pub const PLACEHOLDER_SECRET: &str = "your-secret-here";

/// Shared secret used to sign webhook bodies.
#[derive(Clone, PartialEq, Eq)]
pub struct WebhookSecret(String);

impl WebhookSecret {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn placeholder() -> Self {
        Self(PLACEHOLDER_SECRET.to_string())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Returns true if no real secret was configured.
    pub fn is_placeholder(&self) -> bool {
        self.0 == PLACEHOLDER_SECRET
    }
}

impl fmt::Debug for WebhookSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WebhookSecret(<redacted>)")
    }
}

/// The fixed deployment command and how to run it.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeployConfig {
    pub script: String,
    pub working_dir: Option<PathBuf>,
    pub timeout_secs: u64,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            script: DEFAULT_DEPLOY_SCRIPT.to_string(),
            working_dir: None,
            timeout_secs: DEFAULT_DEPLOY_TIMEOUT_SECS,
        }
    }
}

impl DeployConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// On-disk layout of the config file. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    bind_address: Option<String>,
    webhook_secret: Option<String>,
    log_dir: Option<PathBuf>,
    deploy: DeployConfig,
}

#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub bind_address: String,
    pub secret: WebhookSecret,
    pub log_dir: Option<PathBuf>,
    pub deploy: DeployConfig,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            secret: WebhookSecret::placeholder(),
            log_dir: None,
            deploy: DeployConfig::default(),
        }
    }
}

impl ListenerConfig {
    /// Load configuration from `LISTENER_CONFIG` (or the default file) and the
    /// process environment.
    pub fn load() -> Result<Self> {
        let path = std::env::var("LISTENER_CONFIG").ok();
        Self::load_from(path.as_deref().map(Path::new), |key| std::env::var(key).ok())
    }

    /// Load from an explicit file (which must exist) or the default file
    /// (which may be absent), then apply overrides from `env`.
    pub fn load_from<F>(path: Option<&Path>, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let file = match path {
            Some(path) => Some(read_file(path)?),
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_PATH);
                if default_path.exists() {
                    Some(read_file(default_path)?)
                } else {
                    None
                }
            }
        };

        let config = Self::from_parts(file.as_deref().unwrap_or(""), env)?;
        config.validate()?;
        Ok(config)
    }

    /// Build a config from TOML text plus environment overrides.
    pub fn from_parts<F>(toml_str: &str, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let file: FileConfig = toml::from_str(toml_str)?;
        let non_empty = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        let secret = non_empty("WEBHOOK_SECRET")
            .or(file.webhook_secret.filter(|s| !s.is_empty()))
            .map(WebhookSecret::new)
            .unwrap_or_else(WebhookSecret::placeholder);

        Ok(Self {
            bind_address: non_empty("BIND_ADDRESS")
                .or(file.bind_address)
                .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string()),
            secret,
            log_dir: non_empty("LOG_DIR").map(PathBuf::from).or(file.log_dir),
            deploy: file.deploy,
        })
    }

    fn validate(&self) -> Result<()> {
        if self.deploy.script.trim().is_empty() {
            return Err(ListenerError::ConfigError(
                "deploy.script must not be empty".to_string(),
            ));
        }
        if self.deploy.timeout_secs == 0 {
            return Err(ListenerError::ConfigError(
                "deploy.timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns true if a real secret was supplied.
    pub fn has_secret(&self) -> bool {
        !self.secret.is_placeholder()
    }

    /// Startup warning for a listener running on the placeholder secret.
    pub fn secret_warning(&self) -> Option<&'static str> {
        if self.has_secret() {
            None
        } else {
            Some("WEBHOOK_SECRET is not set; using the insecure placeholder secret")
        }
    }

    /// Lines logged once the listener is bound to `local_addr`.
    pub fn startup_report(&self, local_addr: SocketAddr) -> Vec<String> {
        vec![
            format!(
                "Webhook listener running on {} (port {})",
                local_addr,
                local_addr.port()
            ),
            format!("Webhook endpoint: http://{}{}", local_addr, WEBHOOK_PATH),
            format!(
                "Webhook secret configured: {}",
                if self.has_secret() {
                    "Yes"
                } else {
                    "No (WARNING: Set WEBHOOK_SECRET!)"
                }
            ),
            format!(
                "Deployment command: {} (timeout {}s)",
                self.deploy.script, self.deploy.timeout_secs
            ),
        ]
    }
}

fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| {
        ListenerError::ConfigError(format!(
            "Failed to read config file '{}': {}",
            path.display(),
            e
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn empty_input_gives_defaults_with_placeholder_secret() {
        let config = ListenerConfig::from_parts("", env_of(&[])).unwrap();
        assert_eq!(config.bind_address, DEFAULT_BIND_ADDRESS);
        assert!(config.secret.is_placeholder());
        assert!(!config.has_secret());
        assert_eq!(config.deploy, DeployConfig::default());
        assert_eq!(config.deploy.timeout(), Duration::from_secs(600));
    }

    #[test]
    fn environment_secret_wins_over_file() {
        let toml = r#"webhook_secret = "from-file""#;
        let config =
            ListenerConfig::from_parts(toml, env_of(&[("WEBHOOK_SECRET", "from-env")])).unwrap();
        assert_eq!(config.secret.expose(), "from-env");
        assert!(config.has_secret());
    }

    #[test]
    fn empty_environment_values_count_as_unset() {
        let toml = r#"
            bind_address = "127.0.0.1:9000"
            webhook_secret = "from-file"
        "#;
        let config = ListenerConfig::from_parts(
            toml,
            env_of(&[("WEBHOOK_SECRET", ""), ("BIND_ADDRESS", "  ")]),
        )
        .unwrap();
        assert_eq!(config.secret.expose(), "from-file");
        assert_eq!(config.bind_address, "127.0.0.1:9000");
    }

    #[test]
    fn deploy_section_is_parsed() {
        let toml = r#"
            log_dir = "/var/log/deploy-webhook"

            [deploy]
            script = "make deploy"
            working_dir = "/srv/app"
            timeout_secs = 30
        "#;
        let config = ListenerConfig::from_parts(toml, env_of(&[])).unwrap();
        assert_eq!(config.deploy.script, "make deploy");
        assert_eq!(config.deploy.working_dir, Some(PathBuf::from("/srv/app")));
        assert_eq!(config.deploy.timeout_secs, 30);
        assert_eq!(config.log_dir, Some(PathBuf::from("/var/log/deploy-webhook")));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = ListenerConfig::from_parts("port = 3001", env_of(&[])).unwrap_err();
        assert!(matches!(err, ListenerError::TomlParseError(_)));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let config =
            ListenerConfig::from_parts("[deploy]\ntimeout_secs = 0", env_of(&[])).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ListenerError::ConfigError(_))
        ));
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let path = Path::new("/nonexistent/webhook_listener.toml");
        let err = ListenerConfig::load_from(Some(path), env_of(&[])).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn placeholder_secret_is_reported_at_startup() {
        let config = ListenerConfig::default();
        assert!(config.secret_warning().is_some());

        let report = config.startup_report("127.0.0.1:3001".parse().unwrap());
        assert_eq!(
            report[0],
            "Webhook listener running on 127.0.0.1:3001 (port 3001)"
        );
        assert_eq!(
            report[1],
            "Webhook endpoint: http://127.0.0.1:3001/deploy-webhook"
        );
        assert_eq!(
            report[2],
            "Webhook secret configured: No (WARNING: Set WEBHOOK_SECRET!)"
        );
    }

    #[test]
    fn configured_secret_is_reported_without_warning() {
        let config = ListenerConfig::from_parts("", env_of(&[("WEBHOOK_SECRET", "s3cr3t")]))
            .unwrap();
        assert_eq!(config.secret_warning(), None);

        let report = config.startup_report("0.0.0.0:8080".parse().unwrap());
        assert!(report.contains(&"Webhook secret configured: Yes".to_string()));
        assert!(report.iter().all(|line| !line.contains("s3cr3t")));
    }

    #[test]
    fn secret_is_redacted_in_debug_output() {
        let secret = WebhookSecret::new("hunter2");
        assert!(!format!("{:?}", secret).contains("hunter2"));
    }
}
