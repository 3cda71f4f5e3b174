//! Server configuration: TOML file + CLI overrides.

use crate::attestation::ProviderKind;
use crate::connection::SessionPolicy;
use crate::responder::LatencyModel;
use crate::state::StatePolicy;
use lucia_core::{LuciaError, LuciaResult};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub attestation: AttestationSection,
    #[serde(default)]
    pub responder: ResponderSection,
    #[serde(default)]
    pub session: SessionPolicy,
    #[serde(default)]
    pub state: StateSection,
}

/// `[server]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_ws_path")]
    pub ws_path: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            ws_path: default_ws_path(),
        }
    }
}

/// `[attestation]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct AttestationSection {
    #[serde(default)]
    pub provider: ProviderKind,
    /// Base URL of the attestation service (`http` provider).
    #[serde(default = "default_attestation_url")]
    pub url: String,
    #[serde(default = "default_attestation_timeout")]
    pub timeout_ms: u64,
    /// Copied into reports that do not carry one.
    #[serde(default = "default_verification_url")]
    pub verification_url: Option<String>,
}

impl Default for AttestationSection {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            url: default_attestation_url(),
            timeout_ms: default_attestation_timeout(),
            verification_url: default_verification_url(),
        }
    }
}

/// `[responder]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ResponderSection {
    #[serde(default = "default_min_delay")]
    pub min_delay_ms: u64,
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
}

impl Default for ResponderSection {
    fn default() -> Self {
        Self {
            min_delay_ms: default_min_delay(),
            max_delay_ms: default_max_delay(),
        }
    }
}

/// `[state]` section of the config TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StateSection {
    #[serde(default)]
    pub policy: StatePolicy,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_ws_path() -> String {
    "/ws".to_string()
}
fn default_attestation_url() -> String {
    "http://localhost:8081".to_string()
}
fn default_attestation_timeout() -> u64 {
    5000
}
fn default_verification_url() -> Option<String> {
    Some("http://localhost:8081/verify".to_string())
}
fn default_min_delay() -> u64 {
    300
}
fn default_max_delay() -> u64 {
    800
}

/// Resolved server configuration (CLI overrides applied).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub ws_path: String,
    pub attestation_provider: ProviderKind,
    pub attestation_url: String,
    pub attestation_timeout: Duration,
    pub verification_url: Option<String>,
    pub latency: LatencyModel,
    pub session: SessionPolicy,
    pub state_policy: StatePolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_file(ConfigFile::default())
    }
}

impl ServerConfig {
    /// Load config from TOML file, then apply CLI overrides.
    pub fn load(
        config_path: Option<&Path>,
        cli_host: Option<&str>,
        cli_port: Option<u16>,
        cli_attestation_url: Option<&str>,
        cli_state_policy: Option<StatePolicy>,
    ) -> LuciaResult<Self> {
        let file_config = match config_path {
            Some(path) => {
                let expanded = expand_tilde(path);
                if expanded.exists() {
                    info!(path = %expanded.display(), "loading config file");
                    let content = std::fs::read_to_string(&expanded)?;
                    parse(&content)?
                } else {
                    info!(path = %expanded.display(), "config file not found, using defaults");
                    ConfigFile::default()
                }
            }
            None => ConfigFile::default(),
        };

        let mut config = Self::from_file(file_config);
        if let Some(host) = cli_host {
            config.host = host.to_string();
        }
        if let Some(port) = cli_port {
            config.port = port;
        }
        if let Some(url) = cli_attestation_url {
            config.attestation_provider = ProviderKind::Http;
            config.attestation_url = url.to_string();
        }
        if let Some(policy) = cli_state_policy {
            config.state_policy = policy;
        }
        Ok(config)
    }

    fn from_file(file: ConfigFile) -> Self {
        Self {
            host: file.server.host,
            port: file.server.port,
            ws_path: file.server.ws_path,
            attestation_provider: file.attestation.provider,
            attestation_url: file.attestation.url,
            attestation_timeout: Duration::from_millis(file.attestation.timeout_ms),
            verification_url: file.attestation.verification_url,
            latency: LatencyModel::from_millis(
                file.responder.min_delay_ms,
                file.responder.max_delay_ms,
            ),
            session: file.session,
            state_policy: file.state.policy,
        }
    }

    /// The socket address to listen on.
    pub fn bind_addr(&self) -> LuciaResult<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| LuciaError::Config(format!("invalid address: {e}")))
    }
}

fn parse(content: &str) -> LuciaResult<ConfigFile> {
    toml::from_str(content).map_err(|e| LuciaError::Config(format!("config parse error: {e}")))
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr().unwrap(), "0.0.0.0:8080".parse().unwrap());
        assert_eq!(config.ws_path, "/ws");
        assert_eq!(config.attestation_provider, ProviderKind::Mock);
        assert_eq!(config.attestation_timeout, Duration::from_secs(5));
        assert_eq!(
            config.verification_url.as_deref(),
            Some("http://localhost:8081/verify")
        );
        assert_eq!(config.latency, LatencyModel::default());
        assert_eq!(config.session, SessionPolicy::default());
        assert_eq!(config.state_policy, StatePolicy::Serialized);
    }

    #[test]
    fn sections_override_defaults() {
        let file = parse(
            r#"
            [server]
            port = 9000

            [attestation]
            provider = "http"
            url = "http://attest:8081"
            timeout_ms = 250

            [responder]
            min_delay_ms = 0
            max_delay_ms = 0

            [session]
            require_handshake_complete = true
            max_decrypt_failures = 3

            [state]
            policy = "unguarded"
            "#,
        )
        .unwrap();
        let config = ServerConfig::from_file(file);

        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.attestation_provider, ProviderKind::Http);
        assert_eq!(config.attestation_url, "http://attest:8081");
        assert_eq!(config.attestation_timeout, Duration::from_millis(250));
        assert_eq!(config.latency, LatencyModel::None);
        assert!(config.session.require_handshake_complete);
        assert_eq!(config.session.max_decrypt_failures, 3);
        assert_eq!(config.state_policy, StatePolicy::Unguarded);
    }

    #[test]
    fn bad_toml_is_config_error() {
        assert!(matches!(
            parse("[server]\nport = \"eighty\""),
            Err(LuciaError::Config(_))
        ));
        assert!(matches!(
            parse("[state]\npolicy = \"optimistic\""),
            Err(LuciaError::Config(_))
        ));
    }

    #[test]
    fn cli_overrides_win() {
        let config = ServerConfig::load(
            Some(Path::new("/nonexistent/lucia/config.toml")),
            Some("127.0.0.1"),
            Some(0),
            Some("http://127.0.0.1:8081"),
            Some(StatePolicy::Unguarded),
        )
        .unwrap();
        assert_eq!(config.bind_addr().unwrap(), "127.0.0.1:0".parse().unwrap());
        assert_eq!(config.attestation_provider, ProviderKind::Http);
        assert_eq!(config.attestation_url, "http://127.0.0.1:8081");
        assert_eq!(config.state_policy, StatePolicy::Unguarded);
    }

    #[test]
    fn tilde_expansion() {
        let plain = Path::new("/etc/lucia.toml");
        assert_eq!(expand_tilde(plain), plain);
        if let Some(home) = dirs::home_dir() {
            assert_eq!(
                expand_tilde(Path::new("~/.lucia/config.toml")),
                home.join(".lucia/config.toml")
            );
        }
    }
}
