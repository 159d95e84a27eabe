//! Configuration loading for mail connections
//!
//! Supports loading server settings from (in order of priority):
//! 1. JSON file (`~/.config/mailroom/server.json`)
//! 2. Runtime environment variables (fallback)
//!
//! The password is never part of the configuration.

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::transport::Protocol;

/// Server settings filename in the mailroom config directory
const SERVER_FILE: &str = "server.json";

/// Maximum number of identifiers sent in one transport round trip
pub const DEFAULT_SLICE_SIZE: usize = 3000;

/// SASL authentication mechanism
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum AuthMechanism {
    #[default]
    Plain,
    Login,
    CramMd5,
    XOAuth2,
    Other(String),
}

impl AuthMechanism {
    /// Parse a mechanism name, case-insensitively
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_uppercase().as_str() {
            "PLAIN" => AuthMechanism::Plain,
            "LOGIN" => AuthMechanism::Login,
            "CRAM-MD5" => AuthMechanism::CramMd5,
            "XOAUTH2" => AuthMechanism::XOAuth2,
            other => AuthMechanism::Other(other.to_string()),
        }
    }

    /// Wire name, e.g. `CRAM-MD5`
    pub fn as_str(&self) -> &str {
        match self {
            AuthMechanism::Plain => "PLAIN",
            AuthMechanism::Login => "LOGIN",
            AuthMechanism::CramMd5 => "CRAM-MD5",
            AuthMechanism::XOAuth2 => "XOAUTH2",
            AuthMechanism::Other(name) => name,
        }
    }
}

impl fmt::Display for AuthMechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for AuthMechanism {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for AuthMechanism {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(AuthMechanism::parse(&s))
    }
}

fn default_tls() -> bool {
    true
}

fn default_slice_size() -> usize {
    DEFAULT_SLICE_SIZE
}

/// Connection settings for one mail server account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub protocol: Protocol,
    pub host: String,
    /// Defaults to the protocol's well-known port
    #[serde(default)]
    pub port: Option<u16>,
    pub username: String,
    #[serde(default)]
    pub mechanism: AuthMechanism,
    #[serde(default = "default_tls")]
    pub tls: bool,
    #[serde(default = "default_slice_size")]
    pub slice_size: usize,
}

impl ServerConfig {
    pub fn new(host: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            protocol: Protocol::Imap,
            host: host.into(),
            port: None,
            username: username.into(),
            mechanism: AuthMechanism::default(),
            tls: true,
            slice_size: DEFAULT_SLICE_SIZE,
        }
    }

    pub fn with_mechanism(mut self, mechanism: AuthMechanism) -> Self {
        self.mechanism = mechanism;
        self
    }

    pub fn with_slice_size(mut self, slice_size: usize) -> Self {
        self.slice_size = slice_size;
        self
    }

    /// Load settings using the following priority:
    /// 1. JSON file (~/.config/mailroom/server.json)
    /// 2. Runtime environment variables
    pub fn load() -> Result<Self> {
        if config::config_exists(SERVER_FILE) {
            let server: ServerConfig = config::load_json(SERVER_FILE)?;
            return server.validated();
        }

        Self::from_env()
    }

    /// Load settings from a specific JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let server: ServerConfig = config::load_json_file(path)?;
        server.validated()
    }

    /// Parse settings from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        let server: ServerConfig =
            serde_json::from_str(json).context("Failed to parse server config JSON")?;
        server.validated()
    }

    /// Load settings from environment variables
    pub fn from_env() -> Result<Self> {
        let host =
            std::env::var("MAIL_HOST").context("MAIL_HOST environment variable not set")?;
        let username = std::env::var("MAIL_USERNAME")
            .context("MAIL_USERNAME environment variable not set")?;

        let mut server = Self::new(host, username);

        if let Ok(port) = std::env::var("MAIL_PORT") {
            server.port = Some(port.parse().context("MAIL_PORT is not a valid port")?);
        }
        if let Ok(mechanism) = std::env::var("MAIL_AUTH_MECHANISM") {
            server.mechanism = AuthMechanism::parse(&mechanism);
        }
        if let Ok(tls) = std::env::var("MAIL_TLS") {
            server.tls = !matches!(tls.to_ascii_lowercase().as_str(), "0" | "false" | "no");
        }
        if let Ok(size) = std::env::var("MAIL_SLICE_SIZE") {
            server.slice_size = size.parse().context("MAIL_SLICE_SIZE is not a number")?;
        }

        server.validated()
    }

    /// Write settings to the default config file
    pub fn save(&self) -> Result<()> {
        config::save_json(SERVER_FILE, self)
    }

    /// Get the default config file path (~/.config/mailroom/server.json)
    pub fn default_config_path() -> Option<PathBuf> {
        config::config_path(SERVER_FILE)
    }

    /// Port to connect to, falling back to the protocol default
    pub fn port_or_default(&self) -> u16 {
        self.port
            .unwrap_or_else(|| self.protocol.default_port(self.tls))
    }

    /// Account URL, e.g. `imaps://alice@mail.example.com`
    pub fn url(&self) -> String {
        format!(
            "{}://{}@{}",
            self.protocol.scheme(self.tls),
            self.username,
            self.host
        )
    }

    fn validated(self) -> Result<Self> {
        if self.host.trim().is_empty() {
            bail!("Server host must not be empty");
        }
        if self.slice_size == 0 {
            bail!("slice_size must be at least 1");
        }
        Ok(self)
    }
}
