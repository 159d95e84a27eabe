//! Authenticated server connections

use anyhow::{Context, Result, bail};
use log::info;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use super::mailbox::{Mailbox, MailboxShared};
use crate::config::{AuthMechanism, ServerConfig};
use crate::connection::ConnectionGuard;
use crate::transport::{MailboxInfo, Protocol, Transport};

/// The configured authentication mechanism is not advertised by the server
///
/// Raised before any authentication attempt.
#[derive(Debug, thiserror::Error)]
#[error("Expected auth mechanism in ({}). Got {got}.", list(.expected))]
pub struct BadAuthMechanismError {
    pub expected: Vec<AuthMechanism>,
    pub got: AuthMechanism,
}

fn list(mechanisms: &[AuthMechanism]) -> String {
    mechanisms
        .iter()
        .map(|m| m.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// The transport speaks a different protocol than configured
#[derive(Debug, thiserror::Error)]
#[error("Configured for {expected} but the transport speaks {got}")]
pub struct ProtocolMismatchError {
    pub expected: Protocol,
    pub got: Protocol,
}

/// Authentication mechanisms advertised through `AUTH=` capabilities
fn mechanisms_from(capabilities: &[String]) -> Vec<AuthMechanism> {
    capabilities
        .iter()
        .filter_map(|c| {
            let (key, mechanism) = c.split_once('=')?;
            key.eq_ignore_ascii_case("AUTH")
                .then(|| AuthMechanism::parse(mechanism))
        })
        .collect()
}

/// One authenticated connection to a mail server
///
/// Owns the [`ConnectionGuard`] that every mailbox obtained from it shares.
/// Mailbox handles are tracked weakly: while a handle for a name is alive,
/// asking for that name again returns a handle with the same cache.
pub struct Server {
    config: ServerConfig,
    guard: Arc<ConnectionGuard>,
    capabilities: RwLock<Vec<String>>,
    mailboxes: Mutex<Vec<Weak<MailboxShared>>>,
}

impl Server {
    /// Authenticate over `transport` using `config`
    pub fn connect<T>(mut transport: T, config: &ServerConfig, password: &str) -> Result<Self>
    where
        T: Transport + 'static,
    {
        let protocol = transport.protocol();
        if protocol != config.protocol {
            return Err(ProtocolMismatchError {
                expected: config.protocol,
                got: protocol,
            }
            .into());
        }

        let capabilities = transport
            .capabilities()
            .context("Failed to read server capabilities")?;
        let mechanisms = mechanisms_from(&capabilities);
        if !mechanisms.contains(&config.mechanism) {
            return Err(BadAuthMechanismError {
                expected: mechanisms,
                got: config.mechanism.clone(),
            }
            .into());
        }

        transport
            .authenticate(config.mechanism.as_str(), &config.username, password)
            .with_context(|| format!("Authentication failed for {}", config.url()))?;
        info!("Connected to {} using {}", config.url(), config.mechanism);

        Ok(Self {
            config: config.clone(),
            guard: Arc::new(ConnectionGuard::new(Box::new(transport), config.slice_size)),
            capabilities: RwLock::new(capabilities),
            mailboxes: Mutex::new(Vec::new()),
        })
    }

    /// Open a second, independent connection with the same settings
    pub fn duplicate<T>(&self, transport: T, password: &str) -> Result<Self>
    where
        T: Transport + 'static,
    {
        Self::connect(transport, &self.config, password)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Capabilities as advertised at connect time
    pub fn capabilities(&self) -> Vec<String> {
        self.capabilities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Ask the server again and replace the cached capabilities
    pub fn refresh_capabilities(&self) -> Result<Vec<String>> {
        let capabilities = self.guard.with_transport(|t| t.capabilities())?;
        *self
            .capabilities
            .write()
            .unwrap_or_else(PoisonError::into_inner) = capabilities.clone();
        Ok(capabilities)
    }

    pub fn has_capability(&self, name: &str) -> bool {
        self.capabilities()
            .iter()
            .any(|c| c.eq_ignore_ascii_case(name))
    }

    /// Mechanisms from the cached capabilities
    pub fn authentication_mechanisms(&self) -> Vec<AuthMechanism> {
        mechanisms_from(&self.capabilities())
    }

    /// Handle for `name`, reusing a live one
    fn handle(&self, name: &str) -> Mailbox {
        let mut registry = self.mailboxes.lock().unwrap_or_else(PoisonError::into_inner);
        registry.retain(|weak| weak.strong_count() > 0);

        for weak in registry.iter() {
            if let Some(shared) = weak.upgrade() {
                let mailbox = Mailbox::from_shared(shared);
                if mailbox.name() == name {
                    return mailbox;
                }
            }
        }

        let mailbox = Mailbox::new(name, self.guard.clone());
        registry.push(Arc::downgrade(mailbox.shared()));
        mailbox
    }

    fn list(&self, pattern: &str) -> Result<Vec<MailboxInfo>> {
        self.guard
            .with_transport(|t| t.list("", pattern))
            .with_context(|| format!("Failed to list mailboxes matching {}", pattern))
    }

    /// Mailboxes matching any of `globs` (`*` crosses the hierarchy
    /// delimiter, `%` does not); every mailbox when `globs` is empty
    pub fn mailboxes(&self, globs: &[&str]) -> Result<Vec<Mailbox>> {
        let patterns: &[&str] = if globs.is_empty() { &["*"] } else { globs };

        let mut names: Vec<String> = Vec::new();
        for pattern in patterns {
            for info in self.list(pattern)? {
                if !names.contains(&info.name) {
                    names.push(info.name);
                }
            }
        }

        Ok(names.iter().map(|name| self.handle(name)).collect())
    }

    /// The mailbox with exactly this name
    pub fn mailbox(&self, name: &str) -> Result<Mailbox> {
        if !self.list(name)?.iter().any(|info| info.name == name) {
            bail!("No such mailbox: {}", name);
        }
        Ok(self.handle(name))
    }

    pub fn create_mailbox(&self, name: &str) -> Result<Mailbox> {
        self.guard
            .with_transport(|t| t.create(name))
            .with_context(|| format!("Failed to create mailbox {}", name))?;
        info!("Created mailbox {}", name);
        Ok(self.handle(name))
    }

    pub fn delete_mailbox(&self, name: &str) -> Result<()> {
        self.guard
            .with_transport(|t| t.delete(name))
            .with_context(|| format!("Failed to delete mailbox {}", name))?;
        info!("Deleted mailbox {}", name);
        Ok(())
    }

    /// Log out; every handle from this server stops working
    pub fn disconnect(&self) -> Result<()> {
        self.guard.disconnect()
    }

    pub fn is_connected(&self) -> bool {
        self.guard.is_connected()
    }

    pub fn url(&self) -> String {
        self.config.url()
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server").field("url", &self.url()).finish()
    }
}

impl fmt::Display for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url())
    }
}
