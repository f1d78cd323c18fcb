// src/nat/turn/config.rs
//! Probe configuration

use std::net::IpAddr;
use std::time::Duration;

use crate::nat::error::{NatError, NatResult};
use crate::nat::stun::TRANSPORT_UDP;

/// Default plaintext TURN port (RFC 5766 Section 4)
pub const DEFAULT_TURN_PORT: u16 = 3478;

/// Default per-read deadline
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// TURN allocation probe configuration
#[derive(Debug, Clone)]
pub struct TurnProbeConfig {
    /// Server host name or IP literal
    pub host: String,
    /// Server TCP port
    pub port: u16,
    /// Deadline for connecting and for each response
    pub timeout: Duration,
    /// Long-term credential username
    pub username: Option<String>,
    /// Long-term credential password
    pub password: Option<String>,
    /// Peer to authorise with CreatePermission after allocating
    pub peer: Option<IpAddr>,
    /// Optional SOFTWARE attribute on every request
    pub software: Option<String>,
    /// REQUESTED-TRANSPORT protocol number
    pub requested_transport: u8,
}

impl Default for TurnProbeConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: DEFAULT_TURN_PORT,
            timeout: DEFAULT_TIMEOUT,
            username: None,
            password: None,
            peer: None,
            software: Some(format!("turn-probe/{}", env!("CARGO_PKG_VERSION"))),
            requested_transport: TRANSPORT_UDP,
        }
    }
}

impl TurnProbeConfig {
    /// Configuration for `host` with defaults for everything else
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_peer(mut self, peer: IpAddr) -> Self {
        self.peer = Some(peer);
        self
    }

    pub fn with_software(mut self, software: Option<String>) -> Self {
        self.software = software;
        self
    }

    /// `host:port`, bracketing IPv6 literals
    pub fn server_address(&self) -> String {
        match self.host.parse::<IpAddr>() {
            Ok(IpAddr::V6(ip)) => format!("[{}]:{}", ip, self.port),
            _ => format!("{}:{}", self.host, self.port),
        }
    }

    /// Username and password when both are present
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) => Some((user.as_str(), pass.as_str())),
            _ => None,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> NatResult<()> {
        if self.host.trim().is_empty() {
            return Err(NatError::Configuration("host must not be empty".into()));
        }
        if self.port == 0 {
            return Err(NatError::Configuration("port must not be 0".into()));
        }
        if self.timeout.is_zero() {
            return Err(NatError::Configuration("timeout must be greater than zero".into()));
        }
        if self.password.is_some() && self.username.is_none() {
            return Err(NatError::Configuration("password given without username".into()));
        }
        Ok(())
    }
}
