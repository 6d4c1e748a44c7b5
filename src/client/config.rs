//! Connection configuration
//!
//! A [`ConnectionConfig`] is created per connect request and superseded, not
//! mutated, by the next request. Structural equality between the requested
//! and the live configuration is the completion predicate of the connect
//! retry loop, so every field that identifies a connection participates in
//! `is_same_connection`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ClientError, ClientResult};

/// Authentication credentials for registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

/// One connect request's configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// SIP server URI (opaque to this crate)
    pub server_url: String,
    /// WebSocket transport URL (opaque to this crate)
    pub transport_url: String,
    pub display_name: String,
    pub credentials: Option<Credentials>,
    /// Whether to REGISTER after connecting
    pub register: bool,
    /// Socket identity advertised to the server
    pub user_agent: String,
    /// Session timers advertised to the stack, in seconds
    pub session_timeout_secs: u64,
    /// Recovery intervals the transport uses between reconnects, in seconds
    pub connection_recovery_min_interval_secs: u64,
    pub connection_recovery_max_interval_secs: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            server_url: String::new(),
            transport_url: String::new(),
            display_name: String::new(),
            credentials: None,
            register: false,
            user_agent: concat!("sipconf-client-core/", env!("CARGO_PKG_VERSION")).to_string(),
            session_timeout_secs: 300,
            connection_recovery_min_interval_secs: 2,
            connection_recovery_max_interval_secs: 6,
        }
    }
}

impl ConnectionConfig {
    pub fn new(server_url: impl Into<String>, transport_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            transport_url: transport_url.into(),
            ..Default::default()
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some(Credentials {
            user: user.into(),
            password: password.into(),
        });
        self
    }

    pub fn with_register(mut self, register: bool) -> Self {
        self.register = register;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    /// Fail-fast validation, run before any transport attempt
    pub fn validate(&self) -> ClientResult<()> {
        if self.server_url.is_empty() {
            return Err(ClientError::InvalidConfig {
                field: "server_url".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        if self.transport_url.is_empty() {
            return Err(ClientError::InvalidConfig {
                field: "transport_url".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        if self.register {
            let has_credentials = self
                .credentials
                .as_ref()
                .map(|c| !c.user.is_empty() && !c.password.is_empty())
                .unwrap_or(false);
            if !has_credentials {
                return Err(ClientError::InvalidConfig {
                    field: "credentials".to_string(),
                    reason: "user and password are required when registration is requested"
                        .to_string(),
                });
            }
        }
        Ok(())
    }

    /// Structural identity of a connection
    ///
    /// True when an already-live transport satisfies this request: same uri,
    /// credentials, register flag, timers, recovery intervals, display name
    /// and socket identity.
    pub fn is_same_connection(&self, other: &ConnectionConfig) -> bool {
        self == other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> ConnectionConfig {
        ConnectionConfig::new("sip.example.com", "wss://sip.example.com/ws")
            .with_display_name("Alice")
    }

    #[test]
    fn register_without_credentials_fails_fast() {
        let config = base().with_register(true);
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ClientError::InvalidConfig { field, .. } if field == "credentials"));
    }

    #[test]
    fn register_with_credentials_validates() {
        let config = base().with_register(true).with_credentials("alice", "secret");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn unregistered_connection_needs_no_credentials() {
        assert!(base().validate().is_ok());
    }

    #[test]
    fn structural_identity_covers_every_field() {
        let a = base().with_credentials("alice", "secret");
        let b = base().with_credentials("alice", "secret");
        assert!(a.is_same_connection(&b));

        let c = b.clone().with_display_name("Bob");
        assert!(!a.is_same_connection(&c));

        let mut d = a.clone();
        d.connection_recovery_max_interval_secs += 1;
        assert!(!a.is_same_connection(&d));
    }
}
