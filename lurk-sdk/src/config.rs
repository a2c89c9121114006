//! Session configuration, read from TOML.
//!
//! ```toml
//! nickname = "lurker"
//! server = "irc.libera.chat:6667"
//! channels = ["#lurk"]
//!
//! [sasl]
//! username = "lurker"
//! password = "hunter2"
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::auth::SaslPlain;
use crate::error::ConfigError;
use crate::session::SessionParams;

/// SASL PLAIN credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaslConfig {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub nickname: String,
    /// Defaults to the nickname.
    pub username: Option<String>,
    /// Defaults to the nickname.
    pub realname: Option<String>,
    /// Bouncer network to bind to.
    pub net_id: Option<String>,
    pub sasl: Option<SaslConfig>,
    /// Server address (host:port), for drivers that connect.
    pub server: Option<String>,
    /// Channels to join once registered.
    #[serde(default)]
    pub channels: Vec<String>,
}

impl SessionConfig {
    pub fn new(nickname: impl Into<String>) -> Self {
        Self {
            nickname: nickname.into(),
            username: None,
            realname: None,
            net_id: None,
            sasl: None,
            server: None,
            channels: Vec::new(),
        }
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let s = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&s)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Registration parameters, with a PLAIN authenticator when credentials
    /// are configured.
    pub fn into_params(self) -> SessionParams {
        let username = self.username.unwrap_or_else(|| self.nickname.clone());
        let realname = self.realname.unwrap_or_else(|| self.nickname.clone());
        let mut params = SessionParams {
            nickname: self.nickname,
            username,
            realname,
            net_id: self.net_id,
            auth: None,
        };
        if let Some(sasl) = self.sasl {
            params = params.with_auth(SaslPlain::new(sasl.username, sasl.password));
        }
        params
    }
}
