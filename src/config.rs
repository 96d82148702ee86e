//! Process configuration read from the environment at startup.

use std::env;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while reading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {var} value {value:?}: expected {expected}")]
    Invalid {
        var: &'static str,
        value: String,
        expected: &'static str,
    },

    #[error("cannot locate the executable to derive the static root: {0}")]
    ExecutablePath(#[source] std::io::Error),
}

/// Listener and content-root settings.
///
/// | Variable         | Default                         |
/// |------------------|---------------------------------|
/// | `HOST`           | `0.0.0.0`                       |
/// | `PORT`           | `3000`                          |
/// | `STATIC_ROOT`    | `<executable dir>/public`       |
/// | `MAX_BODY_BYTES` | unset (request bodies unbounded)|
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub static_root: PathBuf,
    pub max_body_bytes: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_owned(),
            port: 3000,
            static_root: PathBuf::from("public"),
            max_body_bytes: None,
        }
    }
}

impl ServerConfig {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Reads the configuration through `lookup`, which maps a variable name
    /// to its value. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let host = get("HOST").unwrap_or(defaults.host);

        let port = match get("PORT") {
            Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
                var: "PORT",
                value: raw,
                expected: "a port number (0-65535)",
            })?,
            None => defaults.port,
        };

        let static_root = match get("STATIC_ROOT") {
            Some(raw) => PathBuf::from(raw),
            None => default_static_root()?,
        };

        let max_body_bytes = match get("MAX_BODY_BYTES") {
            Some(raw) => Some(raw.trim().parse().map_err(|_| ConfigError::Invalid {
                var: "MAX_BODY_BYTES",
                value: raw,
                expected: "a byte count",
            })?),
            None => None,
        };

        Ok(Self {
            host,
            port,
            static_root,
            max_body_bytes,
        })
    }

    /// `HOST:PORT`, bracketing IPv6 literals.
    pub fn bind_addr(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

// The content root ships next to the installed binary.
fn default_static_root() -> Result<PathBuf, ConfigError> {
    let exe = env::current_exe().map_err(ConfigError::ExecutablePath)?;
    let dir = exe.parent().map(PathBuf::from).unwrap_or_default();
    Ok(dir.join("public"))
}
