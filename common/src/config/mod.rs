use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::err::CoreError;

/// Top-level server configuration, loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    pub bind: BindConfig,
    pub protocol: ProtocolConfig,
    pub cache: CacheConfig,
    pub tls: TlsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BindConfig {
    pub host: String,
    pub port: u16,
}

/// Minimum/maximum wire-protocol versions this server will negotiate.
/// `(major, minor)` pairs, ordered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProtocolConfig {
    pub min_major: u16,
    pub min_minor: u16,
    pub max_major: u16,
    pub max_minor: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheConfig {
    /// Per-connection bound on the anonymous/named statement cache.
    pub maxsize: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TlsConfig {
    pub mode: SslMode,
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum SslMode {
    Disabled,
    Prefer,
    Require,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind: BindConfig::default(),
            protocol: ProtocolConfig::default(),
            cache: CacheConfig::default(),
            tls: TlsConfig::default(),
        }
    }
}

impl Default for BindConfig {
    fn default() -> Self {
        BindConfig {
            host: "127.0.0.1".to_string(),
            port: 5656,
        }
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        // The boundary below which `Describe` is legal and type data is
        // only included in descriptions on request: protocol (0, 14).
        ProtocolConfig {
            min_major: 0,
            min_minor: 10,
            max_major: 2,
            max_minor: 0,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig { maxsize: 256 }
    }
}

impl Default for TlsConfig {
    fn default() -> Self {
        TlsConfig {
            mode: SslMode::Disabled,
            cert_path: None,
            key_path: None,
        }
    }
}

/// Reads and parses a `ServerConfig` from a TOML file at `path`.
pub fn read_config<P: AsRef<Path>>(path: P) -> Result<ServerConfig, CoreError> {
    let mut file = File::open(path.as_ref())?;
    let mut s = String::new();
    file.read_to_string(&mut s)?;
    toml::from_str(&s).map_err(|e| CoreError::InternalServerError(format!("config parse error: {e}")))
}
