//! Configuration for the broker and the driver client.
//!
//! Both configurations load from TOML files and from `FLEETBROKER_*`
//! environment variables, falling back to defaults for anything unset.
//!
//! # Example Configuration File
//!
//! ```toml
//! address = "broker.internal:9091"
//! root_certificates = "/etc/fleetbroker/ca.pem"
//!
//! [retry]
//! max_tries = 5
//! max_time_secs = 60
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use fleetbroker_state::StateFactory;
use serde::{Deserialize, Serialize};

use crate::error::{Code, Error, Result};
use crate::shared::crypto::{self, KeyPair};
use crate::shared::retry::{RetryInvoker, WaitStrategy};

/// Prefix of every environment variable read by this module.
pub const ENV_PREFIX: &str = "FLEETBROKER_";

fn default_driver_address() -> String {
    "[::]:9091".to_string()
}

fn default_fleet_address() -> String {
    "[::]:9092".to_string()
}

fn default_database() -> String {
    ":memory:".to_string()
}

fn default_max_tries() -> u32 {
    10
}

fn default_max_time_secs() -> u64 {
    300
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn parse_var<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Configuration(format!("{ENV_PREFIX}{key}: cannot parse {value:?}")))
}

/// Backoff policy of the driver client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts per call, the first one included.
    #[serde(default = "default_max_tries")]
    pub max_tries: u32,

    /// Wall-clock budget per call in seconds.
    #[serde(default = "default_max_time_secs")]
    pub max_time_secs: u64,

    /// Wait before the first retry in milliseconds; doubles every retry.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound on a single wait in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_delay_ms: Option<u64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_tries: default_max_tries(),
            max_time_secs: default_max_time_secs(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: None,
        }
    }
}

impl RetryConfig {
    /// An invoker with this policy that only retries
    /// [`Code::Unavailable`] failures.
    pub fn invoker(&self) -> RetryInvoker<Error> {
        RetryInvoker::new(WaitStrategy::Exponential {
            base: Duration::from_millis(self.base_delay_ms),
            factor: 2.0,
            max: self.max_delay_ms.map(Duration::from_millis),
        })
        .max_tries(self.max_tries)
        .max_time(Duration::from_secs(self.max_time_secs))
        .should_giveup(|err: &Error| err.code() != Code::Unavailable)
    }
}

/// Driver client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Broker address, `host:port` or a base URL.
    #[serde(default = "default_driver_address")]
    pub address: String,

    /// PEM file with root certificates to trust; enables TLS.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_certificates: Option<PathBuf>,

    /// Per-request timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    /// Retry policy.
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            address: default_driver_address(),
            root_certificates: None,
            timeout_secs: None,
            retry: RetryConfig::default(),
        }
    }
}

impl DriverConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(Into::into)
    }

    /// Load configuration from the process environment.
    ///
    /// - `FLEETBROKER_DRIVER_ADDRESS`
    /// - `FLEETBROKER_ROOT_CERTIFICATES`
    /// - `FLEETBROKER_TIMEOUT_SECS`
    /// - `FLEETBROKER_MAX_TRIES`
    /// - `FLEETBROKER_MAX_TIME_SECS`
    pub fn from_env() -> Result<Self> {
        Self::from_vars(std::env::vars())
    }

    /// Like [`from_env`](Self::from_env), reading from `vars`.
    pub fn from_vars<I>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut config = Self::default();
        for (key, value) in vars {
            let Some(key) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            match key {
                "DRIVER_ADDRESS" => config.address = value,
                "ROOT_CERTIFICATES" => config.root_certificates = Some(PathBuf::from(value)),
                "TIMEOUT_SECS" => config.timeout_secs = Some(parse_var(key, &value)?),
                "MAX_TRIES" => config.retry.max_tries = parse_var(key, &value)?,
                "MAX_TIME_SECS" => config.retry.max_time_secs = parse_var(key, &value)?,
                _ => {},
            }
        }
        Ok(config)
    }
}

/// Broker configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address of the node-facing API.
    #[serde(default = "default_fleet_address")]
    pub fleet_address: String,

    /// Listen address of the driver-facing API.
    #[serde(default = "default_driver_address")]
    pub driver_address: String,

    /// `":memory:"` or the path of a SQLite file.
    #[serde(default = "default_database")]
    pub database: String,

    /// base64url-encoded public keys of the nodes allowed to connect.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trusted_public_keys: Vec<String>,

    /// base64url-encoded secret key of the broker; generated when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            fleet_address: default_fleet_address(),
            driver_address: default_driver_address(),
            database: default_database(),
            trusted_public_keys: Vec::new(),
            secret_key: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(Into::into)
    }

    /// Load configuration from the process environment.
    ///
    /// - `FLEETBROKER_FLEET_ADDRESS`
    /// - `FLEETBROKER_DRIVER_ADDRESS`
    /// - `FLEETBROKER_DATABASE`
    /// - `FLEETBROKER_TRUSTED_PUBLIC_KEYS` (comma separated)
    /// - `FLEETBROKER_SECRET_KEY`
    pub fn from_env() -> Result<Self> {
        Self::from_vars(std::env::vars())
    }

    /// Like [`from_env`](Self::from_env), reading from `vars`.
    pub fn from_vars<I>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut config = Self::default();
        for (key, value) in vars {
            let Some(key) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            match key {
                "FLEET_ADDRESS" => config.fleet_address = value,
                "DRIVER_ADDRESS" => config.driver_address = value,
                "DATABASE" => config.database = value,
                "TRUSTED_PUBLIC_KEYS" => {
                    config.trusted_public_keys = value
                        .split(',')
                        .map(str::trim)
                        .filter(|key| !key.is_empty())
                        .map(String::from)
                        .collect();
                },
                "SECRET_KEY" => config.secret_key = Some(value),
                _ => {},
            }
        }
        Ok(config)
    }

    /// Decodes the trusted keys.
    ///
    /// # Errors
    ///
    /// [`Error::Crypto`] if a key is not base64url or not 32 bytes long.
    pub fn trusted_public_keys(&self) -> Result<HashSet<Vec<u8>>> {
        self.trusted_public_keys
            .iter()
            .map(|encoded| {
                let bytes = crypto::decode_base64(encoded)?;
                crypto::bytes_to_public_key(&bytes)?;
                Ok(bytes)
            })
            .collect()
    }

    /// The broker's key pair: decoded from `secret_key`, or freshly
    /// generated.
    pub fn key_pair(&self) -> Result<KeyPair> {
        let Some(encoded) = &self.secret_key else {
            return Ok(KeyPair::generate());
        };
        let bytes: [u8; 32] = crypto::decode_base64(encoded)?
            .try_into()
            .map_err(|_| Error::Crypto("secret key must be 32 bytes".into()))?;
        Ok(KeyPair::from_secret_bytes(bytes))
    }

    /// A state factory for the configured database.
    pub fn state_factory(&self) -> StateFactory {
        StateFactory::new(self.database.clone())
    }
}
