//! Server configuration.
//!
//! Values are layered, later layers winning:
//!
//! 1. built-in defaults,
//! 2. `scopewire.toml` in the working directory, if present,
//! 3. `SCOPEWIRE_*` environment variables (`SCOPEWIRE_ADDR=0.0.0.0:8080`).

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

use crate::error::Error;

const FILE: &str = "scopewire.toml";
const ENV_PREFIX: &str = "SCOPEWIRE_";

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ServerConfig {
    /// Address the server binds to.
    pub addr: SocketAddr,
    /// Seconds in-flight connections get to finish after a shutdown signal.
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { addr: SocketAddr::from(([0, 0, 0, 0], 3000)), shutdown_timeout_secs: 30 }
    }
}

impl ServerConfig {
    /// Loads defaults, `scopewire.toml` and `SCOPEWIRE_*` variables.
    pub fn load() -> Result<Self, Error> {
        Self::load_from(FILE)
    }

    /// Same as [`load`](ServerConfig::load) with an explicit file path.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Error> {
        Ok(Self::figment(path.as_ref()).extract()?)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX))
    }
}
