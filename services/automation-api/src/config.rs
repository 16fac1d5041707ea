//! Server configuration
//!
//! Precedence: `--config` > `CONFIG_PATH` > `automation-api.toml`, then the
//! `PORT` env var overrides the listen port. Auth settings (secrets, client
//! id, token lifetime) come from the environment via `AuthConfig`, never
//! from this file.

use common::{env_parse, env_var};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Config file used when neither `--config` nor `CONFIG_PATH` is given.
/// Unlike an explicit path, it may be absent.
pub const DEFAULT_CONFIG_PATH: &str = "automation-api.toml";

/// Root configuration
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
}

/// HTTP listener settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            max_connections: default_max_connections(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_max_connections() -> usize {
    1000
}

impl Config {
    /// Load configuration from a TOML file, then overlay `PORT`.
    pub fn load(path: &Path) -> common::Result<Self> {
        Self::load_with(path, &env_var)
    }

    /// Like `load`, reading environment overrides through `lookup`.
    pub fn load_with(
        path: &Path,
        lookup: &impl Fn(&str) -> Option<String>,
    ) -> common::Result<Self> {
        let mut config = match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str::<Config>(&contents)?,
            Err(e)
                if e.kind() == std::io::ErrorKind::NotFound
                    && path == Path::new(DEFAULT_CONFIG_PATH) =>
            {
                Config::default()
            }
            Err(e) => return Err(e.into()),
        };

        if config.server.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        let port: u16 = env_parse(lookup, "PORT", config.server.listen_addr.port())?;
        if port == 0 {
            return Err(common::Error::Config("PORT must be greater than 0".into()));
        }
        config.server.listen_addr.set_port(port);

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Some(p) = env_var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from(DEFAULT_CONFIG_PATH)
    }
}
