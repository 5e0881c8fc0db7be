//! Application configuration.
//!
//! A [`Config`] can be built in code or loaded from a YAML file. The file
//! form also carries a route table mapping URL patterns to handler type
//! names, which [`crate::App::bind_config_routes`] resolves against the
//! registered handler factories; an unknown name there is a startup error,
//! never a per-request one.
//!
//! ```yaml
//! listen: "0.0.0.0:8000"
//! handler_cache: 5
//! static_dir: ./static
//! template:
//!   dir: ./templates
//! session:
//!   name: grackle-session
//! routes:
//!   /:
//!     handler: IndexHandler
//!   /user/{id}:
//!     handler: UserHandler
//!     alias: user
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Top-level application configuration. Missing fields fall back to the
/// defaults below, so a partial YAML file is fine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address to listen on.
    pub listen: String,
    /// Number of pre-built handler instances kept ready per handler type.
    pub handler_cache: usize,
    /// Directory served under `/<basename>/...` when set.
    pub static_dir: Option<String>,
    /// Treat `/path/` and `/path` as the same route.
    pub strict_slash: bool,
    pub template: TemplateConfig,
    pub session: SessionConfig,
    /// Pattern -> handler binding, applied by `App::bind_config_routes`.
    pub routes: BTreeMap<String, RouteSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateConfig {
    pub dir: String,
    pub engine: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub engine: String,
    /// Cookie name carrying the session id.
    pub name: String,
    pub secret: String,
}

/// One route binding from the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteSpec {
    /// Registered handler type name (short form, e.g. `UserHandler`).
    pub handler: String,
    /// Optional route alias used for reverse URL lookups.
    #[serde(default)]
    pub alias: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            listen: "0.0.0.0:8000".to_string(),
            handler_cache: 5,
            static_dir: None,
            strict_slash: false,
            template: TemplateConfig::default(),
            session: SessionConfig::default(),
            routes: BTreeMap::new(),
        }
    }
}

impl Default for TemplateConfig {
    fn default() -> Self {
        TemplateConfig {
            dir: "./templates".to_string(),
            engine: "default".to_string(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            engine: "memory".to_string(),
            name: "grackle-session".to_string(),
            secret: String::new(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(content)
            .map_err(|e| Error::Config(e.to_string()))?;
        if config.handler_cache == 0 {
            return Err(Error::Config(
                "handler_cache must be at least 1".to_string(),
            ));
        }
        Ok(config)
    }
}
