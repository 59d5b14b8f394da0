use std::{fs, path::Path, path::PathBuf};

use serde::Deserialize;

use crate::error::Result;

/// Tool configuration, read from `cascade.toml` when present.
///
/// Every field has a default mirroring the conventional project layout
/// (`sass/` sources, `css/` output, site served from the project root), so
/// a project without a config file still builds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub styles: StylesConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StylesConfig {
    /// Directory holding `.scss` sources. Top-level files are compile
    /// roots; the whole tree is watched.
    pub source_dir: PathBuf,
    /// Directory compiled stylesheets are written to.
    pub out_dir: PathBuf,
    /// Browserslist queries used for vendor prefixing.
    pub browsers: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Directory served over HTTP.
    pub base_dir: PathBuf,
    pub host: String,
    pub port: u16,
}

impl Default for StylesConfig {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from("sass"),
            out_dir: PathBuf::from("css"),
            browsers: vec!["defaults".to_string()],
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("."),
            host: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            styles: StylesConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

pub fn load_config(config_path: &str) -> Result<Config> {
    if !Path::new(config_path).exists() {
        return Ok(Config::default());
    }

    let contents = fs::read_to_string(config_path)?;
    let config = toml::from_str(&contents)?;
    Ok(config)
}
