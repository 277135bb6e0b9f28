//! Configuration File Loading
//!
//! A configuration is read from an explicit file, or from the first usable
//! file among the search locations. `SHELLMUX_CONFIG` names a file that is
//! tried before every other location. Each location is a path stem checked
//! with a `.toml` and a `.json` extension, in that order.

use super::Config;
use crate::error::{Error, Result};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable naming a configuration file
pub const CONFIG_ENV_VAR: &str = "SHELLMUX_CONFIG";

/// On-disk configuration format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
}

impl ConfigFormat {
    /// Extension order for extension-less search stems
    const SEARCH_ORDER: [ConfigFormat; 2] = [ConfigFormat::Toml, ConfigFormat::Json];

    fn extension(self) -> &'static str {
        match self {
            ConfigFormat::Toml => "toml",
            ConfigFormat::Json => "json",
        }
    }

    fn label(self) -> String {
        self.extension().to_uppercase()
    }

    /// Format implied by a file extension; anything but `.json` is TOML
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => ConfigFormat::Json,
            _ => ConfigFormat::Toml,
        }
    }

    fn parse(self, text: &str) -> Result<Config> {
        let parsed = match self {
            ConfigFormat::Toml => toml::from_str(text).map_err(|e| e.to_string()),
            ConfigFormat::Json => serde_json::from_str(text).map_err(|e| e.to_string()),
        };
        parsed.map_err(|reason| Error::ConfigParseFailed {
            format: self.label(),
            reason,
        })
    }

    fn render(self, config: &Config) -> Result<String> {
        let rendered = match self {
            ConfigFormat::Toml => toml::to_string_pretty(config).map_err(|e| e.to_string()),
            ConfigFormat::Json => serde_json::to_string_pretty(config).map_err(|e| e.to_string()),
        };
        rendered.map_err(|reason| Error::ConfigSerializationFailed {
            format: self.label(),
            reason,
        })
    }
}

/// Finds, reads and writes configuration files
#[derive(Debug, Default)]
pub struct ConfigLoader {
    /// Path stems searched by [`load`](Self::load)
    search_paths: Vec<PathBuf>,
    /// File the last successful load came from
    current_path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Loader over the standard locations
    pub fn new() -> Self {
        Self::with_search_paths(standard_search_paths())
    }

    /// Loader over explicit path stems
    pub fn with_search_paths(search_paths: Vec<PathBuf>) -> Self {
        Self {
            search_paths,
            current_path: None,
        }
    }

    pub fn current_path(&self) -> Option<&Path> {
        self.current_path.as_deref()
    }

    /// Load from `SHELLMUX_CONFIG` or the first search location holding a
    /// parseable file. Unparseable files are skipped with a warning. With no
    /// file at all, defaults are used.
    pub fn load(&mut self) -> Result<Config> {
        if let Some(path) = env::var_os(CONFIG_ENV_VAR).map(PathBuf::from) {
            debug!("Using configuration named by {}", CONFIG_ENV_VAR);
            return self.load_from_path(&path);
        }

        let found = self.search_paths.iter().find_map(|stem| load_stem(stem));
        let config = match found {
            Some((path, config)) => {
                info!("Loaded configuration from {}", path.display());
                self.current_path = Some(path);
                config
            }
            None => {
                debug!(
                    "No configuration file in {} search locations, using defaults",
                    self.search_paths.len()
                );
                Config::default()
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Load one file. A missing or unreadable file is an error.
    pub fn load_from_path(&mut self, path: &Path) -> Result<Config> {
        let config = read_file(path)?;
        config.validate()?;
        self.current_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Write `config` to `path`, creating parent directories. The format
    /// follows the extension.
    pub fn save_to_path(&self, config: &Config, path: &Path) -> Result<()> {
        let text = ConfigFormat::from_path(path).render(config)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, text)?;
        debug!("Saved configuration to {}", path.display());
        Ok(())
    }
}

fn read_file(path: &Path) -> Result<Config> {
    let text = fs::read_to_string(path).map_err(|e| Error::ConfigLoadFailed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    ConfigFormat::from_path(path).parse(&text)
}

/// First parseable `<stem>.toml` / `<stem>.json`
fn load_stem(stem: &Path) -> Option<(PathBuf, Config)> {
    ConfigFormat::SEARCH_ORDER.iter().find_map(|format| {
        let candidate = stem.with_extension(format.extension());
        if !candidate.is_file() {
            return None;
        }
        match read_file(&candidate) {
            Ok(config) => Some((candidate, config)),
            Err(e) => {
                warn!("Skipping {}: {}", candidate.display(), e);
                None
            }
        }
    })
}

/// `$XDG_CONFIG_HOME/shellmux/config`, the platform config dir,
/// `~/.shellmux/config`, then `./shellmux`
fn standard_search_paths() -> Vec<PathBuf> {
    let mut stems = Vec::new();
    if let Some(xdg) = env::var_os("XDG_CONFIG_HOME") {
        stems.push(PathBuf::from(xdg).join("shellmux").join("config"));
    }
    if let Some(dir) = dirs::config_dir() {
        stems.push(dir.join("shellmux").join("config"));
    }
    if let Some(home) = dirs::home_dir() {
        stems.push(home.join(".shellmux").join("config"));
    }
    if let Ok(cwd) = env::current_dir() {
        stems.push(cwd.join("shellmux"));
    }
    stems.dedup();
    stems
}
