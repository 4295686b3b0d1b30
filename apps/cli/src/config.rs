//! CLI configuration.
//!
//! Stored as TOML:
//! - Linux: `~/.config/skyhop/skyhop.toml`
//! - Windows: `%APPDATA%/skyhop/skyhop.toml`
//!
//! Engine tunables live under a `[transfer]` table.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use skyhop_transfer::{DeviceIdentity, TransferConfig};

/// Port `listen` binds when none is configured.
pub const DEFAULT_PORT: u16 = 47_820;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Name announced to receivers (hostname by default).
    #[serde(default = "default_name")]
    pub name: String,

    /// Listening port for `skyhop listen`.
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub transfer: TransferConfig,
}

fn default_name() -> String {
    DeviceIdentity::default().name
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: default_name(),
            port: default_port(),
            transfer: TransferConfig::default(),
        }
    }
}

impl Config {
    /// Loads the config at `path`, or the platform default location.
    ///
    /// A missing file is created with defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) => Self::load_from(p),
            None => Self::load_from(&config_path()),
        }
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            let config: Config =
                toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    /// Identity announced in outgoing metadata.
    pub fn identity(&self) -> DeviceIdentity {
        DeviceIdentity {
            name: self.name.clone(),
            ..DeviceIdentity::default()
        }
    }
}

/// Returns the platform-specific configuration file path.
fn config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata).join("skyhop").join("skyhop.toml")
    }

    #[cfg(not(target_os = "windows"))]
    {
        let base = std::env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
                PathBuf::from(home).join(".config")
            });
        base.join("skyhop").join("skyhop.toml")
    }
}
