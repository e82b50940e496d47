use std::path::{Path, PathBuf};

use {
    serde::{Deserialize, Serialize},
    tandem_xmpp::CarbonsConfig,
    tracing::{debug, warn},
};

const CONFIG_FILENAME: &str = "tandem.toml";

/// Top-level `tandem.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TandemConfig {
    pub carbons: CarbonsConfig,
}

/// Load config from an explicit path. Errors are fatal here.
pub fn load_config(path: &Path) -> anyhow::Result<TandemConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    parse_config(&raw)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./tandem.toml`
/// 2. `~/.config/tandem/tandem.toml`
///
/// Returns the defaults when no file is found or it fails to parse.
pub fn discover_and_load() -> TandemConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    TandemConfig::default()
}

fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from(CONFIG_FILENAME);
    if local.exists() {
        return Some(local);
    }

    directories::ProjectDirs::from("", "", "tandem")
        .map(|dirs| dirs.config_dir().join(CONFIG_FILENAME))
        .filter(|p| p.exists())
}

fn parse_config(raw: &str) -> anyhow::Result<TandemConfig> {
    Ok(toml::from_str(raw)?)
}
