use std::env;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::de::DeserializeOwned;

pub const CONFIG_DIR_ENV: &str = "TILE_BRIDGE_CONFIG_DIR";

/// Finds and parses TOML config files.
///
/// Search order:
/// 1) `TILE_BRIDGE_CONFIG_DIR/<relative_path>`
/// 2) `./<relative_path>`
/// 3) `<crate_root>/../../config/<relative_path>` (repo-local convenience)
pub struct ConfigLoader;

impl ConfigLoader {
    pub fn parse_from_file<T: DeserializeOwned>(relative_path: &str) -> anyhow::Result<T> {
        let path = Self::resolve_path(relative_path)
            .ok_or_else(|| anyhow::anyhow!("Config file not found for {relative_path:?}"))?;
        Self::parse_path(&path)
    }

    /// Like [`ConfigLoader::parse_from_file`], but a missing file yields `T::default()`.
    pub fn parse_or_default<T: DeserializeOwned + Default>(
        relative_path: &str,
    ) -> anyhow::Result<(T, Option<PathBuf>)> {
        match Self::resolve_path(relative_path) {
            Some(path) => Ok((Self::parse_path(&path)?, Some(path))),
            None => Ok((T::default(), None)),
        }
    }

    pub fn parse_from_string<T: DeserializeOwned>(text: &str) -> anyhow::Result<T> {
        toml::from_str(text).with_context(|| "Failed to parse TOML")
    }

    fn parse_path<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config at {}", path.display()))?;
        Self::parse_from_string(&text).with_context(|| format!("in {}", path.display()))
    }

    fn resolve_path(relative_path: &str) -> Option<PathBuf> {
        let rel = Path::new(relative_path);

        if let Some(root) = env::var_os(CONFIG_DIR_ENV) {
            let candidate = PathBuf::from(root).join(rel);
            if candidate.is_file() {
                return Some(candidate);
            }
        }

        if let Ok(cwd) = env::current_dir() {
            let candidate = cwd.join(rel);
            if candidate.is_file() {
                return Some(candidate);
            }
        }

        // This crate lives at <repo_root>/crates/bridge-proxy.
        let candidate = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .ancestors()
            .nth(2)?
            .join("config")
            .join(rel);
        candidate.is_file().then_some(candidate)
    }
}
