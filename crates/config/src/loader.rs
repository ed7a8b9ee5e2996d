use std::path::{Path, PathBuf};

use {
    secrecy::Secret,
    tracing::{debug, warn},
};

use crate::schema::{SyncConfig, UpdateMode};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "skillsync.toml",
    "skillsync.yaml",
    "skillsync.yml",
    "skillsync.json",
];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<SyncConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    parse_config(&raw, path)
}

/// Discover and load config from standard locations, then apply environment
/// overrides.
///
/// Search order:
/// 1. `./skillsync.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/skillsync/skillsync.{toml,yaml,yml,json}` (user-global)
///
/// Falls back to `SyncConfig::default()` if no file is found or it fails to parse.
pub fn discover_and_load() -> SyncConfig {
    let mut config = match find_config_file() {
        Some(path) => {
            debug!(path = %path.display(), "loading config");
            match load_config(&path) {
                Ok(cfg) => cfg,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
                    SyncConfig::default()
                },
            }
        },
        None => {
            debug!("no config file found, using defaults");
            SyncConfig::default()
        },
    };
    apply_env_overrides(&mut config, |name| std::env::var(name).ok());
    config
}

/// Apply `SKILLSYNC_*` (and `GITHUB_TOKEN`) overrides using a custom lookup.
///
/// `SKILLSYNC_REGISTRY` replaces the registry list with a single entry.
pub fn apply_env_overrides(config: &mut SyncConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(registry) = lookup("SKILLSYNC_REGISTRY").filter(|v| !v.trim().is_empty()) {
        config.registries = vec![registry.trim().to_string()];
    }
    if let Some(mode) = lookup("SKILLSYNC_UPDATE_MODE") {
        match mode.trim().to_ascii_lowercase().as_str() {
            "silent" => config.update_mode = UpdateMode::Silent,
            "manual" => config.update_mode = UpdateMode::Manual,
            other => warn!(value = other, "ignoring unknown SKILLSYNC_UPDATE_MODE"),
        }
    }
    if let Some(dir) = lookup("SKILLSYNC_DATA_DIR").filter(|v| !v.is_empty()) {
        config.data_dir = Some(PathBuf::from(dir));
    }
    if let Some(token) = lookup("SKILLSYNC_GITHUB_TOKEN")
        .or_else(|| lookup("GITHUB_TOKEN"))
        .filter(|v| !v.is_empty())
    {
        config.github.token = Some(Secret::new(token));
    }
}

/// Find the first config file in standard locations.
fn find_config_file() -> Option<PathBuf> {
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    let config_dir = config_dir()?;
    CONFIG_FILENAMES
        .iter()
        .map(|name| config_dir.join(name))
        .find(|p| p.exists())
}

/// Returns the user-global config directory (`~/.config/skillsync/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "skillsync").map(|d| d.config_dir().to_path_buf())
}

/// Platform data directory (`~/.local/share/skillsync` on Linux).
pub fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "skillsync")
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".skillsync"))
}

/// Returns the path of an existing config file, or the default TOML path.
pub fn find_or_default_config_path() -> PathBuf {
    if let Some(path) = find_config_file() {
        return path;
    }
    config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("skillsync.toml")
}

/// Serialize `config` to TOML and write it to `path`.
pub fn save_config_to(config: &SyncConfig, path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str =
        toml::to_string_pretty(config).map_err(|e| anyhow::anyhow!("serialize config: {e}"))?;
    std::fs::write(path, toml_str)?;
    debug!(path = %path.display(), "saved config");
    Ok(())
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<SyncConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}
