use std::path::Path;

use {anyhow::Result, clap::Subcommand, skillsync_config::SyncConfig};

use skillsync_registry::locator::parse_reference;

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration (token redacted).
    Show,
    /// Print the config file path in use.
    Path,
    /// Add a registry reference to the config file.
    AddRegistry { reference: String },
    /// Remove a registry reference from the config file.
    RemoveRegistry { reference: String },
}

/// `config_path` is the `--config` override; without it the discovered
/// (or default) config file is edited.
pub fn handle_config(
    action: ConfigAction,
    config: &SyncConfig,
    config_path: Option<&Path>,
) -> Result<()> {
    let path = config_path.map_or_else(skillsync_config::find_or_default_config_path, Path::to_path_buf);
    match action {
        ConfigAction::Show => {
            let mut shown = config.clone();
            shown.github.token = None;
            println!("{}", toml::to_string_pretty(&shown)?);
            Ok(())
        },
        ConfigAction::Path => {
            println!("{}", path.display());
            Ok(())
        },
        ConfigAction::AddRegistry { reference } => {
            let locator = parse_reference(&reference)?;
            if add_registry(&path, reference.clone())? {
                eprintln!("Added {locator} to {}", path.display());
            } else {
                eprintln!("{reference} is already configured.");
            }
            Ok(())
        },
        ConfigAction::RemoveRegistry { reference } => {
            remove_registry(&path, &reference)?;
            eprintln!("Removed {reference} from {}", path.display());
            Ok(())
        },
    }
}

/// Returns `false` when the reference was already listed.
fn add_registry(path: &Path, reference: String) -> Result<bool> {
    let mut updated = file_config(path)?;
    if updated.registries.contains(&reference) {
        return Ok(false);
    }
    updated.registries.push(reference);
    skillsync_config::save_config_to(&updated, path)?;
    Ok(true)
}

fn remove_registry(path: &Path, reference: &str) -> Result<()> {
    let mut updated = file_config(path)?;
    let before = updated.registries.len();
    updated.registries.retain(|r| r != reference);
    if updated.registries.len() == before {
        anyhow::bail!("{reference} is not configured");
    }
    skillsync_config::save_config_to(&updated, path)?;
    Ok(())
}

/// The on-disk config without environment overrides, so saving never
/// persists a token or registry that only came from the environment.
/// A missing file starts with no registries rather than the built-in default.
fn file_config(path: &Path) -> Result<SyncConfig> {
    if path.exists() {
        skillsync_config::load_config(path)
    } else {
        Ok(SyncConfig {
            registries: Vec::new(),
            ..SyncConfig::default()
        })
    }
}
