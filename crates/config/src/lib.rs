//! Configuration loading for registry sync.
//!
//! Config files: `skillsync.toml`, `skillsync.yaml`, or `skillsync.json`
//! Searched in `./` then `~/.config/skillsync/`.
//!
//! `SKILLSYNC_*` environment variables override file values.

pub mod loader;
pub mod schema;

pub use {
    loader::{
        apply_env_overrides, config_dir, default_data_dir, discover_and_load,
        find_or_default_config_path, load_config, save_config_to,
    },
    schema::{DEFAULT_REGISTRY, DestinationsConfig, GithubConfig, SyncConfig, UpdateMode},
};
