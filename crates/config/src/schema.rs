/// Config schema for registry sync: registries, update delivery, network, destinations.
use std::path::PathBuf;

use {
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
};

/// Conventional registry used when nothing is configured.
pub const DEFAULT_REGISTRY: &str = "anthropics/skills";

/// Root configuration.
///
/// Loaded once per process and passed by reference (usually behind an `Arc`)
/// into every engine call. Nothing in the engine reads ambient global state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Registry references in any accepted form (`owner/repo`, URL, …).
    pub registries: Vec<String>,
    /// Directory prefix applied to bare collection names in a catalog
    /// (e.g. `plugins` turns source `dbt` into `plugins/dbt`).
    pub collection_root: Option<String>,
    /// How available updates are delivered.
    pub update_mode: UpdateMode,
    /// Maximum number of in-flight network requests during fan-out.
    pub concurrency: usize,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
    pub github: GithubConfig,
    pub destinations: DestinationsConfig,
    /// Data directory override. Defaults to the platform data dir.
    pub data_dir: Option<PathBuf>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            registries: vec![DEFAULT_REGISTRY.into()],
            collection_root: None,
            update_mode: UpdateMode::default(),
            concurrency: 8,
            request_timeout_secs: 30,
            github: GithubConfig::default(),
            destinations: DestinationsConfig::default(),
            data_dir: None,
        }
    }
}

impl SyncConfig {
    /// Effective data directory: the override when set, else the platform default.
    pub fn resolved_data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(crate::loader::default_data_dir)
    }

    /// Install root for destination A (skills, supports bundled entries).
    pub fn skills_dir(&self) -> PathBuf {
        self.destinations
            .skills_dir
            .clone()
            .unwrap_or_else(|| self.resolved_data_dir().join("skills"))
    }

    /// Install root for destination B (agents, freely deletable).
    pub fn agents_dir(&self) -> PathBuf {
        self.destinations
            .agents_dir
            .clone()
            .unwrap_or_else(|| self.resolved_data_dir().join("agents"))
    }

    /// Directory holding the offline catalog mirrors.
    pub fn mirror_dir(&self) -> PathBuf {
        self.resolved_data_dir().join("catalog-mirror")
    }

    /// Fan-out limit, never below one.
    pub fn effective_concurrency(&self) -> usize {
        self.concurrency.max(1)
    }
}

/// Update delivery preference.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UpdateMode {
    /// Import non-customized updates automatically and report a summary.
    Silent,
    /// Only surface a standing prompt listing available updates.
    #[default]
    Manual,
}

impl std::fmt::Display for UpdateMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Silent => write!(f, "silent"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

/// Remote host settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GithubConfig {
    /// Host registry references must name (`github.com`, or a GitHub
    /// Enterprise host together with matching `api_base`/`raw_base`).
    pub host: String,
    /// REST API base (repository metadata and directory listings).
    pub api_base: String,
    /// Raw content base (file downloads).
    pub raw_base: String,
    pub user_agent: String,
    /// Personal access token, raises the anonymous rate limit.
    #[serde(
        default,
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub token: Option<Secret<String>>,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            host: "github.com".into(),
            api_base: "https://api.github.com".into(),
            raw_base: "https://raw.githubusercontent.com".into(),
            user_agent: concat!("skillsync/", env!("CARGO_PKG_VERSION")).into(),
            token: None,
        }
    }
}

/// Local install targets.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DestinationsConfig {
    pub skills_dir: Option<PathBuf>,
    pub agents_dir: Option<PathBuf>,
    /// Packages shipped with the application, re-seeded into the skills
    /// destination at startup.
    pub bundled_dir: Option<PathBuf>,
}

fn serialize_option_secret<S: serde::Serializer>(
    secret: &Option<Secret<String>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match secret {
        Some(s) => serializer.serialize_some(s.expose_secret()),
        None => serializer.serialize_none(),
    }
}
