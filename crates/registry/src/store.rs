//! Per-destination install records and lifecycle operations.
//!
//! Each destination root looks like:
//!
//! ```text
//! {root}/.records.json          record manifest
//! {root}/index.json             regenerated after every batch
//! {root}/{identity}/            active packages
//! {root}/.inactive/{identity}/  deactivated packages (skills only)
//! ```

use std::{
    collections::BTreeMap,
    path::{Component, Path, PathBuf},
    str::FromStr,
};

use {
    serde::{Deserialize, Serialize},
    skillsync_config::SyncConfig,
    tokio::sync::{Mutex, MutexGuard},
    tracing::{info, warn},
};

use crate::{
    descriptor::{BehavioralFlags, PackageKind},
    error::{Error, Result},
};

const RECORDS_FILE: &str = ".records.json";
const INACTIVE_DIR: &str = ".inactive";

/// One of the two independent local install targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Destination {
    /// Supports bundled entries and deactivation.
    Skills,
    /// Freely deletable, no bundled concept.
    Agents,
}

impl Destination {
    pub const ALL: [Destination; 2] = [Destination::Skills, Destination::Agents];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Skills => "skills",
            Self::Agents => "agents",
        }
    }

    pub fn rules(self) -> DestinationRules {
        match self {
            Self::Skills => DestinationRules {
                supports_bundled: true,
                supports_deactivation: true,
            },
            Self::Agents => DestinationRules {
                supports_bundled: false,
                supports_deactivation: false,
            },
        }
    }
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Destination {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "skills" | "skill" => Ok(Self::Skills),
            "agents" | "agent" => Ok(Self::Agents),
            other => Err(Error::configuration(format!("unknown destination '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DestinationRules {
    /// Bundled records exist, are re-seeded, and can never be deleted.
    pub supports_bundled: bool,
    /// Packages can be parked under `.inactive/` instead of deleted.
    pub supports_deactivation: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledPackageRecord {
    pub identity: String,
    pub version: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<PackageKind>,
    #[serde(default)]
    pub flags: BehavioralFlags,
    /// SHA-256 of `SKILL.md` as last imported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    pub disk_path: PathBuf,
    pub active: bool,
    pub deletable: bool,
    pub imported_at_ms: u64,
    /// `owner/repo` the package was imported from; `None` for bundled seeds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry: Option<String>,
}

/// On-disk record manifest. Keyed by identity so serialization is stable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordManifest {
    pub version: u32,
    #[serde(default)]
    pub records: BTreeMap<String, InstalledPackageRecord>,
}

impl Default for RecordManifest {
    fn default() -> Self {
        Self {
            version: 1,
            records: BTreeMap::new(),
        }
    }
}

impl RecordManifest {
    pub fn get(&self, identity: &str) -> Option<&InstalledPackageRecord> {
        self.records.get(identity)
    }

    pub fn upsert(&mut self, record: InstalledPackageRecord) {
        self.records.insert(record.identity.clone(), record);
    }

    pub fn remove(&mut self, identity: &str) -> Option<InstalledPackageRecord> {
        self.records.remove(identity)
    }
}

/// Record storage and managed paths for one destination.
///
/// The mutex serializes every mutation of the destination. Batch callers
/// take it once via [`RecordStore::lock`] and use `load`/`save` directly.
pub struct RecordStore {
    destination: Destination,
    root: PathBuf,
    lock: Mutex<()>,
}

impl RecordStore {
    pub fn new(destination: Destination, root: PathBuf) -> Self {
        Self {
            destination,
            root,
            lock: Mutex::new(()),
        }
    }

    pub fn destination(&self) -> Destination {
        self.destination
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().await
    }

    fn manifest_path(&self) -> PathBuf {
        self.root.join(RECORDS_FILE)
    }

    /// Load the manifest, returning an empty one if missing.
    pub fn load(&self) -> Result<RecordManifest> {
        let path = self.manifest_path();
        if !path.exists() {
            return Ok(RecordManifest::default());
        }
        let data = std::fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&data)?)
    }

    /// Save the manifest atomically via temp file + rename.
    pub fn save(&self, manifest: &RecordManifest) -> Result<()> {
        std::fs::create_dir_all(&self.root)?;
        let path = self.manifest_path();
        let tmp = path.with_extension("json.tmp");
        let data = serde_json::to_string_pretty(manifest)?;
        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    pub fn get(&self, identity: &str) -> Result<Option<InstalledPackageRecord>> {
        Ok(self.load()?.records.remove(identity))
    }

    pub fn records(&self) -> Result<Vec<InstalledPackageRecord>> {
        Ok(self.load()?.records.into_values().collect())
    }

    pub fn active_path(&self, identity: &str) -> PathBuf {
        self.root.join(identity)
    }

    pub fn inactive_path(&self, identity: &str) -> PathBuf {
        self.root.join(INACTIVE_DIR).join(identity)
    }

    /// Where a package's content lives given its active flag.
    pub fn managed_path(&self, identity: &str, active: bool) -> PathBuf {
        if active || !self.destination.rules().supports_deactivation {
            self.active_path(identity)
        } else {
            self.inactive_path(identity)
        }
    }

    /// `path` with the guarantee that it sits strictly inside this root.
    pub fn contained(&self, path: &Path) -> Result<PathBuf> {
        ensure_within(&self.root, path)
    }

    /// Move a package back into the active location.
    pub async fn activate(&self, identity: &str) -> Result<InstalledPackageRecord> {
        self.set_active(identity, true).await
    }

    /// Park a package under `.inactive/` without deleting it.
    ///
    /// The record is saved first; if the move then fails the record is
    /// restored and the move error returned.
    pub async fn deactivate(&self, identity: &str) -> Result<InstalledPackageRecord> {
        self.set_active(identity, false).await
    }

    async fn set_active(&self, identity: &str, active: bool) -> Result<InstalledPackageRecord> {
        if !self.destination.rules().supports_deactivation {
            return Err(Error::not_permitted(format!(
                "{} packages cannot be activated or deactivated",
                self.destination
            )));
        }

        let _guard = self.lock().await;
        let mut manifest = self.load()?;
        let previous = manifest
            .get(identity)
            .cloned()
            .ok_or_else(|| self.not_installed(identity))?;
        if previous.active == active {
            return Ok(previous);
        }

        let from = self.contained(&previous.disk_path)?;
        let to = self.contained(&self.managed_path(identity, active))?;

        let mut updated = previous.clone();
        updated.active = active;
        updated.disk_path = to.clone();
        manifest.upsert(updated.clone());
        self.save(&manifest)?;

        if let Err(e) = move_dir(&from, &to).await {
            warn!(
                destination = %self.destination,
                identity,
                error = %e,
                "package move failed, restoring record"
            );
            manifest.upsert(previous);
            self.save(&manifest)?;
            return Err(e);
        }

        info!(destination = %self.destination, identity, active, "package state changed");
        Ok(updated)
    }

    /// Delete a package and its record, subject to the destination rules.
    pub async fn remove(&self, identity: &str) -> Result<()> {
        let _guard = self.lock().await;
        let mut manifest = self.load()?;
        let record = manifest
            .get(identity)
            .ok_or_else(|| self.not_installed(identity))?;
        if !record.deletable {
            return Err(Error::not_permitted(format!(
                "'{identity}' is bundled with the application and can only be deactivated"
            )));
        }

        let dir = self.contained(&record.disk_path)?;
        if dir.exists() {
            tokio::fs::remove_dir_all(&dir).await?;
        }
        manifest.remove(identity);
        self.save(&manifest)?;
        info!(destination = %self.destination, identity, "package removed");
        Ok(())
    }

    fn not_installed(&self, identity: &str) -> Error {
        Error::validation(format!(
            "'{identity}' is not installed in {}",
            self.destination
        ))
    }
}

/// Both destinations, built from one config.
pub struct Destinations {
    skills: RecordStore,
    agents: RecordStore,
}

impl Destinations {
    pub fn new(skills_root: PathBuf, agents_root: PathBuf) -> Self {
        Self {
            skills: RecordStore::new(Destination::Skills, skills_root),
            agents: RecordStore::new(Destination::Agents, agents_root),
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.skills_dir(), config.agents_dir())
    }

    pub fn get(&self, destination: Destination) -> &RecordStore {
        match destination {
            Destination::Skills => &self.skills,
            Destination::Agents => &self.agents,
        }
    }
}

/// Lexical check first (no `..`, prefix match), then a canonical check when
/// the path exists so symlinks cannot escape.
pub fn ensure_within(root: &Path, path: &Path) -> Result<PathBuf> {
    let escapes = || {
        Error::integrity(format!(
            "{} is outside managed root {}",
            path.display(),
            root.display()
        ))
    };
    if path.components().any(|c| matches!(c, Component::ParentDir))
        || !path.starts_with(root)
        || path == root
    {
        return Err(escapes());
    }
    if path.exists() {
        let canonical_root = std::fs::canonicalize(root)?;
        let canonical = std::fs::canonicalize(path)?;
        if !canonical.starts_with(&canonical_root) || canonical == canonical_root {
            return Err(escapes());
        }
    }
    Ok(path.to_path_buf())
}

/// Sanitize a package-relative path from a remote listing.
pub fn sanitize_relative(path: &str) -> Result<PathBuf> {
    let candidate = Path::new(path);
    let mut clean = PathBuf::new();
    for component in candidate.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {},
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(Error::integrity(format!(
                    "package contains unsafe path component: {path}"
                )));
            },
        }
    }
    if clean.as_os_str().is_empty() || path.contains('\\') {
        return Err(Error::integrity(format!("package contains unsafe path: {path}")));
    }
    Ok(clean)
}

async fn move_dir(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    if tokio::fs::try_exists(to).await? {
        tokio::fs::remove_dir_all(to).await?;
    }
    tokio::fs::rename(from, to).await?;
    Ok(())
}

pub(crate) fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod tests {
    use {super::*, crate::error::ErrorKind};

    pub(crate) fn record(store: &RecordStore, identity: &str, version: &str) -> InstalledPackageRecord {
        InstalledPackageRecord {
            identity: identity.into(),
            version: version.into(),
            description: format!("{identity} helpers"),
            kind: None,
            flags: BehavioralFlags::default(),
            content_hash: None,
            disk_path: store.active_path(identity),
            active: true,
            deletable: true,
            imported_at_ms: 1_700_000_000_000,
            registry: Some("acme/skills".into()),
        }
    }

    fn install(store: &RecordStore, rec: &InstalledPackageRecord) {
        std::fs::create_dir_all(&rec.disk_path).unwrap();
        std::fs::write(rec.disk_path.join("SKILL.md"), "content").unwrap();
        let mut manifest = store.load().unwrap();
        manifest.upsert(rec.clone());
        store.save(&manifest).unwrap();
    }

    #[test]
    fn load_missing_returns_default() {
        let tmp = tempfile::tempdir().unwrap();
        let store = RecordStore::new(Destination::Skills, tmp.path().join("skills"));
        let m = store.load().unwrap();
        assert_eq!(m.version, 1);
        assert!(m.records.is_empty());
    }

    #[test]
    fn save_is_byte_stable() {
        let tmp = tempfile::tempdir().unwrap();
        let store = RecordStore::new(Destination::Agents, tmp.path().to_path_buf());
        let mut m = RecordManifest::default();
        m.upsert(record(&store, "b", "1.0.0"));
        m.upsert(record(&store, "a", "1.0.0"));
        store.save(&m).unwrap();
        let first = std::fs::read(store.manifest_path()).unwrap();
        store.save(&store.load().unwrap()).unwrap();
        assert_eq!(first, std::fs::read(store.manifest_path()).unwrap());
        assert!(!store.manifest_path().with_extension("json.tmp").exists());
    }

    #[test]
    fn destination_parsing() {
        assert_eq!("Skills".parse::<Destination>().unwrap(), Destination::Skills);
        assert_eq!("agent".parse::<Destination>().unwrap(), Destination::Agents);
        assert!("plugins".parse::<Destination>().is_err());
    }

    #[test]
    fn containment_rejects_escapes() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("skills");
        std::fs::create_dir_all(root.join("ok")).unwrap();

        assert!(ensure_within(&root, &root.join("ok")).is_ok());
        assert!(ensure_within(&root, &root.join("not-yet")).is_ok());
        for bad in [root.clone(), root.join("../elsewhere"), tmp.path().join("other")] {
            assert_eq!(ensure_within(&root, &bad).unwrap_err().kind(), ErrorKind::Integrity);
        }
    }

    #[cfg(unix)]
    #[test]
    fn containment_rejects_symlink_escape() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("skills");
        let outside = tmp.path().join("outside");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::create_dir_all(&outside).unwrap();
        std::os::unix::fs::symlink(&outside, root.join("link")).unwrap();
        let err = ensure_within(&root, &root.join("link")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Integrity);
    }

    #[test]
    fn sanitize_relative_paths() {
        assert_eq!(sanitize_relative("a/./b.md").unwrap(), PathBuf::from("a/b.md"));
        for bad in ["../x", "/etc/passwd", "a/../../b", "", "a\\..\\b"] {
            assert_eq!(sanitize_relative(bad).unwrap_err().kind(), ErrorKind::Integrity, "{bad}");
        }
    }

    #[tokio::test]
    async fn deactivate_then_activate_moves_content() {
        let tmp = tempfile::tempdir().unwrap();
        let store = RecordStore::new(Destination::Skills, tmp.path().join("skills"));
        let rec = record(&store, "sql", "1.0.0");
        install(&store, &rec);

        let off = store.deactivate("sql").await.unwrap();
        assert!(!off.active);
        assert!(store.inactive_path("sql").join("SKILL.md").exists());
        assert!(!store.active_path("sql").exists());
        assert!(!store.get("sql").unwrap().unwrap().active);

        let on = store.activate("sql").await.unwrap();
        assert!(on.active);
        assert_eq!(on.disk_path, store.active_path("sql"));
        assert!(store.active_path("sql").join("SKILL.md").exists());
    }

    #[tokio::test]
    async fn failed_move_restores_record() {
        let tmp = tempfile::tempdir().unwrap();
        let store = RecordStore::new(Destination::Skills, tmp.path().join("skills"));
        let rec = record(&store, "sql", "1.0.0");
        install(&store, &rec);
        // A regular file where the inactive directory should be.
        std::fs::write(store.root().join(INACTIVE_DIR), "blocker").unwrap();

        assert!(store.deactivate("sql").await.is_err());
        let after = store.get("sql").unwrap().unwrap();
        assert!(after.active);
        assert_eq!(after.disk_path, store.active_path("sql"));
        assert!(store.active_path("sql").join("SKILL.md").exists());
    }

    #[tokio::test]
    async fn agents_cannot_deactivate_but_can_delete() {
        let tmp = tempfile::tempdir().unwrap();
        let store = RecordStore::new(Destination::Agents, tmp.path().join("agents"));
        let rec = record(&store, "reviewer", "1.0.0");
        install(&store, &rec);

        let err = store.deactivate("reviewer").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotPermitted);

        store.remove("reviewer").await.unwrap();
        assert!(store.get("reviewer").unwrap().is_none());
        assert!(!store.active_path("reviewer").exists());
    }

    #[tokio::test]
    async fn bundled_skills_cannot_be_deleted() {
        let tmp = tempfile::tempdir().unwrap();
        let store = RecordStore::new(Destination::Skills, tmp.path().join("skills"));
        let mut rec = record(&store, "core", "1.0.0");
        rec.deletable = false;
        rec.registry = None;
        install(&store, &rec);

        let err = store.remove("core").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotPermitted);
        assert!(store.get("core").unwrap().is_some());
        assert!(store.deactivate("core").await.is_ok());
    }

    #[tokio::test]
    async fn record_outside_root_is_integrity_error() {
        let tmp = tempfile::tempdir().unwrap();
        let store = RecordStore::new(Destination::Agents, tmp.path().join("agents"));
        let mut rec = record(&store, "evil", "1.0.0");
        rec.disk_path = tmp.path().join("victim");
        install(&store, &rec);

        let err = store.remove("evil").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Integrity);
        assert!(tmp.path().join("victim").exists());
    }

    #[tokio::test]
    async fn unknown_identity_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let store = RecordStore::new(Destination::Skills, tmp.path().join("skills"));
        assert!(store.remove("ghost").await.is_err());
        assert!(store.deactivate("ghost").await.is_err());
    }
}
