use std::path::PathBuf;

use tracing::debug;

use crate::{
    customization::fingerprint, error::Result, locator::RegistryLocator, snapshot::CatalogSnapshot,
};

/// Last fresh snapshot per registry, kept for offline browsing.
///
/// A mirror is never authoritative: every successful fetch overwrites it.
pub struct CatalogMirror {
    dir: PathBuf,
}

impl CatalogMirror {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// `{owner}@{repo}.json`, plus `~{digest}` of the subpath when present.
    /// `@` and `~` never occur in owner or repo names.
    pub fn path_for(&self, locator: &RegistryLocator) -> PathBuf {
        let mut name = format!("{}@{}", locator.owner, locator.repo);
        if let Some(subpath) = &locator.subpath {
            name.push('~');
            name.push_str(&fingerprint(subpath.as_bytes())[..16]);
        }
        self.dir.join(format!("{name}.json"))
    }

    /// Save atomically via temp file + rename.
    pub fn store(&self, snapshot: &CatalogSnapshot) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(&snapshot.locator);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(snapshot)?)?;
        std::fs::rename(&tmp, &path)?;
        debug!(path = %path.display(), packages = snapshot.packages.len(), "mirrored catalog");
        Ok(())
    }

    /// The mirrored snapshot, or `None` when this registry was never fetched.
    pub fn load(&self, locator: &RegistryLocator) -> Result<Option<CatalogSnapshot>> {
        let path = self.path_for(locator);
        if !path.exists() {
            return Ok(None);
        }
        let mut snapshot: CatalogSnapshot = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        snapshot.from_mirror = true;
        Ok(Some(snapshot))
    }
}
