use serde::Serialize;

use crate::{
    snapshot::CatalogPackage,
    store::{Destination, InstalledPackageRecord, RecordManifest},
    version::is_update,
};

/// How a catalog package relates to one destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum InstallState {
    NotInstalled,
    /// Installed, but the catalog states no version to compare against.
    Unversioned { installed_version: String },
    UpToDate { installed_version: String },
    UpdateAvailable(UpdateAvailability),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateAvailability {
    pub identity: String,
    pub destination: Destination,
    pub installed_version: String,
    pub catalog_version: String,
}

pub fn compare_one(
    destination: Destination,
    package: &CatalogPackage,
    record: Option<&InstalledPackageRecord>,
) -> InstallState {
    let Some(record) = record else {
        return InstallState::NotInstalled;
    };
    let catalog_version = package.catalog_version().trim();
    if catalog_version.is_empty() {
        return InstallState::Unversioned {
            installed_version: record.version.clone(),
        };
    }
    if is_update(&record.version, catalog_version) {
        InstallState::UpdateAvailable(UpdateAvailability {
            identity: package.identity.clone(),
            destination,
            installed_version: record.version.clone(),
            catalog_version: catalog_version.to_string(),
        })
    } else {
        InstallState::UpToDate {
            installed_version: record.version.clone(),
        }
    }
}

/// Every update the catalog offers against one destination, in catalog order.
pub fn updates_for(
    destination: Destination,
    packages: &[CatalogPackage],
    manifest: &RecordManifest,
) -> Vec<UpdateAvailability> {
    packages
        .iter()
        .filter_map(|p| match compare_one(destination, p, manifest.get(&p.identity)) {
            InstallState::UpdateAvailable(u) => Some(u),
            _ => None,
        })
        .collect()
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            snapshot::fixtures::package,
            store::{RecordStore, tests::record},
        },
    };

    #[test]
    fn states() {
        let tmp = tempfile::tempdir().unwrap();
        let store = RecordStore::new(Destination::Skills, tmp.path().to_path_buf());
        let installed = record(&store, "sql", "1.0.0");

        assert_eq!(
            compare_one(Destination::Skills, &package("sql", None, Some("1.0.0")), None),
            InstallState::NotInstalled
        );
        assert!(matches!(
            compare_one(Destination::Skills, &package("sql", None, None), Some(&installed)),
            InstallState::Unversioned { .. }
        ));
        assert!(matches!(
            compare_one(Destination::Skills, &package("sql", None, Some(" 1.0.0 ")), Some(&installed)),
            InstallState::UpToDate { .. }
        ));
        assert!(matches!(
            compare_one(Destination::Skills, &package("sql", None, Some("v1.0.0")), Some(&installed)),
            InstallState::UpdateAvailable(_)
        ));
        assert!(matches!(
            compare_one(Destination::Skills, &package("sql", None, Some("0.9.0")), Some(&installed)),
            InstallState::UpToDate { .. }
        ));
        let InstallState::UpdateAvailable(update) =
            compare_one(Destination::Skills, &package("sql", None, Some("1.1.0")), Some(&installed))
        else {
            panic!("expected update");
        };
        assert_eq!(update.installed_version, "1.0.0");
        assert_eq!(update.catalog_version, "1.1.0");
    }

    #[test]
    fn destinations_are_compared_independently() {
        let tmp = tempfile::tempdir().unwrap();
        let skills = RecordStore::new(Destination::Skills, tmp.path().join("s"));
        let agents = RecordStore::new(Destination::Agents, tmp.path().join("a"));

        let mut skills_manifest = RecordManifest::default();
        skills_manifest.upsert(record(&skills, "sql", "1.0.0"));
        let mut agents_manifest = RecordManifest::default();
        agents_manifest.upsert(record(&agents, "sql", "2.0.0"));

        let packages = vec![package("sql", None, Some("2.0.0")), package("new", None, Some("1.0.0"))];
        let skill_updates = updates_for(Destination::Skills, &packages, &skills_manifest);
        assert_eq!(skill_updates.len(), 1);
        assert_eq!(skill_updates[0].destination, Destination::Skills);
        assert!(updates_for(Destination::Agents, &packages, &agents_manifest).is_empty());
    }
}
