use serde::Serialize;

use crate::{store::InstalledPackageRecord, version::is_update};

/// What a browse view shows next to a catalog package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallBadge {
    NotInstalled,
    SameVersion,
    UpdateAvailable,
    /// Imported during the current session.
    JustImported,
    /// Installed, but the catalog states no version.
    AlreadyInstalled,
}

/// Pure classification, no I/O.
pub fn classify(
    record: Option<&InstalledPackageRecord>,
    catalog_version: Option<&str>,
    imported_this_session: bool,
) -> InstallBadge {
    if imported_this_session {
        return InstallBadge::JustImported;
    }
    let Some(record) = record else {
        return InstallBadge::NotInstalled;
    };
    match catalog_version.map(str::trim).filter(|v| !v.is_empty()) {
        None => InstallBadge::AlreadyInstalled,
        Some(v) if is_update(&record.version, v) => InstallBadge::UpdateAvailable,
        Some(_) => InstallBadge::SameVersion,
    }
}
