use serde::{Deserialize, Serialize};

use crate::{
    client::RepoRef,
    descriptor::{PackageDescriptor, PackageKind},
    enumerate::Excluded,
    locator::RegistryLocator,
    store::Destination,
};

/// One installable package as seen in a registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogPackage {
    /// Storage key, unqualified.
    pub identity: String,
    /// Catalog entry the package was found under.
    pub collection: String,
    /// Collection label from `plugin.json`, when present.
    pub label: Option<String>,
    pub descriptor: PackageDescriptor,
    /// Descriptor version, else the catalog entry's version.
    pub version: Option<String>,
    pub category: Option<String>,
    pub tags: Vec<String>,
    pub author: Option<String>,
    pub repo: RepoRef,
    /// Repo-relative package directory.
    pub path: String,
}

impl CatalogPackage {
    /// `label:identity`, or the bare identity when the collection has no label.
    pub fn display_name(&self) -> String {
        match &self.label {
            Some(label) => format!("{label}:{}", self.identity),
            None => self.identity.clone(),
        }
    }

    pub fn kind(&self) -> PackageKind {
        self.descriptor.kind.unwrap_or_default()
    }

    /// Where an import lands when the caller does not choose.
    pub fn default_destination(&self) -> Destination {
        match self.kind() {
            PackageKind::Agent => Destination::Agents,
            PackageKind::Skill | PackageKind::Other => Destination::Skills,
        }
    }

    /// Catalog version, empty when neither descriptor nor entry states one.
    pub fn catalog_version(&self) -> &str {
        self.version.as_deref().unwrap_or("")
    }
}

/// Everything one sync learned about one registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    /// Reference string as configured.
    pub reference: String,
    pub locator: RegistryLocator,
    pub repo: RepoRef,
    pub catalog_name: Option<String>,
    pub packages: Vec<CatalogPackage>,
    pub excluded: Vec<Excluded>,
    pub fetched_at_ms: u64,
    /// Set when loaded from the offline mirror rather than fetched.
    #[serde(skip)]
    pub from_mirror: bool,
}

impl CatalogSnapshot {
    pub fn package(&self, identity: &str) -> Option<&CatalogPackage> {
        self.packages.iter().find(|p| p.identity == identity)
    }

    pub fn filter<'a>(&'a self, filter: &'a PackageFilter) -> impl Iterator<Item = &'a CatalogPackage> + 'a {
        self.packages.iter().filter(move |p| filter.matches(p))
    }
}

/// Attribute filter for browsing. Empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageFilter {
    /// Case-insensitive substring over identity, display name, description and tags.
    pub query: Option<String>,
    pub category: Option<String>,
    pub kind: Option<PackageKind>,
}

impl PackageFilter {
    pub fn matches(&self, package: &CatalogPackage) -> bool {
        if let Some(kind) = self.kind
            && package.kind() != kind
        {
            return false;
        }
        if let Some(category) = &self.category
            && !package
                .category
                .as_deref()
                .is_some_and(|c| c.eq_ignore_ascii_case(category))
        {
            return false;
        }
        match self.query.as_deref().map(str::trim) {
            Some(q) if !q.is_empty() => {
                let q = q.to_lowercase();
                package.identity.contains(&q)
                    || package.display_name().to_lowercase().contains(&q)
                    || package.descriptor.description.to_lowercase().contains(&q)
                    || package.tags.iter().any(|t| t.to_lowercase().contains(&q))
            },
            _ => true,
        }
    }
}
