//! Catalog → collection → package walk.
//!
//! Each collection directory is expected to look like:
//!
//! ```text
//! {collection}/.claude-plugin/plugin.json   optional, provides the label
//! {collection}/skills/{package}/SKILL.md
//! ```
//!
//! Nothing here fails the registry. Every entry or package that cannot be
//! used becomes an [`Excluded`] record next to the packages that can.

use std::collections::HashMap;

use {
    futures::{StreamExt, stream},
    serde::{Deserialize, Serialize},
    serde_json::Value,
    tracing::{debug, warn},
};

use crate::{
    catalog::{Catalog, CollectionEntry, CollectionSource},
    client::{EntryKind, RegistryClient, RepoRef},
    descriptor::{DESCRIPTOR_FILE, parse_descriptor},
    error::Error,
    locator::RegistryLocator,
    snapshot::CatalogPackage,
};

/// Collection manifest providing the display label.
pub const COLLECTION_MANIFEST: &str = ".claude-plugin/plugin.json";

/// Directory under a collection holding one subdirectory per package.
pub const PACKAGES_DIR: &str = "skills";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum ExclusionReason {
    /// Catalog entry is malformed.
    InvalidEntry(String),
    /// Source points at another repository.
    ExternalSource(String),
    /// Source path escapes the registry or is otherwise unusable.
    InvalidSource(String),
    /// Package directory has no descriptor file.
    MissingDescriptor,
    /// Descriptor exists but lacks required fields.
    InvalidDescriptor(String),
    /// Collection yielded no usable package.
    NoPackages,
    Network(String),
}

impl std::fmt::Display for ExclusionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidEntry(d) => write!(f, "invalid catalog entry: {d}"),
            Self::ExternalSource(d) => write!(f, "external source not supported: {d}"),
            Self::InvalidSource(d) => write!(f, "invalid source: {d}"),
            Self::MissingDescriptor => write!(f, "no {DESCRIPTOR_FILE}"),
            Self::InvalidDescriptor(d) => write!(f, "invalid descriptor: {d}"),
            Self::NoPackages => write!(f, "no packages"),
            Self::Network(d) => write!(f, "network error: {d}"),
        }
    }
}

/// A skipped collection or package, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Excluded {
    pub collection: String,
    pub package: Option<String>,
    pub reason: ExclusionReason,
}

#[derive(Debug, Default)]
pub struct Enumeration {
    pub packages: Vec<CatalogPackage>,
    pub excluded: Vec<Excluded>,
}

/// Options shared by every collection of one registry.
#[derive(Debug, Clone, Copy)]
pub struct EnumerateOptions<'a> {
    pub collection_root: Option<&'a str>,
    pub concurrency: usize,
}

struct CollectionListing<'a> {
    entry: &'a CollectionEntry,
    label: Option<String>,
    package_dirs: Vec<(String, String)>,
}

pub async fn enumerate_packages(
    client: &dyn RegistryClient,
    locator: &RegistryLocator,
    repo: &RepoRef,
    catalog: &Catalog,
    options: EnumerateOptions<'_>,
) -> Enumeration {
    let concurrency = options.concurrency.max(1);
    let mut out = Enumeration::default();

    for invalid in &catalog.invalid {
        out.excluded.push(Excluded {
            collection: invalid
                .name
                .clone()
                .unwrap_or_else(|| format!("#{}", invalid.index)),
            package: None,
            reason: ExclusionReason::InvalidEntry(invalid.reason.clone()),
        });
    }

    // Resolve sources up front; only path sources reach the host.
    let mut pending = Vec::new();
    for (index, entry) in catalog.entries.iter().enumerate() {
        match &entry.source {
            CollectionSource::External { kind, reference } => {
                let detail = match reference {
                    Some(r) => format!("{kind}:{r}"),
                    None => kind.clone(),
                };
                warn!(collection = %entry.name, %detail, "skipping collection with external source");
                out.excluded.push(excluded(entry, None, ExclusionReason::ExternalSource(detail)));
            },
            CollectionSource::Path { path } => {
                match resolve_collection_dir(path, options.collection_root) {
                    Ok(dir) => pending.push((index, entry, locator.resolve(&dir))),
                    Err(detail) => {
                        warn!(collection = %entry.name, %path, %detail, "skipping collection with invalid source");
                        out.excluded.push(excluded(entry, None, ExclusionReason::InvalidSource(detail)));
                    },
                }
            },
        }
    }

    // Level 1: list each collection's packages and read its label.
    let mut listings: Vec<(usize, Result<CollectionListing<'_>, Excluded>)> =
        stream::iter(pending)
            .map(|(index, entry, dir)| async move { (index, list_collection(client, repo, entry, &dir).await) })
            .buffer_unordered(concurrency)
            .collect()
            .await;
    listings.sort_by_key(|(index, _)| *index);

    let mut collections = Vec::new();
    for (_, listing) in listings {
        match listing {
            Ok(listing) => collections.push(listing),
            Err(ex) => out.excluded.push(ex),
        }
    }

    // Level 2: fetch every descriptor across all collections.
    let jobs = collections.iter().enumerate().flat_map(|(ci, listing)| {
        listing
            .package_dirs
            .iter()
            .enumerate()
            .map(move |(pi, (name, path))| (ci, pi, listing, name, path))
    });
    let mut fetched: Vec<(usize, usize, Result<CatalogPackage, Excluded>)> = stream::iter(jobs)
        .map(|(ci, pi, listing, name, path)| async move {
            (ci, pi, fetch_package(client, repo, listing, name, path).await)
        })
        .buffer_unordered(concurrency)
        .collect()
        .await;
    fetched.sort_by_key(|(ci, pi, _)| (*ci, *pi));

    // Aggregate in catalog order so later collections overwrite earlier ones.
    let mut produced = vec![0usize; collections.len()];
    let mut by_identity: HashMap<String, usize> = HashMap::new();
    for (ci, _, result) in fetched {
        match result {
            Ok(package) => {
                produced[ci] += 1;
                match by_identity.get(&package.identity) {
                    Some(&slot) => {
                        debug!(
                            identity = %package.identity,
                            previous = %out.packages[slot].collection,
                            collection = %package.collection,
                            "duplicate identity, later collection wins"
                        );
                        out.packages[slot] = package;
                    },
                    None => {
                        by_identity.insert(package.identity.clone(), out.packages.len());
                        out.packages.push(package);
                    },
                }
            },
            Err(ex) => out.excluded.push(ex),
        }
    }

    for (ci, listing) in collections.iter().enumerate() {
        if produced[ci] == 0 {
            debug!(collection = %listing.entry.name, "collection contributed no packages");
            out.excluded.push(excluded(listing.entry, None, ExclusionReason::NoPackages));
        }
    }

    out
}

/// Turn a catalog `source` path into a repo-relative collection directory.
///
/// `./plugins/dbt` → `plugins/dbt`; a bare `dbt` gets the collection root
/// prefix when one is configured.
pub fn resolve_collection_dir(source: &str, collection_root: Option<&str>) -> Result<String, String> {
    let source = source.trim();
    if source.starts_with('/') {
        return Err(format!("absolute path '{source}'"));
    }
    let mut rel = source;
    while let Some(rest) = rel.strip_prefix("./") {
        rel = rest;
    }
    let rel = rel.trim_end_matches('/');
    let bare = !source.starts_with("./") && !rel.contains('/');

    let joined = match collection_root.map(|r| r.trim_matches('/')).filter(|r| !r.is_empty()) {
        Some(root) if bare && !rel.is_empty() && rel != "." => format!("{root}/{rel}"),
        _ => rel.to_string(),
    };

    if joined.is_empty() || joined == "." {
        return Ok(String::new());
    }
    for segment in joined.split('/') {
        let lower = segment.to_ascii_lowercase();
        if segment.is_empty()
            || segment == "."
            || segment == ".."
            || segment.contains('\\')
            || ["%2f", "%5c", "%2e"].iter().any(|esc| lower.contains(esc))
        {
            return Err(format!("path traversal in '{source}'"));
        }
    }
    Ok(joined)
}

async fn list_collection<'a>(
    client: &dyn RegistryClient,
    repo: &RepoRef,
    entry: &'a CollectionEntry,
    dir: &str,
) -> Result<CollectionListing<'a>, Excluded> {
    let packages_path = join(dir, PACKAGES_DIR);
    let children = match client.list_dir(repo, &packages_path).await {
        Ok(Some(children)) => children,
        Ok(None) => {
            debug!(collection = %entry.name, path = %packages_path, "collection has no packages directory");
            return Err(excluded(entry, None, ExclusionReason::NoPackages));
        },
        Err(e) => {
            warn!(collection = %entry.name, error = %e, "failed to list collection");
            return Err(excluded(entry, None, ExclusionReason::Network(e.to_string())));
        },
    };

    let label = read_label(client, repo, entry, dir).await;
    let package_dirs = children
        .into_iter()
        .filter(|c| c.kind == EntryKind::Dir)
        .map(|c| (c.name, c.path))
        .collect();

    Ok(CollectionListing {
        entry,
        label,
        package_dirs,
    })
}

async fn read_label(
    client: &dyn RegistryClient,
    repo: &RepoRef,
    entry: &CollectionEntry,
    dir: &str,
) -> Option<String> {
    let path = join(dir, COLLECTION_MANIFEST);
    let raw = match client.fetch_text(repo, &path).await {
        Ok(raw) => raw?,
        Err(e) => {
            debug!(collection = %entry.name, error = %e, "collection label unavailable");
            return None;
        },
    };
    match serde_json::from_str::<Value>(&raw) {
        Ok(doc) => doc
            .get("name")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string),
        Err(e) => {
            debug!(collection = %entry.name, %path, %e, "ignoring malformed plugin.json");
            None
        },
    }
}

async fn fetch_package(
    client: &dyn RegistryClient,
    repo: &RepoRef,
    listing: &CollectionListing<'_>,
    dir_name: &str,
    path: &str,
) -> Result<CatalogPackage, Excluded> {
    let entry = listing.entry;
    let descriptor_path = join(path, DESCRIPTOR_FILE);
    let content = match client.fetch_text(repo, &descriptor_path).await {
        Ok(Some(content)) => content,
        Ok(None) => {
            debug!(collection = %entry.name, package = dir_name, "skipping package without descriptor");
            return Err(excluded(entry, Some(dir_name), ExclusionReason::MissingDescriptor));
        },
        Err(Error::Validation(detail)) => {
            return Err(excluded(entry, Some(dir_name), ExclusionReason::InvalidDescriptor(detail)));
        },
        Err(e) => {
            warn!(collection = %entry.name, package = dir_name, error = %e, "failed to fetch descriptor");
            return Err(excluded(entry, Some(dir_name), ExclusionReason::Network(e.to_string())));
        },
    };

    let descriptor = parse_descriptor(&content).map_err(|e| {
        debug!(collection = %entry.name, package = dir_name, error = %e, "skipping package with invalid descriptor");
        excluded(entry, Some(dir_name), ExclusionReason::InvalidDescriptor(e.to_string()))
    })?;

    Ok(CatalogPackage {
        identity: descriptor.identity.clone(),
        collection: entry.name.clone(),
        label: listing.label.clone(),
        version: descriptor.version.clone().or_else(|| entry.version.clone()),
        descriptor,
        category: entry.category.clone(),
        tags: entry.tags.clone(),
        author: entry.author.clone(),
        repo: repo.clone(),
        path: path.to_string(),
    })
}

fn excluded(entry: &CollectionEntry, package: Option<&str>, reason: ExclusionReason) -> Excluded {
    Excluded {
        collection: entry.name.clone(),
        package: package.map(str::to_string),
        reason,
    }
}

fn join(dir: &str, rel: &str) -> String {
    if dir.is_empty() {
        rel.to_string()
    } else {
        format!("{dir}/{rel}")
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{catalog::parse_catalog, client::MemoryClient, locator::parse_reference},
    };

    fn skill(name: &str, version: Option<&str>) -> String {
        let version = version.map(|v| format!("version: {v}\n")).unwrap_or_default();
        format!("---\nname: {name}\ndescription: {name} description\n{version}---\n\nBody\n")
    }

    async fn run(client: &MemoryClient, catalog_json: &str, root: Option<&str>) -> Enumeration {
        let loc = parse_reference("acme/skills").unwrap();
        let repo = RepoRef::new(&loc, "main");
        let catalog = parse_catalog(catalog_json, "test").unwrap();
        enumerate_packages(client, &loc, &repo, &catalog, EnumerateOptions {
            collection_root: root,
            concurrency: 4,
        })
        .await
    }

    #[test]
    fn collection_dir_resolution() {
        assert_eq!(resolve_collection_dir("./plugins/dbt", None).unwrap(), "plugins/dbt");
        assert_eq!(resolve_collection_dir("dbt", Some("plugins")).unwrap(), "plugins/dbt");
        assert_eq!(resolve_collection_dir("dbt", None).unwrap(), "dbt");
        assert_eq!(resolve_collection_dir("./dbt", Some("plugins")).unwrap(), "dbt");
        assert_eq!(
            resolve_collection_dir("plugins/dbt/", Some("ignored")).unwrap(),
            "plugins/dbt"
        );
        assert_eq!(resolve_collection_dir("./", None).unwrap(), "");
        for bad in ["../outside", "./a/../../b", "/etc", "a\\b", "a/%2e%2e/b", "a//b"] {
            assert!(resolve_collection_dir(bad, None).is_err(), "{bad}");
        }
    }

    #[tokio::test]
    async fn walks_collections_and_labels() {
        let client = MemoryClient::new();
        client.put_file("acme", "skills", "plugins/dbt/.claude-plugin/plugin.json", r#"{"name":"dbt"}"#);
        client.put_file("acme", "skills", "plugins/dbt/skills/sql-lint/SKILL.md", skill("sql-lint", Some("1.1.0")));
        client.put_file("acme", "skills", "plugins/dbt/skills/sql-lint/rules.md", "rules");
        client.put_file("acme", "skills", "plugins/misc/skills/notes/SKILL.md", skill("notes", None));

        let out = run(
            &client,
            r#"{"plugins":[
                {"name":"dbt","source":"./plugins/dbt","category":"data"},
                {"name":"misc","source":"misc","version":"0.3.0"}
            ]}"#,
            Some("plugins"),
        )
        .await;

        assert!(out.excluded.is_empty(), "{:?}", out.excluded);
        assert_eq!(out.packages.len(), 2);
        let sql = &out.packages[0];
        assert_eq!(sql.display_name(), "dbt:sql-lint");
        assert_eq!(sql.version.as_deref(), Some("1.1.0"));
        assert_eq!(sql.category.as_deref(), Some("data"));
        assert_eq!(sql.path, "plugins/dbt/skills/sql-lint");

        let notes = &out.packages[1];
        assert_eq!(notes.display_name(), "notes");
        assert_eq!(notes.version.as_deref(), Some("0.3.0"));
    }

    #[tokio::test]
    async fn packages_without_valid_descriptor_are_excluded() {
        let client = MemoryClient::new();
        client.put_file("acme", "skills", "c/skills/good/SKILL.md", skill("good", None));
        client.put_file("acme", "skills", "c/skills/bare/README.md", "no descriptor");
        client.put_file("acme", "skills", "c/skills/broken/SKILL.md", "---\ndescription: x\n---\n");
        client.put_file("acme", "skills", "c/skills/flaky/SKILL.md", skill("flaky", None));
        client.fail_path("acme", "skills", "c/skills/flaky");

        let out = run(&client, r#"{"plugins":[{"name":"c","source":"./c"}]}"#, None).await;
        assert_eq!(out.packages.len(), 1);
        assert_eq!(out.packages[0].identity, "good");

        let reasons: HashMap<_, _> = out
            .excluded
            .iter()
            .map(|e| (e.package.clone().unwrap(), e.reason.clone()))
            .collect();
        assert_eq!(reasons["bare"], ExclusionReason::MissingDescriptor);
        assert!(matches!(reasons["broken"], ExclusionReason::InvalidDescriptor(_)));
        assert!(matches!(reasons["flaky"], ExclusionReason::Network(_)));
    }

    #[tokio::test]
    async fn unusable_collections_are_typed_exclusions() {
        let client = MemoryClient::new();
        client.put_file("acme", "skills", "empty/skills/bare/README.md", "x");
        client.put_file("acme", "skills", "ok/skills/a/SKILL.md", skill("a", None));

        let out = run(
            &client,
            r#"{"plugins":[
                {"name":"ext","source":{"source":"github","repo":"o/r"}},
                {"name":"escape","source":"../../etc"},
                {"name":"missing","source":"./nowhere"},
                {"name":"empty","source":"./empty"},
                {"name":"ok","source":"./ok"},
                {"oops": true}
            ]}"#,
            None,
        )
        .await;

        assert_eq!(out.packages.len(), 1);
        let collection_level: Vec<(&str, &ExclusionReason)> = out
            .excluded
            .iter()
            .filter(|e| e.package.is_none())
            .map(|e| (e.collection.as_str(), &e.reason))
            .collect();
        assert!(collection_level.iter().any(|(c, r)| *c == "#5" && matches!(r, ExclusionReason::InvalidEntry(_))));
        assert!(collection_level.iter().any(|(c, r)| *c == "ext" && matches!(r, ExclusionReason::ExternalSource(_))));
        assert!(collection_level.iter().any(|(c, r)| *c == "escape" && matches!(r, ExclusionReason::InvalidSource(_))));
        assert!(collection_level.contains(&("missing", &ExclusionReason::NoPackages)));
        assert!(collection_level.contains(&("empty", &ExclusionReason::NoPackages)));
    }

    #[tokio::test]
    async fn duplicate_identity_last_writer_wins() {
        let client = MemoryClient::new();
        client.put_file("acme", "skills", "one/skills/shared/SKILL.md", skill("shared", Some("1.0.0")));
        client.put_file("acme", "skills", "two/skills/shared/SKILL.md", skill("shared", Some("2.0.0")));

        let out = run(
            &client,
            r#"{"plugins":[{"name":"one","source":"./one"},{"name":"two","source":"./two"}]}"#,
            None,
        )
        .await;
        assert_eq!(out.packages.len(), 1);
        assert_eq!(out.packages[0].collection, "two");
        assert_eq!(out.packages[0].version.as_deref(), Some("2.0.0"));
    }

    #[tokio::test]
    async fn subpath_prefixes_collection_dirs() {
        let client = MemoryClient::new();
        client.put_file("acme", "skills", "reg/c/skills/a/SKILL.md", skill("a", None));
        let loc = parse_reference("https://github.com/acme/skills/tree/main/reg").unwrap();
        let repo = RepoRef::new(&loc, "main");
        let catalog = parse_catalog(r#"{"plugins":[{"name":"c","source":"./c"}]}"#, "t").unwrap();
        let out = enumerate_packages(&client, &loc, &repo, &catalog, EnumerateOptions {
            collection_root: None,
            concurrency: 1,
        })
        .await;
        assert_eq!(out.packages.len(), 1);
        assert_eq!(out.packages[0].path, "reg/c/skills/a");
    }
}
