use {async_trait::async_trait, serde::Serialize, tracing::debug};

use crate::{
    descriptor::{BehavioralFlags, PackageKind},
    error::Result,
    store::{Destination, RecordStore},
};

pub const INDEX_FILE: &str = "index.json";

/// Post-batch step that refreshes whatever consumers read from a destination.
#[async_trait]
pub trait IndexRegenerator: Send + Sync {
    async fn regenerate(&self, store: &RecordStore) -> Result<()>;
}

#[derive(Debug, Serialize)]
struct IndexDocument<'a> {
    destination: Destination,
    packages: Vec<IndexEntry<'a>>,
}

#[derive(Debug, Serialize)]
struct IndexEntry<'a> {
    identity: &'a str,
    version: &'a str,
    description: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    kind: Option<PackageKind>,
    path: String,
    flags: &'a BehavioralFlags,
}

/// Writes `{root}/index.json` listing active packages, sorted by identity.
#[derive(Debug, Default, Clone, Copy)]
pub struct IndexFileRegenerator;

#[async_trait]
impl IndexRegenerator for IndexFileRegenerator {
    async fn regenerate(&self, store: &RecordStore) -> Result<()> {
        let manifest = store.load()?;
        let packages: Vec<IndexEntry<'_>> = manifest
            .records
            .values()
            .filter(|r| r.active)
            .map(|r| IndexEntry {
                identity: &r.identity,
                version: &r.version,
                description: &r.description,
                kind: r.kind,
                path: r
                    .disk_path
                    .strip_prefix(store.root())
                    .unwrap_or(&r.disk_path)
                    .to_string_lossy()
                    .into_owned(),
                flags: &r.flags,
            })
            .collect();
        let count = packages.len();
        let doc = IndexDocument {
            destination: store.destination(),
            packages,
        };

        tokio::fs::create_dir_all(store.root()).await?;
        let path = store.root().join(INDEX_FILE);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_string_pretty(&doc)?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(destination = %store.destination(), count, "regenerated index");
        Ok(())
    }
}
