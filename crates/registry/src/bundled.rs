//! Startup seeding of packages shipped with the application.
//!
//! Every `{bundled_dir}/{name}/SKILL.md` is copied into the skills
//! destination as a non-deletable record. A bundled record keeps its active
//! flag across re-seeds; content is replaced only when the shipped
//! descriptor differs from the recorded baseline.

use std::path::{Path, PathBuf};

use {
    serde::Serialize,
    tracing::{debug, info, warn},
};

use crate::{
    client::RemoteFile,
    customization::fingerprint,
    descriptor::{DESCRIPTOR_FILE, parse_descriptor},
    error::{Error, Result},
    import::stage_and_swap,
    index::IndexRegenerator,
    store::{Destination, InstalledPackageRecord, RecordManifest, RecordStore, now_ms},
    version::DEFAULT_VERSION,
};

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct SeedReport {
    pub seeded: Vec<String>,
    pub unchanged: Vec<String>,
    pub failed: Vec<(String, String)>,
}

/// Re-seed bundled packages into `store`, which must be the skills destination.
pub async fn seed_bundled(
    store: &RecordStore,
    bundled_dir: &Path,
    regenerator: &dyn IndexRegenerator,
) -> Result<SeedReport> {
    if !store.destination().rules().supports_bundled {
        return Err(Error::not_permitted(format!(
            "{} destination has no bundled packages",
            store.destination()
        )));
    }
    let mut report = SeedReport::default();
    if !bundled_dir.is_dir() {
        debug!(path = %bundled_dir.display(), "no bundled package directory");
        return Ok(report);
    }

    let _guard = store.lock().await;
    let mut manifest = store.load()?;

    let mut candidates: Vec<PathBuf> = std::fs::read_dir(bundled_dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.join(DESCRIPTOR_FILE).is_file())
        .collect();
    candidates.sort();

    for dir in candidates {
        let label = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        match seed_one(store, &dir, &mut manifest).await {
            Ok(Some(identity)) => {
                info!(%identity, "seeded bundled package");
                report.seeded.push(identity);
            },
            Ok(None) => report.unchanged.push(label),
            Err(e) => {
                warn!(path = %dir.display(), error = %e, "failed to seed bundled package");
                report.failed.push((label, e.to_string()));
            },
        }
    }

    if !report.seeded.is_empty()
        && let Err(e) = regenerator.regenerate(store).await
    {
        warn!(destination = %Destination::Skills, error = %e, "index regeneration failed");
    }
    Ok(report)
}

/// Seed one package and save its record; `None` when already current.
async fn seed_one(
    store: &RecordStore,
    dir: &Path,
    manifest: &mut RecordManifest,
) -> Result<Option<String>> {
    let content = tokio::fs::read(dir.join(DESCRIPTOR_FILE)).await?;
    let descriptor = parse_descriptor(&String::from_utf8_lossy(&content))?;
    let hash = fingerprint(&content);
    let existing = manifest.get(&descriptor.identity);

    if let Some(existing) = existing
        && existing.content_hash.as_deref() == Some(hash.as_str())
        && tokio::fs::try_exists(existing.disk_path.join(DESCRIPTOR_FILE)).await?
    {
        return Ok(None);
    }

    let active = existing.is_none_or(|r| r.active);
    let target = store.contained(&store.managed_path(&descriptor.identity, active))?;
    let files = read_tree(dir.to_path_buf()).await?;
    let swap = stage_and_swap(store, &descriptor.identity, &files, &target).await?;

    let record = InstalledPackageRecord {
        version: descriptor
            .version
            .clone()
            .unwrap_or_else(|| DEFAULT_VERSION.to_string()),
        description: descriptor.description.clone(),
        kind: descriptor.kind,
        flags: descriptor.flags.clone(),
        content_hash: Some(hash),
        disk_path: target,
        active,
        deletable: false,
        imported_at_ms: existing.map_or_else(now_ms, |r| r.imported_at_ms),
        registry: None,
        identity: descriptor.identity,
    };
    let mut updated = manifest.clone();
    updated.upsert(record.clone());
    if let Err(e) = store.save(&updated) {
        swap.rollback().await;
        return Err(e);
    }
    swap.commit().await;
    *manifest = updated;
    Ok(Some(record.identity))
}

/// Every regular file below `src`, symlinks skipped.
async fn read_tree(src: PathBuf) -> Result<Vec<RemoteFile>> {
    tokio::task::spawn_blocking(move || -> Result<Vec<RemoteFile>> {
        let mut files = Vec::new();
        for entry in walkdir::WalkDir::new(&src).min_depth(1).follow_links(false) {
            let entry = entry.map_err(std::io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(&src)
                .map_err(|_| Error::integrity(format!("{} escaped {}", entry.path().display(), src.display())))?;
            files.push(RemoteFile {
                relative_path: relative.to_string_lossy().replace('\\', "/"),
                bytes: std::fs::read(entry.path())?,
            });
        }
        Ok(files)
    })
    .await
    .map_err(|e| Error::Io(std::io::Error::other(e)))?
}
