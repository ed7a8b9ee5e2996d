//! Import/update executor.
//!
//! A batch runs in three stages:
//!
//! 1. downloads for every allowed request, fanned out with bounded concurrency
//!    and joined before anything touches disk;
//! 2. per package, sequentially: stage, swap into place, upsert the record,
//!    baseline hash last;
//! 3. one index regeneration per affected destination.
//!
//! Every destination touched by the batch stays locked until stage 3 ends.

use std::{
    collections::{BTreeMap, BTreeSet, HashSet},
    path::{Path, PathBuf},
};

use {
    futures::{StreamExt, stream},
    serde::{Deserialize, Serialize},
    tracing::{debug, info, warn},
};

use crate::{
    client::{RegistryClient, RemoteFile},
    customization::{detect, fingerprint_package},
    descriptor::DESCRIPTOR_FILE,
    error::{Error, ErrorKind, Result},
    index::IndexRegenerator,
    snapshot::{CatalogPackage, CatalogSnapshot},
    store::{
        Destination, Destinations, InstalledPackageRecord, RecordManifest, RecordStore, now_ms,
        sanitize_relative,
    },
    version::{DEFAULT_VERSION, is_update},
};

const STAGING_DIR: &str = ".staging";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportRequest {
    pub identity: String,
    pub destination: Destination,
    /// Reinstall even when not newer, and overwrite local customizations.
    #[serde(default)]
    pub force: bool,
}

impl ImportRequest {
    pub fn new(identity: impl Into<String>, destination: Destination) -> Self {
        Self {
            identity: identity.into(),
            destination,
            force: false,
        }
    }

    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportStatus {
    /// First install into the destination.
    Imported,
    /// Existing record replaced.
    Updated,
    /// Not newer and not forced.
    Skipped,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportOutcome {
    pub identity: String,
    pub destination: Destination,
    pub status: ImportStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl ImportOutcome {
    fn new(request: &ImportRequest, status: ImportStatus) -> Self {
        Self {
            identity: request.identity.clone(),
            destination: request.destination,
            status,
            version: None,
            error: None,
            error_kind: None,
        }
    }

    fn failed(request: &ImportRequest, error: &Error) -> Self {
        warn!(
            identity = %request.identity,
            destination = %request.destination,
            error = %error,
            "import failed"
        );
        Self {
            error: Some(error.to_string()),
            error_kind: Some(error.kind()),
            ..Self::new(request, ImportStatus::Failed)
        }
    }

    pub fn succeeded(&self) -> bool {
        matches!(self.status, ImportStatus::Imported | ImportStatus::Updated)
    }
}

struct Planned<'r> {
    slot: usize,
    request: &'r ImportRequest,
    package: &'r CatalogPackage,
    existing: Option<InstalledPackageRecord>,
}

pub struct ImportExecutor<'a> {
    client: &'a dyn RegistryClient,
    destinations: &'a Destinations,
    regenerator: &'a dyn IndexRegenerator,
    concurrency: usize,
}

impl<'a> ImportExecutor<'a> {
    pub fn new(
        client: &'a dyn RegistryClient,
        destinations: &'a Destinations,
        regenerator: &'a dyn IndexRegenerator,
        concurrency: usize,
    ) -> Self {
        Self {
            client,
            destinations,
            regenerator,
            concurrency: concurrency.max(1),
        }
    }

    /// Run one batch against a snapshot. One outcome per distinct
    /// `(identity, destination)` request, in request order.
    pub async fn execute(
        &self,
        snapshot: &CatalogSnapshot,
        requests: &[ImportRequest],
    ) -> Vec<ImportOutcome> {
        let mut seen = HashSet::new();
        let requests: Vec<&ImportRequest> = requests
            .iter()
            .filter(|r| seen.insert((r.identity.as_str(), r.destination)))
            .collect();
        if requests.is_empty() {
            return Vec::new();
        }

        let affected: BTreeSet<Destination> = requests.iter().map(|r| r.destination).collect();
        // Fixed order so concurrent batches cannot deadlock.
        let mut guards = Vec::with_capacity(affected.len());
        for destination in &affected {
            guards.push(self.destinations.get(*destination).lock().await);
        }

        let mut manifests: BTreeMap<Destination, RecordManifest> = BTreeMap::new();
        let mut load_errors: BTreeMap<Destination, Error> = BTreeMap::new();
        for destination in &affected {
            match self.destinations.get(*destination).load() {
                Ok(m) => {
                    manifests.insert(*destination, m);
                },
                Err(e) => {
                    load_errors.insert(*destination, e);
                },
            }
        }

        let mut outcomes: Vec<Option<ImportOutcome>> = vec![None; requests.len()];
        let mut planned = Vec::new();
        for (slot, request) in requests.iter().copied().enumerate() {
            if let Some(e) = load_errors.get(&request.destination) {
                outcomes[slot] = Some(ImportOutcome::failed(request, e));
                continue;
            }
            let existing = manifests
                .get(&request.destination)
                .and_then(|m| m.get(&request.identity))
                .cloned();
            match self.preflight(snapshot, request, existing).await {
                Ok(Some((package, existing))) => planned.push(Planned {
                    slot,
                    request,
                    package,
                    existing,
                }),
                Ok(None) => {
                    debug!(identity = %request.identity, destination = %request.destination, "not newer, skipping");
                    outcomes[slot] = Some(ImportOutcome::new(request, ImportStatus::Skipped));
                },
                Err(e) => outcomes[slot] = Some(ImportOutcome::failed(request, &e)),
            }
        }

        // Stage 1: every download completes before any write.
        let mut downloads: Vec<(usize, Result<Vec<RemoteFile>>)> = stream::iter(planned.iter().enumerate())
            .map(|(i, p)| async move {
                (i, self.client.download_dir(&p.package.repo, &p.package.path).await)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        downloads.sort_by_key(|(i, _)| *i);

        // Stage 2: sequential writes.
        for (plan, (_, files)) in planned.iter().zip(downloads) {
            let outcome = match files {
                Err(e) => ImportOutcome::failed(plan.request, &e),
                Ok(files) => {
                    let Some(manifest) = manifests.get_mut(&plan.request.destination) else {
                        continue;
                    };
                    match self.apply(snapshot, plan, &files, manifest).await {
                        Ok(record) => {
                            let status = if plan.existing.is_some() {
                                ImportStatus::Updated
                            } else {
                                ImportStatus::Imported
                            };
                            info!(
                                identity = %record.identity,
                                destination = %plan.request.destination,
                                version = %record.version,
                                ?status,
                                "package imported"
                            );
                            ImportOutcome {
                                version: Some(record.version),
                                ..ImportOutcome::new(plan.request, status)
                            }
                        },
                        Err(e) => ImportOutcome::failed(plan.request, &e),
                    }
                },
            };
            outcomes[plan.slot] = Some(outcome);
        }

        // Stage 3: one regeneration per affected destination.
        for destination in &affected {
            let store = self.destinations.get(*destination);
            if let Err(e) = self.regenerator.regenerate(store).await {
                warn!(%destination, error = %e, "index regeneration failed");
            }
        }
        drop(guards);

        outcomes.into_iter().flatten().collect()
    }

    /// `Ok(None)` means skip; `Ok(Some)` means go ahead.
    async fn preflight<'r>(
        &self,
        snapshot: &'r CatalogSnapshot,
        request: &ImportRequest,
        existing: Option<InstalledPackageRecord>,
    ) -> Result<Option<(&'r CatalogPackage, Option<InstalledPackageRecord>)>> {
        let package = snapshot.package(&request.identity).ok_or_else(|| {
            Error::validation(format!(
                "'{}' is not in the {} catalog",
                request.identity, snapshot.reference
            ))
        })?;

        let Some(record) = existing else {
            return Ok(Some((package, None)));
        };
        if request.force {
            return Ok(Some((package, Some(record))));
        }

        let catalog_version = package.catalog_version();
        if catalog_version.trim().is_empty() || !is_update(&record.version, catalog_version) {
            return Ok(None);
        }

        let store = self.destinations.get(request.destination);
        if detect(store, &record).await?.is_customized {
            return Err(Error::conflict(format!(
                "'{}' has local changes in {}; re-run with force to overwrite",
                request.identity, request.destination
            )));
        }
        Ok(Some((package, Some(record))))
    }

    async fn apply(
        &self,
        snapshot: &CatalogSnapshot,
        plan: &Planned<'_>,
        files: &[RemoteFile],
        manifest: &mut RecordManifest,
    ) -> Result<InstalledPackageRecord> {
        if !files.iter().any(|f| f.relative_path == DESCRIPTOR_FILE) {
            return Err(Error::validation(format!(
                "downloaded package '{}' has no {DESCRIPTOR_FILE}",
                plan.request.identity
            )));
        }

        let store = self.destinations.get(plan.request.destination);
        let identity = plan.request.identity.as_str();
        let active = plan.existing.as_ref().is_none_or(|r| r.active);
        let target = store.contained(&store.managed_path(identity, active))?;

        let swap = stage_and_swap(store, identity, files, &target).await?;

        let hash = match fingerprint_package(&target).await {
            Ok(hash) => hash,
            Err(e) => {
                swap.rollback().await;
                return Err(e);
            },
        };
        let record = build_record(snapshot, plan, target.clone(), hash);
        let mut updated = manifest.clone();
        updated.upsert(record.clone());
        if let Err(e) = store.save(&updated) {
            swap.rollback().await;
            return Err(e);
        }
        swap.commit().await;
        *manifest = updated;
        Ok(record)
    }
}

/// Descriptor fields: new value wins, gaps keep the existing value.
/// Destination-local fields (`active`, `deletable`, `imported_at_ms`) are
/// always preserved.
fn build_record(
    snapshot: &CatalogSnapshot,
    plan: &Planned<'_>,
    disk_path: PathBuf,
    content_hash: String,
) -> InstalledPackageRecord {
    let descriptor = &plan.package.descriptor;
    let existing = plan.existing.as_ref();
    let version = plan
        .package
        .version
        .clone()
        .filter(|v| !v.trim().is_empty())
        .or_else(|| existing.map(|r| r.version.clone()))
        .unwrap_or_else(|| DEFAULT_VERSION.to_string());

    InstalledPackageRecord {
        identity: descriptor.identity.clone(),
        version,
        description: descriptor.description.clone(),
        kind: descriptor.kind.or(existing.and_then(|r| r.kind)),
        flags: match existing {
            Some(r) => descriptor.flags.clone().merged_over(&r.flags),
            None => descriptor.flags.clone(),
        },
        content_hash: Some(content_hash),
        disk_path,
        active: existing.is_none_or(|r| r.active),
        deletable: existing.is_none_or(|r| r.deletable),
        imported_at_ms: existing.map_or_else(now_ms, |r| r.imported_at_ms),
        registry: Some(snapshot.repo.slug()),
    }
}

/// Content swapped into place whose record is not saved yet.
///
/// The previous content stays parked until [`Swap::commit`]; [`Swap::rollback`]
/// puts it back so content and record never disagree.
#[must_use]
#[derive(Debug)]
pub(crate) struct Swap {
    target: PathBuf,
    backup: Option<PathBuf>,
    staging_root: PathBuf,
}

impl Swap {
    /// Drop the parked previous content.
    pub(crate) async fn commit(self) {
        if let Some(backup) = &self.backup
            && let Err(e) = tokio::fs::remove_dir_all(backup).await
        {
            warn!(path = %backup.display(), error = %e, "failed to clean up previous package content");
        }
        // Only succeeds when nothing else is staged.
        let _ = tokio::fs::remove_dir(&self.staging_root).await;
    }

    /// Remove the new content and restore the previous one, if any.
    pub(crate) async fn rollback(self) {
        if let Err(e) = tokio::fs::remove_dir_all(&self.target).await {
            warn!(path = %self.target.display(), error = %e, "failed to remove new package content");
        }
        if let Some(backup) = &self.backup
            && let Err(e) = tokio::fs::rename(backup, &self.target).await
        {
            warn!(
                path = %self.target.display(),
                error = %e,
                "failed to restore previous package content"
            );
        }
        let _ = tokio::fs::remove_dir(&self.staging_root).await;
    }
}

/// Write `files` into a staging directory, then replace `target` with it.
/// The previous content is restored if the final rename fails; otherwise it
/// is parked in the returned [`Swap`].
pub(crate) async fn stage_and_swap(
    store: &RecordStore,
    identity: &str,
    files: &[RemoteFile],
    target: &Path,
) -> Result<Swap> {
    let sanitized = files
        .iter()
        .map(|f| Ok((sanitize_relative(&f.relative_path)?, f.bytes.as_slice())))
        .collect::<Result<Vec<_>>>()?;

    let staging_root = store.root().join(STAGING_DIR);
    let staging = staging_root.join(identity);
    if tokio::fs::try_exists(&staging).await? {
        tokio::fs::remove_dir_all(&staging).await?;
    }
    tokio::fs::create_dir_all(&staging).await?;

    let written = async {
        for (rel, bytes) in &sanitized {
            let dest = staging.join(rel);
            if let Some(parent) = dest.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&dest, bytes).await?;
        }
        Ok::<(), Error>(())
    }
    .await;
    if let Err(e) = written {
        let _ = tokio::fs::remove_dir_all(&staging).await;
        return Err(e);
    }

    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let backup = staging_root.join(format!("{identity}.previous"));
    if tokio::fs::try_exists(&backup).await? {
        tokio::fs::remove_dir_all(&backup).await?;
    }
    let had_previous = tokio::fs::try_exists(target).await?;
    if had_previous {
        tokio::fs::rename(target, &backup).await?;
    }
    if let Err(e) = tokio::fs::rename(&staging, target).await {
        if had_previous {
            let _ = tokio::fs::rename(&backup, target).await;
        }
        let _ = tokio::fs::remove_dir_all(&staging).await;
        return Err(e.into());
    }
    Ok(Swap {
        target: target.to_path_buf(),
        backup: had_previous.then_some(backup),
        staging_root,
    })
}
