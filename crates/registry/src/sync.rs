//! Orchestration: registry references in, snapshots, plans, imports and
//! notifications out.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};

use {
    serde::Serialize,
    skillsync_config::{SyncConfig, UpdateMode},
    tracing::{debug, info, warn},
};

use crate::{
    branch::resolve_branch,
    bundled::{SeedReport, seed_bundled},
    catalog::fetch_catalog,
    classify::{InstallBadge, classify},
    client::{GithubClient, RegistryClient, RepoRef},
    compare::updates_for,
    customization::detect,
    enumerate::{EnumerateOptions, Excluded, enumerate_packages},
    error::{Error, Result},
    import::{ImportExecutor, ImportOutcome, ImportRequest},
    index::{IndexFileRegenerator, IndexRegenerator},
    locator::parse_reference,
    mirror::CatalogMirror,
    policy::{
        Notification, PlannedUpdate, UpdatePlan, pending_notifications, registry_error, silent_summary,
    },
    snapshot::{CatalogPackage, CatalogSnapshot, PackageFilter},
    store::{Destination, Destinations, RecordManifest, now_ms},
};

/// What one sync did for one registry.
#[derive(Debug, Clone, Serialize)]
pub struct RegistrySync {
    pub reference: String,
    pub packages: usize,
    pub excluded: Vec<Excluded>,
    pub plan: UpdatePlan,
    pub outcomes: Vec<ImportOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub registries: Vec<RegistrySync>,
    pub notifications: Vec<Notification>,
}

/// A catalog package with its state in both destinations.
#[derive(Debug, Clone, Serialize)]
pub struct BrowseEntry {
    pub display_name: String,
    pub package: CatalogPackage,
    pub skills: InstallBadge,
    pub agents: InstallBadge,
}

pub struct SyncEngine {
    config: Arc<SyncConfig>,
    client: Arc<dyn RegistryClient>,
    regenerator: Arc<dyn IndexRegenerator>,
    destinations: Destinations,
    mirror: CatalogMirror,
    session_imports: Mutex<HashSet<(Destination, String)>>,
}

impl SyncEngine {
    pub fn new(config: Arc<SyncConfig>, client: Arc<dyn RegistryClient>) -> Self {
        Self {
            destinations: Destinations::from_config(&config),
            mirror: CatalogMirror::new(config.mirror_dir()),
            regenerator: Arc::new(IndexFileRegenerator),
            session_imports: Mutex::new(HashSet::new()),
            config,
            client,
        }
    }

    /// Engine talking to the configured GitHub endpoints.
    pub fn from_config(config: Arc<SyncConfig>) -> Result<Self> {
        let client = GithubClient::from_config(&config)?;
        Ok(Self::new(config, Arc::new(client)))
    }

    pub fn with_regenerator(mut self, regenerator: Arc<dyn IndexRegenerator>) -> Self {
        self.regenerator = regenerator;
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn destinations(&self) -> &Destinations {
        &self.destinations
    }

    pub fn mirror(&self) -> &CatalogMirror {
        &self.mirror
    }

    /// Resolve, fetch and enumerate one registry. A fresh snapshot always
    /// replaces the offline mirror.
    pub async fn fetch_snapshot(&self, reference: &str) -> Result<CatalogSnapshot> {
        let locator = parse_reference(reference)?;
        if locator.host != self.client.host() {
            return Err(Error::configuration(format!(
                "registry '{reference}' is hosted on {}, but only {} is configured",
                locator.host,
                self.client.host()
            )));
        }
        let branch = resolve_branch(self.client.as_ref(), &locator).await?;
        let repo = RepoRef::new(&locator, branch);
        let catalog = fetch_catalog(self.client.as_ref(), &locator, &repo).await?;
        let enumeration = enumerate_packages(self.client.as_ref(), &locator, &repo, &catalog, EnumerateOptions {
            collection_root: self.config.collection_root.as_deref(),
            concurrency: self.config.effective_concurrency(),
        })
        .await;

        info!(
            registry = %reference,
            %repo,
            packages = enumeration.packages.len(),
            excluded = enumeration.excluded.len(),
            "catalog enumerated"
        );

        let snapshot = CatalogSnapshot {
            reference: reference.to_string(),
            locator,
            repo,
            catalog_name: catalog.name,
            packages: enumeration.packages,
            excluded: enumeration.excluded,
            fetched_at_ms: now_ms(),
            from_mirror: false,
        };
        if let Err(e) = self.mirror.store(&snapshot) {
            warn!(registry = %reference, error = %e, "failed to write catalog mirror");
        }
        Ok(snapshot)
    }

    /// Fresh snapshot, or the mirrored one when the registry is unreachable.
    pub async fn snapshot_or_mirror(&self, reference: &str) -> Result<CatalogSnapshot> {
        match self.fetch_snapshot(reference).await {
            Ok(snapshot) => Ok(snapshot),
            Err(e) => {
                let locator = parse_reference(reference)?;
                match self.mirror.load(&locator)? {
                    Some(snapshot) => {
                        warn!(registry = %reference, error = %e, "registry unreachable, using offline mirror");
                        Ok(snapshot)
                    },
                    None => Err(e),
                }
            },
        }
    }

    /// Available updates in both destinations, each flagged when the
    /// installed copy has local changes.
    pub async fn plan(&self, snapshot: &CatalogSnapshot) -> Result<UpdatePlan> {
        let mut plan = UpdatePlan {
            registry: snapshot.reference.clone(),
            updates: Vec::new(),
        };
        for destination in Destination::ALL {
            let store = self.destinations.get(destination);
            let manifest = store.load()?;
            for availability in updates_for(destination, &snapshot.packages, &manifest) {
                let Some(record) = manifest.get(&availability.identity) else {
                    continue;
                };
                let customized = match detect(store, record).await {
                    Ok(status) => status.is_customized,
                    Err(e) => {
                        warn!(
                            identity = %availability.identity,
                            %destination,
                            error = %e,
                            "cannot verify installed content, treating as customized"
                        );
                        true
                    },
                };
                plan.updates.push(PlannedUpdate {
                    availability,
                    customized,
                });
            }
        }
        Ok(plan)
    }

    /// Run one import batch and remember what this session installed.
    pub async fn import(&self, snapshot: &CatalogSnapshot, requests: &[ImportRequest]) -> Vec<ImportOutcome> {
        let outcomes = ImportExecutor::new(
            self.client.as_ref(),
            &self.destinations,
            self.regenerator.as_ref(),
            self.config.effective_concurrency(),
        )
        .execute(snapshot, requests)
        .await;

        let mut session = self
            .session_imports
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        for outcome in outcomes.iter().filter(|o| o.succeeded()) {
            session.insert((outcome.destination, outcome.identity.clone()));
        }
        outcomes
    }

    /// Sync every configured registry. One registry failing never stops the others.
    pub async fn run_sync(&self) -> SyncReport {
        let mut report = SyncReport::default();
        for reference in &self.config.registries {
            let entry = self.sync_registry(reference, &mut report.notifications).await;
            report.registries.push(entry);
        }
        report
    }

    async fn sync_registry(&self, reference: &str, notifications: &mut Vec<Notification>) -> RegistrySync {
        let mut entry = RegistrySync {
            reference: reference.to_string(),
            packages: 0,
            excluded: Vec::new(),
            plan: UpdatePlan::default(),
            outcomes: Vec::new(),
            error: None,
        };

        let prepared = async {
            let snapshot = self.fetch_snapshot(reference).await?;
            let plan = self.plan(&snapshot).await?;
            Ok::<_, Error>((snapshot, plan))
        }
        .await;
        let (snapshot, plan) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                warn!(registry = %reference, error = %e, "registry sync failed");
                notifications.push(registry_error(reference, &e));
                entry.error = Some(e.to_string());
                return entry;
            },
        };

        entry.packages = snapshot.packages.len();
        entry.excluded = snapshot.excluded.clone();

        if plan.is_empty() {
            debug!(registry = %reference, "all installed packages up to date");
        } else {
            notifications.extend(pending_notifications(self.config.update_mode, &plan));
            if self.config.update_mode == UpdateMode::Silent {
                let requests = plan.silent_requests();
                if !requests.is_empty() {
                    entry.outcomes = self.import(&snapshot, &requests).await;
                    notifications.extend(silent_summary(reference, &entry.outcomes));
                }
            }
        }
        entry.plan = plan;
        entry
    }

    /// Pair each matching package with its state in both destinations.
    pub fn browse(&self, snapshot: &CatalogSnapshot, filter: &PackageFilter) -> Result<Vec<BrowseEntry>> {
        let skills = self.destinations.get(Destination::Skills).load()?;
        let agents = self.destinations.get(Destination::Agents).load()?;
        let session = self
            .session_imports
            .lock()
            .unwrap_or_else(|e| e.into_inner());

        Ok(snapshot
            .filter(filter)
            .map(|p| {
                let badge = |destination: Destination, manifest: &RecordManifest| {
                    classify(
                        manifest.get(&p.identity),
                        p.version.as_deref(),
                        session.contains(&(destination, p.identity.clone())),
                    )
                };
                BrowseEntry {
                    display_name: p.display_name(),
                    skills: badge(Destination::Skills, &skills),
                    agents: badge(Destination::Agents, &agents),
                    package: p.clone(),
                }
            })
            .collect())
    }

    /// Re-seed bundled packages when a bundled directory is configured.
    pub async fn seed_bundled(&self) -> Result<SeedReport> {
        match &self.config.destinations.bundled_dir {
            Some(dir) => {
                seed_bundled(
                    self.destinations.get(Destination::Skills),
                    dir,
                    self.regenerator.as_ref(),
                )
                .await
            },
            None => Ok(SeedReport::default()),
        }
    }
}
