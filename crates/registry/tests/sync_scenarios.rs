#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{
    collections::BTreeMap,
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use {
    async_trait::async_trait,
    skillsync_config::{DestinationsConfig, SyncConfig, UpdateMode},
    skillsync_registry::{
        Destination, ErrorKind, Result, SyncEngine,
        classify::InstallBadge,
        client::MemoryClient,
        enumerate::ExclusionReason,
        import::{ImportRequest, ImportStatus},
        index::IndexRegenerator,
        policy::Notification,
        snapshot::PackageFilter,
        store::RecordStore,
    },
};

const CATALOG: &str = r#"{
  "name": "acme",
  "plugins": [
    {"name": "dbt", "source": "./plugins/dbt", "category": "data"},
    {"name": "remote", "source": {"source": "github", "repo": "other/remote"}},
    {"name": "ops", "source": "./plugins/ops"}
  ]
}"#;

#[derive(Default)]
struct CountingRegenerator {
    calls: AtomicUsize,
}

#[async_trait]
impl IndexRegenerator for CountingRegenerator {
    async fn regenerate(&self, _store: &RecordStore) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct Harness {
    _tmp: tempfile::TempDir,
    client: Arc<MemoryClient>,
    regenerator: Arc<CountingRegenerator>,
    engine: SyncEngine,
}

fn harness(mode: UpdateMode, bundled: Option<&Path>) -> Harness {
    let tmp = tempfile::tempdir().unwrap();
    let client = Arc::new(MemoryClient::new());
    client.add_repo("acme", "skills", "main");
    client.put_file("acme", "skills", ".claude-plugin/marketplace.json", CATALOG);
    client.put_file(
        "acme",
        "skills",
        "plugins/dbt/.claude-plugin/plugin.json",
        r#"{"name":"dbt"}"#,
    );
    client.put_file(
        "acme",
        "skills",
        "plugins/ops/.claude-plugin/plugin.json",
        r#"{"name":"ops"}"#,
    );

    let config = SyncConfig {
        registries: vec!["acme/skills".into()],
        update_mode: mode,
        data_dir: Some(tmp.path().to_path_buf()),
        destinations: DestinationsConfig {
            bundled_dir: bundled.map(Path::to_path_buf),
            ..Default::default()
        },
        ..Default::default()
    };
    let regenerator = Arc::new(CountingRegenerator::default());
    let engine = SyncEngine::new(Arc::new(config), client.clone()).with_regenerator(regenerator.clone());
    Harness {
        _tmp: tmp,
        client,
        regenerator,
        engine,
    }
}

fn publish(client: &MemoryClient, collection: &str, identity: &str, version: &str) {
    client.put_file(
        "acme",
        "skills",
        &format!("plugins/{collection}/skills/{identity}/SKILL.md"),
        format!("---\nname: {identity}\ndescription: {identity} helpers\nversion: {version}\n---\n# {identity}\n"),
    );
    client.put_file(
        "acme",
        "skills",
        &format!("plugins/{collection}/skills/{identity}/references/notes.md"),
        "notes",
    );
}

#[tokio::test]
async fn external_collections_are_skipped_and_the_rest_enumerated() {
    let h = harness(UpdateMode::Manual, None);
    publish(&h.client, "dbt", "dbt-fabric-patterns", "1.2.0");
    publish(&h.client, "ops", "deploy", "0.3.0");

    let snapshot = h.engine.fetch_snapshot("acme/skills").await.unwrap();

    let mut identities: Vec<_> = snapshot.packages.iter().map(|p| p.identity.as_str()).collect();
    identities.sort();
    assert_eq!(identities, vec!["dbt-fabric-patterns", "deploy"]);
    assert_eq!(snapshot.excluded.len(), 1);
    assert_eq!(snapshot.excluded[0].collection, "remote");
    assert!(matches!(snapshot.excluded[0].reason, ExclusionReason::ExternalSource(_)));

    let dbt = snapshot.package("dbt-fabric-patterns").unwrap();
    assert_eq!(dbt.display_name(), "dbt:dbt-fabric-patterns");
    assert_eq!(dbt.category.as_deref(), Some("data"));
}

#[tokio::test]
async fn silent_mode_applies_unmodified_updates() {
    let h = harness(UpdateMode::Silent, None);
    publish(&h.client, "dbt", "dbt-fabric-patterns", "1.0.0");
    let snapshot = h.engine.fetch_snapshot("acme/skills").await.unwrap();
    let out = h
        .engine
        .import(&snapshot, &[ImportRequest::new("dbt-fabric-patterns", Destination::Skills)])
        .await;
    assert_eq!(out[0].status, ImportStatus::Imported);

    publish(&h.client, "dbt", "dbt-fabric-patterns", "1.2.0");
    let report = h.engine.run_sync().await;

    let mut expected = BTreeMap::new();
    expected.insert(Destination::Skills, vec!["dbt-fabric-patterns".to_string()]);
    assert_eq!(report.notifications, vec![Notification::UpdatesApplied {
        registry: "acme/skills".into(),
        updated: expected,
    }]);

    let record = h
        .engine
        .destinations()
        .get(Destination::Skills)
        .get("dbt-fabric-patterns")
        .unwrap()
        .unwrap();
    assert_eq!(record.version, "1.2.0");
    assert!(record.disk_path.join("references/notes.md").exists());
}

#[tokio::test]
async fn silent_mode_leaves_customized_packages_alone() {
    let h = harness(UpdateMode::Silent, None);
    publish(&h.client, "dbt", "dbt-fabric-patterns", "1.0.0");
    let snapshot = h.engine.fetch_snapshot("acme/skills").await.unwrap();
    h.engine
        .import(&snapshot, &[ImportRequest::new("dbt-fabric-patterns", Destination::Skills)])
        .await;

    let store = h.engine.destinations().get(Destination::Skills);
    let record = store.get("dbt-fabric-patterns").unwrap().unwrap();
    std::fs::write(record.disk_path.join("SKILL.md"), "---\nname: dbt-fabric-patterns\ndescription: mine\n---\n").unwrap();

    publish(&h.client, "dbt", "dbt-fabric-patterns", "1.2.0");
    let report = h.engine.run_sync().await;

    assert!(report.notifications.is_empty());
    let registry = &report.registries[0];
    assert!(registry.outcomes.is_empty());
    assert_eq!(registry.plan.updates.len(), 1);
    assert!(registry.plan.updates[0].customized);
    assert_eq!(store.get("dbt-fabric-patterns").unwrap().unwrap().version, "1.0.0");
}

#[tokio::test]
async fn manual_mode_prompts_with_customized_subset() {
    let h = harness(UpdateMode::Manual, None);
    publish(&h.client, "dbt", "dbt-fabric-patterns", "1.0.0");
    publish(&h.client, "ops", "deploy", "1.0.0");
    let snapshot = h.engine.fetch_snapshot("acme/skills").await.unwrap();
    h.engine
        .import(&snapshot, &[
            ImportRequest::new("dbt-fabric-patterns", Destination::Skills),
            ImportRequest::new("deploy", Destination::Skills),
        ])
        .await;
    let store = h.engine.destinations().get(Destination::Skills);
    let deploy = store.get("deploy").unwrap().unwrap();
    std::fs::write(deploy.disk_path.join("SKILL.md"), "edited").unwrap();

    publish(&h.client, "dbt", "dbt-fabric-patterns", "2.0.0");
    publish(&h.client, "ops", "deploy", "2.0.0");
    let report = h.engine.run_sync().await;

    assert_eq!(report.notifications, vec![Notification::UpdatesAvailable {
        registry: "acme/skills".into(),
        destination: Destination::Skills,
        identities: vec!["dbt-fabric-patterns".into(), "deploy".into()],
        customized: vec!["deploy".into()],
    }]);
    assert!(report.registries[0].outcomes.is_empty());
    assert_eq!(store.get("dbt-fabric-patterns").unwrap().unwrap().version, "1.0.0");
}

#[tokio::test]
async fn batch_with_one_failure_regenerates_once() {
    let h = harness(UpdateMode::Manual, None);
    publish(&h.client, "dbt", "alpha", "1.0.0");
    publish(&h.client, "dbt", "beta", "1.0.0");
    publish(&h.client, "ops", "gamma", "1.0.0");
    let snapshot = h.engine.fetch_snapshot("acme/skills").await.unwrap();
    h.client.fail_path("acme", "skills", "plugins/ops/skills/gamma");

    let outcomes = h
        .engine
        .import(&snapshot, &[
            ImportRequest::new("alpha", Destination::Skills),
            ImportRequest::new("beta", Destination::Skills),
            ImportRequest::new("gamma", Destination::Skills),
        ])
        .await;

    assert_eq!(outcomes.len(), 3);
    assert_eq!(outcomes.iter().filter(|o| o.succeeded()).count(), 2);
    let gamma = outcomes.iter().find(|o| o.identity == "gamma").unwrap();
    assert_eq!(gamma.status, ImportStatus::Failed);
    assert_eq!(gamma.error_kind, Some(ErrorKind::Network));
    assert_eq!(h.regenerator.calls.load(Ordering::SeqCst), 1);

    let store = h.engine.destinations().get(Destination::Skills);
    assert!(store.get("gamma").unwrap().is_none());
    assert!(!store.active_path("gamma").exists());
}

#[tokio::test]
async fn forced_reimport_is_idempotent() {
    let h = harness(UpdateMode::Manual, None);
    publish(&h.client, "dbt", "alpha", "1.0.0");
    let snapshot = h.engine.fetch_snapshot("acme/skills").await.unwrap();
    let request = ImportRequest::new("alpha", Destination::Agents);

    h.engine.import(&snapshot, &[request.clone()]).await;
    let store = h.engine.destinations().get(Destination::Agents);
    let first = store.get("alpha").unwrap().unwrap();

    let skipped = h.engine.import(&snapshot, &[request.clone()]).await;
    assert_eq!(skipped[0].status, ImportStatus::Skipped);

    let forced = h.engine.import(&snapshot, &[request.forced()]).await;
    assert_eq!(forced[0].status, ImportStatus::Updated);
    let second = store.get("alpha").unwrap().unwrap();
    assert_eq!(second.content_hash, first.content_hash);
    assert_eq!(second.imported_at_ms, first.imported_at_ms);
    assert_eq!(store.records().unwrap().len(), 1);
}

#[tokio::test]
async fn browse_badges_follow_install_state() {
    let h = harness(UpdateMode::Manual, None);
    publish(&h.client, "dbt", "alpha", "1.0.0");
    publish(&h.client, "dbt", "beta", "1.0.0");
    let snapshot = h.engine.fetch_snapshot("acme/skills").await.unwrap();
    h.engine
        .import(&snapshot, &[ImportRequest::new("alpha", Destination::Skills)])
        .await;

    let entries = h.engine.browse(&snapshot, &PackageFilter::default()).unwrap();
    let badge = |id: &str| {
        let e = entries.iter().find(|e| e.package.identity == id).unwrap();
        (e.skills, e.agents)
    };
    assert_eq!(badge("alpha"), (InstallBadge::JustImported, InstallBadge::NotInstalled));
    assert_eq!(badge("beta"), (InstallBadge::NotInstalled, InstallBadge::NotInstalled));

    // A fresh session sees the recorded install, then a newer catalog.
    publish(&h.client, "dbt", "alpha", "1.1.0");
    let config = Arc::new(h.engine.config().clone());
    let later = SyncEngine::new(config, h.client.clone());
    let snapshot = later.fetch_snapshot("acme/skills").await.unwrap();
    let entries = later.browse(&snapshot, &PackageFilter::default()).unwrap();
    let alpha = entries.iter().find(|e| e.package.identity == "alpha").unwrap();
    assert_eq!(alpha.skills, InstallBadge::UpdateAvailable);
}

#[tokio::test]
async fn failed_deactivation_restores_bundled_record() {
    let tmp = tempfile::tempdir().unwrap();
    let bundled = tmp.path().join("bundled");
    std::fs::create_dir_all(bundled.join("core")).unwrap();
    std::fs::write(
        bundled.join("core/SKILL.md"),
        "---\nname: core\ndescription: shipped\n---\n",
    )
    .unwrap();

    let h = harness(UpdateMode::Manual, Some(&bundled));
    let report = h.engine.seed_bundled().await.unwrap();
    assert_eq!(report.seeded, vec!["core"]);

    let store = h.engine.destinations().get(Destination::Skills);
    std::fs::write(store.root().join(".inactive"), "blocker").unwrap();

    assert!(store.deactivate("core").await.is_err());
    let record = store.get("core").unwrap().unwrap();
    assert!(record.active);
    assert_eq!(record.disk_path, store.active_path("core"));
    assert!(store.active_path("core").join("SKILL.md").exists());

    let err = store.remove("core").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotPermitted);
}
