mod config_commands;
mod package_commands;

use std::{path::PathBuf, sync::Arc};

use {
    anyhow::Context,
    clap::{Parser, Subcommand},
    skillsync_config::SyncConfig,
    skillsync_registry::{
        Destination, SyncEngine,
        descriptor::PackageKind,
        import::{ImportRequest, ImportStatus},
        policy::Notification,
        snapshot::PackageFilter,
    },
    tracing::{info, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "skillsync", about = "skillsync: keep skill packages in sync with git-hosted registries")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file to load instead of the discovered one.
    #[arg(long, global = true, env = "SKILLSYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Custom data directory (overrides config value).
    #[arg(long, global = true, env = "SKILLSYNC_DATA_DIR")]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Check every configured registry and apply the update policy.
    Sync {
        /// Print the full report as JSON.
        #[arg(long)]
        json: bool,
    },
    /// List catalog packages with their install state.
    Browse {
        /// Registry reference (defaults to the first configured registry).
        registry: Option<String>,
        /// Case-insensitive match on name, description or tags.
        #[arg(short, long)]
        query: Option<String>,
        #[arg(long)]
        category: Option<String>,
        /// skill, agent or other.
        #[arg(long)]
        kind: Option<String>,
        /// Use the offline mirror when the registry is unreachable.
        #[arg(long)]
        offline: bool,
        #[arg(long)]
        json: bool,
    },
    /// Import packages from a registry.
    Import {
        /// Package identities.
        #[arg(required = true)]
        identities: Vec<String>,
        /// skills or agents (defaults to the package's own kind).
        #[arg(short, long)]
        destination: Option<Destination>,
        /// Overwrite local changes and re-import the same version.
        #[arg(long)]
        force: bool,
        /// Registry reference (defaults to the first configured registry).
        #[arg(long)]
        registry: Option<String>,
    },
    /// Installed package management.
    Packages {
        #[command(subcommand)]
        action: package_commands::PackageAction,
    },
    /// Re-seed bundled packages into the skills destination.
    Seed,
    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: config_commands::ConfigAction,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr)
                    .with_ansi(true),
            )
            .init();
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<SyncConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let mut cfg = skillsync_config::load_config(path)?;
            skillsync_config::apply_env_overrides(&mut cfg, |name| std::env::var(name).ok());
            cfg
        },
        None => skillsync_config::discover_and_load(),
    };
    if let Some(dir) = &cli.data_dir {
        config.data_dir = Some(dir.clone());
    }
    Ok(config)
}

fn pick_registry(config: &SyncConfig, registry: Option<String>) -> anyhow::Result<String> {
    registry
        .or_else(|| config.registries.first().cloned())
        .context("no registry given and none configured")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "skillsync starting");

    let config = load_config(&cli)?;
    match cli.command {
        Commands::Config { action } => {
            config_commands::handle_config(action, &config, cli.config.as_deref())
        },
        Commands::Sync { json } => {
            let engine = SyncEngine::from_config(Arc::new(config))?;
            if let Err(e) = engine.seed_bundled().await {
                warn!(error = %e, "bundled seeding failed");
            }
            let report = engine.run_sync().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                for registry in &report.registries {
                    match &registry.error {
                        Some(e) => println!("{}: failed: {e}", registry.reference),
                        None => println!(
                            "{}: {} package(s), {} excluded, {} update(s)",
                            registry.reference,
                            registry.packages,
                            registry.excluded.len(),
                            registry.plan.updates.len()
                        ),
                    }
                }
                for notification in &report.notifications {
                    print_notification(notification);
                }
            }
            Ok(())
        },
        Commands::Browse {
            registry,
            query,
            category,
            kind,
            offline,
            json,
        } => {
            let reference = pick_registry(&config, registry)?;
            let engine = SyncEngine::from_config(Arc::new(config))?;
            let snapshot = if offline {
                engine.snapshot_or_mirror(&reference).await?
            } else {
                engine.fetch_snapshot(&reference).await?
            };
            let filter = PackageFilter {
                query,
                category,
                kind: kind.as_deref().map(parse_kind).transpose()?,
            };
            let entries = engine.browse(&snapshot, &filter)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
                return Ok(());
            }
            if snapshot.from_mirror {
                eprintln!("(offline mirror)");
            }
            if entries.is_empty() {
                println!("No packages found.");
            }
            for entry in &entries {
                println!(
                    "  {} {} [skills: {:?}, agents: {:?}] {}",
                    entry.display_name,
                    entry.package.catalog_version(),
                    entry.skills,
                    entry.agents,
                    entry.package.descriptor.description
                );
            }
            for excluded in &snapshot.excluded {
                let package = excluded.package.as_deref().unwrap_or("-");
                eprintln!("  excluded {}/{package}: {}", excluded.collection, excluded.reason);
            }
            Ok(())
        },
        Commands::Import {
            identities,
            destination,
            force,
            registry,
        } => {
            let reference = pick_registry(&config, registry)?;
            let engine = SyncEngine::from_config(Arc::new(config))?;
            let snapshot = engine.fetch_snapshot(&reference).await?;
            let requests: Vec<ImportRequest> = identities
                .iter()
                .map(|identity| {
                    let dest = destination.unwrap_or_else(|| {
                        snapshot
                            .package(identity)
                            .map_or(Destination::Skills, |p| p.default_destination())
                    });
                    let request = ImportRequest::new(identity.clone(), dest);
                    if force { request.forced() } else { request }
                })
                .collect();

            let outcomes = engine.import(&snapshot, &requests).await;
            let mut failed = 0;
            for outcome in &outcomes {
                match outcome.status {
                    ImportStatus::Failed => {
                        failed += 1;
                        println!(
                            "{} ({}): failed: {}",
                            outcome.identity,
                            outcome.destination,
                            outcome.error.as_deref().unwrap_or("unknown error")
                        );
                    },
                    status => println!(
                        "{} ({}): {status:?} {}",
                        outcome.identity,
                        outcome.destination,
                        outcome.version.as_deref().unwrap_or("")
                    ),
                }
            }
            if failed > 0 {
                anyhow::bail!("{failed} of {} import(s) failed", outcomes.len());
            }
            Ok(())
        },
        Commands::Packages { action } => {
            let engine = SyncEngine::from_config(Arc::new(config))?;
            package_commands::handle_packages(&engine, action).await
        },
        Commands::Seed => {
            let engine = SyncEngine::from_config(Arc::new(config))?;
            let report = engine.seed_bundled().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        },
    }
}

fn parse_kind(raw: &str) -> anyhow::Result<PackageKind> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "skill" | "skills" => Ok(PackageKind::Skill),
        "agent" | "agents" => Ok(PackageKind::Agent),
        "other" => Ok(PackageKind::Other),
        other => anyhow::bail!("unknown package kind: {other}"),
    }
}

fn print_notification(notification: &Notification) {
    match notification {
        Notification::UpdatesApplied { registry, updated } => {
            for (destination, identities) in updated {
                println!("{registry}: updated {} in {destination}", identities.join(", "));
            }
        },
        Notification::UpdatesAvailable {
            registry,
            destination,
            identities,
            customized,
        } => {
            println!(
                "{registry}: updates available in {destination}: {}",
                identities.join(", ")
            );
            if !customized.is_empty() {
                println!("  locally modified: {}", customized.join(", "));
            }
        },
        Notification::Error {
            registry,
            message,
            failures,
        } => {
            println!("{registry}: error: {message}");
            for failure in failures {
                println!("  {} ({}): {}", failure.identity, failure.destination, failure.error);
            }
        },
    }
}
