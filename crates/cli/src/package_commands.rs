//! CLI commands for installed packages.

use {
    clap::Subcommand,
    skillsync_registry::{Destination, SyncEngine, customization::detect},
};

#[derive(Subcommand)]
pub enum PackageAction {
    /// List installed packages.
    List {
        /// Only this destination.
        #[arg(short, long)]
        destination: Option<Destination>,
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Move a deactivated package back into the active set.
    Activate {
        identity: String,
        #[arg(short, long, default_value = "skills")]
        destination: Destination,
    },
    /// Park a package under `.inactive/` without deleting it.
    Deactivate {
        identity: String,
        #[arg(short, long, default_value = "skills")]
        destination: Destination,
    },
    /// Delete a package and its record.
    Remove {
        identity: String,
        #[arg(short, long, default_value = "skills")]
        destination: Destination,
    },
}

pub async fn handle_packages(engine: &SyncEngine, action: PackageAction) -> anyhow::Result<()> {
    let destinations = engine.destinations();
    match action {
        PackageAction::List { destination, json } => {
            let selected: Vec<Destination> = match destination {
                Some(d) => vec![d],
                None => Destination::ALL.to_vec(),
            };
            let mut entries = Vec::new();
            for destination in selected {
                let store = destinations.get(destination);
                for record in store.records()? {
                    let customized = detect(store, &record).await.map(|s| s.is_customized).ok();
                    if json {
                        entries.push(serde_json::json!({
                            "destination": destination,
                            "customized": customized,
                            "record": record,
                        }));
                    } else {
                        let state = if record.active {
                            "active"
                        } else {
                            "inactive"
                        };
                        let modified = match customized {
                            Some(true) => ", modified",
                            Some(false) => "",
                            None => ", unverifiable",
                        };
                        println!(
                            "  {destination}/{} {} ({state}{modified}) {}",
                            record.identity, record.version, record.description
                        );
                    }
                }
            }
            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            }
        },
        PackageAction::Activate {
            identity,
            destination,
        } => {
            let record = destinations.get(destination).activate(&identity).await?;
            println!("Activated '{}' in {destination}.", record.identity);
        },
        PackageAction::Deactivate {
            identity,
            destination,
        } => {
            let record = destinations.get(destination).deactivate(&identity).await?;
            println!("Deactivated '{}' in {destination}.", record.identity);
        },
        PackageAction::Remove {
            identity,
            destination,
        } => {
            destinations.get(destination).remove(&identity).await?;
            println!("Removed '{identity}' from {destination}.");
        },
    }
    Ok(())
}
