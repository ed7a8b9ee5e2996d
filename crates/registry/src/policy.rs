//! Update delivery: what the user sees (or doesn't) after a sync.

use std::collections::BTreeMap;

use {
    serde::Serialize,
    skillsync_config::UpdateMode,
    tracing::{debug, info},
};

use crate::{
    compare::UpdateAvailability,
    error::Error,
    import::{ImportOutcome, ImportRequest, ImportStatus},
    store::Destination,
};

/// One available update with its customization state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedUpdate {
    #[serde(flatten)]
    pub availability: UpdateAvailability,
    pub customized: bool,
}

/// Available updates of one registry across both destinations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UpdatePlan {
    pub registry: String,
    pub updates: Vec<PlannedUpdate>,
}

impl UpdatePlan {
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    /// Import requests for silent mode. Customized packages are left out.
    pub fn silent_requests(&self) -> Vec<ImportRequest> {
        self.updates
            .iter()
            .filter(|u| {
                if u.customized {
                    debug!(
                        identity = %u.availability.identity,
                        destination = %u.availability.destination,
                        "holding back customized package"
                    );
                }
                !u.customized
            })
            .map(|u| ImportRequest::new(u.availability.identity.clone(), u.availability.destination))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedImport {
    pub identity: String,
    pub destination: Destination,
    pub error: String,
}

/// Standing payloads handed to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    /// Silent mode result: identities updated per destination.
    UpdatesApplied {
        registry: String,
        updated: BTreeMap<Destination, Vec<String>>,
    },
    /// Manual mode: updates waiting for the user in one destination.
    UpdatesAvailable {
        registry: String,
        destination: Destination,
        identities: Vec<String>,
        /// Subset of `identities` with local changes.
        customized: Vec<String>,
    },
    Error {
        registry: String,
        message: String,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        failures: Vec<FailedImport>,
    },
}

/// Manual mode: one prompt per destination with at least one update.
pub fn manual_prompts(plan: &UpdatePlan) -> Vec<Notification> {
    let mut by_destination: BTreeMap<Destination, (Vec<String>, Vec<String>)> = BTreeMap::new();
    for update in &plan.updates {
        let (identities, customized) = by_destination
            .entry(update.availability.destination)
            .or_default();
        identities.push(update.availability.identity.clone());
        if update.customized {
            customized.push(update.availability.identity.clone());
        }
    }
    by_destination
        .into_iter()
        .map(|(destination, (identities, customized))| Notification::UpdatesAvailable {
            registry: plan.registry.clone(),
            destination,
            identities,
            customized,
        })
        .collect()
}

/// Silent mode: summary of what was updated, or one error when nothing was.
pub fn silent_summary(registry: &str, outcomes: &[ImportOutcome]) -> Option<Notification> {
    let mut updated: BTreeMap<Destination, Vec<String>> = BTreeMap::new();
    let mut failures = Vec::new();
    for outcome in outcomes {
        match outcome.status {
            ImportStatus::Imported | ImportStatus::Updated => updated
                .entry(outcome.destination)
                .or_default()
                .push(outcome.identity.clone()),
            ImportStatus::Failed => failures.push(FailedImport {
                identity: outcome.identity.clone(),
                destination: outcome.destination,
                error: outcome.error.clone().unwrap_or_default(),
            }),
            ImportStatus::Skipped => {},
        }
    }

    if !updated.is_empty() {
        if !failures.is_empty() {
            info!(registry, failed = failures.len(), "some silent updates failed");
        }
        return Some(Notification::UpdatesApplied {
            registry: registry.to_string(),
            updated,
        });
    }
    if failures.is_empty() {
        return None;
    }
    Some(Notification::Error {
        registry: registry.to_string(),
        message: format!("{} update(s) failed to install", failures.len()),
        failures,
    })
}

/// Registry-level failure, cause verbatim.
pub fn registry_error(registry: &str, error: &Error) -> Notification {
    Notification::Error {
        registry: registry.to_string(),
        message: error.to_string(),
        failures: Vec::new(),
    }
}

/// Which notifications a plan yields before anything is imported.
pub fn pending_notifications(mode: UpdateMode, plan: &UpdatePlan) -> Vec<Notification> {
    match mode {
        UpdateMode::Manual => manual_prompts(plan),
        UpdateMode::Silent => Vec::new(),
    }
}
