//! Skill registry sync: discovery, install-state comparison, and idempotent import.
//!
//! A registry is a git-hosted repository with a `.claude-plugin/marketplace.json`
//! catalog. Each catalog entry names a collection directory; each collection
//! holds packages under `skills/{name}/SKILL.md`. Packages install into one of
//! two local destinations (`skills`, `agents`) with different lifecycle rules.
//!
//! [`sync::SyncEngine`] ties the pieces together; the modules below can also be
//! used on their own.

pub mod branch;
pub mod bundled;
pub mod catalog;
pub mod classify;
pub mod client;
pub mod compare;
pub mod customization;
pub mod descriptor;
pub mod enumerate;
pub mod error;
pub mod import;
pub mod index;
pub mod locator;
pub mod mirror;
pub mod policy;
pub mod snapshot;
pub mod store;
pub mod sync;
pub mod version;

pub use {
    error::{Error, ErrorKind, Result},
    store::Destination,
    sync::SyncEngine,
};
