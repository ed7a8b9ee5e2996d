//! Catalog document (`.claude-plugin/marketplace.json`) retrieval and validation.
//!
//! ```json
//! {
//!   "name": "acme-skills",
//!   "owner": { "name": "Acme" },
//!   "plugins": [
//!     { "name": "dbt", "source": "./plugins/dbt", "version": "1.2.0" },
//!     { "name": "ext", "source": { "source": "github", "repo": "other/repo" } }
//!   ]
//! }
//! ```
//!
//! A missing or malformed document is a configuration error for the whole
//! registry. Malformed *entries* are set aside one by one.

use {
    serde::{Deserialize, Serialize},
    serde_json::Value,
    tracing::{debug, warn},
};

use crate::{
    client::{RegistryClient, RepoRef},
    error::{Error, Result},
    locator::RegistryLocator,
};

/// Catalog path relative to the registry root.
pub const CATALOG_PATH: &str = ".claude-plugin/marketplace.json";

/// Where a collection's content lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CollectionSource {
    /// Directory inside the same repository.
    Path { path: String },
    /// Content hosted elsewhere. Recognized, never followed.
    External {
        kind: String,
        reference: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionEntry {
    pub name: String,
    pub source: CollectionSource,
    pub description: Option<String>,
    pub version: Option<String>,
    pub author: Option<String>,
    pub category: Option<String>,
    pub tags: Vec<String>,
}

/// An entry that could not be converted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidEntry {
    pub index: usize,
    pub name: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    pub name: Option<String>,
    pub owner: Option<String>,
    /// Entries in document order.
    pub entries: Vec<CollectionEntry>,
    pub invalid: Vec<InvalidEntry>,
}

/// Fetch and validate the catalog for a resolved repository.
pub async fn fetch_catalog(
    client: &dyn RegistryClient,
    locator: &RegistryLocator,
    repo: &RepoRef,
) -> Result<Catalog> {
    let path = locator.resolve(CATALOG_PATH);
    debug!(%repo, %path, "fetching catalog");
    let raw = client
        .fetch_text(repo, &path)
        .await?
        .ok_or_else(|| Error::configuration(format!("catalog not found at {path} in {repo}")))?;
    parse_catalog(&raw, &format!("{repo}:{path}"))
}

/// Validate a catalog document. `origin` is only used in messages.
pub fn parse_catalog(raw: &str, origin: &str) -> Result<Catalog> {
    let doc: Value = serde_json::from_str(raw)
        .map_err(|e| Error::configuration(format!("catalog {origin} is not valid JSON: {e}")))?;
    let Some(obj) = doc.as_object() else {
        return Err(Error::configuration(format!(
            "catalog {origin} must be a JSON object"
        )));
    };
    let Some(plugins) = obj.get("plugins").and_then(Value::as_array) else {
        return Err(Error::configuration(format!(
            "catalog {origin} has no 'plugins' array"
        )));
    };

    let mut catalog = Catalog {
        name: obj.get("name").and_then(Value::as_str).map(str::to_string),
        owner: obj.get("owner").and_then(person_name),
        ..Default::default()
    };

    for (index, raw_entry) in plugins.iter().enumerate() {
        match convert_entry(raw_entry) {
            Ok(entry) => catalog.entries.push(entry),
            Err(reason) => {
                let name = raw_entry
                    .get("name")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                warn!(%origin, index, ?name, %reason, "skipping invalid catalog entry");
                catalog.invalid.push(InvalidEntry {
                    index,
                    name,
                    reason,
                });
            },
        }
    }

    Ok(catalog)
}

fn convert_entry(value: &Value) -> std::result::Result<CollectionEntry, String> {
    let obj = value
        .as_object()
        .ok_or_else(|| "entry is not an object".to_string())?;
    let name = obj
        .get("name")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| "entry has no string 'name'".to_string())?;

    let source = match obj.get("source") {
        Some(Value::String(path)) => CollectionSource::Path { path: path.clone() },
        Some(Value::Object(ext)) => CollectionSource::External {
            kind: ext
                .get("source")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string(),
            reference: ["repo", "url", "path"]
                .iter()
                .find_map(|k| ext.get(*k).and_then(Value::as_str))
                .map(str::to_string),
        },
        Some(_) => return Err(format!("entry '{name}' has an unsupported 'source' value")),
        None => return Err(format!("entry '{name}' has no 'source'")),
    };

    let text = |key: &str| {
        obj.get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    Ok(CollectionEntry {
        name: name.to_string(),
        source,
        description: text("description"),
        version: text("version"),
        author: obj.get("author").and_then(person_name),
        category: text("category"),
        tags: obj
            .get("tags")
            .or_else(|| obj.get("keywords"))
            .and_then(Value::as_array)
            .map(|tags| {
                tags.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
    })
}

/// `"Jane"` or `{"name": "Jane", "email": ...}`.
fn person_name(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(o) => o.get("name").and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}
