//! Registry reference parsing.
//!
//! Accepted forms:
//! - `owner/repo`
//! - `host/owner/repo`
//! - `https://host/owner/repo`
//! - `https://host/owner/repo/tree/<branch>/<subpath>`
//!
//! A trailing `/` or `.git` is tolerated. Traversal segments and encoded
//! separators are rejected before anything else looks at the string.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const DEFAULT_HOST: &str = "github.com";
pub const DEFAULT_BRANCH: &str = "main";

/// Structured form of a registry reference. Re-derived from config on every
/// sync, never persisted as authoritative state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryLocator {
    pub host: String,
    pub owner: String,
    pub repo: String,
    pub branch_hint: String,
    /// Whether the branch came from the reference itself (`/tree/<branch>`)
    /// rather than the conventional default.
    pub branch_explicit: bool,
    /// Repo-relative directory holding the catalog, if not the root.
    pub subpath: Option<String>,
}

impl RegistryLocator {
    /// `owner/repo`.
    pub fn slug(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }

    /// Join a catalog-relative path onto the locator's subpath.
    pub fn resolve(&self, relative: &str) -> String {
        let relative = relative.trim_matches('/');
        match self.subpath.as_deref() {
            Some(sub) if relative.is_empty() => sub.to_string(),
            Some(sub) => format!("{sub}/{relative}"),
            None => relative.to_string(),
        }
    }
}

impl std::fmt::Display for RegistryLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.host, self.owner, self.repo)?;
        if let Some(sub) = &self.subpath {
            write!(f, " ({sub})")?;
        }
        Ok(())
    }
}

/// Parse a free-form registry reference. Pure, no I/O.
pub fn parse_reference(input: &str) -> Result<RegistryLocator> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(Error::configuration("registry reference is empty"));
    }

    let (has_scheme, rest) = match strip_scheme(trimmed) {
        Some(rest) => (true, rest),
        None => (false, trimmed),
    };
    let rest = rest.trim_end_matches('/');

    let segments: Vec<&str> = rest.split('/').collect();
    for segment in &segments {
        check_segment(segment, input)?;
    }

    let (host, path) = if has_scheme || (segments.len() >= 3 && looks_like_host(segments[0])) {
        (segments[0], &segments[1..])
    } else {
        (DEFAULT_HOST, &segments[..])
    };

    let (owner, repo, branch, subpath) = match path {
        [owner, repo] => (*owner, *repo, None, None),
        [owner, repo, "tree", branch, sub @ ..] => {
            let subpath = (!sub.is_empty()).then(|| sub.join("/"));
            (*owner, *repo, Some(*branch), subpath)
        },
        _ => {
            return Err(Error::configuration(format!(
                "invalid registry reference '{input}': expected 'owner/repo', 'host/owner/repo', or a repository URL"
            )));
        },
    };

    let repo = repo.strip_suffix(".git").unwrap_or(repo);
    if !valid_repo_name(owner) || !valid_repo_name(repo) {
        return Err(Error::configuration(format!(
            "invalid registry reference '{input}': owner and repo must be alphanumeric, '-', '_' or '.'"
        )));
    }

    Ok(RegistryLocator {
        host: host.to_ascii_lowercase(),
        owner: owner.to_string(),
        repo: repo.to_string(),
        branch_hint: branch.unwrap_or(DEFAULT_BRANCH).to_string(),
        branch_explicit: branch.is_some(),
        subpath,
    })
}

fn strip_scheme(s: &str) -> Option<&str> {
    let lower = s.get(..8).map(str::to_ascii_lowercase).unwrap_or_default();
    if lower.starts_with("https://") {
        Some(&s[8..])
    } else if lower.starts_with("http://") {
        Some(&s[7..])
    } else {
        None
    }
}

fn looks_like_host(segment: &str) -> bool {
    segment.contains('.') || segment.contains(':') || segment.eq_ignore_ascii_case("localhost")
}

fn check_segment(segment: &str, input: &str) -> Result<()> {
    if segment.is_empty() {
        return Err(Error::configuration(format!(
            "invalid registry reference '{input}': empty path segment"
        )));
    }
    if segment == ".." || segment == "." {
        return Err(Error::configuration(format!(
            "invalid registry reference '{input}': path traversal is not allowed"
        )));
    }
    let lower = segment.to_ascii_lowercase();
    if segment.contains('\\') || ["%2f", "%5c", "%2e"].iter().any(|esc| lower.contains(esc)) {
        return Err(Error::configuration(format!(
            "invalid registry reference '{input}': escaped path separators are not allowed"
        )));
    }
    Ok(())
}

fn valid_repo_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
}
