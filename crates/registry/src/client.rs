//! Remote host access.
//!
//! Everything the engine needs from a git host goes through [`RegistryClient`]:
//! repository metadata, one-level directory listings, and raw file content.
//! A missing path is `Ok(None)`, never an error; transport failures,
//! timeouts, and unexpected statuses are [`Error::Network`].

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::Mutex,
    time::Duration,
};

use {
    async_trait::async_trait,
    reqwest::{StatusCode, header},
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
    skillsync_config::{GithubConfig, SyncConfig},
    tracing::debug,
};

use crate::{
    error::{Error, Result},
    locator::{DEFAULT_HOST, RegistryLocator},
};

/// A repository pinned to a resolved branch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoRef {
    pub owner: String,
    pub repo: String,
    pub branch: String,
}

impl RepoRef {
    pub fn new(locator: &RegistryLocator, branch: impl Into<String>) -> Self {
        Self {
            owner: locator.owner.clone(),
            repo: locator.repo.clone(),
            branch: branch.into(),
        }
    }

    pub fn slug(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }
}

impl std::fmt::Display for RepoRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}@{}", self.owner, self.repo, self.branch)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
}

/// One child of a remote directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub name: String,
    /// Repo-relative path.
    pub path: String,
    pub kind: EntryKind,
}

/// A downloaded file, path relative to the directory it was downloaded from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub relative_path: String,
    pub bytes: Vec<u8>,
}

#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Lowercase host name this client serves, matched against
    /// [`RegistryLocator::host`].
    fn host(&self) -> &str;

    /// The repository's actual default branch.
    async fn default_branch(&self, owner: &str, repo: &str) -> Result<String>;

    /// Direct children of `path`, or `None` if the directory does not exist.
    async fn list_dir(&self, repo: &RepoRef, path: &str) -> Result<Option<Vec<RemoteEntry>>>;

    /// Raw bytes of the file at `path`, or `None` if it does not exist.
    async fn fetch_bytes(&self, repo: &RepoRef, path: &str) -> Result<Option<Vec<u8>>>;

    async fn fetch_text(&self, repo: &RepoRef, path: &str) -> Result<Option<String>> {
        match self.fetch_bytes(repo, path).await? {
            Some(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|_| Error::validation(format!("{path} in {repo} is not valid UTF-8"))),
            None => Ok(None),
        }
    }

    /// Every file below `path`, recursively.
    async fn download_dir(&self, repo: &RepoRef, path: &str) -> Result<Vec<RemoteFile>> {
        let root = path.trim_matches('/').to_string();
        let mut files = Vec::new();
        let mut dirs = vec![root.clone()];

        while let Some(dir) = dirs.pop() {
            let entries = self
                .list_dir(repo, &dir)
                .await?
                .ok_or_else(|| Error::network(format!("directory {dir} not found in {repo}")))?;
            for entry in entries {
                match entry.kind {
                    EntryKind::Dir => dirs.push(entry.path),
                    EntryKind::File => {
                        let bytes = self.fetch_bytes(repo, &entry.path).await?.ok_or_else(|| {
                            Error::network(format!("file {} vanished from {repo}", entry.path))
                        })?;
                        let relative_path = entry
                            .path
                            .strip_prefix(&root)
                            .map(|p| p.trim_start_matches('/'))
                            .unwrap_or(&entry.path)
                            .to_string();
                        files.push(RemoteFile {
                            relative_path,
                            bytes,
                        });
                    },
                }
            }
        }

        files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        Ok(files)
    }
}

// ── GitHub ──────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct RepoMetadata {
    #[serde(default)]
    default_branch: Option<String>,
}

#[derive(Deserialize)]
struct ContentsEntry {
    name: String,
    path: String,
    #[serde(rename = "type")]
    kind: String,
}

/// GitHub REST + raw content client.
pub struct GithubClient {
    http: reqwest::Client,
    host: String,
    api_base: String,
    raw_base: String,
    token: Option<Secret<String>>,
}

impl GithubClient {
    pub fn new(config: &GithubConfig, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            host: config.host.trim().to_ascii_lowercase(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            raw_base: config.raw_base.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        })
    }

    pub fn from_config(config: &SyncConfig) -> Result<Self> {
        Self::new(
            &config.github,
            Duration::from_secs(config.request_timeout_secs.max(1)),
        )
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let req = self.http.get(url);
        match &self.token {
            Some(token) => req.bearer_auth(token.expose_secret()),
            None => req,
        }
    }
}

#[async_trait]
impl RegistryClient for GithubClient {
    fn host(&self) -> &str {
        &self.host
    }

    async fn default_branch(&self, owner: &str, repo: &str) -> Result<String> {
        let url = format!("{}/repos/{owner}/{repo}", self.api_base);
        debug!(%url, "fetching repository metadata");
        let resp = self
            .get(&url)
            .header(header::ACCEPT, "application/vnd.github+json")
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Error::network(format!(
                "repository metadata for {owner}/{repo} returned HTTP {}",
                resp.status()
            )));
        }
        let meta: RepoMetadata = resp.json().await?;
        meta.default_branch
            .filter(|b| !b.is_empty())
            .ok_or_else(|| Error::network(format!("{owner}/{repo} reports no default branch")))
    }

    async fn list_dir(&self, repo: &RepoRef, path: &str) -> Result<Option<Vec<RemoteEntry>>> {
        let path = path.trim_matches('/');
        let url = if path.is_empty() {
            format!("{}/repos/{}/{}/contents", self.api_base, repo.owner, repo.repo)
        } else {
            format!(
                "{}/repos/{}/{}/contents/{path}",
                self.api_base, repo.owner, repo.repo
            )
        };
        let resp = self
            .get(&url)
            .query(&[("ref", repo.branch.as_str())])
            .header(header::ACCEPT, "application/vnd.github+json")
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(Error::network(format!(
                "listing {path} in {repo} returned HTTP {}",
                resp.status()
            )));
        }

        // A file path yields an object rather than an array.
        let value: serde_json::Value = resp.json().await?;
        if !value.is_array() {
            return Ok(None);
        }
        let entries: Vec<ContentsEntry> = serde_json::from_value(value)?;
        Ok(Some(
            entries
                .into_iter()
                .filter_map(|e| {
                    let kind = match e.kind.as_str() {
                        "file" => EntryKind::File,
                        "dir" => EntryKind::Dir,
                        _ => return None,
                    };
                    Some(RemoteEntry {
                        name: e.name,
                        path: e.path,
                        kind,
                    })
                })
                .collect(),
        ))
    }

    async fn fetch_bytes(&self, repo: &RepoRef, path: &str) -> Result<Option<Vec<u8>>> {
        let url = format!(
            "{}/{}/{}/{}/{}",
            self.raw_base,
            repo.owner,
            repo.repo,
            repo.branch,
            path.trim_matches('/')
        );
        let resp = self.get(&url).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(Error::network(format!(
                "fetching {path} from {repo} returned HTTP {}",
                resp.status()
            )));
        }
        Ok(Some(resp.bytes().await?.to_vec()))
    }
}

// ── In-memory ───────────────────────────────────────────────────────────────

#[derive(Default)]
struct MemoryRepo {
    default_branch: Option<String>,
    files: BTreeMap<String, Vec<u8>>,
    failing: BTreeSet<String>,
}

/// In-memory registry host, used for offline operation and tests.
///
/// Files are served regardless of the requested branch.
#[derive(Default)]
pub struct MemoryClient {
    repos: Mutex<HashMap<String, MemoryRepo>>,
}

impl MemoryClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_repo<T>(&self, owner: &str, repo: &str, f: impl FnOnce(&mut MemoryRepo) -> T) -> T {
        let mut repos = self.repos.lock().unwrap_or_else(|e| e.into_inner());
        f(repos.entry(format!("{owner}/{repo}")).or_default())
    }

    fn read_repo<T>(&self, owner: &str, repo: &str, f: impl FnOnce(&MemoryRepo) -> T) -> Option<T> {
        let repos = self.repos.lock().unwrap_or_else(|e| e.into_inner());
        repos.get(&format!("{owner}/{repo}")).map(f)
    }

    /// Register a repository and its default branch.
    pub fn add_repo(&self, owner: &str, repo: &str, default_branch: &str) {
        self.with_repo(owner, repo, |r| r.default_branch = Some(default_branch.to_string()));
    }

    /// Register a repository whose metadata lookup fails.
    pub fn add_repo_without_metadata(&self, owner: &str, repo: &str) {
        self.with_repo(owner, repo, |r| r.default_branch = None);
    }

    pub fn put_file(&self, owner: &str, repo: &str, path: &str, content: impl Into<Vec<u8>>) {
        let path = path.trim_matches('/').to_string();
        self.with_repo(owner, repo, |r| {
            r.files.insert(path, content.into());
        });
    }

    pub fn remove_file(&self, owner: &str, repo: &str, path: &str) {
        self.with_repo(owner, repo, |r| {
            r.files.remove(path.trim_matches('/'));
        });
    }

    /// Any request touching `path` (or a child of it) fails with a network error.
    pub fn fail_path(&self, owner: &str, repo: &str, path: &str) {
        let path = path.trim_matches('/').to_string();
        self.with_repo(owner, repo, |r| {
            r.failing.insert(path);
        });
    }

    fn check_failure(&self, repo: &RepoRef, path: &str) -> Result<()> {
        let failing = self
            .read_repo(&repo.owner, &repo.repo, |r| {
                r.failing
                    .iter()
                    .any(|f| path == f || path.starts_with(&format!("{f}/")))
            })
            .unwrap_or(false);
        if failing {
            return Err(Error::network(format!("connection reset fetching {path} from {repo}")));
        }
        Ok(())
    }
}

#[async_trait]
impl RegistryClient for MemoryClient {
    fn host(&self) -> &str {
        DEFAULT_HOST
    }

    async fn default_branch(&self, owner: &str, repo: &str) -> Result<String> {
        self.read_repo(owner, repo, |r| r.default_branch.clone())
            .flatten()
            .ok_or_else(|| {
                Error::network(format!("repository metadata for {owner}/{repo} returned HTTP 404"))
            })
    }

    async fn list_dir(&self, repo: &RepoRef, path: &str) -> Result<Option<Vec<RemoteEntry>>> {
        let path = path.trim_matches('/');
        self.check_failure(repo, path)?;
        let prefix = if path.is_empty() {
            String::new()
        } else {
            format!("{path}/")
        };

        let children = self
            .read_repo(&repo.owner, &repo.repo, |r| {
                let mut children: BTreeMap<String, EntryKind> = BTreeMap::new();
                for key in r.files.keys() {
                    let Some(rest) = key.strip_prefix(&prefix) else {
                        continue;
                    };
                    match rest.split_once('/') {
                        Some((dir, _)) => {
                            children.insert(dir.to_string(), EntryKind::Dir);
                        },
                        None => {
                            children.entry(rest.to_string()).or_insert(EntryKind::File);
                        },
                    }
                }
                children
            })
            .unwrap_or_default();

        if children.is_empty() {
            return Ok(None);
        }
        Ok(Some(
            children
                .into_iter()
                .map(|(name, kind)| RemoteEntry {
                    path: format!("{prefix}{name}"),
                    name,
                    kind,
                })
                .collect(),
        ))
    }

    async fn fetch_bytes(&self, repo: &RepoRef, path: &str) -> Result<Option<Vec<u8>>> {
        let path = path.trim_matches('/');
        self.check_failure(repo, path)?;
        Ok(self
            .read_repo(&repo.owner, &repo.repo, |r| r.files.get(path).cloned())
            .flatten())
    }
}
