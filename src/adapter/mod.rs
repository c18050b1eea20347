//! Data-source adapters for GitHub- and GitLab-style APIs.
//!
//! An adapter is built for one repository, serves a single request and is
//! dropped afterwards. Each method returns `Ok(None)` when upstream has
//! nothing for the query, and an [`AdapterError`] when upstream fails or
//! answers with something that cannot be mapped.

mod api;
mod github;
mod gitlab;
mod records;

pub use api::{ApiClient, UpstreamSettings};
pub use github::{GITHUB_API_URL, GithubAdapter};
pub use gitlab::{GITLAB_API_URL, GitlabAdapter};
pub use records::{BranchRecord, CommitRecord, ContributorRecord, RepoRecord};

use std::fmt;
use std::future::Future;
use std::str::FromStr;

use thiserror::Error;

/// Errors raised while talking to an upstream API.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AdapterError {
    /// The request never got a response.
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Upstream answered with a non-success status other than 404.
    #[error("{url} answered with status {status}")]
    Status { url: String, status: u16 },

    /// Upstream answered with a body that does not have the expected shape.
    #[error("malformed response from {url}: {source}")]
    Malformed {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    /// A timestamp field could not be parsed.
    #[error("invalid timestamp '{value}': {source}")]
    InvalidDate {
        value: String,
        #[source]
        source: chrono::ParseError,
    },

    /// The HTTP client could not be built.
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

/// The read operations an upstream hosting service provides.
pub trait DataSource: Send + Sync {
    fn get_repo(&self) -> impl Future<Output = Result<Option<RepoRecord>, AdapterError>> + Send;

    fn get_branches(
        &self,
    ) -> impl Future<Output = Result<Option<Vec<BranchRecord>>, AdapterError>> + Send;

    fn get_commits(
        &self,
    ) -> impl Future<Output = Result<Option<Vec<CommitRecord>>, AdapterError>> + Send;

    fn get_commits_by_branch(
        &self,
        branch: &str,
    ) -> impl Future<Output = Result<Option<Vec<CommitRecord>>, AdapterError>> + Send;

    fn get_commit_by_hash(
        &self,
        hash: &str,
    ) -> impl Future<Output = Result<Option<CommitRecord>, AdapterError>> + Send;

    fn get_contributors(
        &self,
    ) -> impl Future<Output = Result<Option<Vec<ContributorRecord>>, AdapterError>> + Send;
}

/// Supported hosting services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SourceKind {
    #[default]
    Github,
    Gitlab,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Github => "github",
            SourceKind::Gitlab => "gitlab",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The name is not one of the supported hosting services.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported source '{0}'")]
pub struct UnsupportedSource(pub String);

impl FromStr for SourceKind {
    type Err = UnsupportedSource;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "github" | "github_request_sender" => Ok(SourceKind::Github),
            "gitlab" | "gitlab_request_sender" => Ok(SourceKind::Gitlab),
            _ => Err(UnsupportedSource(s.to_owned())),
        }
    }
}

/// A fully resolved repository target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoTarget {
    pub source: SourceKind,
    pub owner: String,
    pub repo: String,
    pub token: Option<String>,
}

/// Builds a fresh adapter for each request.
pub trait AdapterFactory: Send + Sync {
    type Adapter: DataSource;

    fn open(&self, target: &RepoTarget) -> Result<Self::Adapter, AdapterError>;
}

/// Adapter over either hosting service.
#[derive(Debug)]
pub enum HttpAdapter {
    Github(GithubAdapter),
    Gitlab(GitlabAdapter),
}

impl DataSource for HttpAdapter {
    async fn get_repo(&self) -> Result<Option<RepoRecord>, AdapterError> {
        match self {
            HttpAdapter::Github(adapter) => adapter.get_repo().await,
            HttpAdapter::Gitlab(adapter) => adapter.get_repo().await,
        }
    }

    async fn get_branches(&self) -> Result<Option<Vec<BranchRecord>>, AdapterError> {
        match self {
            HttpAdapter::Github(adapter) => adapter.get_branches().await,
            HttpAdapter::Gitlab(adapter) => adapter.get_branches().await,
        }
    }

    async fn get_commits(&self) -> Result<Option<Vec<CommitRecord>>, AdapterError> {
        match self {
            HttpAdapter::Github(adapter) => adapter.get_commits().await,
            HttpAdapter::Gitlab(adapter) => adapter.get_commits().await,
        }
    }

    async fn get_commits_by_branch(
        &self,
        branch: &str,
    ) -> Result<Option<Vec<CommitRecord>>, AdapterError> {
        match self {
            HttpAdapter::Github(adapter) => adapter.get_commits_by_branch(branch).await,
            HttpAdapter::Gitlab(adapter) => adapter.get_commits_by_branch(branch).await,
        }
    }

    async fn get_commit_by_hash(&self, hash: &str) -> Result<Option<CommitRecord>, AdapterError> {
        match self {
            HttpAdapter::Github(adapter) => adapter.get_commit_by_hash(hash).await,
            HttpAdapter::Gitlab(adapter) => adapter.get_commit_by_hash(hash).await,
        }
    }

    async fn get_contributors(&self) -> Result<Option<Vec<ContributorRecord>>, AdapterError> {
        match self {
            HttpAdapter::Github(adapter) => adapter.get_contributors().await,
            HttpAdapter::Gitlab(adapter) => adapter.get_contributors().await,
        }
    }
}

/// Opens GitHub or GitLab adapters that share one HTTP connection pool.
#[derive(Debug, Clone)]
pub struct HttpAdapterFactory {
    http: reqwest::Client,
    settings: UpstreamSettings,
}

impl HttpAdapterFactory {
    pub fn new(settings: UpstreamSettings) -> Result<Self, AdapterError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .timeout(settings.request_timeout)
            .build()
            .map_err(AdapterError::Client)?;
        Ok(Self { http, settings })
    }
}

impl AdapterFactory for HttpAdapterFactory {
    type Adapter = HttpAdapter;

    fn open(&self, target: &RepoTarget) -> Result<HttpAdapter, AdapterError> {
        Ok(match target.source {
            SourceKind::Github => HttpAdapter::Github(GithubAdapter::new(
                ApiClient::github(self.http.clone(), &self.settings.github_url, target),
                &target.owner,
            )),
            SourceKind::Gitlab => HttpAdapter::Gitlab(GitlabAdapter::new(ApiClient::gitlab(
                self.http.clone(),
                &self.settings.gitlab_url,
                target,
            ))),
        })
    }
}

/// Converts an RFC 3339 timestamp to unix seconds.
pub(crate) fn unix_seconds(value: &str) -> Result<i64, AdapterError> {
    chrono::DateTime::parse_from_rfc3339(value)
        .map(|date| date.timestamp())
        .map_err(|source| AdapterError::InvalidDate {
            value: value.to_owned(),
            source,
        })
}
