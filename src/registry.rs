//! Routing of decoded requests to data-source operations.
//!
//! The set of operations is closed: [`Operation`] has one variant per
//! operation, carrying the parameter that operation needs. A request either
//! resolves to a variant or fails before any adapter is built.

use std::fmt;
use std::str::FromStr;

use rpcamqp_lite::{FailureKind, RpcFailure};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::adapter::{
    AdapterError, AdapterFactory, DataSource, RepoTarget, SourceKind, UnsupportedSource,
};
use crate::request::{DecodeError, Request};

/// Names of the operations a request can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationName {
    GetRepo,
    GetBranches,
    GetCommits,
    GetCommitsByBranch,
    GetCommitByHash,
    GetContributors,
}

impl OperationName {
    pub const ALL: [OperationName; 6] = [
        OperationName::GetRepo,
        OperationName::GetBranches,
        OperationName::GetCommits,
        OperationName::GetCommitsByBranch,
        OperationName::GetCommitByHash,
        OperationName::GetContributors,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationName::GetRepo => "get_repo",
            OperationName::GetBranches => "get_branches",
            OperationName::GetCommits => "get_commits",
            OperationName::GetCommitsByBranch => "get_commits_by_branch",
            OperationName::GetCommitByHash => "get_commit_by_hash",
            OperationName::GetContributors => "get_contributors",
        }
    }

    /// The named parameter the operation cannot run without, if any.
    pub fn required_parameter(&self) -> Option<&'static str> {
        match self {
            OperationName::GetCommitsByBranch => Some("branch"),
            OperationName::GetCommitByHash => Some("hash"),
            _ => None,
        }
    }
}

impl fmt::Display for OperationName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationName {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OperationName::ALL
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| DispatchError::UnknownOperation(s.to_owned()))
    }
}

/// Errors raised while turning a request into a reply value.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DispatchError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("unknown operation '{0}'")]
    UnknownOperation(String),

    #[error("operation '{operation}' requires parameter '{parameter}'")]
    MissingParameter {
        operation: OperationName,
        parameter: &'static str,
    },

    #[error(transparent)]
    UnsupportedSource(#[from] UnsupportedSource),

    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error("failed to serialize result: {0}")]
    Serialize(#[source] serde_json::Error),
}

impl DispatchError {
    pub fn kind(&self) -> FailureKind {
        match self {
            DispatchError::Decode(_) => FailureKind::Decode,
            DispatchError::UnknownOperation(_) => FailureKind::UnknownOperation,
            DispatchError::MissingParameter { .. } => FailureKind::MissingParameter,
            DispatchError::UnsupportedSource(_) => FailureKind::InvalidRequest,
            DispatchError::Adapter(_) => FailureKind::Upstream,
            DispatchError::Serialize(_) => FailureKind::Internal,
        }
    }
}

impl From<DispatchError> for RpcFailure {
    fn from(e: DispatchError) -> Self {
        RpcFailure::new(e.kind(), e.to_string())
    }
}

/// A resolved operation with its parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    GetRepo,
    GetBranches,
    GetCommits,
    GetCommitsByBranch { branch: String },
    GetCommitByHash { hash: String },
    GetContributors,
}

impl Operation {
    /// Resolve the request's operation name and required parameter.
    pub fn resolve(request: &Request) -> Result<Self, DispatchError> {
        let name: OperationName = request.action.parse()?;
        let missing = || DispatchError::MissingParameter {
            operation: name,
            parameter: name.required_parameter().unwrap_or_default(),
        };

        Ok(match name {
            OperationName::GetRepo => Operation::GetRepo,
            OperationName::GetBranches => Operation::GetBranches,
            OperationName::GetCommits => Operation::GetCommits,
            OperationName::GetCommitsByBranch => Operation::GetCommitsByBranch {
                branch: request.parameters.branch.clone().ok_or_else(missing)?,
            },
            OperationName::GetCommitByHash => Operation::GetCommitByHash {
                hash: request.parameters.hash.clone().ok_or_else(missing)?,
            },
            OperationName::GetContributors => Operation::GetContributors,
        })
    }

    pub fn name(&self) -> OperationName {
        match self {
            Operation::GetRepo => OperationName::GetRepo,
            Operation::GetBranches => OperationName::GetBranches,
            Operation::GetCommits => OperationName::GetCommits,
            Operation::GetCommitsByBranch { .. } => OperationName::GetCommitsByBranch,
            Operation::GetCommitByHash { .. } => OperationName::GetCommitByHash,
            Operation::GetContributors => OperationName::GetContributors,
        }
    }

    /// Run the operation and serialize its result. "Nothing upstream" is `null`.
    pub async fn invoke<D: DataSource>(&self, source: &D) -> Result<Value, DispatchError> {
        match self {
            Operation::GetRepo => to_value(source.get_repo().await?),
            Operation::GetBranches => to_value(source.get_branches().await?),
            Operation::GetCommits => to_value(source.get_commits().await?),
            Operation::GetCommitsByBranch { branch } => {
                to_value(source.get_commits_by_branch(branch).await?)
            }
            Operation::GetCommitByHash { hash } => to_value(source.get_commit_by_hash(hash).await?),
            Operation::GetContributors => to_value(source.get_contributors().await?),
        }
    }
}

fn to_value<T: Serialize>(result: T) -> Result<Value, DispatchError> {
    serde_json::to_value(result).map_err(DispatchError::Serialize)
}

/// Resolves requests and runs them against a freshly opened adapter.
#[derive(Debug, Clone)]
pub struct OperationRegistry<F> {
    factory: F,
}

impl<F: AdapterFactory> OperationRegistry<F> {
    pub fn new(factory: F) -> Self {
        Self { factory }
    }

    /// Resolve, open an adapter for the request's repository, invoke, and
    /// release the adapter.
    ///
    /// Nothing is opened when the request cannot be resolved.
    pub async fn dispatch(&self, request: &Request) -> Result<Value, DispatchError> {
        let operation = Operation::resolve(request)?;
        let target = resolve_target(request, operation.name())?;

        debug!(
            operation = %operation.name(),
            source = %target.source,
            owner = %target.owner,
            repo = %target.repo,
            "Dispatching request"
        );

        let adapter = self.factory.open(&target)?;
        let result = operation.invoke(&adapter).await;
        drop(adapter);
        result
    }
}

fn resolve_target(
    request: &Request,
    operation: OperationName,
) -> Result<RepoTarget, DispatchError> {
    let target = &request.target;
    let source = match &target.source {
        Some(raw) => raw.parse::<SourceKind>()?,
        None => SourceKind::default(),
    };
    let owner = target.owner.clone().ok_or(DispatchError::MissingParameter {
        operation,
        parameter: "owner",
    })?;
    let repo = target.repo.clone().ok_or(DispatchError::MissingParameter {
        operation,
        parameter: "repo",
    })?;

    Ok(RepoTarget {
        source,
        owner,
        repo,
        token: target.token.clone(),
    })
}
