use serde::{Deserialize, Serialize};

/// Repository summary. `creation_date` is in unix seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoRecord {
    pub id: u64,
    pub repo_name: String,
    pub creation_date: i64,
    pub owner: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchRecord {
    pub name: String,
}

impl BranchRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// A commit. `date` is in unix seconds.
///
/// `branch` lists the branches the commit belongs to. It is left out when the
/// commits were listed for a single branch, and empty when no known branch
/// contains the commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRecord {
    pub hash: String,
    pub author: String,
    pub message: String,
    pub date: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContributorRecord {
    pub name: String,
    pub number_of_commits: u64,
    pub email: String,
    pub url: Option<String>,
}
