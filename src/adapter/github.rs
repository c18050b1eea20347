use std::collections::{BTreeMap, BTreeSet};

use futures::future::try_join_all;
use serde::Deserialize;

use crate::adapter::api::{ApiClient, encode_segment};
use crate::adapter::records::{BranchRecord, CommitRecord, ContributorRecord, RepoRecord};
use crate::adapter::{AdapterError, DataSource, unix_seconds};

pub const GITHUB_API_URL: &str = "https://api.github.com";

#[derive(Debug, Deserialize)]
struct Repo {
    id: u64,
    name: String,
    created_at: String,
    owner: Owner,
    url: String,
}

#[derive(Debug, Deserialize)]
struct Owner {
    login: String,
}

#[derive(Debug, Deserialize)]
struct Branch {
    name: String,
}

#[derive(Debug, Deserialize)]
struct Commit {
    sha: String,
    commit: CommitDetail,
}

#[derive(Debug, Deserialize)]
struct CommitDetail {
    author: Signature,
    message: String,
}

#[derive(Debug, Deserialize)]
struct Signature {
    name: String,
    date: String,
}

#[derive(Debug, Deserialize)]
struct Contributor {
    login: String,
    contributions: u64,
    url: String,
}

#[derive(Debug, Deserialize)]
struct Pull {
    head: PullHead,
}

#[derive(Debug, Deserialize)]
struct PullHead {
    label: String,
    sha: String,
}

impl Commit {
    fn into_record(self, branch: Option<Vec<String>>) -> Result<CommitRecord, AdapterError> {
        Ok(CommitRecord {
            date: unix_seconds(&self.commit.author.date)?,
            hash: self.sha,
            author: self.commit.author.name,
            message: self.commit.message,
            branch,
        })
    }
}

/// Branch name -> shas of the commits attributed to it.
#[derive(Debug, Default)]
struct BranchMap(BTreeMap<String, BTreeSet<String>>);

impl BranchMap {
    fn branches_of(&self, sha: &str) -> Vec<String> {
        self.0
            .iter()
            .filter(|(_, shas)| shas.contains(sha))
            .map(|(branch, _)| branch.clone())
            .collect()
    }

    /// A pull request's head commit belongs to the pull request's branch only.
    fn apply_pull_heads(&mut self, heads: Vec<(String, String)>) {
        for (_, sha) in &heads {
            for shas in self.0.values_mut() {
                shas.remove(sha);
            }
        }
        for (branch, sha) in heads {
            self.0.entry(branch).or_default().insert(sha);
        }
    }
}

/// Adapter for the GitHub REST API (v3).
#[derive(Debug)]
pub struct GithubAdapter {
    api: ApiClient,
    owner: String,
}

impl GithubAdapter {
    pub fn new(api: ApiClient, owner: impl Into<String>) -> Self {
        Self {
            api,
            owner: owner.into(),
        }
    }

    async fn fetch_commits(
        &self,
        branch: Option<&str>,
    ) -> Result<Option<Vec<Commit>>, AdapterError> {
        match branch {
            Some(branch) => self.api.get_json("/commits", &[("sha", branch)]).await,
            None => self.api.get_json("/commits", &[]).await,
        }
    }

    /// Map every known commit to the branches it belongs to: commits reachable
    /// from each existing branch, with pull request heads moved to the pull
    /// request's branch.
    async fn branch_map(&self) -> Result<BranchMap, AdapterError> {
        let branches: Vec<Branch> = self.api.get_json("/branches", &[]).await?.unwrap_or_default();

        let per_branch = try_join_all(branches.iter().map(|branch| async move {
            let commits = self.fetch_commits(Some(&branch.name)).await?;
            Ok::<_, AdapterError>((branch.name.clone(), commits.unwrap_or_default()))
        }))
        .await?;

        let mut map = BranchMap::default();
        for (branch, commits) in per_branch {
            map.0
                .insert(branch, commits.into_iter().map(|commit| commit.sha).collect());
        }

        let pulls: Vec<Pull> = self
            .api
            .get_json("/pulls", &[("state", "all")])
            .await?
            .unwrap_or_default();
        let owner_prefix = format!("{}:", self.owner);
        let heads = pulls
            .into_iter()
            .map(|pull| {
                let branch = match pull.head.label.strip_prefix(&owner_prefix) {
                    Some(branch) => branch.to_owned(),
                    None => pull.head.label,
                };
                (branch, pull.head.sha)
            })
            .collect();
        map.apply_pull_heads(heads);

        Ok(map)
    }
}

impl DataSource for GithubAdapter {
    async fn get_repo(&self) -> Result<Option<RepoRecord>, AdapterError> {
        let Some(repo) = self.api.get_json::<Repo>("", &[]).await? else {
            return Ok(None);
        };

        Ok(Some(RepoRecord {
            id: repo.id,
            creation_date: unix_seconds(&repo.created_at)?,
            repo_name: repo.name,
            owner: repo.owner.login,
            url: repo.url,
        }))
    }

    async fn get_branches(&self) -> Result<Option<Vec<BranchRecord>>, AdapterError> {
        let branches: Option<Vec<Branch>> = self.api.get_json("/branches", &[]).await?;
        Ok(branches.map(|branches| {
            branches
                .into_iter()
                .map(|branch| BranchRecord::new(branch.name))
                .collect()
        }))
    }

    async fn get_commits(&self) -> Result<Option<Vec<CommitRecord>>, AdapterError> {
        let Some(commits) = self.fetch_commits(None).await? else {
            return Ok(None);
        };
        let branches = self.branch_map().await?;

        commits
            .into_iter()
            .map(|commit| {
                let branch = branches.branches_of(&commit.sha);
                commit.into_record(Some(branch))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
    }

    async fn get_commits_by_branch(
        &self,
        branch: &str,
    ) -> Result<Option<Vec<CommitRecord>>, AdapterError> {
        let Some(commits) = self.fetch_commits(Some(branch)).await? else {
            return Ok(None);
        };

        commits
            .into_iter()
            .map(|commit| commit.into_record(None))
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
    }

    async fn get_commit_by_hash(&self, hash: &str) -> Result<Option<CommitRecord>, AdapterError> {
        let path = format!("/commits/{}", encode_segment(hash));
        let Some(commit) = self.api.get_json::<Commit>(&path, &[]).await? else {
            return Ok(None);
        };
        let branches = self.branch_map().await?;

        let branch = branches.branches_of(&commit.sha);
        commit.into_record(Some(branch)).map(Some)
    }

    async fn get_contributors(&self) -> Result<Option<Vec<ContributorRecord>>, AdapterError> {
        let contributors: Option<Vec<Contributor>> =
            self.api.get_json("/contributors", &[]).await?;

        // GitHub does not expose contributor emails here; the login stands in
        Ok(contributors.map(|contributors| {
            contributors
                .into_iter()
                .map(|contributor| ContributorRecord {
                    email: contributor.login.clone(),
                    name: contributor.login,
                    number_of_commits: contributor.contributions,
                    url: Some(contributor.url),
                })
                .collect()
        }))
    }
}
