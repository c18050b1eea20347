use futures::future::try_join_all;
use serde::Deserialize;

use crate::adapter::api::{ApiClient, encode_segment};
use crate::adapter::records::{BranchRecord, CommitRecord, ContributorRecord, RepoRecord};
use crate::adapter::{AdapterError, DataSource, unix_seconds};

pub const GITLAB_API_URL: &str = "https://gitlab.com/api/v4/projects/";

#[derive(Debug, Deserialize)]
struct Project {
    id: u64,
    name: String,
    created_at: String,
    path_with_namespace: String,
    web_url: String,
}

#[derive(Debug, Deserialize)]
struct Branch {
    name: String,
}

#[derive(Debug, Deserialize)]
struct Commit {
    id: String,
    author_name: String,
    message: String,
    committed_date: String,
}

#[derive(Debug, Deserialize)]
struct Ref {
    name: String,
}

#[derive(Debug, Deserialize)]
struct Contributor {
    name: String,
    email: String,
    commits: u64,
}

impl Commit {
    fn into_record(self, branch: Option<Vec<String>>) -> Result<CommitRecord, AdapterError> {
        Ok(CommitRecord {
            date: unix_seconds(&self.committed_date)?,
            hash: self.id,
            author: self.author_name,
            message: self.message,
            branch,
        })
    }
}

/// Adapter for the GitLab REST API (v4).
#[derive(Debug)]
pub struct GitlabAdapter {
    api: ApiClient,
}

impl GitlabAdapter {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    /// Branches containing the commit.
    async fn branches_of(&self, sha: &str) -> Result<Vec<String>, AdapterError> {
        let path = format!("/repository/commits/{}/refs", encode_segment(sha));
        let refs: Option<Vec<Ref>> = self.api.get_json(&path, &[("type", "branch")]).await?;
        Ok(refs
            .unwrap_or_default()
            .into_iter()
            .map(|reference| reference.name)
            .collect())
    }
}

impl DataSource for GitlabAdapter {
    async fn get_repo(&self) -> Result<Option<RepoRecord>, AdapterError> {
        let Some(project) = self.api.get_json::<Project>("", &[]).await? else {
            return Ok(None);
        };

        let owner = project
            .path_with_namespace
            .split('/')
            .next()
            .unwrap_or_default()
            .to_owned();

        Ok(Some(RepoRecord {
            id: project.id,
            creation_date: unix_seconds(&project.created_at)?,
            repo_name: project.name,
            owner,
            url: project.web_url,
        }))
    }

    async fn get_branches(&self) -> Result<Option<Vec<BranchRecord>>, AdapterError> {
        let branches: Option<Vec<Branch>> =
            self.api.get_json("/repository/branches", &[]).await?;
        Ok(branches.map(|branches| {
            branches
                .into_iter()
                .map(|branch| BranchRecord::new(branch.name))
                .collect()
        }))
    }

    async fn get_commits(&self) -> Result<Option<Vec<CommitRecord>>, AdapterError> {
        let commits: Option<Vec<Commit>> = self.api.get_json("/repository/commits", &[]).await?;
        let Some(commits) = commits else {
            return Ok(None);
        };

        let records = try_join_all(commits.into_iter().map(|commit| async move {
            let branch = self.branches_of(&commit.id).await?;
            commit.into_record(Some(branch))
        }))
        .await?;

        Ok(Some(records))
    }

    async fn get_commits_by_branch(
        &self,
        branch: &str,
    ) -> Result<Option<Vec<CommitRecord>>, AdapterError> {
        let commits: Option<Vec<Commit>> = self
            .api
            .get_json("/repository/commits", &[("ref_name", branch)])
            .await?;
        let Some(commits) = commits else {
            return Ok(None);
        };

        commits
            .into_iter()
            .map(|commit| commit.into_record(None))
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
    }

    async fn get_commit_by_hash(&self, hash: &str) -> Result<Option<CommitRecord>, AdapterError> {
        let path = format!("/repository/commits/{}", encode_segment(hash));
        let Some(commit) = self.api.get_json::<Commit>(&path, &[]).await? else {
            return Ok(None);
        };

        let branch = self.branches_of(&commit.id).await?;
        commit.into_record(Some(branch)).map(Some)
    }

    async fn get_contributors(&self) -> Result<Option<Vec<ContributorRecord>>, AdapterError> {
        let contributors: Option<Vec<Contributor>> =
            self.api.get_json("/repository/contributors", &[]).await?;

        Ok(contributors.map(|contributors| {
            contributors
                .into_iter()
                .map(|contributor| ContributorRecord {
                    name: contributor.name,
                    number_of_commits: contributor.commits,
                    email: contributor.email,
                    url: None,
                })
                .collect()
        }))
    }
}
