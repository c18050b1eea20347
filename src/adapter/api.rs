use std::time::Duration;

use bon::Builder;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::adapter::github::GITHUB_API_URL;
use crate::adapter::gitlab::GITLAB_API_URL;
use crate::adapter::{AdapterError, RepoTarget};

/// Where the upstream APIs live and how long a single call may take.
#[derive(Debug, Clone, Builder)]
pub struct UpstreamSettings {
    #[builder(into, default = String::from(GITHUB_API_URL))]
    pub github_url: String,

    #[builder(into, default = String::from(GITLAB_API_URL))]
    pub gitlab_url: String,

    #[builder(default = Duration::from_secs(30))]
    pub request_timeout: Duration,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// JSON-over-HTTP client rooted at one repository's API URL.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    auth: Option<(&'static str, String)>,
}

impl ApiClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            auth: None,
        }
    }

    /// Send `header: value` with every request.
    pub fn with_auth(mut self, header: &'static str, value: impl Into<String>) -> Self {
        self.auth = Some((header, value.into()));
        self
    }

    /// `{api}/repos/{owner}/{repo}` with `Authorization: token ...`.
    pub(crate) fn github(http: reqwest::Client, api_url: &str, target: &RepoTarget) -> Self {
        let base_url = format!(
            "{}/repos/{}/{}",
            api_url.trim_end_matches('/'),
            encode_segment(&target.owner),
            encode_segment(&target.repo)
        );
        let client = Self::new(http, base_url);
        match &target.token {
            Some(token) => client.with_auth("Authorization", format!("token {token}")),
            None => client,
        }
    }

    /// `{api}/{owner}%2F{repo}` with `PRIVATE-TOKEN: ...`.
    pub(crate) fn gitlab(http: reqwest::Client, api_url: &str, target: &RepoTarget) -> Self {
        let project = encode_segment(&format!("{}/{}", target.owner, target.repo));
        let base_url = format!("{}/{}", api_url.trim_end_matches('/'), project);
        let client = Self::new(http, base_url);
        match &target.token {
            Some(token) => client.with_auth("PRIVATE-TOKEN", token.clone()),
            None => client,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET `{base_url}{path}` and decode the JSON body.
    ///
    /// Returns `Ok(None)` on 404.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Option<T>, AdapterError> {
        let url = format!("{}{}", self.base_url, path);

        let mut request = self.http.get(&url);
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some((header, value)) = &self.auth {
            request = request.header(*header, value);
        }

        let response = request.send().await.map_err(|source| AdapterError::Http {
            url: url.clone(),
            source,
        })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!(url = %url, "Upstream has nothing at this URL");
            return Ok(None);
        }
        if !status.is_success() {
            return Err(AdapterError::Status {
                url,
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(|source| AdapterError::Http {
            url: url.clone(),
            source,
        })?;
        serde_json::from_slice(&body)
            .map(Some)
            .map_err(|source| AdapterError::Malformed { url, source })
    }
}

/// Everything except RFC 3986 unreserved characters.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Percent-encode a value for use as a single URL path segment.
pub(crate) fn encode_segment(value: &str) -> String {
    utf8_percent_encode(value, PATH_SEGMENT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::SourceKind;

    fn target(token: Option<&str>) -> RepoTarget {
        RepoTarget {
            source: SourceKind::Github,
            owner: "octo".to_owned(),
            repo: "hello-world".to_owned(),
            token: token.map(str::to_owned),
        }
    }

    #[test]
    fn test_github_base_url() {
        let client = ApiClient::github(
            reqwest::Client::new(),
            "https://api.github.com/",
            &target(None),
        );
        assert_eq!(client.base_url(), "https://api.github.com/repos/octo/hello-world");
        assert!(client.auth.is_none());
    }

    #[test]
    fn test_gitlab_base_url_encodes_project_path() {
        let client = ApiClient::gitlab(
            reqwest::Client::new(),
            "https://gitlab.com/api/v4/projects/",
            &target(Some("secret")),
        );
        assert_eq!(
            client.base_url(),
            "https://gitlab.com/api/v4/projects/octo%2Fhello-world"
        );
        assert_eq!(client.auth, Some(("PRIVATE-TOKEN", "secret".to_owned())));
    }

    #[test]
    fn test_encode_segment_blocks_path_traversal() {
        assert_eq!(encode_segment("../../user"), "..%2F..%2Fuser");
    }

    #[test]
    fn test_encode_segment_uses_percent_escapes() {
        assert_eq!(encode_segment("my repo+x"), "my%20repo%2Bx");
        assert_eq!(encode_segment("feature/ü"), "feature%2F%C3%BC");
        assert_eq!(encode_segment("v1.0_rc-2~"), "v1.0_rc-2~");
    }
}
