use super::{FetchedProfiles, RemoteError, RemoteFetcher, RemoteTimeOracle, RemoteWriter, RepoRef};
use crate::utils::{file_name_of, is_profile_file_name, REMOTE_PROFILES_DIR};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::{Client, Response, StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tracing::{debug, error, info, warn};

const GITHUB_API_URL: &str = "https://api.github.com";
const GITHUB_JSON: &str = "application/vnd.github.v3+json";
const GITHUB_RAW: &str = "application/vnd.github.v3.raw";
const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct UserResponse {
    login: String,
}

#[derive(Debug, Deserialize)]
struct CommitEntry {
    commit: CommitDetail,
}

#[derive(Debug, Deserialize)]
struct CommitDetail {
    committer: Option<CommitSignature>,
}

#[derive(Debug, Deserialize)]
struct CommitSignature {
    date: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct ContentEntry {
    name: String,
    path: String,
    #[serde(rename = "type")]
    entry_type: String,
}

#[derive(Debug, Deserialize)]
struct ContentSha {
    sha: String,
}

#[derive(Debug, Serialize)]
struct PutContentRequest<'a> {
    message: String,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
}

/// GitHub REST client for one token
pub struct GitHubClient {
    client: Client,
    base_url: String,
}

impl GitHubClient {
    /// `timeout` bounds every request, including remote time lookups
    pub fn new(token: &str, timeout: Duration) -> Result<Self, RemoteError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(GITHUB_JSON));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("profile-sync/", env!("CARGO_PKG_VERSION"))),
        );
        let mut auth = HeaderValue::from_str(&format!("token {}", token.trim()))
            .map_err(|e| RemoteError::InvalidToken(e.to_string()))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(HTTP_CONNECT_TIMEOUT)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: GITHUB_API_URL.to_string(),
        })
    }

    /// Point the client at another API root (GitHub Enterprise)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Build `<base>/repos/<owner>/<repo>/<segments...>`, percent-encoding each segment
    fn repo_url<'s>(
        &self,
        repo: &RepoRef,
        segments: impl IntoIterator<Item = &'s str>,
    ) -> Result<Url, RemoteError> {
        let mut url =
            Url::parse(&self.base_url).map_err(|e| RemoteError::InvalidApiUrl(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| RemoteError::InvalidApiUrl(self.base_url.clone()))?
            .pop_if_empty()
            .extend(["repos", repo.owner.as_str(), repo.repo.as_str()])
            .extend(segments);
        Ok(url)
    }

    fn contents_url(&self, repo: &RepoRef, path: &str) -> Result<Url, RemoteError> {
        self.repo_url(repo, std::iter::once("contents").chain(path.split('/')))
    }

    /// Check the token and return the login it belongs to
    pub async fn verify_token(&self) -> Result<String, RemoteError> {
        let response = self
            .client
            .get(format!("{}/user", self.base_url))
            .send()
            .await?;
        let user: UserResponse = ensure_success(response).await?.json().await?;
        info!(login = %user.login, "Authenticated with GitHub");
        Ok(user.login)
    }

    async fn fetch_commit_time(
        &self,
        repo: &RepoRef,
        remote_path: &str,
    ) -> Result<Option<DateTime<Utc>>, RemoteError> {
        let response = self
            .client
            .get(self.repo_url(repo, ["commits"])?)
            .query(&[("path", remote_path), ("per_page", "1")])
            .send()
            .await?;
        let commits: Vec<CommitEntry> = ensure_success(response).await?.json().await?;

        Ok(commits
            .into_iter()
            .next()
            .and_then(|c| c.commit.committer)
            .map(|s| s.date))
    }

    async fn download_raw(&self, repo: &RepoRef, path: &str) -> Result<Vec<u8>, RemoteError> {
        let response = self
            .client
            .get(self.contents_url(repo, path)?)
            .header(ACCEPT, GITHUB_RAW)
            .send()
            .await?;
        Ok(ensure_success(response).await?.bytes().await?.to_vec())
    }

    async fn current_sha(
        &self,
        repo: &RepoRef,
        remote_path: &str,
    ) -> Result<Option<String>, RemoteError> {
        let response = self
            .client
            .get(self.contents_url(repo, remote_path)?)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let content: ContentSha = ensure_success(response).await?.json().await?;
        Ok(Some(content.sha))
    }
}

/// Turn a non-2xx response into a `StatusError`
async fn ensure_success(response: Response) -> Result<Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    Err(RemoteError::StatusError {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl RemoteTimeOracle for GitHubClient {
    async fn last_change_time(&self, repo: &RepoRef, remote_path: &str) -> Option<DateTime<Utc>> {
        match self.fetch_commit_time(repo, remote_path).await {
            Ok(time) => {
                debug!(path = %remote_path, time = ?time, "Resolved remote commit time");
                time
            }
            Err(e) => {
                warn!(path = %remote_path, error = %e, "Could not resolve remote commit time");
                None
            }
        }
    }
}

#[async_trait]
impl RemoteFetcher for GitHubClient {
    async fn fetch_profiles(
        &self,
        repo: &RepoRef,
        dest_dir: &Path,
    ) -> Result<FetchedProfiles, RemoteError> {
        let response = self
            .client
            .get(self.contents_url(repo, REMOTE_PROFILES_DIR)?)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            info!(repo = %repo, "Remote has no profiles folder yet");
            return Ok(FetchedProfiles::default());
        }

        let entries: Vec<ContentEntry> = ensure_success(response).await?.json().await?;
        fs::create_dir_all(dest_dir).await?;

        let mut fetched = FetchedProfiles::default();
        for entry in entries {
            if entry.entry_type != "file" || !is_profile_file_name(&entry.name) {
                continue;
            }

            match self.download_raw(repo, &entry.path).await {
                Ok(bytes) => {
                    let dest = dest_dir.join(&entry.name);
                    fs::write(&dest, bytes).await?;
                    fetched.staged.push(dest);
                }
                Err(e) => {
                    error!(file = %entry.name, error = %e, "Failed to download profile");
                    fetched.failed.push(entry.name);
                }
            }
        }

        fetched.staged.sort();
        fetched.failed.sort();
        info!(
            count = fetched.staged.len(),
            failed = fetched.failed.len(),
            "Downloaded remote profiles"
        );
        Ok(fetched)
    }
}

#[async_trait]
impl RemoteWriter for GitHubClient {
    async fn upload(
        &self,
        repo: &RepoRef,
        remote_path: &str,
        local_file: &Path,
    ) -> Result<(), RemoteError> {
        let sha = self.current_sha(repo, remote_path).await?;
        let content = fs::read(local_file).await?;
        let name = file_name_of(local_file).unwrap_or_else(|| remote_path.to_string());

        let body = PutContentRequest {
            message: format!("Update profile {name}"),
            content: BASE64.encode(content),
            sha: sha.as_deref(),
        };

        let response = self
            .client
            .put(self.contents_url(repo, remote_path)?)
            .json(&body)
            .send()
            .await?;
        ensure_success(response).await?;

        info!(path = %remote_path, "Uploaded profile");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_response_parsing() {
        let body = r#"[{"sha":"abc","commit":{"committer":{"name":"x","date":"2024-05-01T10:20:30Z"}}}]"#;
        let commits: Vec<CommitEntry> = serde_json::from_str(body).unwrap();
        let date = commits[0].commit.committer.as_ref().unwrap().date;
        assert_eq!(date.to_rfc3339(), "2024-05-01T10:20:30+00:00");
    }

    #[test]
    fn test_put_request_omits_missing_sha() {
        let body = PutContentRequest {
            message: "Update profile a.json".to_string(),
            content: BASE64.encode(b"{}"),
            sha: None,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["content"], "e30=");
        assert!(json.get("sha").is_none());
    }

    #[test]
    fn test_contents_url() {
        let client = GitHubClient::new("t0ken", Duration::from_secs(5))
            .unwrap()
            .with_base_url("https://ghe.example.com/api/v3/");
        let repo = RepoRef::new("o", "r");
        assert_eq!(
            client.contents_url(&repo, "profiles/a.json").unwrap().as_str(),
            "https://ghe.example.com/api/v3/repos/o/r/contents/profiles/a.json"
        );
    }

    #[test]
    fn test_contents_url_encodes_file_names() {
        let client = GitHubClient::new("t0ken", Duration::from_secs(5)).unwrap();
        let repo = RepoRef::new("o", "r");
        assert_eq!(
            client
                .contents_url(&repo, "profiles/my #1?.json")
                .unwrap()
                .as_str(),
            "https://api.github.com/repos/o/r/contents/profiles/my%20%231%3F.json"
        );
    }

    #[test]
    fn test_commits_url_keeps_api_root() {
        let client = GitHubClient::new("t0ken", Duration::from_secs(5)).unwrap();
        let repo = RepoRef::new("o", "r");
        assert_eq!(
            client.repo_url(&repo, ["commits"]).unwrap().as_str(),
            "https://api.github.com/repos/o/r/commits"
        );
    }
}
