//! Pushes a project's files to a GitHub repository through the contents API.
//!
//! Each file is written with its own commit. Failures are recorded per file
//! so one bad path does not abort the rest of the push.

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};

use crate::db::models::ProjectFile;

const USER_AGENT: &str = "appforge";

/// Split `owner/name` into its parts.
pub fn parse_repo(repo: &str) -> Option<(&str, &str)> {
    let (owner, name) = repo.trim().split_once('/')?;
    let valid = |part: &str| !part.is_empty() && !part.contains('/') && !part.contains(' ');
    (valid(owner) && valid(name)).then_some((owner, name))
}

pub struct PushTarget<'a> {
    pub owner: &'a str,
    pub repo: &'a str,
    pub token: &'a str,
    pub branch: &'a str,
    pub message: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct PushFailure {
    pub path: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PushReport {
    pub repository: String,
    pub branch: String,
    pub pushed: Vec<String>,
    pub failed: Vec<PushFailure>,
}

#[derive(Deserialize)]
struct ContentsEntry {
    sha: String,
}

#[derive(Serialize)]
struct PutContentsRequest<'a> {
    message: &'a str,
    content: String,
    branch: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<String>,
}

pub struct GitHubPusher {
    client: reqwest::Client,
    api_url: String,
}

impl GitHubPusher {
    pub fn new(client: reqwest::Client, api_url: impl Into<String>) -> Self {
        Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn contents_url(&self, target: &PushTarget<'_>, path: &str) -> String {
        format!(
            "{}/repos/{}/{}/contents/{}",
            self.api_url,
            target.owner,
            target.repo,
            path.trim_start_matches('/')
        )
    }

    fn request(&self, method: reqwest::Method, url: &str, token: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .header("Authorization", format!("Bearer {token}"))
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", USER_AGENT)
            .header("X-GitHub-Api-Version", "2022-11-28")
    }

    /// The blob sha of an existing file, needed to overwrite it.
    async fn existing_sha(&self, target: &PushTarget<'_>, path: &str) -> Result<Option<String>> {
        let url = self.contents_url(target, path);
        let response = self
            .request(reqwest::Method::GET, &url, target.token)
            .query(&[("ref", target.branch)])
            .send()
            .await
            .context("Failed to reach GitHub")?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("GitHub API error: {} - {}", status, body);
        }

        let entry: ContentsEntry = response
            .json()
            .await
            .context("Failed to parse GitHub contents response")?;
        Ok(Some(entry.sha))
    }

    async fn put_file(&self, target: &PushTarget<'_>, file: &ProjectFile) -> Result<()> {
        let sha = self.existing_sha(target, &file.path).await?;
        let body = PutContentsRequest {
            message: target.message,
            content: STANDARD.encode(file.content.as_bytes()),
            branch: target.branch,
            sha,
        };

        let url = self.contents_url(target, &file.path);
        let response = self
            .request(reqwest::Method::PUT, &url, target.token)
            .json(&body)
            .send()
            .await
            .context("Failed to reach GitHub")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("GitHub API error: {} - {}", status, body);
        }
        Ok(())
    }

    pub async fn push(&self, target: &PushTarget<'_>, files: &[ProjectFile]) -> PushReport {
        let mut report = PushReport {
            repository: format!("{}/{}", target.owner, target.repo),
            branch: target.branch.to_string(),
            pushed: Vec::new(),
            failed: Vec::new(),
        };

        for file in files {
            match self.put_file(target, file).await {
                Ok(()) => report.pushed.push(file.path.clone()),
                Err(err) => {
                    tracing::warn!("Failed to push {} to {}: {err:#}", file.path, report.repository);
                    report.failed.push(PushFailure {
                        path: file.path.clone(),
                        error: format!("{err:#}"),
                    });
                }
            }
        }

        tracing::info!(
            "Pushed {}/{} files to {}",
            report.pushed.len(),
            files.len(),
            report.repository
        );
        report
    }
}
