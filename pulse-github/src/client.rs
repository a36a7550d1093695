//! GitHub GraphQL client over reqwest

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use pulse_core::{Config, Secrets};
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use url::Url;

use crate::graphql::{GraphQlResponse, QueryExecutor, QueryResponse};
use crate::{Error, Result};

const USER_AGENT: &str = concat!("pulse/", env!("CARGO_PKG_VERSION"));

/// GitHub GraphQL API client
///
/// One instance is shared by every extract; reqwest pools the connections.
pub struct GitHubClient {
    http: reqwest::Client,
    endpoint: Url,
    token: String,
}

impl GitHubClient {
    /// Create a client for an endpoint and token
    pub fn new(endpoint: Url, token: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| Error::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            endpoint,
            token: token.into(),
        })
    }

    /// Create a client from the run configuration
    ///
    /// Token is loaded from (in priority order):
    /// 1. GITHUB_TOKEN environment variable
    /// 2. ~/.config/pulse/secrets.toml
    pub fn from_config(config: &Config, secrets: &Secrets) -> Result<Self> {
        let token = secrets.github_token().ok_or_else(|| {
            Error::Auth(
                "GitHub token not found. Set GITHUB_TOKEN environment variable \
                 or add token to ~/.config/pulse/secrets.toml"
                    .to_string(),
            )
        })?;

        let client = Self::new(config.github.api_url.clone(), token)?;
        info!(endpoint = %client.endpoint, "Created GitHub client");
        Ok(client)
    }
}

#[async_trait]
impl QueryExecutor for GitHubClient {
    async fn execute(&self, query: &str, variables: &Value) -> Result<QueryResponse> {
        debug!(endpoint = %self.endpoint, "Executing GraphQL query");

        let response = self
            .http
            .post(self.endpoint.clone())
            .bearer_auth(&self.token)
            .json(&json!({
                "query": query,
                "variables": variables,
            }))
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        let status = response.status();
        let reset_at = rate_limit_reset(response.headers());
        if let Some(remaining) = header_u64(response.headers(), "x-ratelimit-remaining") {
            debug!(remaining, "Rate limit budget");
        }

        let body = response
            .text()
            .await
            .map_err(|e| Error::Transport(format!("Unable to read response: {}", e)))?;

        if is_rate_limit_status(status, &body) {
            warn!(status = status.as_u16(), reset_at = ?reset_at, "GitHub rate limit hit");
            return Err(Error::RateLimited {
                reset_at,
                message: truncate(&body, 200),
            });
        }

        if !status.is_success() {
            return Err(Error::HttpStatus {
                status: status.as_u16(),
                body: truncate(&body, 500),
            });
        }

        let parsed: GraphQlResponse = serde_json::from_str(&body)
            .map_err(|e| Error::Protocol(format!("Failed to parse GraphQL response: {}", e)))?;

        QueryResponse::classify(parsed.data, parsed.errors, reset_at)
    }
}

impl std::fmt::Debug for GitHubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubClient")
            .field("endpoint", &self.endpoint.as_str())
            .finish_non_exhaustive()
    }
}

/// 429 always means rate limited; 403 only when the body says so
fn is_rate_limit_status(status: StatusCode, body: &str) -> bool {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return true;
    }
    if status == StatusCode::FORBIDDEN {
        let lower = body.to_lowercase();
        return lower.contains("rate limit")
            || lower.contains("abuse detection")
            || lower.contains("secondary rate");
    }
    false
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

/// `x-ratelimit-reset` is a unix timestamp in seconds
fn rate_limit_reset(headers: &HeaderMap) -> Option<DateTime<Utc>> {
    let secs = header_u64(headers, "x-ratelimit-reset")?;
    Utc.timestamp_opt(i64::try_from(secs).ok()?, 0).single()
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

/// Parse a repository argument into owner and name
///
/// Supports formats:
/// - owner/repo
/// - https://github.com/owner/repo
/// - git@github.com:owner/repo.git
pub fn parse_repository(spec: &str) -> Result<(String, String)> {
    let spec = spec.trim();
    let invalid = || Error::Parse(format!("Invalid repository: {}. Expected owner/repo", spec));

    let path = if spec.starts_with("https://") || spec.starts_with("http://") {
        let url = Url::parse(spec).map_err(|e| Error::Parse(e.to_string()))?;
        url.path().trim_matches('/').to_string()
    } else if let Some(rest) = spec.strip_prefix("git@") {
        rest.split_once(':').map(|(_, p)| p.to_string()).ok_or_else(invalid)?
    } else {
        spec.to_string()
    };

    let path = path.trim_end_matches(".git");
    let mut parts = path.split('/');
    match (parts.next(), parts.next()) {
        (Some(owner), Some(repo)) if !owner.is_empty() && !repo.is_empty() => {
            // URLs may carry extra segments (/tree/main); shorthand may not
            if parts.next().is_some() && !spec.contains("://") {
                return Err(invalid());
            }
            Ok((owner.to_string(), repo.to_string()))
        }
        _ => Err(invalid()),
    }
}
