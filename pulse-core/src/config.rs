//! Configuration management for Pulse
//!
//! Configuration is loaded with the following priority (highest to lowest):
//! 1. CLI flags
//! 2. Environment variables (PUBLIC_REPO_OWNER, PUBLIC_REPO_NAME, SINCE_DATE,
//!    DATE_RANGE, PULSE_*)
//! 3. Config file (~/.config/pulse/config.toml)
//! 4. Default values
//!
//! The resulting [`Config`] is built once at startup and handed to every
//! extract by reference. Nothing below the CLI reads the environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::{Error, Result};

/// GitHub's public GraphQL endpoint
pub const DEFAULT_API_URL: &str = "https://api.github.com/graphql";

/// GitHub caps connection page sizes at 100
const MAX_PAGE_SIZE: u32 = 100;

/// Target repository and API endpoint
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GitHubConfig {
    /// GraphQL endpoint
    pub api_url: Url,

    /// Repository owner (user or organization)
    pub owner: Option<String>,

    /// Repository name
    pub repo: Option<String>,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            owner: None,
            repo: None,
        }
    }
}

fn default_api_url() -> Url {
    Url::parse(DEFAULT_API_URL).expect("default API URL is valid")
}

/// Query filters and page sizes
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FetchConfig {
    /// ISO-8601 date; issues updated and commits authored since then
    pub since: Option<String>,

    /// GitHub search range for pull requests, e.g. `2024-01-01..2024-03-31`
    pub date_range: Option<String>,

    pub issues_per_page: u32,
    pub pr_commits_per_page: u32,
    pub commits_per_page: u32,
    pub prs_per_page: u32,

    /// Review events fetched per pull request
    pub reviews_per_pr: u32,

    /// Timeline events fetched inline with each issue
    pub timeline_window: u32,

    /// Page through the rest of a timeline that overflows the inline window
    pub full_timeline: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            since: None,
            date_range: None,
            issues_per_page: 100,
            pr_commits_per_page: 100,
            commits_per_page: 100,
            prs_per_page: 50,
            reviews_per_pr: 100,
            timeline_window: 20,
            full_timeline: true,
        }
    }
}

/// Concurrency, request budget and rate-limit retry settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Pull requests resolved in parallel
    pub concurrency: usize,

    /// Stop paging after this many requests
    pub max_requests: Option<u64>,

    /// Stop paging once this much wall-clock time has passed
    #[serde(with = "humantime_serde")]
    pub max_duration: Option<Duration>,

    /// Total attempts per request when rate limited
    pub retry_attempts: u32,

    #[serde(with = "humantime_serde")]
    pub retry_base_delay: Duration,

    #[serde(with = "humantime_serde")]
    pub retry_max_delay: Duration,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            max_requests: None,
            max_duration: None,
            retry_attempts: 4,
            retry_base_delay: Duration::from_secs(1),
            retry_max_delay: Duration::from_secs(60),
        }
    }
}

/// Where the CSV extracts are written
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
    pub issues_file: String,
    pub commits_file: String,
    pub prs_file: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("."),
            issues_file: "issues.csv".to_string(),
            commits_file: "commits.csv".to_string(),
            prs_file: "prs.csv".to_string(),
        }
    }
}

impl OutputConfig {
    pub fn issues_path(&self) -> PathBuf {
        self.dir.join(&self.issues_file)
    }

    pub fn commits_path(&self) -> PathBuf {
        self.dir.join(&self.commits_file)
    }

    pub fn prs_path(&self) -> PathBuf {
        self.dir.join(&self.prs_file)
    }
}

/// Values supplied on the command line
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub owner: Option<String>,
    pub repo: Option<String>,
    pub since: Option<String>,
    pub date_range: Option<String>,
    pub output_dir: Option<PathBuf>,
    pub concurrency: Option<usize>,
    pub max_requests: Option<u64>,
}

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub github: GitHubConfig,
    pub fetch: FetchConfig,
    pub limits: LimitsConfig,
    pub output: OutputConfig,
}

impl Config {
    /// Load configuration from the default config file location
    ///
    /// Returns default config if file doesn't exist
    pub fn load() -> Result<Self> {
        if let Some(path) = Self::default_config_path() {
            if path.exists() {
                return Self::load_from_file(&path);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(Error::Io)?;
        toml::from_str(&contents).map_err(|e| {
            Error::Config(format!("Failed to parse config {}: {}", path.display(), e))
        })
    }

    /// Get the default config file path
    ///
    /// Returns `~/.config/pulse/config.toml` on Unix
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("pulse").join("config.toml"))
    }

    /// Apply overrides from the process environment
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_env_lookup(|key| std::env::var(key).ok())
    }

    /// Apply environment overrides through an arbitrary lookup
    ///
    /// Supported variables:
    /// - PUBLIC_REPO_OWNER / PUBLIC_REPO_NAME: target repository
    /// - SINCE_DATE: issue and commit cutoff
    /// - DATE_RANGE: pull request search range
    /// - PULSE_API_URL: GraphQL endpoint
    /// - PULSE_CONCURRENCY: parallel pull request resolution
    /// - PULSE_OUTPUT_DIR: directory for CSV extracts
    pub fn with_env_lookup<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(owner) = get("PUBLIC_REPO_OWNER") {
            self.github.owner = Some(owner);
        }
        if let Some(repo) = get("PUBLIC_REPO_NAME") {
            self.github.repo = Some(repo);
        }
        if let Some(since) = get("SINCE_DATE") {
            self.fetch.since = Some(since);
        }
        if let Some(range) = get("DATE_RANGE") {
            self.fetch.date_range = Some(range);
        }
        if let Some(url) = get("PULSE_API_URL") {
            self.github.api_url = Url::parse(&url)
                .map_err(|e| Error::Config(format!("Invalid PULSE_API_URL '{}': {}", url, e)))?;
        }
        if let Some(value) = get("PULSE_CONCURRENCY") {
            self.limits.concurrency = value.parse().map_err(|_| {
                Error::Config(format!("Invalid PULSE_CONCURRENCY '{}'", value))
            })?;
        }
        if let Some(dir) = get("PULSE_OUTPUT_DIR") {
            self.output.dir = PathBuf::from(dir);
        }

        Ok(self)
    }

    /// Apply CLI flag overrides
    pub fn with_cli_overrides(mut self, overrides: Overrides) -> Self {
        if let Some(owner) = overrides.owner {
            self.github.owner = Some(owner);
        }
        if let Some(repo) = overrides.repo {
            self.github.repo = Some(repo);
        }
        if let Some(since) = overrides.since {
            self.fetch.since = Some(since);
        }
        if let Some(range) = overrides.date_range {
            self.fetch.date_range = Some(range);
        }
        if let Some(dir) = overrides.output_dir {
            self.output.dir = dir;
        }
        if let Some(n) = overrides.concurrency {
            self.limits.concurrency = n;
        }
        if let Some(n) = overrides.max_requests {
            self.limits.max_requests = Some(n);
        }

        self
    }

    /// Load configuration with all overrides applied
    ///
    /// Priority: CLI > env > config file > defaults
    pub fn load_with_overrides(config_path: Option<&Path>, overrides: Overrides) -> Result<Self> {
        let base = match config_path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::load()?,
        };

        Ok(base.with_env_overrides()?.with_cli_overrides(overrides))
    }

    /// Check the settings every extract relies on
    pub fn validate(&self) -> Result<()> {
        self.repository()?;

        let pages = [
            ("issues_per_page", self.fetch.issues_per_page),
            ("pr_commits_per_page", self.fetch.pr_commits_per_page),
            ("commits_per_page", self.fetch.commits_per_page),
            ("prs_per_page", self.fetch.prs_per_page),
            ("reviews_per_pr", self.fetch.reviews_per_pr),
            ("timeline_window", self.fetch.timeline_window),
        ];
        for (name, value) in pages {
            if value == 0 || value > MAX_PAGE_SIZE {
                return Err(Error::Config(format!(
                    "fetch.{} must be between 1 and {}, got {}",
                    name, MAX_PAGE_SIZE, value
                )));
            }
        }

        if self.limits.concurrency == 0 {
            return Err(Error::Config(
                "limits.concurrency must be at least 1".to_string(),
            ));
        }
        if self.limits.retry_attempts == 0 {
            return Err(Error::Config(
                "limits.retry_attempts must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Target repository as `(owner, name)`
    pub fn repository(&self) -> Result<(&str, &str)> {
        let owner = self.github.owner.as_deref().filter(|s| !s.is_empty());
        let repo = self.github.repo.as_deref().filter(|s| !s.is_empty());

        match (owner, repo) {
            (Some(owner), Some(repo)) => Ok((owner, repo)),
            _ => Err(Error::Config(
                "Target repository not set. Use --repo owner/name or set \
                 PUBLIC_REPO_OWNER and PUBLIC_REPO_NAME"
                    .to_string(),
            )),
        }
    }

    /// Since-date required by the issue and commit extracts
    pub fn require_since(&self) -> Result<&str> {
        self.fetch
            .since
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                Error::Config("Since date not set. Use --since or set SINCE_DATE".to_string())
            })
    }
}
