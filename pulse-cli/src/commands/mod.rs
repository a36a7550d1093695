//! CLI command implementations

pub mod commits;
pub mod issues;
pub mod prs;

pub use issues::IssuesArgs;

use pulse_core::{Config, Secrets};
use pulse_github::{Budget, GitHubClient, RetryPolicy, RetryingExecutor};
use std::sync::Arc;

pub type Executor = RetryingExecutor<GitHubClient>;

/// Everything an extract needs, built once per invocation
///
/// The budget is shared so `pulse all` enforces one limit across extracts.
pub struct Context {
    pub config: Config,
    pub executor: Arc<Executor>,
    pub budget: Budget,
}

impl Context {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        config.validate()?;

        let secrets = Secrets::load()?;
        let client = GitHubClient::from_config(&config, &secrets)?;
        let budget = Budget::from_limits(&config.limits);
        let executor =
            RetryingExecutor::new(client, RetryPolicy::from_limits(&config.limits)).with_budget(budget.clone());

        Ok(Self {
            config,
            executor: Arc::new(executor),
            budget,
        })
    }

    pub fn log_usage(&self) {
        tracing::info!(requests = self.budget.requests_used(), "API requests issued");
    }
}

/// Report a truncated extract without failing the run
pub(crate) fn warn_incomplete(what: &str, error: Option<&pulse_github::Error>) {
    if let Some(err) = error {
        eprintln!("Warning: {} extract is incomplete: {}", what, err);
    }
}
