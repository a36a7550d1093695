//! Issue → pull request → contributor pipeline

use pulse_core::Config;
use std::sync::Arc;
use tracing::info;

use crate::aggregate::{aggregate, IssueRow};
use crate::contributors::{ContributorResolver, KeyFailure};
use crate::graphql::QueryExecutor;
use crate::issues::{fetch_issues, IssueQuery};
use crate::pagination::Budget;
use crate::{Error, Result};

/// Counts describing one pipeline run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub issues: usize,
    pub issue_pages: usize,
    pub unique_prs: usize,
    pub resolved_prs: usize,
    pub failed_prs: usize,
    pub requests: u64,
}

/// Output rows plus everything that went wrong along the way
#[derive(Debug)]
pub struct PipelineReport {
    pub rows: Vec<IssueRow>,
    pub stats: PipelineStats,
    /// Pull requests whose contributors could not be fully resolved
    pub failures: Vec<KeyFailure>,
    /// Set when the issue listing ended before its last page
    pub issue_listing_error: Option<Error>,
}

impl PipelineReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.issue_listing_error.is_none()
    }
}

/// Issues with the contributors of every pull request they link
pub struct IssuePipeline<E> {
    executor: Arc<E>,
    query: IssueQuery,
    commits_per_page: u32,
    concurrency: usize,
    budget: Budget,
}

impl<E> IssuePipeline<E>
where
    E: QueryExecutor + 'static,
{
    pub fn new(executor: Arc<E>, query: IssueQuery, commits_per_page: u32, concurrency: usize) -> Self {
        Self {
            executor,
            query,
            commits_per_page,
            concurrency,
            budget: Budget::unlimited(),
        }
    }

    pub fn from_config(executor: Arc<E>, config: &Config) -> Result<Self> {
        Ok(Self::new(
            executor,
            IssueQuery::from_config(config)?,
            config.fetch.pr_commits_per_page,
            config.limits.concurrency,
        )
        .with_budget(Budget::from_limits(&config.limits)))
    }

    pub fn with_budget(mut self, budget: Budget) -> Self {
        self.budget = budget;
        self
    }

    /// Run all three stages
    ///
    /// Only a failure of the first issue page is returned as an error.
    pub async fn run(&self) -> Result<PipelineReport> {
        let harvest = fetch_issues(self.executor.as_ref(), &self.query, &self.budget).await?;

        let unique_prs = harvest.work_list.len();
        let report = ContributorResolver::new(Arc::clone(&self.executor), self.commits_per_page, self.concurrency)
            .with_budget(self.budget.clone())
            .resolve_all(harvest.work_list.into_keys())
            .await;

        let rows = aggregate(&harvest.issues, &report.contributors);

        let stats = PipelineStats {
            issues: rows.len(),
            issue_pages: harvest.pages,
            unique_prs,
            resolved_prs: report.resolved(),
            failed_prs: report.failures.len(),
            requests: self.budget.requests_used(),
        };
        info!(
            issues = stats.issues,
            unique_prs = stats.unique_prs,
            failed_prs = stats.failed_prs,
            requests = stats.requests,
            "Issue pipeline finished"
        );

        Ok(PipelineReport {
            rows,
            stats,
            failures: report.failures,
            issue_listing_error: harvest.stopped_early,
        })
    }
}
