//! Pulse GitHub - activity extraction over the GitHub GraphQL API
//!
//! The core is the issue pipeline: list issues, pick the pull requests
//! their timelines reference, resolve each pull request's commit authors
//! and join them back onto the issues. Commit history and pull-request
//! review metrics are extracted alongside it.

mod aggregate;
mod client;
mod commits;
mod contributors;
mod error;
mod graphql;
mod issues;
mod pagination;
mod pipeline;
mod pulls;
mod retry;
mod timeline;

#[cfg(test)]
mod testing;

pub use aggregate::{aggregate, format_timestamp, IssueRow};
pub use client::{parse_repository, GitHubClient};
pub use commits::{default_branch, fetch_commits, CommitExtract, CommitQuery, CommitRow};
pub use contributors::{CommitAuthor, ContributorReport, ContributorResolver, KeyFailure};
pub use error::{Error, Result};
pub use graphql::{ApiError, Connection, PageInfo, QueryExecutor, QueryResponse};
pub use issues::{fetch_issues, IssueHarvest, IssueQuery, IssueRecord, IssueState};
pub use pagination::{Budget, PageShape, PageWalker, PathShape, Walk};
pub use pipeline::{IssuePipeline, PipelineReport, PipelineStats};
pub use pulls::{fetch_pr_metrics, PrMetricsExtract, PrMetricsRow, PullQuery};
pub use retry::{RetryPolicy, RetryingExecutor};
pub use timeline::{resolve_timeline, PrKey, PrWorkList, TimelineEvent};
