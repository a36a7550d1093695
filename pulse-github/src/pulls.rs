//! Pull-request review turnaround extract

use chrono::{DateTime, Utc};
use pulse_core::Config;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::graphql::{null_as_default, Connection, QueryExecutor};
use crate::pagination::{Budget, PageWalker, PathShape};
use crate::{Error, Result};

const SEARCH_QUERY: &str = r#"query($search: String!, $first: Int!, $reviews: Int!, $cursor: String) {
  search(query: $search, type: ISSUE, first: $first, after: $cursor) {
    pageInfo { hasNextPage endCursor }
    nodes {
      __typename
      ... on PullRequest {
        number
        state
        createdAt
        mergedAt
        author { login }
        timelineItems(first: $reviews, itemTypes: [PULL_REQUEST_REVIEW]) {
          nodes {
            ... on PullRequestReview {
              state
              submittedAt
              author { login }
            }
          }
        }
      }
    }
  }
}"#;

#[derive(Debug, Clone, Default, Deserialize)]
struct Actor {
    #[serde(default)]
    login: Option<String>,
}

/// Search hit; fields are absent when the hit is not a pull request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullRequestNode {
    #[serde(default)]
    number: Option<u64>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    merged_at: Option<DateTime<Utc>>,
    #[serde(default)]
    author: Option<Actor>,
    #[serde(default, deserialize_with = "null_as_default")]
    timeline_items: Connection<Review>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Review {
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    submitted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    author: Option<Actor>,
}

/// One `prs.csv` row; intervals are empty when an endpoint is missing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrMetricsRow {
    pub pr_number: u64,
    pub time_to_first_review_sec: Option<i64>,
    pub time_to_approval_sec: Option<i64>,
    pub time_to_merge_sec: Option<i64>,
    pub was_merged: u8,
}

impl PrMetricsRow {
    pub const HEADERS: [&'static str; 5] = [
        "pr_number",
        "time_to_first_review_sec",
        "time_to_approval_sec",
        "time_to_merge_sec",
        "was_merged",
    ];
}

fn seconds_between(from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Option<i64> {
    Some((to? - from?).num_seconds())
}

impl PullRequestNode {
    fn metrics(self, number: u64) -> PrMetricsRow {
        let pr_author = self.author.and_then(|a| a.login);

        let mut reviews: Vec<Review> = self
            .timeline_items
            .nodes
            .into_iter()
            .flatten()
            .filter(|r| r.submitted_at.is_some())
            .filter(|r| {
                let reviewer = r.author.as_ref().and_then(|a| a.login.as_deref());
                matches!(reviewer, Some(login) if Some(login) != pr_author.as_deref())
            })
            .collect();
        reviews.sort_by_key(|r| r.submitted_at);

        let first_review = reviews.first().and_then(|r| r.submitted_at);
        let first_approval = reviews
            .iter()
            .find(|r| r.state.as_deref() == Some("APPROVED"))
            .and_then(|r| r.submitted_at);

        PrMetricsRow {
            pr_number: number,
            time_to_first_review_sec: seconds_between(self.created_at, first_review),
            time_to_approval_sec: seconds_between(first_review, first_approval),
            time_to_merge_sec: seconds_between(first_approval, self.merged_at),
            was_merged: u8::from(self.state.as_deref() == Some("MERGED")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PullQuery {
    pub owner: String,
    pub name: String,
    /// GitHub search date qualifier, e.g. `2024-01-01..2024-03-31`
    pub date_range: Option<String>,
    pub per_page: u32,
    pub reviews_per_pr: u32,
}

impl PullQuery {
    pub fn from_config(config: &Config) -> Result<Self> {
        let (owner, name) = config.repository()?;
        Ok(Self {
            owner: owner.to_string(),
            name: name.to_string(),
            date_range: config.fetch.date_range.clone().filter(|r| !r.is_empty()),
            per_page: config.fetch.prs_per_page,
            reviews_per_pr: config.fetch.reviews_per_pr,
        })
    }

    /// Search string selecting the repository's public pull requests
    pub fn search_string(&self) -> String {
        let mut search = format!("repo:{}/{} is:pr is:public", self.owner, self.name);
        if let Some(range) = &self.date_range {
            search.push_str(" created:");
            search.push_str(range);
        }
        search
    }
}

#[derive(Debug)]
pub struct PrMetricsExtract {
    pub rows: Vec<PrMetricsRow>,
    /// Failure after the first search page; earlier rows are kept
    pub stopped_early: Option<Error>,
}

/// Review turnaround metrics for every matching pull request
pub async fn fetch_pr_metrics<E>(executor: &E, query: &PullQuery, budget: &Budget) -> Result<PrMetricsExtract>
where
    E: QueryExecutor + ?Sized,
{
    let search = query.search_string();
    info!(search = %search, "Fetching pull request review metrics");

    let variables = json!({
        "search": search,
        "first": query.per_page,
        "reviews": query.reviews_per_pr,
    });
    let walk = PageWalker::new(executor, SEARCH_QUERY, variables, PathShape::<PullRequestNode>::new(&["search"]))
        .with_budget(budget.clone())
        .collect()
        .await
        .unless_first_page_failed()?;

    if let Some(err) = &walk.error {
        warn!(prs = walk.nodes.len(), error = %err, "Pull request search stopped early");
    }

    let total = walk.nodes.len();
    let rows: Vec<PrMetricsRow> = walk
        .nodes
        .into_iter()
        .filter_map(|node| {
            let number = node.number?;
            Some(node.metrics(number))
        })
        .collect();
    if rows.len() < total {
        debug!(skipped = total - rows.len(), "Skipped search hits that are not pull requests");
    }

    info!(prs = rows.len(), pages = walk.pages, "Fetched pull request metrics");
    Ok(PrMetricsExtract {
        rows,
        stopped_early: walk.error,
    })
}
