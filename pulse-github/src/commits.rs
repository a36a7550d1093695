//! Default-branch commit history extract

use chrono::{DateTime, Utc};
use pulse_core::Config;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::aggregate::format_timestamp;
use crate::contributors::CommitAuthor;
use crate::graphql::{lookup, QueryExecutor};
use crate::pagination::{Budget, PageWalker, PathShape};
use crate::{Error, Result};

/// Branch assumed when the repository reports none
pub const FALLBACK_BRANCH: &str = "main";

const UNKNOWN_AUTHOR: &str = "Unknown";

const DEFAULT_BRANCH_QUERY: &str = r#"query($owner: String!, $name: String!) {
  repository(owner: $owner, name: $name) {
    defaultBranchRef { name }
  }
}"#;

const HISTORY_QUERY: &str = r#"query($owner: String!, $name: String!, $branch: String!, $since: GitTimestamp!, $first: Int!, $cursor: String) {
  repository(owner: $owner, name: $name) {
    ref(qualifiedName: $branch) {
      target {
        ... on Commit {
          history(first: $first, since: $since, after: $cursor) {
            pageInfo { hasNextPage endCursor }
            nodes {
              oid
              messageHeadline
              committedDate
              changedFilesIfAvailable
              additions
              deletions
              author {
                name
                email
                user { login }
              }
            }
          }
        }
      }
    }
  }
}"#;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommitNode {
    oid: String,
    #[serde(default)]
    message_headline: Option<String>,
    committed_date: DateTime<Utc>,
    #[serde(default)]
    changed_files_if_available: Option<u64>,
    #[serde(default)]
    additions: Option<u64>,
    #[serde(default)]
    deletions: Option<u64>,
    #[serde(default)]
    author: Option<CommitAuthor>,
}

/// One `commits.csv` row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitRow {
    pub sha: String,
    pub message: String,
    pub created_date: String,
    pub number_of_files_updated: u64,
    /// Lines added plus lines deleted
    pub diff: u64,
    pub author: String,
}

impl CommitRow {
    pub const HEADERS: [&'static str; 6] = [
        "sha",
        "message",
        "created_date",
        "number_of_files_updated",
        "diff",
        "author",
    ];

    fn from_node(node: CommitNode) -> Self {
        Self {
            sha: node.oid,
            message: node.message_headline.unwrap_or_default(),
            created_date: format_timestamp(&node.committed_date),
            number_of_files_updated: node.changed_files_if_available.unwrap_or(0),
            diff: node.additions.unwrap_or(0) + node.deletions.unwrap_or(0),
            author: node
                .author
                .as_ref()
                .and_then(CommitAuthor::identity)
                .unwrap_or_else(|| UNKNOWN_AUTHOR.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommitQuery {
    pub owner: String,
    pub name: String,
    pub since: String,
    pub per_page: u32,
}

impl CommitQuery {
    pub fn from_config(config: &Config) -> Result<Self> {
        let (owner, name) = config.repository()?;
        Ok(Self {
            owner: owner.to_string(),
            name: name.to_string(),
            since: config.require_since()?.to_string(),
            per_page: config.fetch.commits_per_page,
        })
    }
}

#[derive(Debug)]
pub struct CommitExtract {
    pub branch: String,
    pub rows: Vec<CommitRow>,
    /// Failure after the first history page; earlier commits are kept
    pub stopped_early: Option<Error>,
}

/// Name of the repository's default branch
///
/// Falls back to [`FALLBACK_BRANCH`] when GitHub reports no default
/// branch or answers with GraphQL errors only.
pub async fn default_branch<E>(executor: &E, owner: &str, name: &str, budget: &Budget) -> Result<String>
where
    E: QueryExecutor + ?Sized,
{
    budget.try_acquire()?;
    let response = match executor
        .execute(DEFAULT_BRANCH_QUERY, &json!({"owner": owner, "name": name}))
        .await
    {
        Ok(response) => response,
        Err(err @ Error::Application(_)) => {
            warn!(error = %err, fallback = FALLBACK_BRANCH, "Could not query default branch");
            return Ok(FALLBACK_BRANCH.to_string());
        }
        Err(err) => return Err(err),
    };

    let data = response.data.unwrap_or_default();
    if lookup(&data, &["repository"]).is_none() {
        return Err(Error::MissingEntity(format!("repository {}/{}", owner, name)));
    }

    match lookup(&data, &["repository", "defaultBranchRef", "name"]).and_then(|v| v.as_str()) {
        Some(branch) if !branch.is_empty() => Ok(branch.to_string()),
        _ => {
            warn!(fallback = FALLBACK_BRANCH, "Repository reports no default branch");
            Ok(FALLBACK_BRANCH.to_string())
        }
    }
}

/// Commits on the default branch since the configured date
pub async fn fetch_commits<E>(executor: &E, query: &CommitQuery, budget: &Budget) -> Result<CommitExtract>
where
    E: QueryExecutor + ?Sized,
{
    let branch = default_branch(executor, &query.owner, &query.name, budget).await?;
    info!(
        owner = %query.owner,
        repo = %query.name,
        branch = %branch,
        since = %query.since,
        "Fetching commits"
    );

    let variables = json!({
        "owner": query.owner,
        "name": query.name,
        "branch": branch,
        "since": query.since,
        "first": query.per_page,
    });
    let shape = PathShape::<CommitNode>::new(&["repository", "ref", "target", "history"])
        .require(1, format!("repository {}/{}", query.owner, query.name));

    let walk = PageWalker::new(executor, HISTORY_QUERY, variables, shape)
        .with_budget(budget.clone())
        .collect()
        .await
        .unless_first_page_failed()?;

    if walk.pages == 0 && walk.is_complete() {
        warn!(branch = %branch, "No commit history found for branch");
    }
    if let Some(err) = &walk.error {
        warn!(commits = walk.nodes.len(), error = %err, "Commit listing stopped early");
    }

    let rows: Vec<CommitRow> = walk.nodes.into_iter().map(CommitRow::from_node).collect();
    info!(commits = rows.len(), pages = walk.pages, "Fetched commits");

    Ok(CommitExtract {
        branch,
        rows,
        stopped_early: walk.error,
    })
}
