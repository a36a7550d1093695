//! Commit authors of linked pull requests

use serde::Deserialize;
use serde_json::json;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::graphql::QueryExecutor;
use crate::pagination::{Budget, PageWalker, PathShape};
use crate::timeline::PrKey;
use crate::Error;

pub const PR_COMMITS_QUERY: &str = r#"query($owner: String!, $name: String!, $number: Int!, $first: Int!, $cursor: String) {
  repository(owner: $owner, name: $name) {
    pullRequest(number: $number) {
      commits(first: $first, after: $cursor) {
        pageInfo { hasNextPage endCursor }
        nodes {
          commit {
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
}"#;

/// Git author of a commit, with the linked GitHub account if any
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommitAuthor {
    #[serde(default)]
    pub user: Option<AuthorUser>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthorUser {
    #[serde(default)]
    pub login: Option<String>,
}

impl CommitAuthor {
    /// Canonical identity: account login, else name, else email
    ///
    /// Blank values are skipped.
    pub fn identity(&self) -> Option<String> {
        let login = self.user.as_ref().and_then(|u| u.login.as_deref());
        [login, self.name.as_deref(), self.email.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|s| !s.is_empty())
            .map(str::to_string)
    }
}

#[derive(Debug, Deserialize)]
struct PrCommitNode {
    #[serde(default)]
    commit: Option<PrCommit>,
}

#[derive(Debug, Deserialize)]
struct PrCommit {
    #[serde(default)]
    author: Option<CommitAuthor>,
}

/// A key whose contributors could not be fully resolved
#[derive(Debug)]
pub struct KeyFailure {
    pub key: PrKey,
    pub error: Error,
}

/// Contributors per pull request
///
/// Every submitted key is present in `contributors`; failed keys map to
/// whatever was resolved before the failure, usually nothing.
#[derive(Debug, Default)]
pub struct ContributorReport {
    pub contributors: HashMap<PrKey, BTreeSet<String>>,
    pub failures: Vec<KeyFailure>,
}

impl ContributorReport {
    pub fn resolved(&self) -> usize {
        self.contributors.len().saturating_sub(self.failures.len())
    }
}

/// Resolves commit authors for a set of pull requests with a bounded pool
pub struct ContributorResolver<E> {
    executor: Arc<E>,
    per_page: u32,
    concurrency: usize,
    budget: Budget,
}

impl<E> ContributorResolver<E>
where
    E: QueryExecutor + 'static,
{
    pub fn new(executor: Arc<E>, per_page: u32, concurrency: usize) -> Self {
        Self {
            executor,
            per_page,
            concurrency: concurrency.max(1),
            budget: Budget::unlimited(),
        }
    }

    pub fn with_budget(mut self, budget: Budget) -> Self {
        self.budget = budget;
        self
    }

    /// Resolve every key, each exactly once
    pub async fn resolve_all<I>(&self, keys: I) -> ContributorReport
    where
        I: IntoIterator<Item = PrKey>,
    {
        let keys: BTreeSet<PrKey> = keys.into_iter().collect();
        info!(
            prs = keys.len(),
            concurrency = self.concurrency,
            "Resolving pull request contributors"
        );

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();

        for key in keys.iter().cloned() {
            let semaphore = Arc::clone(&semaphore);
            let executor = Arc::clone(&self.executor);
            let budget = self.budget.clone();
            let per_page = self.per_page;

            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    let err = Error::Protocol("worker pool closed".to_string());
                    return (key, BTreeSet::new(), Some(err));
                };
                let (authors, error) = resolve_key(executor.as_ref(), &key, per_page, &budget).await;
                (key, authors, error)
            });
        }

        let mut report = ContributorReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((key, authors, error)) => {
                    if let Some(error) = error {
                        warn!(pr = %key, error = %error, "Contributor resolution failed");
                        report.failures.push(KeyFailure {
                            key: key.clone(),
                            error,
                        });
                    } else {
                        debug!(pr = %key, authors = authors.len(), "Resolved contributors");
                    }
                    report.contributors.insert(key, authors);
                }
                Err(err) => warn!(error = %err, "Contributor worker did not finish"),
            }
        }

        // a worker that panicked never reported its key
        for key in keys {
            if !report.contributors.contains_key(&key) {
                report.failures.push(KeyFailure {
                    key: key.clone(),
                    error: Error::Protocol("worker task failed".to_string()),
                });
                report.contributors.insert(key, BTreeSet::new());
            }
        }

        info!(
            resolved = report.resolved(),
            failed = report.failures.len(),
            "Resolved pull request contributors"
        );
        report
    }
}

/// Commit authors of one pull request; identities gathered before a failure
/// are returned with it
async fn resolve_key<E>(executor: &E, key: &PrKey, per_page: u32, budget: &Budget) -> (BTreeSet<String>, Option<Error>)
where
    E: QueryExecutor + ?Sized,
{
    let variables = json!({
        "owner": key.owner,
        "name": key.repo,
        "number": key.number,
        "first": per_page,
    });
    let shape = PathShape::<PrCommitNode>::new(&["repository", "pullRequest", "commits"])
        .require(2, format!("pull request {}", key));

    let walk = PageWalker::new(executor, PR_COMMITS_QUERY, variables, shape)
        .with_budget(budget.clone())
        .collect()
        .await;

    let authors = walk
        .nodes
        .iter()
        .filter_map(|node| node.commit.as_ref()?.author.as_ref()?.identity())
        .collect();
    (authors, walk.error)
}
