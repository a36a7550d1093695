//! Issue listing with linked pull requests

use chrono::{DateTime, Utc};
use pulse_core::Config;
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

use crate::graphql::{null_as_default, Connection, QueryExecutor};
use crate::pagination::{Budget, PageWalker, PathShape};
use crate::timeline::{resolve_timeline, PrKey, PrWorkList, TimelineEvent};
use crate::{Error, Result};

/// Page size used when following a timeline past its inline window
const TIMELINE_PAGE_SIZE: u32 = 100;

const TIMELINE_FIELDS: &str = r#"
          pageInfo { hasNextPage endCursor }
          nodes {
            __typename
            ... on ClosedEvent {
              closer {
                __typename
                ... on PullRequest { number repository { nameWithOwner } }
              }
            }
            ... on CrossReferencedEvent {
              source {
                __typename
                ... on PullRequest { number repository { nameWithOwner } }
              }
            }
          }"#;

/// Issues updated since a date, most recently updated first
pub fn issues_query() -> String {
    format!(
        r#"query($owner: String!, $name: String!, $since: DateTime!, $first: Int!, $timelineWindow: Int!, $cursor: String) {{
  repository(owner: $owner, name: $name) {{
    issues(first: $first, after: $cursor, filterBy: {{since: $since}}, orderBy: {{field: UPDATED_AT, direction: DESC}}) {{
      pageInfo {{ hasNextPage endCursor }}
      nodes {{
        id
        number
        title
        state
        createdAt
        closedAt
        timelineItems(first: $timelineWindow, itemTypes: [CLOSED_EVENT, CROSS_REFERENCED_EVENT]) {{{timeline}
        }}
      }}
    }}
  }}
}}"#,
        timeline = TIMELINE_FIELDS
    )
}

/// Remainder of one issue's timeline, addressed by node id
pub fn timeline_query() -> String {
    format!(
        r#"query($id: ID!, $first: Int!, $cursor: String) {{
  node(id: $id) {{
    ... on Issue {{
      timelineItems(first: $first, after: $cursor, itemTypes: [CLOSED_EVENT, CROSS_REFERENCED_EVENT]) {{{timeline}
      }}
    }}
  }}
}}"#,
        timeline = TIMELINE_FIELDS
    )
}

/// Issue lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IssueState {
    Open,
    Closed,
}

impl IssueState {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueState::Open => "OPEN",
            IssueState::Closed => "CLOSED",
        }
    }
}

/// An issue together with the pull requests its timeline references
#[derive(Debug, Clone, PartialEq)]
pub struct IssueRecord {
    /// Opaque GraphQL node id
    pub id: String,
    pub number: u64,
    pub title: String,
    pub state: IssueState,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub linked_prs: BTreeSet<PrKey>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IssueNode {
    id: String,
    number: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    title: String,
    state: IssueState,
    created_at: DateTime<Utc>,
    #[serde(default)]
    closed_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "null_as_default")]
    timeline_items: Connection<TimelineEvent>,
}

/// What to list
#[derive(Debug, Clone)]
pub struct IssueQuery {
    pub owner: String,
    pub name: String,
    /// ISO-8601 lower bound on `updatedAt`
    pub since: String,
    pub per_page: u32,
    pub timeline_window: u32,
    /// Page through timelines longer than the inline window
    pub full_timeline: bool,
}

impl IssueQuery {
    pub fn from_config(config: &Config) -> Result<Self> {
        let (owner, name) = config.repository()?;
        Ok(Self {
            owner: owner.to_string(),
            name: name.to_string(),
            since: config.require_since()?.to_string(),
            per_page: config.fetch.issues_per_page,
            timeline_window: config.fetch.timeline_window,
            full_timeline: config.fetch.full_timeline,
        })
    }
}

/// Issues collected by [`fetch_issues`]
#[derive(Debug, Default)]
pub struct IssueHarvest {
    /// Issues in fetch order
    pub issues: Vec<IssueRecord>,
    /// Every distinct key referenced by any issue
    pub work_list: PrWorkList,
    pub pages: usize,
    /// Failure on a page after the first; earlier issues are kept
    pub stopped_early: Option<Error>,
}

/// List issues and resolve the pull requests each one references
///
/// A failure on the first page is returned; a later failure stops the
/// listing and is recorded on the harvest.
pub async fn fetch_issues<E>(executor: &E, query: &IssueQuery, budget: &Budget) -> Result<IssueHarvest>
where
    E: QueryExecutor + ?Sized,
{
    info!(
        owner = %query.owner,
        repo = %query.name,
        since = %query.since,
        "Fetching issues"
    );

    let document = issues_query();
    let variables = json!({
        "owner": query.owner,
        "name": query.name,
        "since": query.since,
        "first": query.per_page,
        "timelineWindow": query.timeline_window,
    });
    let shape = PathShape::<IssueNode>::new(&["repository", "issues"])
        .require(1, format!("repository {}/{}", query.owner, query.name));
    let mut walker = PageWalker::new(executor, &document, variables, shape).with_budget(budget.clone());

    let mut harvest = IssueHarvest::default();
    loop {
        match walker.next_page().await {
            Ok(Some(nodes)) => {
                debug!(page = walker.pages_fetched(), issues = nodes.len(), "Processing issue page");
                for node in nodes {
                    let record = build_record(executor, query, budget, node).await;
                    harvest.work_list.extend(&record.linked_prs);
                    harvest.issues.push(record);
                }
            }
            Ok(None) => break,
            Err(err) if walker.pages_fetched() == 0 => return Err(err),
            Err(err) => {
                warn!(
                    pages = walker.pages_fetched(),
                    issues = harvest.issues.len(),
                    error = %err,
                    "Issue listing stopped early, continuing with issues already fetched"
                );
                harvest.stopped_early = Some(err);
                break;
            }
        }
    }
    harvest.pages = walker.pages_fetched();

    info!(
        issues = harvest.issues.len(),
        unique_prs = harvest.work_list.len(),
        pages = harvest.pages,
        "Fetched issues"
    );
    Ok(harvest)
}

async fn build_record<E>(executor: &E, query: &IssueQuery, budget: &Budget, node: IssueNode) -> IssueRecord
where
    E: QueryExecutor + ?Sized,
{
    let window = node.timeline_items;
    let mut events: Vec<TimelineEvent> = window.nodes.into_iter().flatten().collect();

    if window.page_info.has_next_page {
        if query.full_timeline {
            let rest = fetch_remaining_timeline(executor, budget, &node.id, node.number, window.page_info.end_cursor).await;
            events.extend(rest);
        } else {
            warn!(
                issue = node.number,
                window = query.timeline_window,
                "Timeline truncated, later pull-request references are not resolved"
            );
        }
    }

    IssueRecord {
        linked_prs: resolve_timeline(node.number, &events),
        id: node.id,
        number: node.number,
        title: node.title,
        state: node.state,
        created_at: node.created_at,
        closed_at: node.closed_at,
    }
}

/// Events past the inline window; a failure keeps what was fetched
async fn fetch_remaining_timeline<E>(
    executor: &E,
    budget: &Budget,
    id: &str,
    number: u64,
    cursor: Option<String>,
) -> Vec<TimelineEvent>
where
    E: QueryExecutor + ?Sized,
{
    let document = timeline_query();
    let shape = PathShape::<TimelineEvent>::new(&["node", "timelineItems"]).require(1, format!("issue #{}", number));
    let walk = PageWalker::new(
        executor,
        &document,
        json!({"id": id, "first": TIMELINE_PAGE_SIZE}),
        shape,
    )
    .starting_after(cursor)
    .with_budget(budget.clone())
    .collect()
    .await;

    debug!(issue = number, events = walk.nodes.len(), pages = walk.pages, "Followed long timeline");
    if let Some(err) = &walk.error {
        warn!(issue = number, error = %err, "Timeline continuation failed, keeping events fetched so far");
    }
    walk.nodes
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::testing::ScriptedExecutor;
    use serde_json::{json, Value};

    pub(crate) fn query() -> IssueQuery {
        IssueQuery {
            owner: "acme".to_string(),
            name: "widgets".to_string(),
            since: "2024-01-01T00:00:00Z".to_string(),
            per_page: 2,
            timeline_window: 20,
            full_timeline: true,
        }
    }

    pub(crate) fn pr_ref(repo: &str, number: u64) -> Value {
        json!({
            "__typename": "CrossReferencedEvent",
            "source": {"__typename": "PullRequest", "number": number, "repository": {"nameWithOwner": repo}}
        })
    }

    pub(crate) fn issue(number: u64, events: Vec<Value>) -> Value {
        json!({
            "id": format!("I_{}", number),
            "number": number,
            "title": format!("Issue {}", number),
            "state": "OPEN",
            "createdAt": "2024-02-01T10:00:00Z",
            "closedAt": null,
            "timelineItems": {"pageInfo": {"hasNextPage": false, "endCursor": null}, "nodes": events}
        })
    }

    pub(crate) fn issue_page(issues: Vec<Value>, next: Option<&str>) -> Value {
        json!({
            "repository": {"issues": {
                "pageInfo": {"hasNextPage": next.is_some(), "endCursor": next},
                "nodes": issues
            }}
        })
    }

    #[tokio::test]
    async fn test_collects_issues_and_unique_keys() {
        let executor = ScriptedExecutor::new();
        executor.push_data(issue_page(
            vec![
                issue(1, vec![pr_ref("acme/widgets", 10)]),
                issue(2, vec![pr_ref("acme/widgets", 10), pr_ref("acme/widgets", 11)]),
            ],
            Some("c1"),
        ));
        executor.push_data(issue_page(vec![issue(3, vec![])], None));

        let harvest = fetch_issues(&executor, &query(), &Budget::unlimited()).await.unwrap();

        assert_eq!(
            harvest.issues.iter().map(|i| i.number).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!(harvest.work_list.len(), 2);
        assert_eq!(harvest.work_list.references(&PrKey::new("acme", "widgets", 10)), 2);
        assert!(harvest.issues[2].linked_prs.is_empty());
        assert_eq!(harvest.pages, 2);
        assert!(harvest.stopped_early.is_none());
        assert_eq!(executor.calls(), 2);

        let vars = &executor.requests()[0].1;
        assert_eq!(vars["since"], "2024-01-01T00:00:00Z");
        assert_eq!(vars["first"], 2);
        assert_eq!(vars["timelineWindow"], 20);
    }

    #[tokio::test]
    async fn test_decodes_issue_fields() {
        let executor = ScriptedExecutor::new();
        let mut closed = issue(5, vec![]);
        closed["state"] = json!("CLOSED");
        closed["closedAt"] = json!("2024-03-01T00:00:00Z");
        closed["title"] = Value::Null;
        executor.push_data(issue_page(vec![closed], None));

        let harvest = fetch_issues(&executor, &query(), &Budget::unlimited()).await.unwrap();
        let record = &harvest.issues[0];

        assert_eq!(record.id, "I_5");
        assert_eq!(record.state, IssueState::Closed);
        assert_eq!(record.title, "");
        assert_eq!(record.closed_at.map(|t| t.to_rfc3339()), Some("2024-03-01T00:00:00+00:00".to_string()));
    }

    #[tokio::test]
    async fn test_later_page_failure_keeps_earlier_issues() {
        let executor = ScriptedExecutor::new();
        executor.push_data(issue_page(vec![issue(1, vec![pr_ref("acme/widgets", 1)])], Some("c1")));
        executor.push_data(issue_page(vec![issue(2, vec![])], Some("c2")));
        executor.push_err(Error::Transport("connection reset".to_string()));

        let harvest = fetch_issues(&executor, &query(), &Budget::unlimited()).await.unwrap();

        assert_eq!(harvest.issues.len(), 2);
        assert_eq!(harvest.work_list.len(), 1);
        assert!(harvest.stopped_early.as_ref().is_some_and(|e| e.is_transport()));
    }

    #[tokio::test]
    async fn test_first_page_failure_is_fatal() {
        let executor = ScriptedExecutor::new();
        executor.push_err(Error::HttpStatus {
            status: 401,
            body: "Bad credentials".to_string(),
        });

        let result = fetch_issues(&executor, &query(), &Budget::unlimited()).await;
        assert!(matches!(result, Err(Error::HttpStatus { status: 401, .. })));
    }

    #[tokio::test]
    async fn test_missing_repository_is_fatal() {
        let executor = ScriptedExecutor::new();
        executor.push_data(json!({"repository": null}));

        let result = fetch_issues(&executor, &query(), &Budget::unlimited()).await;
        assert!(matches!(result, Err(Error::MissingEntity(ref e)) if e == "repository acme/widgets"));
    }

    #[tokio::test]
    async fn test_first_page_without_data_is_fatal() {
        let executor = ScriptedExecutor::new();
        executor.push(crate::graphql::QueryResponse::classify(None, Vec::new(), None));
        let result = fetch_issues(&executor, &query(), &Budget::unlimited()).await;
        assert!(matches!(result, Err(Error::Protocol(_))));

        let executor = ScriptedExecutor::new();
        executor.push(Ok(crate::graphql::QueryResponse::default()));
        let result = fetch_issues(&executor, &query(), &Budget::unlimited()).await;
        assert!(matches!(result, Err(Error::Protocol(_))));
        assert_eq!(executor.calls(), 1);
    }

    #[tokio::test]
    async fn test_no_issues_is_empty_harvest() {
        let executor = ScriptedExecutor::new();
        executor.push_data(json!({"repository": {"issues": null}}));

        let harvest = fetch_issues(&executor, &query(), &Budget::unlimited()).await.unwrap();
        assert!(harvest.issues.is_empty());
        assert!(harvest.work_list.is_empty());
    }

    #[tokio::test]
    async fn test_follows_long_timeline() {
        let executor = ScriptedExecutor::new();
        let mut long = issue(7, vec![pr_ref("acme/widgets", 1)]);
        long["timelineItems"]["pageInfo"] = json!({"hasNextPage": true, "endCursor": "t1"});
        executor.push_data(issue_page(vec![long], None));
        executor.on(
            |q, _| q.contains("node(id: $id)"),
            Ok(crate::graphql::QueryResponse::new(json!({
                "node": {"timelineItems": {
                    "pageInfo": {"hasNextPage": false, "endCursor": null},
                    "nodes": [pr_ref("other/lib", 2)]
                }}
            }))),
        );

        let harvest = fetch_issues(&executor, &query(), &Budget::unlimited()).await.unwrap();

        let keys: Vec<_> = harvest.issues[0].linked_prs.iter().cloned().collect();
        assert_eq!(keys, vec![PrKey::new("acme", "widgets", 1), PrKey::new("other", "lib", 2)]);

        let continuation = executor
            .requests()
            .into_iter()
            .find(|(q, _)| q.contains("node(id: $id)"))
            .unwrap();
        assert_eq!(continuation.1["id"], "I_7");
        assert_eq!(continuation.1["cursor"], "t1");
    }

    #[tokio::test]
    async fn test_bounded_timeline_does_not_follow() {
        let executor = ScriptedExecutor::new();
        let mut long = issue(7, vec![pr_ref("acme/widgets", 1)]);
        long["timelineItems"]["pageInfo"] = json!({"hasNextPage": true, "endCursor": "t1"});
        executor.push_data(issue_page(vec![long], None));

        let mut bounded = query();
        bounded.full_timeline = false;
        let harvest = fetch_issues(&executor, &bounded, &Budget::unlimited()).await.unwrap();

        assert_eq!(harvest.issues[0].linked_prs.len(), 1);
        assert_eq!(executor.calls(), 1);
    }

    #[tokio::test]
    async fn test_timeline_continuation_failure_keeps_window() {
        let executor = ScriptedExecutor::new();
        let mut long = issue(7, vec![pr_ref("acme/widgets", 1)]);
        long["timelineItems"]["pageInfo"] = json!({"hasNextPage": true, "endCursor": "t1"});
        executor.push_data(issue_page(vec![long], None));
        executor.on(
            |q, _| q.contains("node(id: $id)"),
            Err(Error::Transport("timeout".to_string())),
        );

        let harvest = fetch_issues(&executor, &query(), &Budget::unlimited()).await.unwrap();
        assert_eq!(harvest.issues[0].linked_prs.len(), 1);
    }

    #[test]
    fn test_query_from_config_requires_since() {
        let mut config = Config::default();
        config.github.owner = Some("acme".to_string());
        config.github.repo = Some("widgets".to_string());
        assert!(IssueQuery::from_config(&config).is_err());

        config.fetch.since = Some("2024-01-01T00:00:00Z".to_string());
        let query = IssueQuery::from_config(&config).unwrap();
        assert_eq!(query.owner, "acme");
        assert_eq!(query.per_page, 100);
        assert_eq!(query.timeline_window, 20);
        assert!(query.full_timeline);
    }

    #[test]
    fn test_queries_are_well_formed() {
        for doc in [issues_query(), timeline_query()] {
            assert_eq!(doc.matches('{').count(), doc.matches('}').count());
            assert!(doc.contains("CROSS_REFERENCED_EVENT"));
        }
        assert!(issues_query().contains("orderBy: {field: UPDATED_AT, direction: DESC}"));
    }
}
