//! Cursor pagination over GraphQL connections
//!
//! A [`PageWalker`] owns one connection's cursor and drives the executor a
//! page at a time. Where the connection lives in the response is decided by
//! a [`PageShape`], so issues, commits, timelines and search results all
//! share the same loop.

use pulse_core::LimitsConfig;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::graphql::{lookup, Connection, QueryExecutor};
use crate::{Error, Result};

/// Where a connection sits inside a response's `data`
pub trait PageShape: Send + Sync {
    type Node: DeserializeOwned + Send;

    /// Locate the connection; `Ok(None)` means there is nothing to page.
    fn connection<'a>(&self, data: &'a Value) -> Result<Option<&'a Value>>;
}

/// Connection reached by a fixed key path
///
/// The first `required` keys must resolve, otherwise the entity they name
/// is reported missing. Anything null past that point is an empty result.
pub struct PathShape<N> {
    path: Vec<&'static str>,
    required: usize,
    entity: String,
    _node: PhantomData<fn() -> N>,
}

impl<N> PathShape<N> {
    pub fn new(path: &[&'static str]) -> Self {
        Self {
            path: path.to_vec(),
            required: 0,
            entity: String::new(),
            _node: PhantomData,
        }
    }

    /// Require the first `depth` keys, naming the entity for diagnostics
    pub fn require(mut self, depth: usize, entity: impl Into<String>) -> Self {
        self.required = depth.min(self.path.len());
        self.entity = entity.into();
        self
    }
}

impl<N: DeserializeOwned + Send> PageShape for PathShape<N> {
    type Node = N;

    fn connection<'a>(&self, data: &'a Value) -> Result<Option<&'a Value>> {
        if self.required > 0 && lookup(data, &self.path[..self.required]).is_none() {
            return Err(Error::MissingEntity(self.entity.clone()));
        }
        Ok(lookup(data, &self.path))
    }
}

/// Request-count and wall-clock limit shared by cooperating walkers
///
/// Checked before each request; once exhausted every walker holding a clone
/// stops at its next page boundary.
#[derive(Debug, Clone)]
pub struct Budget {
    inner: Arc<BudgetInner>,
}

#[derive(Debug)]
struct BudgetInner {
    max_requests: Option<u64>,
    deadline: Option<Instant>,
    used: AtomicU64,
}

impl Budget {
    pub fn new(max_requests: Option<u64>, max_duration: Option<Duration>) -> Self {
        Self {
            inner: Arc::new(BudgetInner {
                max_requests,
                deadline: max_duration.map(|d| Instant::now() + d),
                used: AtomicU64::new(0),
            }),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(None, None)
    }

    pub fn from_limits(limits: &LimitsConfig) -> Self {
        Self::new(limits.max_requests, limits.max_duration)
    }

    /// Claim one request
    pub fn try_acquire(&self) -> Result<()> {
        if let Some(deadline) = self.inner.deadline {
            if Instant::now() >= deadline {
                return Err(Error::BudgetExhausted("time limit reached".to_string()));
            }
        }

        let used = self.inner.used.fetch_add(1, Ordering::SeqCst);
        if let Some(max) = self.inner.max_requests {
            if used >= max {
                self.inner.used.fetch_sub(1, Ordering::SeqCst);
                return Err(Error::BudgetExhausted(format!(
                    "{} request limit reached",
                    max
                )));
            }
        }
        Ok(())
    }

    pub fn requests_used(&self) -> u64 {
        self.inner.used.load(Ordering::SeqCst)
    }
}

impl Default for Budget {
    fn default() -> Self {
        Self::unlimited()
    }
}

enum WalkState {
    Active,
    /// Nodes of the last page were returned; this error comes next
    Failing(Error),
    Done,
}

/// Forward-only cursor walk over one connection
pub struct PageWalker<'a, E: ?Sized, S> {
    executor: &'a E,
    query: &'a str,
    variables: Map<String, Value>,
    shape: S,
    budget: Budget,
    cursor: Option<String>,
    pages: usize,
    state: WalkState,
}

impl<'a, E, S> PageWalker<'a, E, S>
where
    E: QueryExecutor + ?Sized,
    S: PageShape,
{
    /// `variables` must be a JSON object; `cursor` is managed by the walker.
    pub fn new(executor: &'a E, query: &'a str, variables: Value, shape: S) -> Self {
        let variables = match variables {
            Value::Object(map) => map,
            _ => Map::new(),
        };

        Self {
            executor,
            query,
            variables,
            shape,
            budget: Budget::unlimited(),
            cursor: None,
            pages: 0,
            state: WalkState::Active,
        }
    }

    /// Resume after a cursor obtained elsewhere
    pub fn starting_after(mut self, cursor: Option<String>) -> Self {
        self.cursor = cursor;
        self
    }

    pub fn with_budget(mut self, budget: Budget) -> Self {
        self.budget = budget;
        self
    }

    /// Pages fetched and decoded so far
    pub fn pages_fetched(&self) -> usize {
        self.pages
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, WalkState::Done)
    }

    /// Fetch the next page
    ///
    /// `Ok(None)` once the connection is exhausted. A failure is reported
    /// once and ends the walk; nodes returned earlier remain valid.
    pub async fn next_page(&mut self) -> Result<Option<Vec<S::Node>>> {
        match std::mem::replace(&mut self.state, WalkState::Done) {
            WalkState::Done => return Ok(None),
            WalkState::Failing(err) => return Err(err),
            WalkState::Active => {}
        }

        self.budget.try_acquire()?;

        let mut variables = self.variables.clone();
        variables.insert(
            "cursor".to_string(),
            self.cursor.clone().map_or(Value::Null, Value::String),
        );

        let response = self
            .executor
            .execute(self.query, &Value::Object(variables))
            .await?;

        if response.is_partial() {
            for err in &response.errors {
                warn!(page = self.pages + 1, error = %err, "GraphQL returned partial data");
            }
        }

        let Some(data) = response.data else {
            return Err(Error::Protocol(format!(
                "Page {} response carried no data",
                self.pages + 1
            )));
        };

        let Some(raw) = self.shape.connection(&data)? else {
            debug!(page = self.pages + 1, "Connection absent, nothing to page");
            return Ok(None);
        };

        let page = Connection::<S::Node>::deserialize(raw)
            .map_err(|e| Error::Protocol(format!("Unexpected page shape: {}", e)))?;
        self.pages += 1;

        let total = page.nodes.len();
        let nodes: Vec<S::Node> = page.nodes.into_iter().flatten().collect();
        if nodes.len() < total {
            debug!(skipped = total - nodes.len(), "Skipped null nodes");
        }

        let info = page.page_info;
        self.state = match (info.has_next_page, info.end_cursor) {
            (false, _) => WalkState::Done,
            (true, Some(cursor)) => {
                self.cursor = Some(cursor);
                WalkState::Active
            }
            (true, None) => WalkState::Failing(Error::Protocol(
                "hasNextPage is true but endCursor is missing".to_string(),
            )),
        };

        debug!(page = self.pages, nodes = nodes.len(), "Fetched page");
        Ok(Some(nodes))
    }

    /// Drain the walker
    pub async fn collect(mut self) -> Walk<S::Node> {
        let mut nodes = Vec::new();
        let error = loop {
            match self.next_page().await {
                Ok(Some(page)) => nodes.extend(page),
                Ok(None) => break None,
                Err(err) => break Some(err),
            }
        };

        Walk {
            nodes,
            pages: self.pages,
            error,
        }
    }
}

/// Everything a drained walker produced
#[derive(Debug)]
pub struct Walk<N> {
    pub nodes: Vec<N>,
    /// Pages successfully decoded
    pub pages: usize,
    /// Failure that ended the walk early
    pub error: Option<Error>,
}

impl<N> Walk<N> {
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }

    /// Fail only when nothing was fetched before the error
    ///
    /// A failure after at least one good page is kept on the walk so the
    /// caller can report a truncated result.
    pub fn unless_first_page_failed(self) -> Result<Self> {
        match self.error {
            Some(err) if self.pages == 0 => Err(err),
            _ => Ok(self),
        }
    }

    /// Require a complete walk
    pub fn into_result(self) -> Result<Vec<N>> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.nodes),
        }
    }
}
