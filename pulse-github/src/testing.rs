//! Scripted query executor for tests

use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::graphql::{QueryExecutor, QueryResponse};
use crate::{Error, Result};

type Reply = Result<QueryResponse>;
type Matcher = Box<dyn Fn(&str, &Value) -> bool + Send + Sync>;

/// Replays canned responses and records every request
///
/// Routed replies (registered with [`ScriptedExecutor::on`]) are matched
/// first, in registration order; anything else is served from the FIFO queue.
#[derive(Default)]
pub(crate) struct ScriptedExecutor {
    queue: Mutex<VecDeque<Reply>>,
    routes: Mutex<Vec<(Matcher, Option<Reply>)>>,
    calls: AtomicUsize,
    requests: Mutex<Vec<(String, Value)>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, reply: Reply) {
        self.queue.lock().unwrap().push_back(reply);
    }

    pub fn push_data(&self, data: Value) {
        self.push(Ok(QueryResponse::new(data)));
    }

    pub fn push_err(&self, err: Error) {
        self.push(Err(err));
    }

    /// Serve `reply` once for the first request matching `predicate`
    pub fn on<F>(&self, predicate: F, reply: Reply)
    where
        F: Fn(&str, &Value) -> bool + Send + Sync + 'static,
    {
        self.routes
            .lock()
            .unwrap()
            .push((Box::new(predicate), Some(reply)));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<(String, Value)> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls_matching<F: Fn(&str, &Value) -> bool>(&self, predicate: F) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(q, v)| predicate(q, v))
            .count()
    }
}

#[async_trait]
impl QueryExecutor for ScriptedExecutor {
    async fn execute(&self, query: &str, variables: &Value) -> Result<QueryResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap()
            .push((query.to_string(), variables.clone()));

        {
            let mut routes = self.routes.lock().unwrap();
            for (matcher, reply) in routes.iter_mut() {
                if reply.is_some() && matcher(query, variables) {
                    if let Some(reply) = reply.take() {
                        return reply;
                    }
                }
            }
        }

        self.queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(Error::Protocol("no scripted response left".to_string())))
    }
}
