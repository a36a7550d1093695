//! Pull-request references found in issue timelines

use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::warn;

use crate::{Error, Result};

/// Canonical pull-request identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PrKey {
    pub owner: String,
    pub repo: String,
    pub number: u64,
}

impl PrKey {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>, number: u64) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            number,
        }
    }

    /// Build a key from GitHub's `nameWithOwner` form
    pub fn parse(name_with_owner: &str, number: u64) -> Result<Self> {
        let malformed = || Error::ReferenceParse(format!("{:?}", name_with_owner));

        let (owner, repo) = name_with_owner.split_once('/').ok_or_else(malformed)?;
        if owner.is_empty() || repo.is_empty() || repo.contains('/') {
            return Err(malformed());
        }
        Ok(Self::new(owner, repo, number))
    }
}

impl fmt::Display for PrKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}#{}", self.owner, self.repo, self.number)
    }
}

/// One entry of an issue's timeline, keyed by `__typename`
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "__typename")]
pub enum TimelineEvent {
    ClosedEvent {
        #[serde(default)]
        closer: Option<ReferenceSubject>,
    },
    CrossReferencedEvent {
        #[serde(default)]
        source: Option<ReferenceSubject>,
    },
    #[serde(other)]
    Other,
}

impl TimelineEvent {
    fn subject(&self) -> Option<&ReferenceSubject> {
        match self {
            TimelineEvent::ClosedEvent { closer } => closer.as_ref(),
            TimelineEvent::CrossReferencedEvent { source } => source.as_ref(),
            TimelineEvent::Other => None,
        }
    }
}

/// Closer or source of a timeline event
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "__typename")]
pub enum ReferenceSubject {
    PullRequest {
        #[serde(default)]
        number: Option<u64>,
        #[serde(default)]
        repository: Option<RepositoryName>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryName {
    #[serde(default)]
    pub name_with_owner: Option<String>,
}

/// Key referenced by a single event, if any
///
/// `Ok(None)` for events that do not point at a pull request or lack the
/// fields to identify one.
pub fn event_reference(event: &TimelineEvent) -> Result<Option<PrKey>> {
    let Some(ReferenceSubject::PullRequest { number, repository }) = event.subject() else {
        return Ok(None);
    };

    let name = repository
        .as_ref()
        .and_then(|r| r.name_with_owner.as_deref());
    match (name, number) {
        (Some(name), Some(number)) => PrKey::parse(name, *number).map(Some),
        _ => Ok(None),
    }
}

/// Pull-request keys referenced by one issue's timeline
///
/// Malformed references are logged and skipped.
pub fn resolve_timeline<'a, I>(issue_number: u64, events: I) -> BTreeSet<PrKey>
where
    I: IntoIterator<Item = &'a TimelineEvent>,
{
    let mut keys = BTreeSet::new();
    for event in events {
        match event_reference(event) {
            Ok(Some(key)) => {
                keys.insert(key);
            }
            Ok(None) => {}
            Err(err) => {
                warn!(issue = issue_number, error = %err, "Skipping timeline event");
            }
        }
    }
    keys
}

/// Deduplicated keys across the whole issue set
///
/// Each key appears once however many issues link it.
#[derive(Debug, Clone, Default)]
pub struct PrWorkList {
    references: BTreeMap<PrKey, usize>,
}

impl PrWorkList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record every key of one issue
    pub fn extend<'a, I: IntoIterator<Item = &'a PrKey>>(&mut self, keys: I) {
        for key in keys {
            *self.references.entry(key.clone()).or_insert(0) += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.references.len()
    }

    pub fn is_empty(&self) -> bool {
        self.references.is_empty()
    }

    /// Number of issues that referenced `key`
    pub fn references(&self, key: &PrKey) -> usize {
        self.references.get(key).copied().unwrap_or(0)
    }

    pub fn into_keys(self) -> Vec<PrKey> {
        self.references.into_keys().collect()
    }
}
