//! Join resolved contributors back onto issues

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};

use crate::issues::IssueRecord;
use crate::timeline::PrKey;

/// One `issues.csv` row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssueRow {
    pub issue_id: String,
    pub issue_number: u64,
    pub title: String,
    pub state: String,
    pub created_date: String,
    /// Empty while the issue is open
    pub closed_date: String,
    /// Sorted, deduplicated, `;`-joined identities
    pub contributors: String,
}

impl IssueRow {
    pub const HEADERS: [&'static str; 7] = [
        "issue_id",
        "issue_number",
        "title",
        "state",
        "created_date",
        "closed_date",
        "contributors",
    ];
}

/// Timestamp as the dashboard expects it, e.g. `2024-01-02T03:04:05Z`
pub fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Union of the contributor sets of every key an issue links
///
/// Keys absent from the map contribute nothing.
pub fn issue_contributors<'a>(
    linked: impl IntoIterator<Item = &'a PrKey>,
    contributors: &'a HashMap<PrKey, BTreeSet<String>>,
) -> BTreeSet<&'a str> {
    linked
        .into_iter()
        .filter_map(|key| contributors.get(key))
        .flatten()
        .map(String::as_str)
        .collect()
}

/// Build one row per issue, in the order the issues were fetched
pub fn aggregate(issues: &[IssueRecord], contributors: &HashMap<PrKey, BTreeSet<String>>) -> Vec<IssueRow> {
    issues
        .iter()
        .map(|issue| IssueRow {
            issue_id: issue.id.clone(),
            issue_number: issue.number,
            title: issue.title.clone(),
            state: issue.state.as_str().to_string(),
            created_date: format_timestamp(&issue.created_at),
            closed_date: issue.closed_at.as_ref().map(format_timestamp).unwrap_or_default(),
            contributors: issue_contributors(&issue.linked_prs, contributors)
                .into_iter()
                .collect::<Vec<_>>()
                .join(";"),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issues::IssueState;
    use chrono::TimeZone;

    fn record(number: u64, keys: &[PrKey]) -> IssueRecord {
        IssueRecord {
            id: format!("I_{}", number),
            number,
            title: format!("Issue {}", number),
            state: IssueState::Open,
            created_at: Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap(),
            closed_at: None,
            linked_prs: keys.iter().cloned().collect(),
        }
    }

    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_union_of_linked_keys() {
        let a = PrKey::new("acme", "widgets", 1);
        let b = PrKey::new("acme", "widgets", 2);
        let contributors = HashMap::from([(a.clone(), set(&["alice"])), (b.clone(), set(&["bob", "alice"]))]);

        let rows = aggregate(&[record(7, &[a, b])], &contributors);
        assert_eq!(rows[0].contributors, "alice;bob");
    }

    #[test]
    fn test_issue_without_links_keeps_row() {
        let rows = aggregate(&[record(1, &[])], &HashMap::new());

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].contributors, "");
        assert_eq!(rows[0].closed_date, "");
    }

    #[test]
    fn test_unresolved_key_counts_as_empty() {
        let known = PrKey::new("acme", "widgets", 1);
        let unknown = PrKey::new("acme", "widgets", 99);
        let contributors = HashMap::from([(known.clone(), set(&["carol"]))]);

        let rows = aggregate(&[record(1, &[known, unknown])], &contributors);
        assert_eq!(rows[0].contributors, "carol");
    }

    #[test]
    fn test_preserves_issue_order_and_fields() {
        let mut closed = record(2, &[]);
        closed.state = IssueState::Closed;
        closed.closed_at = Some(Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap());

        let rows = aggregate(&[record(9, &[]), closed], &HashMap::new());

        assert_eq!(rows.iter().map(|r| r.issue_number).collect::<Vec<_>>(), vec![9, 2]);
        assert_eq!(rows[0].issue_id, "I_9");
        assert_eq!(rows[0].created_date, "2024-01-02T03:04:05Z");
        assert_eq!(rows[1].state, "CLOSED");
        assert_eq!(rows[1].closed_date, "2024-05-06T07:08:09Z");
    }

    #[test]
    fn test_contributor_field_is_sorted() {
        let key = PrKey::new("acme", "widgets", 1);
        let contributors = HashMap::from([(key.clone(), set(&["zed", "Mona", "alice"]))]);

        let rows = aggregate(&[record(1, &[key])], &contributors);
        assert_eq!(rows[0].contributors, "Mona;alice;zed");
    }
}
