//! The activity GraphQL query and its variables.

use std::collections::BTreeSet;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const OPERATION_NAME: &str = "InvestActivity";

pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// GraphQL `Int` is a signed 32-bit value.
pub const MAX_PAGE_SIZE: u32 = i32::MAX as u32;

/// One query covers every activity kind; inline fragments pick the fields
/// that exist on each node type.
pub const ACTIVITY_QUERY: &str = r#"query InvestActivity($id: ID!, $first: Int, $after: String, $filter: InvestActivityFilterInput, $sort: [InvestActivitySortInput!]) {
  node(id: $id) {
    ... on Account {
      investActivity {
        activity(first: $first, after: $after, filter: $filter, sort: $sort) {
          pageInfo {
            hasNextPage
            endCursor
          }
          edges {
            node {
              __typename
              id
              title
              date
              description
              activityType
              ... on InvestActivityTradeSummaryEntry {
                amount
                tradeCount
                security { symbol name cusip }
              }
              ... on InvestActivityTradeEntry {
                amount
                quantity
                price
                security { symbol name cusip }
              }
              ... on InvestActivityCashEntry {
                amount
                security { symbol name cusip }
                transfer { from to status }
              }
              ... on InvestActivityPositionEntry {
                quantity
                security { symbol name cusip }
              }
            }
          }
        }
      }
    }
  }
}"#;

/// Server-side activity categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityCategory {
    Cash,
    Dividend,
    Position,
    Trading,
    Transfer,
}

impl ActivityCategory {
    pub const ALL: [ActivityCategory; 5] = [
        ActivityCategory::Cash,
        ActivityCategory::Dividend,
        ActivityCategory::Position,
        ActivityCategory::Trading,
        ActivityCategory::Transfer,
    ];
}

/// `begin` is inclusive, `end` exclusive. Either side may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    pub begin: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl DateRange {
    pub fn new(begin: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        Self { begin, end }
    }
}

/// What to ask the server for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityFilters {
    pub date_range: DateRange,
    pub categories: BTreeSet<ActivityCategory>,
    /// Empty means every symbol.
    pub symbols: BTreeSet<String>,
}

impl Default for ActivityFilters {
    fn default() -> Self {
        Self {
            date_range: DateRange::default(),
            categories: ActivityCategory::ALL.into_iter().collect(),
            symbols: BTreeSet::new(),
        }
    }
}

/// The variables for one page request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityQuery {
    pub account_id: String,
    pub cursor: Option<String>,
    pub page_size: u32,
    pub filters: ActivityFilters,
}

impl ActivityQuery {
    /// First-page query. A zero page size becomes [`DEFAULT_PAGE_SIZE`] and
    /// sizes past [`MAX_PAGE_SIZE`] are clamped.
    pub fn new(account_id: impl Into<String>, filters: ActivityFilters, page_size: u32) -> Self {
        Self {
            account_id: account_id.into(),
            cursor: None,
            page_size: match page_size {
                0 => DEFAULT_PAGE_SIZE,
                n => n.min(MAX_PAGE_SIZE),
            },
            filters,
        }
    }

    pub fn variables(&self) -> Value {
        let date = |d: &DateTime<Utc>| d.to_rfc3339_opts(SecondsFormat::Secs, true);
        let symbols = if self.filters.symbols.is_empty() {
            Value::Null
        } else {
            json!(self.filters.symbols)
        };

        json!({
            "id": self.account_id,
            "first": self.page_size,
            "after": self.cursor,
            "filter": {
                "fromDate": self.filters.date_range.begin.as_ref().map(date),
                "toDate": self.filters.date_range.end.as_ref().map(date),
                "activityTypes": self.filters.categories,
                "symbols": symbols,
            },
            "sort": [{ "type": "DATE", "direction": "DESC" }],
        })
    }

    /// The full POST body.
    pub fn request_body(&self) -> Value {
        json!({
            "operationName": OPERATION_NAME,
            "query": ACTIVITY_QUERY,
            "variables": self.variables(),
        })
    }
}

/// The page size to use for a caller-supplied chunk size.
///
/// Missing, zero, and negative sizes all mean [`DEFAULT_PAGE_SIZE`]. Sizes
/// too large for a GraphQL `Int` are clamped to [`MAX_PAGE_SIZE`].
pub fn effective_page_size(chunksize: Option<i64>) -> u32 {
    match chunksize {
        Some(n) if n > 0 => u32::try_from(n).map_or(MAX_PAGE_SIZE, |n| n.min(MAX_PAGE_SIZE)),
        _ => DEFAULT_PAGE_SIZE,
    }
}
