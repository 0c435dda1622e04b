//! Glue for hosts that drive fetches through a parameters document.
//!
//! A host hands over a JSON object. The `m1finance` key holds the fetch
//! toggles and `columns` tells the host which record fields key its rows.

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::api::{ActivityCategory, ActivityFilters, DateRange};

pub const PARAMETERS_KEY: &str = "m1finance";
pub const COLUMNS_KEY: &str = "columns";

/// Which activity to fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchToggles {
    pub dividends: bool,
    pub trades: bool,
    pub cash: bool,
    pub positions: bool,
    pub transfers: bool,
    /// Empty means every symbol.
    pub symbols: Vec<String>,
}

impl Default for FetchToggles {
    fn default() -> Self {
        Self {
            dividends: true,
            trades: true,
            cash: true,
            positions: true,
            transfers: true,
            symbols: Vec::new(),
        }
    }
}

impl FetchToggles {
    /// Read the `m1finance` section of a parameters document. A missing
    /// section means defaults.
    pub fn from_parameters(parameters: &Value) -> Result<Self> {
        match parameters.get(PARAMETERS_KEY) {
            None | Some(Value::Null) => Ok(Self::default()),
            Some(section) => serde_json::from_value(section.clone())
                .with_context(|| format!("Invalid `{PARAMETERS_KEY}` parameters")),
        }
    }

    pub fn categories(&self) -> BTreeSet<ActivityCategory> {
        [
            (self.dividends, ActivityCategory::Dividend),
            (self.trades, ActivityCategory::Trading),
            (self.cash, ActivityCategory::Cash),
            (self.positions, ActivityCategory::Position),
            (self.transfers, ActivityCategory::Transfer),
        ]
        .into_iter()
        .filter_map(|(enabled, category)| enabled.then_some(category))
        .collect()
    }

    pub fn to_filters(&self, date_range: DateRange) -> ActivityFilters {
        ActivityFilters {
            date_range,
            categories: self.categories(),
            symbols: self
                .symbols
                .iter()
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }
}

/// Record fields the host keys its rows on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub datetime: String,
    pub id: String,
}

impl Default for ColumnMapping {
    fn default() -> Self {
        Self {
            datetime: "date".to_string(),
            id: "id".to_string(),
        }
    }
}

/// Return `parameters` with a default column mapping filled in when the host
/// has none. Everything else is passed through.
pub fn register(parameters: Value) -> Result<Value> {
    let mut map = match parameters {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => anyhow::bail!("Pipe parameters must be a JSON object, got {other}"),
    };

    let has_columns = map
        .get(COLUMNS_KEY)
        .and_then(Value::as_object)
        .is_some_and(|columns| !columns.is_empty());
    if !has_columns {
        map.insert(
            COLUMNS_KEY.to_string(),
            serde_json::to_value(ColumnMapping::default())?,
        );
    }
    Ok(Value::Object(map))
}

/// Parse `YYYY-MM-DD` (midnight UTC) or RFC 3339.
pub fn parse_datetime(input: &str) -> Result<DateTime<Utc>> {
    let input = input.trim();
    if let Ok(date) = NaiveDate::parse_from_str(input, "%Y-%m-%d") {
        if let Some(dt) = date.and_hms_opt(0, 0, 0) {
            return Ok(dt.and_utc());
        }
    }
    DateTime::parse_from_rfc3339(input)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("Invalid date '{input}' (expected YYYY-MM-DD or RFC 3339)"))
}
