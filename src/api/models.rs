//! Activity nodes and the GraphQL response envelope.
//!
//! Entry fields are decoded leniently: money and share scalars may arrive as
//! numbers or decimal strings, and nulls read as absent. Only an empty id or
//! activity type makes an entry unusable.

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use tracing::warn;

/// Fields every activity entry carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityCommon {
    #[serde(default, deserialize_with = "nullable_string")]
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(
        rename = "activityType",
        default,
        deserialize_with = "nullable_string"
    )]
    pub type_tag: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityDescriptor {
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub cusip: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferDetails {
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeSummaryEntry {
    #[serde(flatten)]
    pub common: ActivityCommon,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub amount: Option<Decimal>,
    #[serde(default, deserialize_with = "lenient_count")]
    pub trade_count: Option<u32>,
    #[serde(default)]
    pub security: Option<SecurityDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeEntry {
    #[serde(flatten)]
    pub common: ActivityCommon,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub amount: Option<Decimal>,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub quantity: Option<Decimal>,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub security: Option<SecurityDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CashEntry {
    #[serde(flatten)]
    pub common: ActivityCommon,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub security: Option<SecurityDescriptor>,
    #[serde(default)]
    pub transfer: Option<TransferDetails>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionEntry {
    #[serde(flatten)]
    pub common: ActivityCommon,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub quantity: Option<Decimal>,
    #[serde(default)]
    pub security: Option<SecurityDescriptor>,
}

fn nullable_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Number or decimal string. Anything unparseable reads as absent.
fn lenient_decimal<'de, D>(deserializer: D) -> Result<Option<Decimal>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(raw.as_ref().and_then(decimal_from_value))
}

fn decimal_from_value(value: &Value) -> Option<Decimal> {
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) if s.trim().is_empty() => return None,
        Value::String(s) => s.trim().to_string(),
        Value::Null => return None,
        other => {
            warn!(value = %other, "Ignoring non-numeric activity field");
            return None;
        }
    };
    match Decimal::from_str(&text).or_else(|_| Decimal::from_scientific(&text)) {
        Ok(decimal) => Some(decimal),
        Err(e) => {
            warn!(value = %text, error = %e, "Ignoring unparseable activity amount");
            None
        }
    }
}

fn lenient_count<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(match raw {
        Some(Value::Number(n)) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

/// One entry of the activity feed, discriminated by `__typename`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "__typename")]
pub enum ActivityNode {
    #[serde(rename = "InvestActivityTradeSummaryEntry")]
    TradeSummary(TradeSummaryEntry),
    #[serde(rename = "InvestActivityTradeEntry")]
    Trade(TradeEntry),
    #[serde(rename = "InvestActivityCashEntry")]
    Cash(CashEntry),
    #[serde(rename = "InvestActivityPositionEntry")]
    Position(PositionEntry),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    TradeSummary,
    Trade,
    Cash,
    Position,
}

impl ActivityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityKind::TradeSummary => "trade_summary",
            ActivityKind::Trade => "trade",
            ActivityKind::Cash => "cash",
            ActivityKind::Position => "position",
        }
    }
}

impl std::fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ActivityNode {
    pub fn common(&self) -> &ActivityCommon {
        match self {
            ActivityNode::TradeSummary(e) => &e.common,
            ActivityNode::Trade(e) => &e.common,
            ActivityNode::Cash(e) => &e.common,
            ActivityNode::Position(e) => &e.common,
        }
    }

    pub fn id(&self) -> &str {
        &self.common().id
    }

    pub fn type_tag(&self) -> &str {
        &self.common().type_tag
    }

    pub fn kind(&self) -> ActivityKind {
        match self {
            ActivityNode::TradeSummary(_) => ActivityKind::TradeSummary,
            ActivityNode::Trade(_) => ActivityKind::Trade,
            ActivityNode::Cash(_) => ActivityKind::Cash,
            ActivityNode::Position(_) => ActivityKind::Position,
        }
    }

    pub fn security(&self) -> Option<&SecurityDescriptor> {
        match self {
            ActivityNode::TradeSummary(e) => e.security.as_ref(),
            ActivityNode::Trade(e) => e.security.as_ref(),
            ActivityNode::Cash(e) => e.security.as_ref(),
            ActivityNode::Position(e) => e.security.as_ref(),
        }
    }

    pub fn symbol(&self) -> Option<&str> {
        self.security()?.symbol.as_deref()
    }

    /// Signed cash amount of the entry.
    pub fn amount(&self) -> Option<Decimal> {
        match self {
            ActivityNode::TradeSummary(e) => e.amount,
            ActivityNode::Trade(e) => e.amount,
            ActivityNode::Cash(e) => e.amount,
            ActivityNode::Position(_) => None,
        }
    }

    pub fn quantity(&self) -> Option<Decimal> {
        match self {
            ActivityNode::Trade(e) => e.quantity,
            ActivityNode::Position(e) => e.quantity,
            _ => None,
        }
    }

    /// The entry date. The API sends either a full timestamp or a bare date;
    /// bare dates are taken as midnight UTC.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        let raw = self.common().date.as_deref()?.trim();
        if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
            return Some(ts.with_timezone(&Utc));
        }
        NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc())
    }

    /// Nodes without an id or type tag cannot be keyed downstream.
    pub fn validate(&self) -> anyhow::Result<()> {
        let common = self.common();
        if common.id.trim().is_empty() {
            anyhow::bail!("{} entry has an empty id", self.kind());
        }
        if common.type_tag.trim().is_empty() {
            anyhow::bail!("{} entry {} has an empty activityType", self.kind(), common.id);
        }
        Ok(())
    }

    /// Flatten into a single JSON object for ingestion.
    pub fn to_record(&self) -> Value {
        let common = self.common();
        json!({
            "id": common.id,
            "date": common.date,
            "title": common.title,
            "description": common.description,
            "activity_type": common.type_tag,
            "kind": self.kind(),
            "symbol": self.symbol(),
            "security_name": self.security().and_then(|s| s.name.as_deref()),
            "amount": self.amount(),
            "quantity": self.quantity(),
        })
    }
}

// Response envelope.

#[derive(Debug, Clone, Deserialize)]
pub struct GraphqlResponse<T> {
    pub data: Option<T>,
    #[serde(default)]
    pub errors: Vec<GraphqlError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GraphqlError {
    pub message: String,
    #[serde(default)]
    pub extensions: Option<Value>,
}

impl GraphqlError {
    pub fn code(&self) -> Option<&str> {
        self.extensions.as_ref()?.get("code")?.as_str()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActivityData {
    pub node: Option<AccountNode>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountNode {
    #[serde(default)]
    pub invest_activity: Option<InvestActivity>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InvestActivity {
    pub activity: Option<ActivityConnection>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityConnection {
    pub page_info: PageInfo,
    #[serde(default)]
    pub edges: Vec<ActivityEdge>,
}

/// The node stays raw so that one unknown entry type does not sink the page.
#[derive(Debug, Clone, Deserialize)]
pub struct ActivityEdge {
    pub node: Value,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub has_next_page: bool,
    pub end_cursor: Option<String>,
}

impl ActivityData {
    /// `data.node.investActivity.activity`, if every level is present.
    pub fn into_connection(self) -> Option<ActivityConnection> {
        self.node?.invest_activity?.activity
    }
}

/// One page of parsed results.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActivityPage {
    pub nodes: Vec<ActivityNode>,
    pub next_cursor: Option<String>,
    pub has_next: bool,
}

impl ActivityPage {
    /// The page returned when the server has no activity to give.
    pub fn end() -> Self {
        Self::default()
    }
}
