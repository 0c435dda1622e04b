//! The M1 GraphQL activity API.

mod client;
mod fetcher;
mod models;
mod query;

pub use client::{M1Client, RetryPolicy};
pub use fetcher::{parse_page, ActivityFetcher};
pub use models::{
    ActivityCommon, ActivityKind, ActivityNode, ActivityPage, CashEntry, PageInfo, PositionEntry,
    SecurityDescriptor, TradeEntry, TradeSummaryEntry, TransferDetails,
};
pub use query::{
    effective_page_size, ActivityCategory, ActivityFilters, ActivityQuery, DateRange,
    ACTIVITY_QUERY, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE, OPERATION_NAME,
};
