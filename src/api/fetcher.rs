//! Cursor pagination over the activity feed.

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::client::M1Client;
use super::models::{ActivityData, ActivityNode, ActivityPage, GraphqlResponse};
use super::query::{ActivityFilters, ActivityQuery};
use crate::auth::AuthContext;
use crate::error::M1Error;

/// Walks every page of an account's activity.
pub struct ActivityFetcher {
    client: M1Client,
    page_size: u32,
}

impl ActivityFetcher {
    pub fn new(client: M1Client, page_size: u32) -> Self {
        Self { client, page_size }
    }

    /// Request a single page.
    pub async fn fetch_page(&self, auth: &AuthContext, query: &ActivityQuery) -> Result<ActivityPage> {
        let value = self.client.post(auth, &query.request_body()).await?;
        parse_page(value)
    }

    /// Fetch every page, oldest request first, keeping server order.
    pub async fn fetch_activities(
        &self,
        auth: &AuthContext,
        filters: &ActivityFilters,
    ) -> Result<Vec<ActivityNode>> {
        if filters.categories.is_empty() {
            debug!("No activity categories requested");
            return Ok(Vec::new());
        }

        let mut query = ActivityQuery::new(auth.account_id.clone(), filters.clone(), self.page_size);
        let mut nodes = Vec::new();
        let mut pages = 0usize;

        loop {
            let page = self
                .fetch_page(auth, &query)
                .await
                .with_context(|| format!("Failed to fetch activity page {}", pages + 1))?;
            pages += 1;
            debug!(page = pages, count = page.nodes.len(), has_next = page.has_next, "Fetched activity page");
            nodes.extend(page.nodes);

            if !page.has_next {
                break;
            }
            match page.next_cursor {
                None => {
                    warn!(page = pages, "Server reported more pages without a cursor; stopping");
                    break;
                }
                Some(cursor) if query.cursor.as_deref() == Some(cursor.as_str()) => {
                    warn!(page = pages, %cursor, "Server repeated the previous cursor; stopping");
                    break;
                }
                Some(cursor) => query.cursor = Some(cursor),
            }
        }

        info!(pages, count = nodes.len(), "Fetched M1 activity");
        Ok(nodes)
    }
}

/// Decode one response body into a page.
pub fn parse_page(value: Value) -> Result<ActivityPage> {
    let response: GraphqlResponse<ActivityData> =
        serde_json::from_value(value).context("Unexpected GraphQL response shape")?;

    let Some(data) = response.data else {
        if response
            .errors
            .iter()
            .any(|e| e.code() == Some("UNAUTHENTICATED"))
        {
            return Err(M1Error::Unauthorized { status: 401 }.into());
        }
        let messages: Vec<&str> = response.errors.iter().map(|e| e.message.as_str()).collect();
        anyhow::bail!("GraphQL request failed: {}", messages.join("; "));
    };
    for error in &response.errors {
        warn!(message = %error.message, "GraphQL returned a partial error");
    }

    let Some(connection) = data.into_connection() else {
        debug!("Activity is null; treating as end of data");
        return Ok(ActivityPage::end());
    };

    let mut nodes = Vec::with_capacity(connection.edges.len());
    for edge in connection.edges {
        match serde_json::from_value::<ActivityNode>(edge.node) {
            Ok(node) => match node.validate() {
                Ok(()) => nodes.push(node),
                Err(e) => warn!(error = %e, "Skipping activity entry"),
            },
            Err(e) => warn!(error = %e, "Skipping unrecognized activity entry"),
        }
    }

    Ok(ActivityPage {
        nodes,
        next_cursor: connection.page_info.end_cursor,
        has_next: connection.page_info.has_next_page,
    })
}
