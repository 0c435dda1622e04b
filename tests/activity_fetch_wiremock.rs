mod support;

use std::time::Duration;

use anyhow::Result;
use m1sync::api::{
    effective_page_size, ActivityCategory, ActivityFetcher, ActivityFilters, M1Client,
    RetryPolicy,
};
use m1sync::auth::AuthContext;
use m1sync::config::ApiConfig;
use m1sync::error::M1Error;
use rust_decimal::Decimal;
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use support::{activity_page, request_bodies, trade_node, AfterCursor};

const TOKEN: &str = "Bearer test-token";

fn auth() -> AuthContext {
    AuthContext::new("acct-1", TOKEN)
}

fn client(server: &MockServer, max_attempts: u32) -> M1Client {
    let api = ApiConfig {
        graphql_url: format!("{}/graphql", server.uri()),
        ..ApiConfig::default()
    };
    M1Client::new(reqwest::Client::new(), &api).with_retry(RetryPolicy {
        max_attempts,
        base_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
    })
}

#[tokio::test]
async fn pages_are_walked_in_order_and_cursor_is_echoed() -> Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(header("authorization", TOKEN))
        .and(AfterCursor(None))
        .respond_with(ResponseTemplate::new(200).set_body_json(activity_page(
            vec![trade_node("t1"), trade_node("t2")],
            true,
            Some("c1"),
        )))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(header("authorization", TOKEN))
        .and(AfterCursor(Some("c1")))
        .respond_with(ResponseTemplate::new(200).set_body_json(activity_page(
            vec![trade_node("t3")],
            false,
            None,
        )))
        .mount(&server)
        .await;

    let fetcher = ActivityFetcher::new(client(&server, 3), 2);
    let nodes = fetcher
        .fetch_activities(&auth(), &ActivityFilters::default())
        .await?;

    let ids: Vec<&str> = nodes.iter().map(|n| n.id()).collect();
    assert_eq!(ids, vec!["t1", "t2", "t3"]);

    let requests = server.received_requests().await.unwrap();
    let bodies = request_bodies(&requests);
    assert_eq!(bodies.len(), 2);
    assert!(bodies[0]["variables"]["after"].is_null());
    assert_eq!(bodies[1]["variables"]["after"], "c1");
    assert_eq!(bodies[0]["variables"]["first"], 2);
    assert_eq!(bodies[0]["variables"]["id"], "acct-1");
    assert_eq!(bodies[0]["operationName"], "InvestActivity");
    Ok(())
}

#[tokio::test]
async fn null_activity_on_first_page_is_empty() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "node": { "investActivity": { "activity": null } } }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let nodes = ActivityFetcher::new(client(&server, 3), 100)
        .fetch_activities(&auth(), &ActivityFilters::default())
        .await?;
    assert!(nodes.is_empty());
    Ok(())
}

#[tokio::test]
async fn default_page_size_reaches_payload() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(activity_page(vec![], false, None)),
        )
        .mount(&server)
        .await;

    for chunksize in [None, Some(0), Some(-10)] {
        ActivityFetcher::new(client(&server, 3), effective_page_size(chunksize))
            .fetch_activities(&auth(), &ActivityFilters::default())
            .await?;
    }

    let bodies = request_bodies(&server.received_requests().await.unwrap());
    assert_eq!(bodies.len(), 3);
    for body in bodies {
        assert_eq!(body["variables"]["first"], 100);
    }
    Ok(())
}

#[tokio::test]
async fn transient_failures_are_retried() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("{}", "application/json"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(activity_page(
            vec![trade_node("t1")],
            false,
            None,
        )))
        .mount(&server)
        .await;

    let nodes = ActivityFetcher::new(client(&server, 3), 100)
        .fetch_activities(&auth(), &ActivityFilters::default())
        .await?;

    assert_eq!(nodes.len(), 1);
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
    Ok(())
}

#[tokio::test]
async fn retries_are_bounded() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let err = ActivityFetcher::new(client(&server, 2), 100)
        .fetch_activities(&auth(), &ActivityFilters::default())
        .await
        .unwrap_err();

    match err.downcast_ref::<M1Error>() {
        Some(M1Error::RetriesExhausted {
            attempts,
            last_error,
        }) => {
            assert_eq!(*attempts, 2);
            assert!(last_error.contains("maintenance"));
        }
        other => panic!("expected RetriesExhausted, got {other:?}"),
    }
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
    Ok(())
}

#[tokio::test]
async fn unauthorized_is_not_retried() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let err = ActivityFetcher::new(client(&server, 5), 100)
        .fetch_activities(&auth(), &ActivityFilters::default())
        .await
        .unwrap_err();

    assert!(M1Error::is_unauthorized(&err));
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
    Ok(())
}

#[tokio::test]
async fn repeated_cursor_stops_the_walk() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(activity_page(
            vec![trade_node("t1")],
            true,
            Some("stuck"),
        )))
        .mount(&server)
        .await;

    let nodes = ActivityFetcher::new(client(&server, 3), 100)
        .fetch_activities(&auth(), &ActivityFilters::default())
        .await?;

    assert_eq!(nodes.len(), 2);
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
    Ok(())
}

#[tokio::test]
async fn no_categories_means_no_requests() -> Result<()> {
    let server = MockServer::start().await;
    let filters = ActivityFilters {
        categories: Default::default(),
        ..ActivityFilters::default()
    };

    let nodes = ActivityFetcher::new(client(&server, 3), 100)
        .fetch_activities(&auth(), &filters)
        .await?;

    assert!(nodes.is_empty());
    assert!(server.received_requests().await.unwrap().is_empty());
    Ok(())
}

#[tokio::test]
async fn filters_are_sent_as_variables() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(activity_page(vec![], false, None)),
        )
        .mount(&server)
        .await;

    let filters = ActivityFilters {
        categories: [ActivityCategory::Dividend].into_iter().collect(),
        symbols: ["VTI".to_string()].into_iter().collect(),
        ..ActivityFilters::default()
    };
    ActivityFetcher::new(client(&server, 3), 100)
        .fetch_activities(&auth(), &filters)
        .await?;

    let bodies = request_bodies(&server.received_requests().await.unwrap());
    assert_eq!(bodies[0]["variables"]["filter"]["activityTypes"], json!(["DIVIDEND"]));
    assert_eq!(bodies[0]["variables"]["filter"]["symbols"], json!(["VTI"]));
    Ok(())
}

#[tokio::test]
async fn missing_end_cursor_stops_after_one_page() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(activity_page(
            vec![trade_node("t1"), trade_node("t2")],
            true,
            None,
        )))
        .mount(&server)
        .await;

    let nodes = ActivityFetcher::new(client(&server, 3), 100)
        .fetch_activities(&auth(), &ActivityFilters::default())
        .await?;

    let ids: Vec<&str> = nodes.iter().map(|n| n.id()).collect();
    assert_eq!(ids, vec!["t1", "t2"]);
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
    Ok(())
}

#[tokio::test]
async fn every_edge_of_mixed_kinds_becomes_a_node() -> Result<()> {
    let server = MockServer::start().await;

    let mut string_amount = trade_node("t2");
    string_amount["amount"] = json!("-100.25");
    string_amount["quantity"] = json!("0.4");
    let mut undated = trade_node("t3");
    undated["date"] = json!(null);
    undated["title"] = json!(null);
    let cash = json!({
        "__typename": "InvestActivityCashEntry",
        "id": "c1",
        "title": "Dividend",
        "date": "2024-03-02",
        "activityType": "DIVIDEND",
        "amount": "12.34",
        "security": { "symbol": "VTI" }
    });
    let position = json!({
        "__typename": "InvestActivityPositionEntry",
        "id": "p1",
        "date": null,
        "activityType": "STOCK_SPLIT",
        "quantity": 3
    });
    let summary = json!({
        "__typename": "InvestActivityTradeSummaryEntry",
        "id": "s1",
        "date": "2024-03-03",
        "activityType": "TRADE_SUMMARY",
        "amount": 1500,
        "tradeCount": "4"
    });
    let edges = vec![trade_node("t1"), string_amount, undated, cash, position, summary];
    let edge_count = edges.len();

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(activity_page(edges, false, None)))
        .mount(&server)
        .await;

    let nodes = ActivityFetcher::new(client(&server, 3), 100)
        .fetch_activities(&auth(), &ActivityFilters::default())
        .await?;

    assert_eq!(nodes.len(), edge_count);
    assert_eq!(nodes[1].amount(), Some(Decimal::new(-10025, 2)));
    assert_eq!(nodes[1].quantity(), Some(Decimal::new(4, 1)));
    assert_eq!(nodes[2].timestamp(), None);
    assert_eq!(nodes[3].amount(), Some(Decimal::new(1234, 2)));
    assert_eq!(nodes[4].quantity(), Some(Decimal::from(3)));
    assert_eq!(nodes[5].amount(), Some(Decimal::from(1500)));
    Ok(())
}

#[tokio::test]
async fn oversized_chunksize_is_clamped_to_graphql_int() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(activity_page(vec![], false, None)),
        )
        .mount(&server)
        .await;

    ActivityFetcher::new(client(&server, 3), effective_page_size(Some(i64::MAX)))
        .fetch_activities(&auth(), &ActivityFilters::default())
        .await?;

    let bodies = request_bodies(&server.received_requests().await.unwrap());
    assert_eq!(bodies[0]["variables"]["first"], i64::from(i32::MAX));
    Ok(())
}
