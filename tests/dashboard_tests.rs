
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use swarm_lite::cluster::Cluster;
use swarm_lite::dashboard::{router, DashboardState};
use swarm_lite::events::ClusterEvent;
use test_harness::{assert_eventually, test_cluster_config};

/// Helper to create a running cluster and the dashboard app over it
async fn create_test_app(num_nodes: u16, base_port: u16) -> (Router, Arc<Cluster>) {
    let cluster = Cluster::start(test_cluster_config(num_nodes, base_port), false)
        .await
        .expect("cluster should start");
    let app = router(DashboardState {
        cluster: cluster.clone(),
    });
    (app, cluster)
}

async fn call(app: &Router, method: Method, uri: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: Value = serde_json::from_slice(&body).unwrap();
    (status, json)
}

#[tokio::test]
async fn test_status_endpoint() {
    let (app, cluster) = create_test_app(3, 21600).await;

    let (status, json) = call(&app, Method::GET, "/api/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["leader_id"], 0);
    assert_eq!(json["active_nodes"], 3);

    let nodes = json["nodes"].as_array().unwrap();
    assert_eq!(nodes.len(), 3);
    assert_eq!(nodes[0]["node_id"], 0);
    assert_eq!(nodes[0]["role"], "leader");
    assert_eq!(nodes[0]["address"], "127.0.0.1:21600");
    assert_eq!(nodes[1]["role"], "follower");
    assert_eq!(nodes[1]["alive"], true);

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_kill_node_endpoint() {
    let (app, cluster) = create_test_app(3, 21610).await;

    let (status, json) = call(&app, Method::POST, "/api/nodes/1/kill").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json, json!({"success": true, "node_id": 1, "error": null}));

    let (_, json) = call(&app, Method::GET, "/api/status").await;
    assert_eq!(json["active_nodes"], 2);

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_kill_unknown_node_is_not_found() {
    let (app, cluster) = create_test_app(2, 21620).await;

    let (status, json) = call(&app, Method::POST, "/api/nodes/9/kill").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["success"], false);
    assert!(json["error"].as_str().unwrap().contains('9'));

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_kill_leader_endpoint_reelects() {
    let (app, cluster) = create_test_app(3, 21630).await;

    let (status, json) = call(&app, Method::POST, "/api/kill/leader").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["node_id"], 0);

    let (_, json) = call(&app, Method::GET, "/api/status").await;
    assert_eq!(json["leader_id"], 2);

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_kill_random_endpoint() {
    let (app, cluster) = create_test_app(3, 21640).await;

    let (status, json) = call(&app, Method::POST, "/api/kill/random").await;
    assert_eq!(status, StatusCode::OK);
    let victim = json["node_id"].as_u64().unwrap();
    assert!(victim < 3);
    assert!(cluster.node(victim).await.is_none());

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_events_endpoint_lists_deaths() {
    let (app, cluster) = create_test_app(2, 21650).await;

    call(&app, Method::POST, "/api/nodes/1/kill").await;
    assert_eventually(
        Duration::from_secs(2),
        || {
            let cluster = cluster.clone();
            async move {
                cluster
                    .recent_events()
                    .await
                    .contains(&ClusterEvent::NodeDied { node_id: 1 })
            }
        },
        "the kill should be recorded",
    )
    .await;

    let (status, json) = call(&app, Method::GET, "/api/events").await;
    assert_eq!(status, StatusCode::OK);
    let events = json.as_array().unwrap();
    assert!(events.contains(&json!({"event": "node_died", "node_id": 1})));

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_restore_endpoint() {
    let (app, cluster) = create_test_app(3, 21660).await;

    call(&app, Method::POST, "/api/kill/leader").await;
    let (status, json) = call(&app, Method::POST, "/api/restore").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);

    let (_, json) = call(&app, Method::GET, "/api/status").await;
    assert_eq!(json["active_nodes"], 3);
    assert_eq!(json["leader_id"], 0);

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let (app, cluster) = create_test_app(1, 21670).await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/nope")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    cluster.shutdown().await;
}
