//! 资源 API 集成测试

mod common;

use axum::http::{Method, StatusCode};
use common::{create_one, resource_map, server_json, vlan_pool_json, vm_json, TestApp};
use serde_json::json;

#[tokio::test]
async fn test_create_then_query_by_type() {
    let app = TestApp::spawn().await;

    let created = create_one(&app, vlan_pool_json("v1", "g1", 0, 9)).await;
    assert_eq!(created["name"], "v1");
    assert_eq!(created["owner"], common::ADMIN_EMAIL);
    assert_eq!(created["status"]["lease"], "free");

    let (status, body) = app
        .admin(
            Method::GET,
            "/api/v1/resources",
            Some(json!({"types": ["network.vlanPool"]})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let pools = body["network.vlanPool"].as_array().unwrap();
    assert_eq!(pools.len(), 1);
    assert_eq!(pools[0]["id"], created["id"]);
    assert_eq!(pools[0]["rangeStart"], 0);
    assert_eq!(pools[0]["rangeEnd"], 9);
    assert!(body.get("compute.server").is_none());
}

#[tokio::test]
async fn test_query_by_group_label() {
    let app = TestApp::spawn().await;
    create_one(&app, server_json("a", "sj14")).await;
    create_one(&app, server_json("b", "sj18")).await;

    let (status, body) = app
        .admin(
            Method::GET,
            "/api/v1/resources",
            Some(json!({
                "types": ["compute.server"],
                "labels": [{"key": "system.group", "op": "==", "values": ["sj14"]}]
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let servers = body["compute.server"].as_array().unwrap();
    assert_eq!(servers.len(), 1);
    assert_eq!(servers[0]["name"], "a");

    let (_, body) = app
        .admin(
            Method::GET,
            "/api/v1/resources",
            Some(json!({
                "labels": [{"key": "system.group", "op": "notin", "values": ["sj14"]}]
            })),
        )
        .await;
    let servers = body["compute.server"].as_array().unwrap();
    assert_eq!(servers.len(), 1);
    assert_eq!(servers[0]["name"], "b");
}

#[tokio::test]
async fn test_query_by_ids_and_property() {
    let app = TestApp::spawn().await;
    let a = create_one(&app, server_json("a", "sj14")).await;
    create_one(&app, server_json("b", "sj14")).await;

    let (status, body) = app
        .admin(Method::GET, "/api/v1/resources", Some(json!({"ids": [a["id"]]})))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["compute.server"].as_array().unwrap().len(), 1);

    let (status, body) = app
        .admin(
            Method::GET,
            "/api/v1/resources",
            Some(json!({
                "properties": [{"key": "serial", "op": "in", "values": ["SN-b", "SN-zz"]}]
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let servers = body["compute.server"].as_array().unwrap();
    assert_eq!(servers.len(), 1);
    assert_eq!(servers[0]["name"], "b");
}

#[tokio::test]
async fn test_unknown_type_rejected_and_store_unchanged() {
    let app = TestApp::spawn().await;
    let before = app.state.store.query().len();

    let mut bogus = server_json("x", "sj14");
    bogus["type"]["name"] = json!("not.a.type");
    let (status, body) = app
        .admin(
            Method::POST,
            "/api/v1/resources",
            Some(json!({"not.a.type": [bogus]})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]["message"].is_string());
    assert_eq!(app.state.store.query().len(), before);
}

#[tokio::test]
async fn test_invalid_resource_aborts_whole_batch() {
    let app = TestApp::spawn().await;
    let before = app.state.store.query().len();

    let good = vm_json("vm-1", "sj14");
    let bad = vlan_pool_json("v1", "g1", 10, 9);
    let (status, _) = app
        .admin(Method::POST, "/api/v1/resources", Some(resource_map(vec![good, bad])))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(app.state.store.query().len(), before);
}

#[tokio::test]
async fn test_update_keeps_identity() {
    let app = TestApp::spawn().await;
    let mut server = create_one(&app, server_json("a", "sj14")).await;

    server["model"] = json!("R750");
    server["labels"]["rack"] = json!("r2");
    let updated = create_one(&app, server.clone()).await;
    assert_eq!(updated["id"], server["id"]);
    assert_eq!(updated["model"], "R750");

    let (_, body) = app
        .admin(Method::GET, "/api/v1/resources", Some(json!({"ids": [server["id"]]})))
        .await;
    let stored = &body["compute.server"][0];
    assert_eq!(stored["model"], "R750");
    assert_eq!(stored["labels"]["rack"], "r2");
}

#[tokio::test]
async fn test_lease_records_cannot_be_posted() {
    let app = TestApp::spawn().await;
    let (status, _) = app
        .admin(
            Method::POST,
            "/api/v1/resources",
            Some(json!({"system.lease": [{
                "type": {"name": "system.lease", "description": "lease"},
                "labels": {"system.group": "system"},
                "duration": "1h",
                "request": []
            }]})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_read_only_user_cannot_create() {
    let app = TestApp::spawn().await;
    let (status, _) = app
        .request(
            Method::POST,
            "/register",
            None,
            Some(json!({"name": "ro", "email": "ro@example.com", "password": "R3adOnlyUser!"})),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let token = app.login("ro@example.com", "R3adOnlyUser!").await;

    let (status, _) = app
        .request(
            Method::POST,
            "/api/v1/resources",
            Some(&token),
            Some(resource_map(vec![server_json("a", "sj14")])),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // 只读用户仍然可以查询
    let (status, _) = app
        .request(Method::GET, "/api/v1/resources", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_user_records_are_redacted() {
    let app = TestApp::spawn().await;
    let (status, body) = app
        .admin(
            Method::GET,
            "/api/v1/resources",
            Some(json!({"types": ["system.user"]})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let users = body["system.user"].as_array().unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0]["email"], common::ADMIN_EMAIL);
    assert!(users[0].get("passwordHash").is_none());
}

#[tokio::test]
async fn test_delete_resources() {
    let app = TestApp::spawn().await;
    let server = create_one(&app, server_json("a", "sj14")).await;

    let (status, body) = app
        .admin(Method::DELETE, "/api/v1/resources", Some(resource_map(vec![server.clone()])))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["compute.server"][0]["id"], server["id"]);
    assert!(app.state.store.get(server["id"].as_str().unwrap()).is_none());

    // 再次删除：不存在
    let (status, _) = app
        .admin(Method::DELETE, "/api/v1/resources", Some(resource_map(vec![server])))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_leased_resource_rejected() {
    let app = TestApp::spawn().await;
    let server = create_one(&app, server_json("a", "sj14")).await;

    let (status, _) = app
        .admin(
            Method::POST,
            "/api/v1/lease",
            Some(json!({
                "duration": "1h",
                "request": [{"type": "compute.server", "group": "sj14", "count": 1}]
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    app.tick();

    let (status, _) = app
        .admin(Method::DELETE, "/api/v1/resources", Some(resource_map(vec![server.clone()])))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(app.state.store.get(server["id"].as_str().unwrap()).is_some());
}

#[tokio::test]
async fn test_equal_with_two_values_rejected() {
    let app = TestApp::spawn().await;
    let (status, body) = app
        .admin(
            Method::GET,
            "/api/v1/resources",
            Some(json!({
                "labels": [{"key": "system.group", "op": "==", "values": ["a", "b"]}]
            })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], 400);
    assert!(body["error"]["message"].as_str().unwrap().contains("exactly one value"));
}

#[tokio::test]
async fn test_two_selectors_rejected() {
    let app = TestApp::spawn().await;
    let (status, _) = app
        .admin(
            Method::GET,
            "/api/v1/resources",
            Some(json!({"ids": [], "types": []})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_list_types() {
    let app = TestApp::spawn().await;

    let (status, body) = app.admin(Method::GET, "/api/v1/types", None).await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["name"].as_str().unwrap())
        .collect();
    assert!(names.contains(&"compute.server"));
    assert!(names.contains(&"network.vlanPool"));
    assert!(names.contains(&"system.lease"));

    let (status, body) = app
        .admin(Method::GET, "/api/v1/types", Some(json!({"types": ["dc.rack"]})))
        .await;
    assert_eq!(status, StatusCode::OK);
    let descriptors = body.as_array().unwrap();
    assert_eq!(descriptors.len(), 1);
    assert_eq!(descriptors[0]["name"], "dc.rack");
    assert!(!descriptors[0]["description"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn test_list_labels() {
    let app = TestApp::spawn().await;
    create_one(&app, server_json("a", "sj14")).await;
    create_one(&app, vm_json("b", "sj18")).await;

    let (status, body) = app
        .admin(
            Method::GET,
            "/api/v1/labels",
            Some(json!({"labels": ["system.group"]})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let groups: Vec<&str> = body["system.group"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap())
        .collect();
    assert!(groups.contains(&"sj14"));
    assert!(groups.contains(&"sj18"));
    assert_eq!(body.as_object().unwrap().len(), 1);
}

#[tokio::test]
async fn test_malformed_body_is_bad_request() {
    let app = TestApp::spawn().await;
    let request = axum::http::Request::builder()
        .method(Method::POST)
        .uri("/api/v1/resources")
        .header("authorization", format!("Bearer {}", app.admin_token))
        .header("content-type", "application/json")
        .body(axum::body::Body::from("{not json"))
        .unwrap();
    let (status, _) = app.send(request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
