//! Single-shot adapter over real HTTP: status mirroring, body shapes,
//! CORS, prefix stripping and cookie writes.

mod common;

use reqwest::StatusCode;
use serde_json::{json, Value};
use sy_domain::config::CorsConfig;

use common::{demo_server, spawn, Stops};

async fn post(url: String, body: Option<Value>) -> (StatusCode, Value) {
    let client = reqwest::Client::new();
    let mut req = client.post(url);
    if let Some(body) = body {
        req = req.json(&body);
    }
    let res = req.send().await.unwrap();
    let status = res.status();
    (status, res.json().await.unwrap())
}

#[tokio::test]
async fn hello_world_roundtrip() {
    let addr = spawn(demo_server(&Stops::default()).build()).await;

    let (status, body) = post(format!("http://{addr}/helloWorld"), Some(json!({"name": "Ada"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"data": {"message": "Hello, Ada!"}}));
}

#[tokio::test]
async fn missing_field_is_400_with_field_path() {
    let addr = spawn(demo_server(&Stops::default()).build()).await;

    let (status, body) = post(format!("http://{addr}/helloWorld"), Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let details = body["error"]["details"].as_array().unwrap();
    assert_eq!(details.len(), 1);
    assert_eq!(details[0]["path"], json!(["name"]));
}

#[tokio::test]
async fn unknown_route_is_404() {
    let addr = spawn(demo_server(&Stops::default()).build()).await;

    let (status, body) = post(format!("http://{addr}/missingRoute"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({"error": {"message": "Not found"}}));
}

#[tokio::test]
async fn malformed_json_is_400_and_subscriptions_are_405() {
    let addr = spawn(demo_server(&Stops::default()).build()).await;
    let client = reqwest::Client::new();

    let res = client
        .post(format!("http://{addr}/helloWorld"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let (status, _) = post(format!("http://{addr}/letters"), None).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn params_middleware_and_classified_errors() {
    let addr = spawn(demo_server(&Stops::default()).build()).await;
    let client = reqwest::Client::new();

    let (status, body) = post(format!("http://{addr}/users/id:42"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["id"], "42");

    let res = client
        .post(format!("http://{addr}/whoami"))
        .header("x-tenant", "acme")
        .send()
        .await
        .unwrap();
    assert_eq!(res.json::<Value>().await.unwrap(), json!({"data": "acme"}));

    let (status, body) = post(format!("http://{addr}/denied"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["message"], "sign in first");
}

#[tokio::test]
async fn options_short_circuits_and_cors_is_always_written() {
    let cors = CorsConfig {
        origin: Some("https://app.example".into()),
        methods: Some("POST, OPTIONS".into()),
        ..Default::default()
    };
    let addr = spawn(demo_server(&Stops::default()).cors(cors).build()).await;
    let client = reqwest::Client::new();

    let res = client
        .request(reqwest::Method::OPTIONS, format!("http://{addr}/missingRoute"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);
    assert_eq!(res.headers()["access-control-allow-origin"], "https://app.example");
    assert_eq!(res.headers()["access-control-allow-methods"], "POST, OPTIONS");
    assert!(res.text().await.unwrap().is_empty());

    let res = client.post(format!("http://{addr}/missingRoute")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    assert_eq!(res.headers()["access-control-allow-origin"], "https://app.example");
}

#[tokio::test]
async fn prefix_is_stripped_and_cookies_are_set() {
    let addr = spawn(demo_server(&Stops::default()).prefix("/api").build()).await;
    let client = reqwest::Client::new();

    let res = client.post(format!("http://{addr}/api/login")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let cookie = res.headers()["set-cookie"].to_str().unwrap().to_string();
    assert_eq!(cookie, "session=abc; Path=/; HttpOnly; Secure; SameSite=Lax");
}
