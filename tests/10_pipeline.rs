mod common;

use std::sync::Arc;

use anyhow::Result;
use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
};
use hive_gateway::auth::{AccessLevel, AccessLevelPolicy, AuthContext, AuthError, Identity, Policy};
use serde_json::json;

use common::{TestApp, JSONAPI};

#[tokio::test]
async fn missing_credentials_are_401() -> Result<()> {
    let app = TestApp::new()?;

    let res = app.call(Method::GET, "/api/v1/users/any", None, None).await?;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    assert_eq!(res.json()["errors"][0]["status"], "401");

    let res = app.call(Method::GET, "/api/v1/users/any", Some("not-a-jwt"), None).await?;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn access_token_query_parameter_authenticates() -> Result<()> {
    let app = TestApp::new()?;
    let token = app.token(None, AccessLevel::Full)?;

    let request = Request::builder()
        .uri(format!("/api/v1/users/nobody?access_token={}", token))
        .header(header::ACCEPT, JSONAPI)
        .body(Body::empty())?;
    let res = app.send(request).await?;
    assert_eq!(res.status, StatusCode::NOT_FOUND, "{:?}", res.json());
    Ok(())
}

#[tokio::test]
async fn incompatible_accept_is_406() -> Result<()> {
    let app = TestApp::new()?;
    let token = app.token(None, AccessLevel::Full)?;

    let request = Request::builder()
        .uri("/api/v1/users/any")
        .header(header::ACCEPT, "text/html")
        .header(header::AUTHORIZATION, format!("token {}", token))
        .body(Body::empty())?;
    let res = app.send(request).await?;
    assert_eq!(res.status, StatusCode::NOT_ACCEPTABLE);
    assert_eq!(
        res.headers.get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok()),
        Some(JSONAPI)
    );
    Ok(())
}

#[tokio::test]
async fn refusing_json_with_zero_quality_is_406() -> Result<()> {
    let app = TestApp::new()?;
    let token = app.token(None, AccessLevel::Full)?;

    for accept in ["application/vnd.api+json;q=0", "*/*, application/vnd.api+json;q=0, application/json;q=0"] {
        let request = Request::builder()
            .uri("/api/v1/users/any")
            .header(header::ACCEPT, accept)
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .body(Body::empty())?;
        let res = app.send(request).await?;
        assert_eq!(res.status, StatusCode::NOT_ACCEPTABLE, "{}", accept);
    }
    Ok(())
}

#[tokio::test]
async fn non_json_body_is_415_and_nothing_is_created() -> Result<()> {
    let app = TestApp::new()?;
    let token = app.token(None, AccessLevel::Full)?;

    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/users")
        .header(header::ACCEPT, JSONAPI)
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .header(header::CONTENT_TYPE, "text/plain")
        .body(Body::from(r#"{"name":"x","externalType":"a","externalId":"1"}"#))?;
    let res = app.send(request).await?;
    assert_eq!(res.status, StatusCode::UNSUPPORTED_MEDIA_TYPE);

    let created = app
        .call(
            Method::POST,
            "/api/v1/users",
            Some(&token),
            Some(json!({"name": "x", "externalType": "a", "externalId": "1"})),
        )
        .await?;
    assert_eq!(created.status, StatusCode::CREATED, "the rejected request must not have created the user");
    Ok(())
}

#[tokio::test]
async fn malformed_json_is_400() -> Result<()> {
    let app = TestApp::new()?;
    let token = app.token(None, AccessLevel::Full)?;

    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/users")
        .header(header::ACCEPT, JSONAPI)
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .header(header::CONTENT_TYPE, JSONAPI)
        .body(Body::from("{not json"))?;
    let res = app.send(request).await?;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert!(res.json()["errors"].is_array());
    Ok(())
}

#[tokio::test]
async fn denied_capabilities_are_403_before_any_write() -> Result<()> {
    let app = TestApp::new()?;
    let reader = app.token(None, AccessLevel::Read)?;

    let res = app
        .call(
            Method::POST,
            "/api/v1/users",
            Some(&reader),
            Some(json!({"name": "x", "externalType": "a", "externalId": "1"})),
        )
        .await?;
    assert_eq!(res.status, StatusCode::FORBIDDEN);

    let res = app
        .call(Method::POST, "/api/v1/documents", Some(&reader), Some(json!({"type": "plaintext"})))
        .await?;
    assert_eq!(res.status, StatusCode::FORBIDDEN);
    Ok(())
}

#[tokio::test]
async fn unknown_routes_and_methods_get_error_documents() -> Result<()> {
    let app = TestApp::new()?;
    let token = app.token(None, AccessLevel::Full)?;

    let res = app.call(Method::GET, "/api/v1/widgets/1", Some(&token), None).await?;
    assert_eq!(res.status, StatusCode::NOT_FOUND);
    assert_eq!(res.detail(), "No route for GET /api/v1/widgets/1");

    let res = app.call(Method::PUT, "/api/v1/users/1", Some(&token), None).await?;
    assert!(res.status.is_client_error(), "unexpected status {}", res.status);
    assert_eq!(res.json()["errors"][0]["status"], res.status.as_u16().to_string());
    Ok(())
}

#[tokio::test]
async fn public_routes_need_no_credentials() -> Result<()> {
    let app = TestApp::new()?;

    let res = app.call(Method::GET, "/health", None, None).await?;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.json()["status"], "ok");

    let res = app.call(Method::GET, "/", None, None).await?;
    assert_eq!(res.status, StatusCode::OK);
    let names: Vec<_> = res.json()["resources"]
        .as_array()
        .map(|r| r.iter().filter_map(|x| x["name"].as_str().map(str::to_string)).collect())
        .unwrap_or_default();
    assert_eq!(names, vec!["user", "document", "snapshot"]);
    Ok(())
}

/// Denies everything on users, defers to access levels elsewhere
struct NoUsers;

#[async_trait::async_trait]
impl Policy for NoUsers {
    async fn authorize(&self, identity: &Identity, capability: &str, context: &AuthContext) -> Result<bool, AuthError> {
        if capability.starts_with("user") {
            return Ok(false);
        }
        AccessLevelPolicy.authorize(identity, capability, context).await
    }
}

#[tokio::test]
async fn a_custom_policy_gates_every_route() -> Result<()> {
    let app = TestApp::customized(|state| state.with_policy(Arc::new(NoUsers)))?;
    let token = app.token(None, AccessLevel::Root)?;

    let res = app
        .call(Method::POST, "/api/v1/users", Some(&token), Some(json!({"name": "x"})))
        .await?;
    assert_eq!(res.status, StatusCode::FORBIDDEN);

    let res = app.call(Method::GET, "/api/v1/users/any/snapshots", Some(&token), None).await?;
    assert_eq!(res.status, StatusCode::FORBIDDEN);

    let (doc, _) = app.document(&token).await?;
    let res = app.call(Method::GET, &format!("/api/v1/documents/{}", doc), Some(&token), None).await?;
    assert_eq!(res.status, StatusCode::OK);
    Ok(())
}
