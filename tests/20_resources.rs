mod common;

use anyhow::Result;
use axum::http::{Method, StatusCode};
use hive_gateway::auth::AccessLevel;
use serde_json::json;

use common::TestApp;

#[tokio::test]
async fn user_creation_is_idempotent_on_external_identity() -> Result<()> {
    let app = TestApp::new()?;
    let token = app.token(None, AccessLevel::Full)?;
    let body = json!({"name": "Ada", "externalType": "github", "externalId": "1815"});

    let first = app.call(Method::POST, "/api/v1/users", Some(&token), Some(body.clone())).await?;
    assert_eq!(first.status, StatusCode::CREATED);
    let second = app.call(Method::POST, "/api/v1/users", Some(&token), Some(body)).await?;
    assert_eq!(second.status, StatusCode::OK);
    assert_eq!(first.json()["data"]["id"], second.json()["data"]["id"]);

    let other = app
        .call(
            Method::POST,
            "/api/v1/users",
            Some(&token),
            Some(json!({"name": "Ada", "externalType": "gitlab", "externalId": "1815"})),
        )
        .await?;
    assert_eq!(other.status, StatusCode::CREATED);
    assert_ne!(other.json()["data"]["id"], first.json()["data"]["id"]);
    Ok(())
}

#[tokio::test]
async fn patch_cannot_take_over_another_external_identity() -> Result<()> {
    let app = TestApp::new()?;
    let token = app.token(None, AccessLevel::Full)?;

    let mut ids = Vec::new();
    for external_id in ["1", "2"] {
        let res = app
            .call(
                Method::POST,
                "/api/v1/users",
                Some(&token),
                Some(json!({"name": external_id, "externalType": "gh", "externalId": external_id})),
            )
            .await?;
        ids.push(res.json()["data"]["id"].as_str().unwrap_or_default().to_string());
    }

    let path = format!("/api/v1/users/{}", ids[1]);
    let res = app
        .call(Method::PATCH, &path, Some(&token), Some(json!({"externalId": "1"})))
        .await?;
    assert_eq!(res.status, StatusCode::CONFLICT);

    let res = app.call(Method::GET, &path, Some(&token), None).await?;
    assert_eq!(res.json()["data"]["attributes"]["externalId"], "2");

    // Re-saving its own key and moving to a free key are both fine
    let res = app
        .call(Method::PATCH, &path, Some(&token), Some(json!({"externalId": "2", "name": "two"})))
        .await?;
    assert_eq!(res.status, StatusCode::OK);
    let res = app
        .call(Method::PATCH, &path, Some(&token), Some(json!({"externalId": "3"})))
        .await?;
    assert_eq!(res.status, StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn enveloped_create_and_read_back() -> Result<()> {
    let app = TestApp::new()?;
    let token = app.token(None, AccessLevel::Full)?;

    let res = app
        .call(
            Method::POST,
            "/api/v1/users",
            Some(&token),
            Some(json!({"data": {"type": "users", "attributes": {"name": "Grace", "externalType": "x", "externalId": "7"}}})),
        )
        .await?;
    assert_eq!(res.status, StatusCode::CREATED);
    let data = res.json()["data"].clone();
    assert_eq!(data["type"], "users");
    let id = data["id"].as_str().unwrap_or_default().to_string();
    assert_eq!(data["links"]["self"], format!("/api/v1/users/{}", id));

    let res = app.call(Method::GET, &format!("/api/v1/users/{}", id), Some(&token), None).await?;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.json()["data"]["attributes"]["name"], "Grace");
    Ok(())
}

#[tokio::test]
async fn sparse_fieldsets_project_attributes() -> Result<()> {
    let app = TestApp::new()?;
    let token = app.token(None, AccessLevel::Full)?;
    let (id, _) = app.user_token("linus", AccessLevel::Edit).await?;

    let res = app
        .call(Method::GET, &format!("/api/v1/users/{}?fields%5Busers%5D=name", id), Some(&token), None)
        .await?;
    assert_eq!(res.status, StatusCode::OK);
    let attributes = res.json()["data"]["attributes"].clone();
    assert_eq!(attributes["name"], "linus");
    assert!(attributes.get("externalId").is_none());

    let res = app
        .call(Method::GET, &format!("/api/v1/users/{}?fields%5Busers%5D=password", id), Some(&token), None)
        .await?;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn client_generated_ids_and_unknown_attributes_are_rejected() -> Result<()> {
    let app = TestApp::new()?;
    let token = app.token(None, AccessLevel::Full)?;

    let res = app
        .call(
            Method::POST,
            "/api/v1/users",
            Some(&token),
            Some(json!({"data": {"type": "users", "id": "mine", "attributes": {"name": "x"}}})),
        )
        .await?;
    assert_eq!(res.status, StatusCode::FORBIDDEN);

    let res = app
        .call(Method::POST, "/api/v1/users", Some(&token), Some(json!({"nickname": "x"})))
        .await?;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);

    let res = app
        .call(
            Method::POST,
            "/api/v1/users",
            Some(&token),
            Some(json!({"data": {"type": "documents", "attributes": {"name": "x"}}})),
        )
        .await?;
    assert_eq!(res.status, StatusCode::CONFLICT);
    Ok(())
}

#[tokio::test]
async fn patch_requires_matching_id() -> Result<()> {
    let app = TestApp::new()?;
    let token = app.token(None, AccessLevel::Full)?;
    let (id, _) = app.user_token("barbara", AccessLevel::Edit).await?;
    let path = format!("/api/v1/users/{}", id);

    let res = app
        .call(
            Method::PATCH,
            &path,
            Some(&token),
            Some(json!({"data": {"type": "users", "id": "someone-else", "attributes": {"name": "B"}}})),
        )
        .await?;
    assert_eq!(res.status, StatusCode::CONFLICT);

    let res = app
        .call(
            Method::PATCH,
            &path,
            Some(&token),
            Some(json!({"data": {"type": "users", "id": id, "attributes": {"name": "Barbara"}}})),
        )
        .await?;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.json()["data"]["attributes"]["name"], "Barbara");
    assert_eq!(res.json()["data"]["attributes"]["externalId"], "barbara");

    let res = app
        .call(
            Method::PATCH,
            "/api/v1/users/missing",
            Some(&token),
            Some(json!({"data": {"type": "users", "id": "missing", "attributes": {"name": "B"}}})),
        )
        .await?;
    assert_eq!(res.status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn delete_then_get_is_404() -> Result<()> {
    let app = TestApp::new()?;
    let token = app.token(None, AccessLevel::Full)?;
    let (id, _) = app.user_token("ken", AccessLevel::Edit).await?;
    let path = format!("/api/v1/users/{}", id);

    let res = app.call(Method::DELETE, "/api/v1/users/nope", Some(&token), None).await?;
    assert_eq!(res.status, StatusCode::NOT_FOUND);

    let res = app.call(Method::DELETE, &path, Some(&token), None).await?;
    assert_eq!(res.status, StatusCode::NO_CONTENT);
    assert!(res.bytes.is_empty());

    let res = app.call(Method::GET, &path, Some(&token), None).await?;
    assert_eq!(res.status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn edit_access_cannot_destroy() -> Result<()> {
    let app = TestApp::new()?;
    let (id, editor) = app.user_token("dennis", AccessLevel::Edit).await?;

    let res = app
        .call(Method::DELETE, &format!("/api/v1/users/{}", id), Some(&editor), None)
        .await?;
    assert_eq!(res.status, StatusCode::FORBIDDEN);
    Ok(())
}

#[tokio::test]
async fn snapshots_and_documents_reject_generic_writes() -> Result<()> {
    let app = TestApp::new()?;
    let token = app.token(None, AccessLevel::Root)?;
    let (doc, head) = app.document(&token).await?;

    let res = app
        .call(Method::POST, "/api/v1/snapshots", Some(&token), Some(json!({"content": "forged"})))
        .await?;
    assert!(res.status.is_client_error());

    let res = app
        .call(
            Method::PATCH,
            &format!("/api/v1/documents/{}", doc),
            Some(&token),
            Some(json!({"type": "other"})),
        )
        .await?;
    assert!(res.status.is_client_error());

    let res = app.call(Method::GET, &format!("/api/v1/snapshots/{}", head), Some(&token), None).await?;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.json()["data"]["attributes"]["content"], "");
    Ok(())
}
