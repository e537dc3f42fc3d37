#![allow(dead_code)]

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    body::{to_bytes, Body, Bytes},
    http::{header, HeaderMap, Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use hive_gateway::auth::{AccessLevel, Claims, JwtAuthenticator};
use hive_gateway::database::MemoryStore;
use hive_gateway::schema::Registry;
use hive_gateway::upload::UploadLimits;
use hive_gateway::{build_app, AppState};

pub const JSONAPI: &str = "application/vnd.api+json";
const TEST_SECRET: &str = "hive-test-secret";

/// The full application driven in-process over `oneshot`
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    authenticator: Arc<JwtAuthenticator>,
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub bytes: Bytes,
}

impl TestResponse {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.bytes).unwrap_or(Value::Null)
    }

    /// `errors[0].detail` of an error document
    pub fn detail(&self) -> String {
        self.json()["errors"][0]["detail"].as_str().unwrap_or_default().to_string()
    }
}

impl TestApp {
    pub fn new() -> Result<Self> {
        Self::with_limits(UploadLimits::default())
    }

    pub fn with_limits(limits: UploadLimits) -> Result<Self> {
        Self::build(Registry::builtin()?, limits)
    }

    pub fn with_registry(registry: Registry) -> Result<Self> {
        Self::build(registry, UploadLimits::default())
    }

    /// Built-in schema with collaborators swapped by `customize`
    pub fn customized(customize: impl FnOnce(AppState) -> AppState) -> Result<Self> {
        Self::from_parts(Registry::builtin()?, customize)
    }

    fn build(registry: Registry, limits: UploadLimits) -> Result<Self> {
        Self::from_parts(registry, |state| state.with_upload_limits(limits))
    }

    /// Any registry, with collaborators swapped by `customize`
    pub fn from_parts(registry: Registry, customize: impl FnOnce(AppState) -> AppState) -> Result<Self> {
        let authenticator = Arc::new(JwtAuthenticator::new(TEST_SECRET)?);
        let state = customize(AppState::new(
            registry,
            Arc::new(MemoryStore::new()),
            authenticator.clone(),
        ));
        let router = build_app(state.clone())?;
        Ok(Self {
            router,
            state,
            authenticator,
        })
    }

    pub fn token(&self, user_id: Option<&str>, access: AccessLevel) -> Result<String> {
        let claims = Claims::new("tester".into(), user_id.map(str::to_string), access, 1);
        Ok(self.authenticator.issue(&claims)?)
    }

    /// Token for a freshly created user record; returns (user id, token)
    pub async fn user_token(&self, name: &str, access: AccessLevel) -> Result<(String, String)> {
        let root = self.token(None, AccessLevel::Root)?;
        let res = self
            .call(
                Method::POST,
                "/api/v1/users",
                Some(&root),
                Some(json!({ "name": name, "externalType": "test", "externalId": name })),
            )
            .await?;
        let id = res.json()["data"]["id"]
            .as_str()
            .context("user id missing")?
            .to_string();
        let token = self.token(Some(&id), access)?;
        Ok((id, token))
    }

    pub async fn send(&self, request: Request<Body>) -> Result<TestResponse> {
        let response = self.router.clone().oneshot(request).await?;
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX).await?;
        Ok(TestResponse { status, headers, bytes })
    }

    /// JSON:API request with the usual headers
    pub async fn call(&self, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> Result<TestResponse> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::ACCEPT, JSONAPI);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, JSONAPI)
                .body(Body::from(serde_json::to_vec(&body)?))?,
            None => builder.body(Body::empty())?,
        };
        self.send(request).await
    }

    /// Create a plaintext document; returns (document id, root snapshot id)
    pub async fn document(&self, token: &str) -> Result<(String, String)> {
        let res = self
            .call(Method::POST, "/api/v1/documents", Some(token), Some(json!({ "type": "plaintext" })))
            .await?;
        anyhow::ensure!(res.status == StatusCode::CREATED, "document create failed: {:?}", res.json());
        let data = res.json()["data"].clone();
        let id = data["id"].as_str().context("document id")?.to_string();
        let head = data["relationships"]["latestSnapshot"]["data"]["id"]
            .as_str()
            .context("latestSnapshot")?
            .to_string();
        Ok((id, head))
    }

    /// Submit a change and return the new snapshot's id
    pub async fn change(&self, token: &str, document: &str, parent: &str, changeset: Value) -> Result<String> {
        let res = self
            .call(
                Method::POST,
                &format!("/api/v1/documents/{}/snapshots", document),
                Some(token),
                Some(json!({ "changeset": changeset, "parent": parent })),
            )
            .await?;
        anyhow::ensure!(res.status == StatusCode::CREATED, "change rejected: {:?}", res.json());
        Ok(res.json()["data"]["id"].as_str().context("snapshot id")?.to_string())
    }
}

/// Multipart body with one file part
pub fn multipart(boundary: &str, field: &str, mime: &str, content: &[u8]) -> Vec<u8> {
    let mut body = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"{f}\"; filename=\"upload\"\r\nContent-Type: {m}\r\n\r\n",
        b = boundary,
        f = field,
        m = mime
    )
    .into_bytes();
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
    body
}
