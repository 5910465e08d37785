use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{ensure, Context, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use chrono::Duration;
use http_body_util::BodyExt;
use once_cell::sync::Lazy;
use peerfund::auth::jwt::JwtService;
use peerfund::config::AppConfig;
use peerfund::error::AppResult;
use peerfund::routes;
use peerfund::state::AppState;
use peerfund::store::{
    ChangeFeed, CollectionPath, DocPath, Document, DocumentStore, MemoryStore, Query, StoreError,
    StoreResult, TransactionFn, WriteBatch,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tower::util::ServiceExt;

pub const ORIGIN: &str = "https://fund.test";
pub const IPHONE: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X)";
pub const ANDROID: &str = "Mozilla/5.0 (Linux; Android 14; Pixel 8) Mobile";

static CONFIG: Lazy<AppConfig> = Lazy::new(|| AppConfig {
    database_url: None,
    database_max_pool_size: 1,
    server_host: "127.0.0.1".to_string(),
    server_port: 0,
    jwt_secret: "test-secret".to_string(),
    jwt_issuer: "test-issuer".to_string(),
    jwt_audience: "test-audience".to_string(),
    cors_allowed_origin: None,
    public_origin: ORIGIN.to_string(),
});

/// Memory store whose commits, or queries below one path, can be switched to
/// fail, standing in for an unreachable backend.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    fail_commits: AtomicBool,
    failing_prefix: Mutex<Option<String>>,
}

#[allow(dead_code)]
impl FlakyStore {
    pub fn fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    pub fn fail_queries_under(&self, prefix: &str) {
        *self.failing_prefix.lock().expect("prefix lock") = Some(prefix.to_string());
    }
}

#[async_trait]
impl DocumentStore for FlakyStore {
    async fn get(&self, path: &DocPath) -> StoreResult<Option<Document>> {
        self.inner.get(path).await
    }

    async fn query(&self, collection: &CollectionPath, query: &Query) -> StoreResult<Vec<Document>> {
        let failing = self.failing_prefix.lock().expect("prefix lock").clone();
        if let Some(prefix) = failing {
            if collection.as_str().starts_with(&prefix) {
                return Err(StoreError::Unavailable("read timed out".to_string()));
            }
        }
        self.inner.query(collection, query).await
    }

    async fn commit(&self, batch: WriteBatch) -> StoreResult<()> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection reset".to_string()));
        }
        self.inner.commit(batch).await
    }

    async fn run_transaction(&self, body: TransactionFn) -> AppResult<()> {
        self.inner.run_transaction(body).await
    }

    fn changes(&self) -> &ChangeFeed {
        self.inner.changes()
    }
}

pub struct TestApp {
    pub state: AppState,
    router: Router,
}

impl TestApp {
    pub fn new() -> Result<Self> {
        Self::with_store(Arc::new(MemoryStore::new()))
    }

    pub fn with_store(store: Arc<dyn DocumentStore>) -> Result<Self> {
        let config = CONFIG.clone();
        let jwt = JwtService::from_config(&config)?;
        let state = AppState::new(store, config, jwt);
        let router = routes::create_router(state.clone());
        Ok(Self { state, router })
    }

    pub fn token(&self, user_id: &str) -> Result<String> {
        self.state
            .jwt
            .generate_token(user_id, Some(&format!("{user_id}@example.com")), Duration::minutes(30))
    }

    pub async fn request(
        &self,
        method: Method,
        path: &str,
        payload: Option<&Value>,
        token: Option<&str>,
        headers: &[(&str, &str)],
    ) -> Result<hyper::Response<Body>> {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let body = match payload {
            Some(payload) => {
                builder = builder.header("content-type", "application/json");
                Body::from(serde_json::to_vec(payload)?)
            }
            None => Body::empty(),
        };
        let request = builder.body(body)?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let payload = serde_json::to_value(payload)?;
        self.request(Method::POST, path, Some(&payload), token, &[])
            .await
    }

    #[allow(dead_code)]
    pub async fn patch_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let payload = serde_json::to_value(payload)?;
        self.request(Method::PATCH, path, Some(&payload), token, &[])
            .await
    }

    #[allow(dead_code)]
    pub async fn put_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let payload = serde_json::to_value(payload)?;
        self.request(Method::PUT, path, Some(&payload), token, &[])
            .await
    }

    pub async fn get(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        self.request(Method::GET, path, None, token, &[]).await
    }

    #[allow(dead_code)]
    pub async fn delete(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        self.request(Method::DELETE, path, None, token, &[]).await
    }

    /// Creates a campaign owned by the token's user and returns its id.
    #[allow(dead_code)]
    pub async fn create_campaign(&self, token: &str, body: Value) -> Result<String> {
        let response = self.post_json("/api/campaigns", &body, Some(token)).await?;
        let created: Value = expect_json(response, StatusCode::CREATED).await?;
        created["campaign"]["id"]
            .as_str()
            .map(str::to_string)
            .context("campaign id missing")
    }

    #[allow(dead_code)]
    pub async fn add_participant(
        &self,
        token: &str,
        campaign_id: &str,
        first_name: &str,
        phone_number: &str,
    ) -> Result<String> {
        let response = self
            .post_json(
                &format!("/api/campaigns/{campaign_id}/participants"),
                &json!({ "firstName": first_name, "lastName": "Tester", "phoneNumber": phone_number }),
                Some(token),
            )
            .await?;
        let created: Value = expect_json(response, StatusCode::CREATED).await?;
        created["id"]
            .as_str()
            .map(str::to_string)
            .context("participant id missing")
    }
}

pub async fn body_to_vec(body: Body) -> Result<Vec<u8>> {
    let collected = body
        .collect()
        .await
        .context("failed to collect response body")?;
    Ok(collected.to_bytes().to_vec())
}

/// Asserts the status and decodes the JSON body.
pub async fn expect_json<T: DeserializeOwned>(
    response: hyper::Response<Body>,
    expected: StatusCode,
) -> Result<T> {
    let status = response.status();
    let body = body_to_vec(response.into_body()).await?;
    ensure!(
        status == expected,
        "expected {expected}, got {status}: {}",
        String::from_utf8_lossy(&body)
    );
    Ok(serde_json::from_slice(&body)?)
}
