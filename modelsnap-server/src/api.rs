use crate::objects::ObjectStore;
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Duration, Utc};
use modelsnap_core::remote::{RemoteObject, TransferDirection, TransferRequest, TransferTarget};
use modelsnap_core::store::validate_commit_id;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, error};
use uuid::Uuid;

pub const DEFAULT_GRANT_TTL_SECS: i64 = 300;
const MAX_OBJECT_BYTES: usize = 1024 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("missing or invalid access token")]
    Unauthorized,

    #[error("grant does not cover this transfer")]
    Forbidden,

    #[error("{0}")]
    BadRequest(String),

    #[error("object not found")]
    NotFound,

    #[error("storage failure: {0}")]
    Storage(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Storage(e) => {
                error!("Object storage failed: {:#}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, self.to_string()).into_response()
    }
}

#[derive(Debug, Clone)]
struct Grant {
    key: String,
    direction: TransferDirection,
    expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct AppState {
    pub objects: Arc<ObjectStore>,
    pub access_token: Option<String>,
    pub grant_ttl: Duration,
    grants: Arc<Mutex<HashMap<String, Grant>>>,
}

impl AppState {
    pub fn new(objects: ObjectStore, access_token: Option<String>) -> Self {
        Self {
            objects: Arc::new(objects),
            access_token,
            grant_ttl: Duration::seconds(DEFAULT_GRANT_TTL_SECS),
            grants: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_grant_ttl(mut self, ttl: Duration) -> Self {
        self.grant_ttl = ttl;
        self
    }

    fn grants(&self) -> MutexGuard<'_, HashMap<String, Grant>> {
        self.grants
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_access(&self, headers: &HeaderMap) -> Result<(), ApiError> {
        let Some(expected) = &self.access_token else {
            return Ok(());
        };
        let presented = headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "));
        match presented {
            Some(token) if token == expected => Ok(()),
            _ => Err(ApiError::Unauthorized),
        }
    }

    fn issue(&self, direction: TransferDirection, key: String) -> TransferTarget {
        let token = Uuid::new_v4().simple().to_string();
        let expires_at = Utc::now() + self.grant_ttl;
        let url = format!("/objects/{}?grant={}", key, token);

        debug!("Granted {} of {} until {}", direction.as_str(), key, expires_at);
        self.grants().insert(
            token,
            Grant {
                key,
                direction,
                expires_at,
            },
        );
        TransferTarget { url, expires_at }
    }

    fn redeem(&self, token: &str, key: &str, direction: TransferDirection) -> Result<(), ApiError> {
        let now = Utc::now();
        let mut grants = self.grants();
        grants.retain(|_, grant| grant.expires_at > now);

        match grants.get(token) {
            Some(grant) if grant.key == key && grant.direction == direction => Ok(()),
            _ => Err(ApiError::Forbidden),
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/projects/:project/transfers", post(issue_transfer))
        .route("/objects/*key", get(get_object).put(put_object))
        .layer(DefaultBodyLimit::max(MAX_OBJECT_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

fn validate_project(project: &str) -> Result<(), ApiError> {
    let valid = !project.is_empty()
        && project
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(ApiError::BadRequest(format!("invalid project {:?}", project)))
    }
}

async fn issue_transfer(
    State(state): State<AppState>,
    Path(project): Path<String>,
    headers: HeaderMap,
    Json(req): Json<TransferRequest>,
) -> Result<Json<TransferTarget>, ApiError> {
    state.check_access(&headers)?;
    validate_project(&project)?;
    if let RemoteObject::Commit { commit_id } = &req.object {
        validate_commit_id(commit_id).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    }

    let key = req.object.key(&project);
    Ok(Json(state.issue(req.direction, key)))
}

#[derive(Deserialize)]
struct GrantQuery {
    grant: String,
}

async fn put_object(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<GrantQuery>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    state.redeem(&query.grant, &key, TransferDirection::Upload)?;
    state.objects.put(&key, &body)?;
    debug!("Stored {} ({} bytes)", key, body.len());
    Ok(StatusCode::NO_CONTENT)
}

async fn get_object(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<GrantQuery>,
) -> Result<Vec<u8>, ApiError> {
    state.redeem(&query.grant, &key, TransferDirection::Download)?;
    state.objects.get(&key)?.ok_or(ApiError::NotFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn app(dir: &TempDir, ttl: Duration) -> Router {
        let objects = ObjectStore::open(dir.path()).unwrap();
        create_router(AppState::new(objects, Some("secret".to_string())).with_grant_ttl(ttl))
    }

    fn transfer_request(token: Option<&str>, direction: &str, object: serde_json::Value) -> Request<Body> {
        let mut builder = Request::post("/projects/p1/transfers")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let body = serde_json::json!({"direction": direction, "object": object});
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn issue(app: &Router, direction: &str, object: serde_json::Value) -> TransferTarget {
        let response = app
            .clone()
            .oneshot(transfer_request(Some("secret"), direction, object))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let dir = TempDir::new().unwrap();
        let response = app(&dir, Duration::seconds(300))
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_transfer_requires_token() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir, Duration::seconds(300));

        let response = app
            .clone()
            .oneshot(transfer_request(None, "upload", serde_json::json!({"kind": "tree"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .oneshot(transfer_request(Some("wrong"), "upload", serde_json::json!({"kind": "tree"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_rejects_unsafe_commit_id() {
        let dir = TempDir::new().unwrap();
        let response = app(&dir, Duration::seconds(300))
            .oneshot(transfer_request(
                Some("secret"),
                "upload",
                serde_json::json!({"kind": "commit", "commitId": "../../etc"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_grants_are_scoped_to_object_and_direction() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir, Duration::seconds(300));
        let commit = serde_json::json!({"kind": "commit", "commitId": "42"});

        let download = issue(&app, "download", commit.clone()).await;
        let response = app
            .clone()
            .oneshot(Request::get(&download.url).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        // A download grant cannot write.
        let response = app
            .clone()
            .oneshot(Request::put(&download.url).body(Body::from("x")).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let upload = issue(&app, "upload", commit).await;
        let response = app
            .clone()
            .oneshot(Request::put(&upload.url).body(Body::from("blob")).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        // Same grant, different object.
        let grant = upload.url.split("grant=").nth(1).unwrap();
        let other = format!("/objects/projects/p1/tree.json?grant={}", grant);
        let response = app
            .clone()
            .oneshot(Request::put(&other).body(Body::from("x")).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = app
            .oneshot(Request::get(&download.url).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"blob");
    }

    #[tokio::test]
    async fn test_expired_grant_is_refused() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir, Duration::zero());

        let target = issue(&app, "upload", serde_json::json!({"kind": "tree"})).await;
        let response = app
            .oneshot(Request::put(&target.url).body(Body::from("{}")).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
