//! Admin REST surface for managing sites
//!
//! A small axum server, separate from the chat bot, for operators:
//!
//! - `GET /sites`: every known site
//! - `GET /sites/{id}`: one site
//! - `POST /sites`: `{"Url": ...}`, normalized before insert, 204
//! - `DELETE /sites/{id}`: 204; bindings and results go with it
//!
//! URLs pass through the same normalization as the bot's `/add`, so
//! both write paths agree on the canonical spelling.

pub mod error;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::model::Site;
use crate::repository::Repository;
use crate::url;

pub use error::{ApiError, ApiResult};

#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<dyn Repository>,
    pub db_query_timeout: Duration,
}

impl ApiState {
    /// Wrap one store call in the configured deadline.
    async fn with_timeout<T>(
        &self,
        operation: impl Future<Output = crate::repository::RepoResult<T>>,
    ) -> ApiResult<T> {
        match time::timeout(self.db_query_timeout, operation).await {
            Ok(result) => result.map_err(ApiError::from),
            Err(_) => Err(ApiError::StoreError("store query timed out".to_string())),
        }
    }
}

pub fn router(state: ApiState) -> Router {
    use tower_http::trace::TraceLayer;

    Router::new()
        .route("/sites", get(list_sites).post(add_site))
        .route("/sites/{id}", get(get_site).delete(delete_site))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Bind `address` and serve in a background task until `shutdown` is
/// cancelled. Returns the bound address.
pub async fn spawn_server(
    address: &str,
    state: ApiState,
    shutdown: CancellationToken,
) -> anyhow::Result<SocketAddr> {
    let listener = tokio::net::TcpListener::bind(address).await?;
    let addr = listener.local_addr()?;
    info!("admin API listening on {addr}");

    let app = router(state);
    tokio::spawn(async move {
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await;
        if let Err(e) = served {
            error!("admin API server error: {e}");
        }
    });

    Ok(addr)
}

async fn list_sites(State(state): State<ApiState>) -> ApiResult<Json<Vec<Site>>> {
    let sites = state.with_timeout(state.store.all_sites()).await?;
    Ok(Json(sites))
}

async fn get_site(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Site>> {
    let id: i64 = id
        .parse()
        .map_err(|_| ApiError::InvalidRequest("invalid id".to_string()))?;

    let site = state.with_timeout(state.store.site_by_id(id)).await?;
    Ok(Json(site))
}

#[derive(Debug, Deserialize)]
struct AddSiteRequest {
    #[serde(rename = "Url")]
    url: String,
}

async fn add_site(
    State(state): State<ApiState>,
    Json(request): Json<AddSiteRequest>,
) -> ApiResult<StatusCode> {
    let url = url::normalize(request.url.trim())
        .map_err(|e| ApiError::InvalidRequest(e.to_string()))?;

    state.with_timeout(state.store.add_site(&url)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_site(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let id: i64 = id
        .parse()
        .map_err(|_| ApiError::InvalidRequest("invalid id".to_string()))?;

    state.with_timeout(state.store.delete_site_by_id(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MemoryRepository;

    async fn spawn_api() -> (Arc<MemoryRepository>, SocketAddr, CancellationToken) {
        let store = Arc::new(MemoryRepository::new());
        let state = ApiState {
            store: store.clone(),
            db_query_timeout: Duration::from_secs(5),
        };
        let shutdown = CancellationToken::new();
        let addr = spawn_server("127.0.0.1:0", state, shutdown.clone())
            .await
            .unwrap();
        (store, addr, shutdown)
    }

    #[tokio::test]
    async fn post_normalizes_and_lists_round_trip() {
        let (_store, addr, shutdown) = spawn_api().await;
        let client = reqwest::Client::new();

        let response = client
            .post(format!("http://{addr}/sites"))
            .json(&serde_json::json!({ "Url": "google.com/" }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 204);

        let sites: Vec<Site> = client
            .get(format!("http://{addr}/sites"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(sites.len(), 1);
        assert_eq!(sites[0].url, "http://google.com");

        shutdown.cancel();
    }

    #[tokio::test]
    async fn invalid_url_is_rejected_without_state_change() {
        let (store, addr, shutdown) = spawn_api().await;
        let client = reqwest::Client::new();

        let response = client
            .post(format!("http://{addr}/sites"))
            .json(&serde_json::json!({ "Url": "not a url" }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 400);
        assert!(store.all_sites().await.unwrap().is_empty());

        shutdown.cancel();
    }

    #[tokio::test]
    async fn get_by_id_handles_bad_and_missing_ids() {
        let (store, addr, shutdown) = spawn_api().await;
        store.add_site("http://a.com").await.unwrap();
        let client = reqwest::Client::new();

        let bad = client
            .get(format!("http://{addr}/sites/abc"))
            .send()
            .await
            .unwrap();
        assert_eq!(bad.status().as_u16(), 400);

        let missing = client
            .get(format!("http://{addr}/sites/999"))
            .send()
            .await
            .unwrap();
        assert_eq!(missing.status().as_u16(), 404);

        let found: Site = client
            .get(format!("http://{addr}/sites/1"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(found.url, "http://a.com");

        shutdown.cancel();
    }

    #[tokio::test]
    async fn delete_removes_the_site() {
        let (store, addr, shutdown) = spawn_api().await;
        store.add_site("http://a.com").await.unwrap();
        let client = reqwest::Client::new();

        let response = client
            .delete(format!("http://{addr}/sites/1"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 204);
        assert!(store.all_sites().await.unwrap().is_empty());

        shutdown.cancel();
    }
}
