use std::sync::Arc;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tokio::sync::watch;
use shared::protocol::API_PREFIX;
use shared::types::HostRecord;
use crate::error::AdminError;
use crate::inventory::{HostQuery, Inventory, InventoryHandle};

#[derive(Clone)]
pub struct AppState {
    pub inventory: InventoryHandle,
    pub hash_rx: watch::Receiver<Option<String>>,
}

#[derive(Serialize)]
pub struct RefreshResponse {
    pub hosts: usize,
    pub fingerprint: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(&format!("{API_PREFIX}/hosts"), get(get_hosts))
        .route(&format!("{API_PREFIX}/hosts/hash"), get(get_hash))
        .route(&format!("{API_PREFIX}/hosts/refresh"), post(refresh))
        .route(&format!("{API_PREFIX}/hosts/:address"), get(get_host))
        .route(&format!("{API_PREFIX}/controller"), get(get_controller))
        .route(&format!("{API_PREFIX}/user-api"), get(get_user_api))
        .route(&format!("{API_PREFIX}/object-storage"), get(get_object_storage))
        .with_state(state)
}

fn status_for(error: &AdminError) -> StatusCode {
    match error {
        AdminError::Configuration(_) => StatusCode::BAD_REQUEST,
        AdminError::InventoryClosed => StatusCode::SERVICE_UNAVAILABLE,
        e if e.is_collaborator() => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn reject(error: AdminError) -> StatusCode {
    tracing::error!("Inventory query failed: {}", error);
    status_for(&error)
}

async fn get_hosts(
    State(state): State<AppState>,
    Query(query): Query<HostQuery>,
) -> Result<Json<Vec<HostRecord>>, StatusCode> {
    let inventory = state.inventory.inventory().await.map_err(reject)?;
    let hosts = inventory.select(&query).map_err(reject)?;
    Ok(Json(hosts.into_iter().cloned().collect()))
}

async fn get_hash(State(state): State<AppState>) -> Result<String, StatusCode> {
    state.hash_rx.borrow().clone().ok_or(StatusCode::NOT_FOUND)
}

async fn refresh(State(state): State<AppState>) -> Result<Json<RefreshResponse>, StatusCode> {
    let inventory: Arc<Inventory> = state.inventory.refresh().await.map_err(reject)?;
    Ok(Json(RefreshResponse {
        hosts: inventory.len(),
        fingerprint: inventory.fingerprint(),
    }))
}

async fn get_host(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<Json<HostRecord>, StatusCode> {
    let inventory = state.inventory.inventory().await.map_err(reject)?;
    inventory
        .get(&address)
        .cloned()
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn get_controller(State(state): State<AppState>) -> Result<Json<HostRecord>, StatusCode> {
    state.inventory.controller_host().await.map(Json).map_err(reject)
}

async fn get_user_api(State(state): State<AppState>) -> Result<Json<HostRecord>, StatusCode> {
    state
        .inventory
        .user_api_host()
        .await
        .map_err(reject)?
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn get_object_storage(State(state): State<AppState>) -> Result<Json<HostRecord>, StatusCode> {
    state
        .inventory
        .object_storage_host()
        .await
        .map_err(reject)?
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_errors_are_bad_request() {
        let err = AdminError::Configuration("Unknown service type: mainframe".to_string());
        assert_eq!(status_for(&err), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_collaborator_errors_are_bad_gateway() {
        assert_eq!(status_for(&AdminError::Discovery("down".to_string())), StatusCode::BAD_GATEWAY);
        assert_eq!(status_for(&AdminError::Credentials("no keys".to_string())), StatusCode::BAD_GATEWAY);
        assert_eq!(status_for(&AdminError::InventoryClosed), StatusCode::SERVICE_UNAVAILABLE);
    }
}
