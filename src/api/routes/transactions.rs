//! Transaction listing endpoints

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    Json,
};
use serde::Deserialize;

use super::query;
use crate::api::error::ApiError;
use crate::api::middleware::parse_address;
use crate::api::server::SharedAppState;
use crate::api::service::{Page, TransactionView};
use crate::types::{LeafType, NetworkId};

#[derive(Debug, Deserialize)]
pub struct AddressQuery {
    pub dest_addr: String,
    #[serde(default)]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default)]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

#[derive(Debug, Deserialize)]
pub struct ReadyQuery {
    pub network_id: NetworkId,
    /// 0 = asset, 1 = message
    #[serde(default)]
    pub leaf_type: u8,
    #[serde(default)]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

/// GET /api/transactions
pub async fn handle_transactions(
    State(state): State<SharedAppState>,
    params: Result<Query<AddressQuery>, QueryRejection>,
) -> Result<Json<Page<TransactionView>>, ApiError> {
    let params = query(params)?;
    let dest_addr = parse_address(&params.dest_addr, "dest_addr")?;
    let page = state
        .service
        .transactions(&dest_addr, params.limit, params.offset)
        .await?;
    Ok(Json(page))
}

/// GET /api/pending
pub async fn handle_pending(
    State(state): State<SharedAppState>,
    params: Result<Query<AddressQuery>, QueryRejection>,
) -> Result<Json<Page<TransactionView>>, ApiError> {
    let params = query(params)?;
    let dest_addr = parse_address(&params.dest_addr, "dest_addr")?;
    let page = state
        .service
        .pending(&dest_addr, params.limit, params.offset)
        .await?;
    Ok(Json(page))
}

/// GET /api/not-ready
pub async fn handle_not_ready(
    State(state): State<SharedAppState>,
    params: Result<Query<PageQuery>, QueryRejection>,
) -> Result<Json<Page<TransactionView>>, ApiError> {
    let params = query(params)?;
    let page = state.service.not_ready(params.limit, params.offset).await?;
    Ok(Json(page))
}

/// GET /api/ready-pending
pub async fn handle_ready_pending(
    State(state): State<SharedAppState>,
    params: Result<Query<ReadyQuery>, QueryRejection>,
) -> Result<Json<Page<TransactionView>>, ApiError> {
    let params = query(params)?;
    let leaf_type = LeafType::from_u8(params.leaf_type)
        .ok_or_else(|| ApiError::validation("leaf_type must be 0 or 1"))?;
    let page = state
        .service
        .ready_pending(params.network_id, leaf_type, params.limit, params.offset)
        .await?;
    Ok(Json(page))
}
