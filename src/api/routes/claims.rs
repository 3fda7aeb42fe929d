//! Claim endpoints

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use super::query;
use crate::api::error::ApiError;
use crate::api::middleware::{parse_address, parse_hash};
use crate::api::server::SharedAppState;
use crate::api::service::{MonitoredTxView, Page};
use crate::common::log_claim_event;
use crate::types::{DepositKey, MonitoredTxStatus, NetworkId};

#[derive(Debug, Deserialize)]
pub struct ManualClaimRequest {
    pub from_chain: NetworkId,
    pub dest_addr: String,
    pub deposit_tx_hash: String,
}

#[derive(Debug, Deserialize)]
pub struct MonitoredQuery {
    /// Comma separated; defaults to the in-flight states
    pub status: Option<String>,
    #[serde(default)]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

/// POST /api/manual-claim
pub async fn handle_manual_claim(
    State(state): State<SharedAppState>,
    body: Result<Json<ManualClaimRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(req) = body.map_err(|e| ApiError::validation(e.body_text()))?;
    let key = DepositKey {
        dest_addr: parse_address(&req.dest_addr, "dest_addr")?,
        network_id: req.from_chain,
        tx_hash: parse_hash(&req.deposit_tx_hash, "deposit_tx_hash")?,
    };

    match state.service.manual_claim(&key).await {
        Ok(hash) => Ok(Json(json!({ "tx_hash": hash }))),
        Err(e) => {
            log_claim_event("manual_claim", &key.to_string(), None, false, Some(&e.to_string()));
            Err(e.into())
        }
    }
}

fn parse_statuses(raw: Option<&str>) -> Result<Vec<MonitoredTxStatus>, ApiError> {
    let Some(raw) = raw.filter(|s| !s.trim().is_empty()) else {
        return Ok(vec![MonitoredTxStatus::Created, MonitoredTxStatus::Sent]);
    };
    raw.split(',')
        .map(|s| s.trim().parse::<MonitoredTxStatus>().map_err(ApiError::validation))
        .collect()
}

/// GET /api/monitored-txs
pub async fn handle_monitored_txs(
    State(state): State<SharedAppState>,
    params: Result<Query<MonitoredQuery>, QueryRejection>,
) -> Result<Json<Page<MonitoredTxView>>, ApiError> {
    let params = query(params)?;
    let statuses = parse_statuses(params.status.as_deref())?;
    let page = state
        .service
        .monitored_txs(&statuses, params.limit, params.offset)
        .await?;
    Ok(Json(page))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_statuses() {
        assert_eq!(
            parse_statuses(None).unwrap(),
            vec![MonitoredTxStatus::Created, MonitoredTxStatus::Sent]
        );
        assert_eq!(
            parse_statuses(Some("failed, confirmed")).unwrap(),
            vec![MonitoredTxStatus::Failed, MonitoredTxStatus::Confirmed]
        );
        assert!(parse_statuses(Some("pending")).is_err());
    }
}
