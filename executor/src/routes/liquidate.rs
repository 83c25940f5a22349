//! Liquidation Endpoints
//!
//! POST /liquidate는 파이프라인 전체(증인 캡처 → 증명 → 제출)를
//! 동기로 돈다. 깊이 20 기준 증명에 몇 초 걸리므로 호출자는
//! 기다릴 각오를 해야 한다. 백그라운드 스캐너가 같은 파이프라인을
//! 쓰기 때문에 이 엔드포인트는 사실상 수동 트리거다.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{db::LiquidationRow, error::ApiError, types::EthAddress, AppState};

// ============ Request/Response Types ============

#[derive(Debug, Deserialize)]
pub struct LiquidateRequest {
    pub trader: String,
    pub market: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiquidateResponse {
    pub id: Uuid,
    /// proved | submitted | confirmed
    pub status: String,
    pub tx_hash: Option<String>,
    pub proof_ms: u64,
}

/// liquidations 테이블 한 건의 공개 뷰
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiquidationRecord {
    pub id: Uuid,
    pub trader: String,
    pub market: String,
    pub leaf_index: i64,
    pub status: String,
    pub old_root: String,
    pub new_root: String,
    pub mark_price: String,
    pub cum_funding: String,
    /// Solidity 인자 형식 {a, b, c, publicInputs}. 증명 전에는 null.
    pub proof: Option<serde_json::Value>,
    pub tx_hash: Option<String>,
    pub attempts: i32,
    pub error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<LiquidationRow> for LiquidationRecord {
    fn from(row: LiquidationRow) -> Self {
        Self {
            id: row.id,
            trader: row.trader,
            market: row.market,
            leaf_index: row.leaf_index,
            status: row.status,
            old_root: row.old_root,
            new_root: row.new_root,
            mark_price: row.mark_price,
            cum_funding: row.cum_funding,
            proof: row.proof.as_deref().and_then(|p| serde_json::from_str(p).ok()),
            tx_hash: row.tx_hash,
            attempts: row.attempts,
            error: row.error,
            created_at: row.created_at.to_rfc3339(),
            updated_at: row.updated_at.to_rfc3339(),
        }
    }
}

// ============ Handlers ============

/// POST /liquidate
pub async fn trigger_liquidation(
    State(state): State<AppState>,
    Json(req): Json<LiquidateRequest>,
) -> Result<Json<LiquidateResponse>, ApiError> {
    let trader = EthAddress::new(&req.trader).map_err(ApiError::ValidationError)?;

    let outcome = state
        .liquidator
        .liquidate(trader.as_str(), &req.market)
        .await?;

    Ok(Json(LiquidateResponse {
        id: outcome.id,
        status: outcome.status.as_str().to_string(),
        tx_hash: outcome.tx_hash,
        proof_ms: outcome.proof_ms as u64,
    }))
}

/// GET /liquidations/:id
pub async fn get_liquidation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<LiquidationRecord>, ApiError> {
    let row = state
        .liquidator
        .find(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("liquidation {id}")))?;
    Ok(Json(row.into()))
}
