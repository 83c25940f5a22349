//! Position and Root Endpoints
//!
//! 포지션 조회는 메타데이터만 내보낸다. size와 margin은 암호화
//! 채널로 들어와 트리 해시에만 반영되므로, 조회 API가 그대로
//! 돌려주면 채널을 둔 의미가 없다.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;

use crate::{db::PositionStore, error::ApiError, types::EthAddress, AppState};

// ============ Response Types ============

/// 포지션 메타데이터. 금액 필드는 의도적으로 없다.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionResponse {
    pub trader: String,
    pub market: String,
    pub exists: bool,
    /// live | pending_liquidation
    pub status: Option<String>,
    pub leaf_index: Option<u64>,
    pub last_updated: Option<String>,
}

/// 트리 루트 요약
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RootResponse {
    pub root: String,
    pub leaf_count: u64,
    pub depth: usize,
}

// ============ Handlers ============

/// GET /position/:trader/:market
pub async fn get_position(
    State(state): State<AppState>,
    Path((trader, market)): Path<(String, String)>,
) -> Result<Json<PositionResponse>, ApiError> {
    let trader = EthAddress::new(&trader).map_err(ApiError::ValidationError)?;

    let row = state
        .store
        .find_position(trader.as_str(), &market)
        .await
        .map_err(|e| ApiError::DatabaseError(e.to_string()))?;

    match row {
        Some(row) => Ok(Json(PositionResponse {
            trader: trader.into_inner(),
            market,
            exists: true,
            status: Some(row.status),
            leaf_index: Some(row.leaf_index as u64),
            last_updated: Some(row.updated_at.to_rfc3339()),
        })),
        None => Ok(Json(PositionResponse {
            trader: trader.into_inner(),
            market,
            exists: false,
            status: None,
            leaf_index: None,
            last_updated: None,
        })),
    }
}

/// GET /root
///
/// 현재 트리 상태. 컨트랙트의 currentRoot와 비교하는 용도.
pub async fn get_root(State(state): State<AppState>) -> Json<RootResponse> {
    let (root, leaf_count, depth) = state.book.root_info().await;
    Json(RootResponse {
        root,
        leaf_count,
        depth,
    })
}
