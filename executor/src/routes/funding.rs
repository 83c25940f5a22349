//! Funding Endpoint
//!
//! 마켓별 마크 가격과 누적 펀딩 지수. 프론트가 의도를 만들기 전에
//! 현재 지수를 보는 용도다. 금액과 같은 1e8 고정소수점 십진 문자열.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;

use crate::{error::ApiError, AppState};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FundingResponse {
    pub market: String,
    pub mark_price: String,
    pub cum_funding: String,
    /// 유지 증거금 요구율 (basis points). 청산가 계산에 필요.
    pub mmr_bps: u64,
    pub updated_at: String,
}

/// GET /funding/:market
pub async fn get_funding(
    State(state): State<AppState>,
    Path(market): Path<String>,
) -> Result<Json<FundingResponse>, ApiError> {
    let snapshot = state
        .oracle
        .snapshot(&market)
        .ok_or_else(|| ApiError::NotFound(format!("unknown market {market}")))?;

    Ok(Json(FundingResponse {
        market: snapshot.market,
        mark_price: snapshot.mark_price.to_string(),
        cum_funding: snapshot.cum_funding.to_string(),
        mmr_bps: state.config.mmr_bps,
        updated_at: snapshot.updated_at.to_rfc3339(),
    }))
}
