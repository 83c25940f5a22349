//! Signature Verification Endpoint
//!
//! 암호화 없이 서명만 따로 점검하는 진단용. 프론트가 봉인 전에
//! 서명 구성이 맞는지 확인할 때 쓴다.
//!
//! # Interview Q&A
//!
//! Q: 검증 실패를 왜 401이 아니라 200 + valid:false로 주나?
//! A: 이 엔드포인트의 질문은 "이 서명이 맞나?"다. "아니오"는
//!    정상 답변이지 인증 실패가 아니다. 401은 /submit처럼 서명이
//!    자격 증명인 곳에서만 쓴다.

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::crypto::signature::{checksum_address, recover_signer};
use crate::error::ApiError;
use crate::types::{EthAddress, IntentPayload};
use crate::AppState;

// ============ Request/Response Types ============

/// POST /verify 요청. sig는 payload canonical JSON의 personal_sign.
#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub payload: IntentPayload,
    pub sig: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub valid: bool,
    /// 요청이 주장한 트레이더 (lowercase)
    pub trader: String,
    /// 서명에서 복구한 주소 (checksum). 복구 자체가 실패하면 null.
    pub recovered: Option<String>,
}

// ============ Handlers ============

/// POST /verify
pub async fn verify_signature(
    State(_state): State<AppState>,
    Json(req): Json<VerifyRequest>,
) -> Result<Json<VerifyResponse>, ApiError> {
    Ok(Json(evaluate(&req)?))
}

// ============ Helpers ============

fn evaluate(req: &VerifyRequest) -> Result<VerifyResponse, ApiError> {
    let trader = EthAddress::new(&req.payload.trader).map_err(ApiError::ValidationError)?;
    let message = req
        .payload
        .signed_message()
        .map_err(|_| ApiError::InternalError)?;

    match recover_signer(&message, &req.sig) {
        Ok(address) => {
            let recovered = checksum_address(&address);
            let valid = recovered.to_lowercase() == trader.as_str();
            Ok(VerifyResponse {
                valid,
                trader: trader.into_inner(),
                recovered: Some(recovered),
            })
        }
        Err(_) => Ok(VerifyResponse {
            valid: false,
            trader: trader.into_inner(),
            recovered: None,
        }),
    }
}
