//! Error Handling Module
//!
//! Provides type-safe error handling with proper HTTP status code mapping.
//! Uses thiserror for domain errors and integrates with tracing for structured logging.
//!
//! # Interview Q&A
//!
//! Q: 왜 에러 분류가 필요한가?
//! A: 제출 실패의 원인이 복호화 실패인지, 서명 불일치인지, 리플레이인지에
//!    따라 클라이언트 대응이 다르다. 전부 400 하나로 뭉개면 프론트가
//!    재시도해야 할 에러와 하면 안 되는 에러를 구분할 수 없다.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// API 에러 타입
///
/// 각 에러 variant는 적절한 HTTP 상태 코드에 매핑됨
/// - 클라이언트 에러: 4xx (잘못된 요청, 서명 실패, 리플레이 등)
/// - 서버 에러: 5xx (증명 실패, DB, 체인 제출)
///
/// 민감한 내부 정보는 클라이언트에 노출하지 않음
#[derive(Debug, Error)]
pub enum ApiError {
    // ============ 400 Bad Request ============
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    // ============ 401 Unauthorized ============
    #[error("Signature verification failed: {0}")]
    SignatureInvalid(String),

    // ============ 404 Not Found ============
    #[error("Resource not found: {0}")]
    NotFound(String),

    // ============ 409 Conflict ============
    #[error("Replay detected: {0}")]
    ReplayDetected(String),

    #[error("Position locked: {0}")]
    PositionLocked(String),

    // ============ 422 Unprocessable Entity ============
    #[error("Validation failed: {0}")]
    ValidationError(String),

    #[error("Position is not liquidatable: {0}")]
    NotLiquidatable(String),

    // ============ 429 Too Many Requests ============
    #[error("Rate limit exceeded")]
    RateLimited,

    // ============ 5xx ============
    #[error("Proof generation failed: {0}")]
    ProofGenerationFailed(String),

    #[error("Chain submission failed: {0}")]
    ChainSubmissionFailed(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Internal server error")]
    InternalError,

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Position tree is full: {0}")]
    TreeFull(String),
}

/// API 에러 응답 구조
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match &self {
            // 4xx 클라이언트 에러
            ApiError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone(), None)
            }
            ApiError::DecryptionFailed(msg) => (
                StatusCode::BAD_REQUEST,
                "DECRYPTION_FAILED",
                "Ciphertext could not be opened".to_string(),
                Some(msg.clone()),
            ),
            ApiError::SignatureInvalid(msg) => (
                StatusCode::UNAUTHORIZED,
                "SIGNATURE_INVALID",
                "Signature verification failed".to_string(),
                Some(msg.clone()),
            ),
            ApiError::NotFound(resource) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                format!("{} not found", resource),
                None,
            ),
            ApiError::ReplayDetected(msg) => (
                StatusCode::CONFLICT,
                "REPLAY_DETECTED",
                "Intent nonce was already used".to_string(),
                Some(msg.clone()),
            ),
            ApiError::PositionLocked(msg) => (
                StatusCode::CONFLICT,
                "POSITION_LOCKED",
                "Position has a pending liquidation".to_string(),
                Some(msg.clone()),
            ),
            ApiError::ValidationError(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "VALIDATION_ERROR",
                "Validation failed".to_string(),
                Some(msg.clone()),
            ),
            ApiError::NotLiquidatable(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "NOT_LIQUIDATABLE",
                "Position is not liquidatable".to_string(),
                Some(msg.clone()),
            ),
            ApiError::RateLimited => (
                StatusCode::TOO_MANY_REQUESTS,
                "RATE_LIMITED",
                "Rate limit exceeded".to_string(),
                None,
            ),

            // 5xx 서버 에러
            ApiError::ProofGenerationFailed(msg) => {
                tracing::error!("Proof generation failed: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "PROOF_GENERATION_FAILED",
                    "Failed to generate ZK proof".to_string(),
                    None,
                )
            }
            ApiError::ChainSubmissionFailed(msg) => {
                tracing::error!("Chain submission failed: {}", msg);
                (
                    StatusCode::BAD_GATEWAY,
                    "CHAIN_SUBMISSION_FAILED",
                    "Liquidation could not be submitted on-chain".to_string(),
                    None,
                )
            }
            ApiError::DatabaseError(_) => {
                // 내부 에러는 클라이언트에 상세 정보 노출 안 함
                tracing::error!("Database error: {:?}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "Database error occurred".to_string(),
                    None,
                )
            }
            ApiError::InternalError => {
                tracing::error!("Internal error: {:?}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                    None,
                )
            }
            ApiError::ServiceUnavailable(service) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "SERVICE_UNAVAILABLE",
                format!("{} is currently unavailable", service),
                None,
            ),
            ApiError::TreeFull(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "TREE_FULL",
                "No free slot for this position key".to_string(),
                Some(msg.clone()),
            ),
        };

        let body = ErrorResponse {
            error: message,
            code: code.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

/// SQLx 에러를 ApiError로 변환
impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!("SQLx error: {:?}", err);
        ApiError::DatabaseError(err.to_string())
    }
}

/// anyhow 에러를 ApiError로 변환
impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!("Anyhow error: {:?}", err);
        ApiError::InternalError
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (ApiError::BadRequest("x".into()), StatusCode::BAD_REQUEST),
            (
                ApiError::DecryptionFailed("x".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                ApiError::SignatureInvalid("x".into()),
                StatusCode::UNAUTHORIZED,
            ),
            (ApiError::ReplayDetected("x".into()), StatusCode::CONFLICT),
            (
                ApiError::NotLiquidatable("x".into()),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (ApiError::RateLimited, StatusCode::TOO_MANY_REQUESTS),
            (
                ApiError::ChainSubmissionFailed("x".into()),
                StatusCode::BAD_GATEWAY,
            ),
            (
                ApiError::TreeFull("x".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }
}
