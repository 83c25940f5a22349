//! API Routes Module
//!
//! 모든 HTTP 엔드포인트 정의
//!
//! # Routes
//! - `GET  /health` - 상태 확인
//! - `GET  /relay/pubkey` - 봉인용 공개키
//! - `POST /submit` - 암호화된 의도 반영
//! - `POST /verify` - 서명 단독 검증
//! - `GET  /position/:trader/:market` - 포지션 메타데이터
//! - `GET  /root` - 트리 루트 요약
//! - `GET  /funding/:market` - 펀딩 스냅샷
//! - `POST /liquidate` - 수동 청산 트리거
//! - `GET  /liquidations/:id` - 청산 건 조회

pub mod funding;
pub mod health;
pub mod liquidate;
pub mod position;
pub mod relay;
pub mod verify;

use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::{error::ApiError, AppState};

/// 라우터 생성
///
/// POST 계열만 IP별 토큰 버킷을 거친다. 복호화와 증명 생성이
/// 걸려 있어 요청당 비용이 GET과 비교가 안 된다.
pub fn create_router(state: AppState) -> Router {
    // CORS 설정
    // 프로덕션에서는 설정된 도메인만, 개발 환경에서는 localhost 허용
    let cors = if state.config.is_production() {
        let origins: Vec<_> = state
            .config
            .allowed_origins
            .iter()
            .filter_map(|s| s.trim().parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
            .allow_headers([axum::http::header::CONTENT_TYPE])
    } else {
        CorsLayer::new()
            .allow_origin([
                "http://localhost:5173".parse().unwrap(), // Vite dev server
                "http://localhost:3000".parse().unwrap(),
                "http://127.0.0.1:5173".parse().unwrap(),
            ])
            .allow_methods(Any)
            .allow_headers(Any)
    };

    let limited = Router::new()
        .route("/submit", post(relay::submit_intent))
        .route("/verify", post(verify::verify_signature))
        .route("/liquidate", post(liquidate::trigger_liquidation))
        .route_layer(middleware::from_fn_with_state(state.clone(), rate_limit));

    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Relay
        .route("/relay/pubkey", get(relay::relay_pubkey))
        // Tree
        .route("/root", get(position::get_root))
        .route("/position/:trader/:market", get(position::get_position))
        // Funding
        .route("/funding/:market", get(funding::get_funding))
        // Liquidations
        .route("/liquidations/:id", get(liquidate::get_liquidation))
        .merge(limited)
        // 미들웨어
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        // 상태 주입
        .with_state(state)
}

async fn rate_limit(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if state.limiter.check(addr.ip()) {
        Ok(next.run(req).await)
    } else {
        Err(ApiError::RateLimited)
    }
}
