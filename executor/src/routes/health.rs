//! Health Check Endpoint
//!
//! # Interview Q&A
//!
//! Q: Health check 엔드포인트는 왜 필요한가?
//! A: 3가지 용도
//!    1. 로드밸런서 헬스체크 (ALB, nginx)
//!    2. Kubernetes liveness/readiness probe
//!    3. 모니터링 시스템 연동
//!
//! Q: DB 말고 트리 상태까지 내보내는 이유는?
//! A: 실행기의 진짜 상태는 프로세스 생존이 아니라 "트리 루트가
//!    체인과 맞는가"다. 루트와 리프 수를 노출하면 운영자가
//!    컨트랙트의 currentRoot와 맞춰볼 수 있다.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::AppState;

// ============ Response Types ============

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub database: DatabaseStatus,
    pub tree: TreeStatus,
    pub prover: ProverStatus,
    pub chain: ChainStatus,
    pub markets: Vec<String>,
    pub timestamp: String,
}

#[derive(Serialize)]
pub struct DatabaseStatus {
    pub connected: bool,
    pub latency_ms: Option<u64>,
}

#[derive(Serialize)]
pub struct TreeStatus {
    pub root: String,
    pub leaves: u64,
    pub depth: usize,
}

#[derive(Serialize)]
pub struct ProverStatus {
    /// Groth16 키 생성 여부 (lazy, 첫 증명 때 만들어진다)
    pub keys_ready: bool,
    pub depth: usize,
}

#[derive(Serialize)]
pub struct ChainStatus {
    pub enabled: bool,
    pub executor: Option<String>,
}

// ============ Handlers ============

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let database = match state.db.health_check().await {
        Ok(latency) => DatabaseStatus {
            connected: true,
            latency_ms: Some(latency as u64),
        },
        Err(_) => DatabaseStatus {
            connected: false,
            latency_ms: None,
        },
    };

    let (root, leaves, depth) = state.book.root_info().await;

    Json(HealthResponse {
        status: if database.connected {
            "healthy"
        } else {
            "degraded"
        }
        .to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database,
        tree: TreeStatus { root, leaves, depth },
        prover: ProverStatus {
            keys_ready: state.prover.keys_ready().await,
            depth: state.prover.depth(),
        },
        chain: ChainStatus {
            enabled: !state.liquidator.dry_run(),
            executor: state.liquidator.executor_address(),
        },
        markets: state.oracle.markets(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}
