//! ZK Perps Executor Library
//!
//! # Overview
//!
//! 합성 주식 무기한 선물의 실행기(executor) 백엔드. 암호화된
//! 거래 의도를 받아 포지션 Merkle 트리를 유지하고, 청산 시점에
//! Groth16 증명을 만들어 PerpEngine 컨트랙트에 제출합니다.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        Executor                          │
//! │                                                          │
//! │  ┌─────────┐  ┌─────────┐  ┌─────────┐  ┌──────────┐    │
//! │  │ Routes  │  │Services │  │  Tree   │  │  Crypto  │    │
//! │  └────┬────┘  └────┬────┘  └────┬────┘  └────┬─────┘    │
//! │       │            │            │            │           │
//! │       └────────────┴─────┬──────┴────────────┘           │
//! │                          │                               │
//! │                     ┌────┴────┐                          │
//! │                     │   DB    │                          │
//! │                     └─────────┘                          │
//! └──────────────────────────┬───────────────────────────────┘
//!                            │
//!                            ▼
//!                   ┌────────────────┐
//!                   │   PerpEngine   │
//!                   └────────────────┘
//! ```
//!
//! ## Modules
//!
//! - `config`: 환경 설정 관리
//! - `crypto`: 봉인 채널(X25519+HKDF+AES-GCM), Poseidon, 서명 복구
//! - `tree`: 희소 Poseidon Merkle 트리와 슬롯 배정
//! - `services`: 포지션 북, 펀딩 오라클, 증명기, 청산 파이프라인
//! - `routes`: HTTP 엔드포인트 핸들러
//! - `db`: PostgreSQL 저장소 (재시작 복구의 근거)
//! - `error`: 에러 타입 및 HTTP 매핑
//! - `rate_limit`: IP별 토큰 버킷
//! - `types`: 의도 페이로드와 공통 타입
//!
//! ## Usage
//!
//! ```rust,ignore
//! use zk_perps_executor::{config::Config, db::Database, services::PositionBook};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let db = Database::connect(&config.database_url).await?;
//!
//!     // ... 서버 시작
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod rate_limit;
pub mod routes;
pub mod services;
pub mod tree;
pub mod types;

// Re-exports for convenience
pub use config::Config;
pub use crypto::channel::RelayKeypair;
pub use db::{Database, PositionStore};
pub use error::ApiError;
pub use rate_limit::RateLimiter;
pub use services::{FundingOracle, Liquidator, PositionBook, ZkProver};

/// 애플리케이션 전역 상태
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: Arc<Database>,
    pub store: Arc<dyn PositionStore>,
    pub book: Arc<PositionBook>,
    pub oracle: Arc<FundingOracle>,
    pub prover: Arc<ZkProver>,
    pub liquidator: Arc<Liquidator>,
    pub keypair: Arc<RelayKeypair>,
    pub limiter: Arc<RateLimiter>,
}
