//! Services Module
//!
//! 실행기의 비즈니스 로직 레이어
//!
//! # Services
//! - `PositionBook`: 트리·슬롯·DB를 묶는 포지션 상태 머신
//! - `FundingOracle`: 마크 가격과 누적 펀딩 지수
//! - `ZkProver`: Groth16 청산 증명 생성
//! - `ChainClient`: PerpEngine 컨트랙트 제출
//! - `Liquidator`: 청산 파이프라인과 백그라운드 스캐너

pub mod book;
pub mod chain;
pub mod funding;
pub mod liquidator;
pub mod prover;

pub use book::{IntentOutcome, LiquidationTicket, PositionBook};
pub use chain::{submit_with_retry, ChainClient, ChainError, EthersChain, SubmittedTx};
pub use funding::{FundingOracle, MarketSnapshot};
pub use liquidator::{spawn_scanner, LiquidationOutcome, Liquidator};
pub use prover::{GeneratedProof, ProofData, ZkProver};
