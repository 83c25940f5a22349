//! Database Models
//!
//! 포지션 금액(size, margin, entry_funding)은 1e8 고정소수점 u64를
//! 십진 문자열 TEXT로 저장한다. BIGINT는 부호 때문에 u64 상위 범위를
//! 못 담고, 문자열은 JS 클라이언트의 표현과도 일치한다.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// 열린 포지션. 트리 리프와 1:1 대응.
#[derive(Debug, Clone, FromRow)]
pub struct PositionRow {
    pub id: Uuid,

    /// Ethereum 주소 (lowercase)
    pub trader: String,

    /// 합성 자산 심볼 (예: "sAAPL")
    pub market: String,

    /// 포지션 크기, 1e8 고정소수점 십진 문자열
    pub size: String,

    /// 증거금
    pub margin: String,

    /// 진입 시점의 누적 펀딩
    pub entry_funding: String,

    /// 배정된 트리 슬롯
    pub leaf_index: i64,

    /// live | pending_liquidation
    pub status: String,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 반영된 의도의 감사 레코드. UNIQUE(trader, nonce)가 리플레이를 막는다.
#[derive(Debug, Clone, FromRow)]
pub struct IntentRow {
    pub id: Uuid,
    pub trader: String,
    pub market: String,
    pub size: String,
    pub margin: String,
    pub nonce: i64,
    pub leaf_index: i64,

    /// 반영 직후의 트리 루트 (hex)
    pub root_after: String,

    pub received_at: DateTime<Utc>,
}

/// 청산 파이프라인 상태 머신의 한 건
#[derive(Debug, Clone, FromRow)]
pub struct LiquidationRow {
    pub id: Uuid,
    pub trader: String,
    pub market: String,
    pub leaf_index: i64,

    /// proving | proved | submitted | confirmed | failed
    pub status: String,

    /// 증명이 바인딩하는 루트 전이 (hex)
    pub old_root: String,
    pub new_root: String,

    /// 증명 시점의 공개 입력 스냅샷
    pub mark_price: String,
    pub cum_funding: String,

    /// 직렬화된 증명 JSON. 증명이 끝나면 채워진다.
    pub proof: Option<String>,

    pub tx_hash: Option<String>,
    pub attempts: i32,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 마켓별 펀딩 스냅샷 (재시작 시 단조성 유지용)
#[derive(Debug, Clone, FromRow)]
pub struct FundingStateRow {
    pub market: String,
    pub mark_price: String,
    pub cum_funding: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionStatus {
    Live,
    PendingLiquidation,
}

impl PositionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::PendingLiquidation => "pending_liquidation",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiquidationStatus {
    Proving,
    Proved,
    Submitted,
    Confirmed,
    Failed,
}

impl LiquidationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Proving => "proving",
            Self::Proved => "proved",
            Self::Submitted => "submitted",
            Self::Confirmed => "confirmed",
            Self::Failed => "failed",
        }
    }
}
