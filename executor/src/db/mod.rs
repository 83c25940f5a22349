//! Database Module
//!
//! # Interview Q&A
//!
//! Q: 왜 PostgreSQL을 선택했는가?
//! A: 실행기 상태에 적합한 이유
//!
//!    1. ACID 트랜잭션: 포지션/논스 무결성 보장
//!    2. UNIQUE 제약: (trader, nonce) 리플레이 차단을 DB가 강제
//!    3. 인덱싱: 트레이더별, 상태별 조회 최적화
//!    4. 생태계: SQLx 등 Rust 라이브러리 지원
//!
//! Q: SQLx를 선택한 이유는?
//! A: async 네이티브 + 마이그레이션 내장
//!
//!    - 타입 안전성: `query_as`로 행 → 구조체 매핑
//!    - 커넥션 풀: 최소/최대 커넥션, 타임아웃 내장
//!    - `sqlx::migrate!`: 스키마 버전 관리
//!
//! Q: 트리는 메모리에 있는데 DB는 왜 필요한가?
//! A: 암호문 채널 특성상 평문 금액은 온체인에 없다. 실행기가
//!    재시작하면 트리를 다시 만들 재료가 DB뿐이다. 포지션 북이
//!    트리 변경과 DB 기록을 같은 락 안에서 짝지어 일치를 지킨다.

mod models;
mod repository;

pub use models::*;
pub use repository::{PositionStore, PostgresStore};

#[cfg(test)]
pub use repository::memory::InMemoryStore;

use anyhow::Result;
use sqlx::{postgres::PgPoolOptions, PgPool};

/// 데이터베이스 연결 및 수명주기 담당
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// 데이터베이스 연결
    ///
    /// # Connection Pool Settings
    ///
    /// - max_connections: 10 (트래픽에 따라 조정)
    /// - min_connections: 1 (idle 시 최소 유지)
    /// - acquire_timeout: 3초 (커넥션 획득 대기)
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .min_connections(1)
            .acquire_timeout(std::time::Duration::from_secs(3))
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    /// 마이그레이션 실행
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Health check (쿼리 왕복 시간 측정)
    pub async fn health_check(&self) -> Result<u128> {
        let start = std::time::Instant::now();
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(start.elapsed().as_millis())
    }

    pub fn store(&self) -> PostgresStore {
        PostgresStore::new(self.pool.clone())
    }
}
