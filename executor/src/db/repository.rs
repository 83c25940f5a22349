//! Repository Pattern Implementation
//!
//! # Interview Q&A
//!
//! Q: Repository 패턴을 쓴 이유는?
//! A: 포지션 북과 청산 파이프라인이 저장소에 직접 붙으면 단위 테스트에
//!    PostgreSQL이 필요해진다. `PositionStore` trait 뒤로 숨기면
//!    서비스 로직은 InMemoryStore로 검증하고 운영은 PostgresStore를 쓴다.
//!
//!    ```rust,ignore
//!    let store: Arc<dyn PositionStore> = Arc::new(PostgresStore::new(pool));
//!    let book = PositionBook::new(config, store, ...);
//!    ```
//!
//! Q: 트리와 DB 중 어느 쪽이 정본인가?
//! A: 실행 중에는 메모리 트리가 정본이고 DB는 재구축 재료다.
//!    포지션 북은 루트를 먼저 계산해야 해서 트리를 먼저 바꾸고
//!    DB를 쓴다. DB가 실패하면 같은 락 안에서 트리를 원복하므로
//!    재시작 시 재구축된 트리가 DB와 일치한다.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::models::{
    FundingStateRow, IntentRow, LiquidationRow, LiquidationStatus, PositionRow, PositionStatus,
};

#[async_trait]
pub trait PositionStore: Send + Sync {
    /// 시작 시 트리 재구축용. 열린 포지션 전부.
    async fn load_positions(&self) -> Result<Vec<PositionRow>>;

    async fn find_position(&self, trader: &str, market: &str) -> Result<Option<PositionRow>>;

    /// (trader, market) 기준 upsert. 충돌 시 금액과 상태를 덮어쓴다.
    async fn upsert_position(&self, row: &PositionRow) -> Result<()>;

    async fn set_position_status(&self, id: Uuid, status: PositionStatus) -> Result<()>;

    /// 종료/청산 확정. 행 삭제, 이력은 intents/liquidations에 남는다.
    async fn delete_position(&self, id: Uuid) -> Result<()>;

    /// 트레이더가 지금까지 쓴 최대 논스
    async fn last_nonce(&self, trader: &str) -> Result<Option<i64>>;

    async fn record_intent(&self, row: &IntentRow) -> Result<()>;

    async fn insert_liquidation(&self, row: &LiquidationRow) -> Result<()>;

    /// 증명 완료 시점에 직렬화된 증명을 붙인다
    async fn set_liquidation_proof(&self, id: Uuid, proof: &str) -> Result<()>;

    async fn update_liquidation(
        &self,
        id: Uuid,
        status: LiquidationStatus,
        tx_hash: Option<&str>,
        error: Option<&str>,
    ) -> Result<()>;

    async fn bump_liquidation_attempts(&self, id: Uuid) -> Result<()>;

    async fn find_liquidation(&self, id: Uuid) -> Result<Option<LiquidationRow>>;

    /// 재시작 복구: 죽은 프로세스가 남긴 proving 건을 failed로,
    /// pending_liquidation 포지션을 live로 되돌린다.
    async fn reset_stale_liquidations(&self) -> Result<u64>;

    async fn load_funding(&self) -> Result<Vec<FundingStateRow>>;

    async fn save_funding(&self, row: &FundingStateRow) -> Result<()>;
}

/// PostgreSQL 구현
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PositionStore for PostgresStore {
    async fn load_positions(&self) -> Result<Vec<PositionRow>> {
        let rows = sqlx::query_as::<_, PositionRow>(
            r#"
            SELECT id, trader, market, size, margin, entry_funding,
                   leaf_index, status, created_at, updated_at
            FROM positions
            ORDER BY created_at
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn find_position(&self, trader: &str, market: &str) -> Result<Option<PositionRow>> {
        let row = sqlx::query_as::<_, PositionRow>(
            r#"
            SELECT id, trader, market, size, margin, entry_funding,
                   leaf_index, status, created_at, updated_at
            FROM positions
            WHERE trader = $1 AND market = $2
            "#,
        )
        .bind(trader.to_lowercase())
        .bind(market)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn upsert_position(&self, row: &PositionRow) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO positions (
                id, trader, market, size, margin, entry_funding,
                leaf_index, status, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW(), NOW())
            ON CONFLICT (trader, market)
            DO UPDATE SET
                size = EXCLUDED.size,
                margin = EXCLUDED.margin,
                entry_funding = EXCLUDED.entry_funding,
                status = EXCLUDED.status,
                updated_at = NOW()
            "#,
        )
        .bind(row.id)
        .bind(row.trader.to_lowercase())
        .bind(&row.market)
        .bind(&row.size)
        .bind(&row.margin)
        .bind(&row.entry_funding)
        .bind(row.leaf_index)
        .bind(&row.status)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_position_status(&self, id: Uuid, status: PositionStatus) -> Result<()> {
        sqlx::query("UPDATE positions SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_position(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM positions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn last_nonce(&self, trader: &str) -> Result<Option<i64>> {
        let row: (Option<i64>,) =
            sqlx::query_as("SELECT MAX(nonce) FROM intents WHERE trader = $1")
                .bind(trader.to_lowercase())
                .fetch_one(&self.pool)
                .await?;
        Ok(row.0)
    }

    async fn record_intent(&self, row: &IntentRow) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO intents (
                id, trader, market, size, margin, nonce,
                leaf_index, root_after, received_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW())
            "#,
        )
        .bind(row.id)
        .bind(row.trader.to_lowercase())
        .bind(&row.market)
        .bind(&row.size)
        .bind(&row.margin)
        .bind(row.nonce)
        .bind(row.leaf_index)
        .bind(&row.root_after)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_liquidation(&self, row: &LiquidationRow) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO liquidations (
                id, trader, market, leaf_index, status,
                old_root, new_root, mark_price, cum_funding,
                attempts, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, NOW(), NOW())
            "#,
        )
        .bind(row.id)
        .bind(row.trader.to_lowercase())
        .bind(&row.market)
        .bind(row.leaf_index)
        .bind(&row.status)
        .bind(&row.old_root)
        .bind(&row.new_root)
        .bind(&row.mark_price)
        .bind(&row.cum_funding)
        .bind(row.attempts)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_liquidation_proof(&self, id: Uuid, proof: &str) -> Result<()> {
        sqlx::query("UPDATE liquidations SET proof = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(proof)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_liquidation(
        &self,
        id: Uuid,
        status: LiquidationStatus,
        tx_hash: Option<&str>,
        error: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE liquidations
            SET status = $2,
                tx_hash = COALESCE($3, tx_hash),
                error = $4,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(tx_hash)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn bump_liquidation_attempts(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE liquidations SET attempts = attempts + 1, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_liquidation(&self, id: Uuid) -> Result<Option<LiquidationRow>> {
        let row = sqlx::query_as::<_, LiquidationRow>(
            r#"
            SELECT id, trader, market, leaf_index, status,
                   old_root, new_root, mark_price, cum_funding,
                   proof, tx_hash, attempts, error, created_at, updated_at
            FROM liquidations
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn reset_stale_liquidations(&self) -> Result<u64> {
        let res = sqlx::query(
            r#"
            UPDATE liquidations
            SET status = 'failed',
                error = 'executor restarted during proving',
                updated_at = NOW()
            WHERE status = 'proving'
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            UPDATE positions
            SET status = 'live', updated_at = NOW()
            WHERE status = 'pending_liquidation'
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected())
    }

    async fn load_funding(&self) -> Result<Vec<FundingStateRow>> {
        let rows = sqlx::query_as::<_, FundingStateRow>(
            "SELECT market, mark_price, cum_funding, updated_at FROM funding_state",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn save_funding(&self, row: &FundingStateRow) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO funding_state (market, mark_price, cum_funding, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (market)
            DO UPDATE SET
                mark_price = EXCLUDED.mark_price,
                cum_funding = EXCLUDED.cum_funding,
                updated_at = NOW()
            "#,
        )
        .bind(&row.market)
        .bind(&row.mark_price)
        .bind(&row.cum_funding)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
