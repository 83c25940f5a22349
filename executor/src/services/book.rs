//! Position Book
//!
//! 트리·슬롯·DB를 하나의 쓰기 락 아래 묶는 실행기의 심장.
//! 모든 포지션 변경(의도 반영, 청산 2단계)은 이 모듈을 지난다.
//!
//! # Interview Q&A
//!
//! Q: 의도 하나가 반영되는 순서는?
//! A: 서명 검증까지는 락 밖에서, 상태 변경은 쓰기 락 안에서.
//!
//!    1. 필드 검증 (주소, 금액, 논스 범위)
//!    2. personal_sign 복구 → trader 일치 확인
//!    3. [락] 논스 리플레이 검사
//!    4. [락] 슬롯 배정 (기존 포지션이면 재사용)
//!    5. [락] entry_funding 스탬프 (신규만, 리사이즈는 유지)
//!    6. [락] 트리 반영 → DB 기록, 실패 시 트리 원복
//!
//! Q: 트리를 먼저 바꾸고 DB가 실패하면?
//! A: 같은 락 안에서 이전 리프 값으로 되돌린다. 락을 쥔 채
//!    보상하므로 다른 요청이 중간 상태를 볼 수 없다.
//!
//! Q: 청산이 두 단계인 이유는?
//! A: 증명 생성이 수 초 걸린다. begin에서 증인을 뜨고 리프를
//!    지운 뒤 슬롯을 잠가 두면, 그 사이 다른 의도가 들어와도
//!    해당 포지션만은 못 건드린다. 증명이 실패하면 abort가
//!    리프와 슬롯을 원복한다.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use zk_perps_circuits::LiquidationWitness;

use crate::crypto::poseidon::fr_to_hex;
use crate::crypto::signature::verify_personal_sign;
use crate::db::{IntentRow, PositionRow, PositionStatus, PositionStore};
use crate::error::ApiError;
use crate::services::funding::MarketSnapshot;
use crate::tree::{leaf_hash, PositionKey, PositionTree, SlotAssigner, SlotError, SlotState};
use crate::types::{parse_amount, EthAddress, SignedIntent};

/// 의도 반영 결과 (응답에 그대로 나감)
#[derive(Debug, Clone)]
pub struct IntentOutcome {
    pub root: String,
    pub leaf_index: u64,
    pub nonce: u64,
    pub closed: bool,
}

/// begin_liquidation이 발급하는 티켓. 증명 파이프라인이 들고 다닌다.
#[derive(Debug)]
pub struct LiquidationTicket {
    pub key: PositionKey,
    pub position_id: Uuid,
    pub leaf_index: u64,
    pub witness: LiquidationWitness,
}

struct BookInner {
    tree: PositionTree,
    slots: SlotAssigner,
}

pub struct PositionBook {
    inner: RwLock<BookInner>,
    store: Arc<dyn PositionStore>,
}

impl PositionBook {
    pub fn new(
        depth: usize,
        max_probe: u32,
        store: Arc<dyn PositionStore>,
    ) -> Result<Self> {
        Ok(Self {
            inner: RwLock::new(BookInner {
                tree: PositionTree::new(depth)?,
                slots: SlotAssigner::new(depth, max_probe),
            }),
            store,
        })
    }

    /// 시작 시 DB의 열린 포지션으로 트리/슬롯 재구축
    pub async fn rebuild(&self) -> Result<usize> {
        let rows = self.store.load_positions().await?;
        let mut inner = self.inner.write().await;
        for row in &rows {
            let key = PositionKey::new(&row.trader, &row.market);
            let slot = row.leaf_index as u64;
            let size = parse_amount(&row.size)
                .with_context(|| format!("stored size for {}/{}", row.trader, row.market))?;
            let margin = parse_amount(&row.margin)
                .with_context(|| format!("stored margin for {}/{}", row.trader, row.market))?;
            let entry = parse_amount(&row.entry_funding)
                .with_context(|| format!("stored entry_funding for {}/{}", row.trader, row.market))?;

            inner
                .slots
                .restore(&key, slot, SlotState::Live)
                .map_err(|e| anyhow::anyhow!("slot restore for {}/{}: {e}", row.trader, row.market))?;
            inner.tree.set_leaf(slot, leaf_hash(size, margin, entry)?)?;
        }
        tracing::info!(positions = rows.len(), root = %fr_to_hex(&inner.tree.root()), "position book rebuilt");
        Ok(rows.len())
    }

    /// 현재 루트 요약
    pub async fn root_info(&self) -> (String, u64, usize) {
        let inner = self.inner.read().await;
        (
            fr_to_hex(&inner.tree.root()),
            inner.tree.leaf_count(),
            inner.tree.depth(),
        )
    }

    /// 서명된 의도 반영. 검증은 락 밖, 상태 변경은 락 안.
    pub async fn apply_intent(
        &self,
        intent: SignedIntent,
        snapshot: &MarketSnapshot,
    ) -> Result<IntentOutcome, ApiError> {
        let payload = &intent.payload;

        let trader = EthAddress::new(&payload.trader).map_err(ApiError::ValidationError)?;
        let size = parse_amount(&payload.size)
            .map_err(|e| ApiError::ValidationError(format!("size: {e}")))?;
        let margin = parse_amount(&payload.margin)
            .map_err(|e| ApiError::ValidationError(format!("margin: {e}")))?;
        if size > 0 && margin == 0 {
            return Err(ApiError::ValidationError(
                "margin must be positive for an open position".to_string(),
            ));
        }
        if payload.nonce > i64::MAX as u64 {
            return Err(ApiError::ValidationError("nonce out of range".to_string()));
        }

        let message = payload
            .signed_message()
            .map_err(|_| ApiError::InternalError)?;
        verify_personal_sign(&message, &intent.sig, trader.as_str())
            .map_err(|e| ApiError::SignatureInvalid(e.to_string()))?;

        let key = PositionKey::new(trader.as_str(), &payload.market);
        let mut inner = self.inner.write().await;

        // 리플레이 검사: 논스는 트레이더별 단조 증가
        let last = self
            .store
            .last_nonce(trader.as_str())
            .await
            .map_err(db_err)?;
        if let Some(last) = last {
            if payload.nonce as i64 <= last {
                return Err(ApiError::ReplayDetected(format!(
                    "nonce {} already used (last was {})",
                    payload.nonce, last
                )));
            }
        }

        if size == 0 {
            self.close_position(&mut inner, &key, &intent, snapshot).await
        } else {
            self.upsert_position(&mut inner, &key, &intent, size, margin, snapshot)
                .await
        }
    }

    async fn upsert_position(
        &self,
        inner: &mut BookInner,
        key: &PositionKey,
        intent: &SignedIntent,
        size: u64,
        margin: u64,
        snapshot: &MarketSnapshot,
    ) -> Result<IntentOutcome, ApiError> {
        let existing = self
            .store
            .find_position(&key.trader, &key.market)
            .await
            .map_err(db_err)?;

        let was_assigned = inner.slots.lookup(key).is_some();
        let assignment = inner.slots.assign(key).map_err(slot_err)?;
        let slot = assignment.slot;
        if assignment.probes > 0 {
            tracing::debug!(slot, probes = assignment.probes, "slot assigned after probing");
        }

        // 리사이즈는 진입 펀딩 유지, 신규는 현재 지수 스탬프
        let entry_funding = match &existing {
            Some(row) => parse_amount(&row.entry_funding).map_err(|e| {
                tracing::error!(trader = %key.trader, market = %key.market, error = %e, "stored entry_funding unparseable");
                ApiError::InternalError
            })?,
            None => snapshot.cum_funding,
        };

        let leaf = leaf_hash(size, margin, entry_funding).map_err(|e| {
            tracing::error!(error = %e, "leaf hash failed");
            ApiError::InternalError
        })?;
        let old_leaf = inner.tree.get_leaf(slot).map_err(tree_err)?;
        let new_root = inner.tree.set_leaf(slot, leaf).map_err(tree_err)?;

        let now = Utc::now();
        let row = PositionRow {
            id: existing.as_ref().map(|r| r.id).unwrap_or_else(Uuid::new_v4),
            trader: key.trader.clone(),
            market: key.market.clone(),
            size: size.to_string(),
            margin: margin.to_string(),
            entry_funding: entry_funding.to_string(),
            leaf_index: slot as i64,
            status: PositionStatus::Live.as_str().to_string(),
            created_at: existing.as_ref().map(|r| r.created_at).unwrap_or(now),
            updated_at: now,
        };

        let persisted = async {
            self.store.upsert_position(&row).await?;
            self.store
                .record_intent(&intent_row(intent, slot, &fr_to_hex(&new_root)))
                .await
        }
        .await;

        if let Err(e) = persisted {
            // DB 실패: 락을 쥔 채 트리/슬롯 원복
            let _ = inner.tree.set_leaf(slot, old_leaf);
            if !was_assigned {
                let _ = inner.slots.release(key);
            }
            return Err(db_err(e));
        }

        Ok(IntentOutcome {
            root: fr_to_hex(&new_root),
            leaf_index: slot,
            nonce: intent.payload.nonce,
            closed: false,
        })
    }

    async fn close_position(
        &self,
        inner: &mut BookInner,
        key: &PositionKey,
        intent: &SignedIntent,
        _snapshot: &MarketSnapshot,
    ) -> Result<IntentOutcome, ApiError> {
        let slot = match inner.slots.state_of(key) {
            Some(SlotState::Live) => inner.slots.lookup(key).ok_or(ApiError::InternalError)?,
            Some(SlotState::PendingRemoval) => {
                return Err(ApiError::PositionLocked(
                    "liquidation in progress".to_string(),
                ))
            }
            None => {
                return Err(ApiError::NotFound(format!(
                    "no open position for {} in {}",
                    key.trader, key.market
                )))
            }
        };

        let row = self
            .store
            .find_position(&key.trader, &key.market)
            .await
            .map_err(db_err)?
            .ok_or_else(|| {
                tracing::error!(trader = %key.trader, market = %key.market, "slot assigned but no position row");
                ApiError::InternalError
            })?;

        let old_leaf = inner.tree.get_leaf(slot).map_err(tree_err)?;
        let new_root = inner.tree.clear_leaf(slot).map_err(tree_err)?;

        let persisted = async {
            self.store.delete_position(row.id).await?;
            self.store
                .record_intent(&intent_row(intent, slot, &fr_to_hex(&new_root)))
                .await
        }
        .await;

        if let Err(e) = persisted {
            let _ = inner.tree.set_leaf(slot, old_leaf);
            return Err(db_err(e));
        }

        inner.slots.release(key).map_err(slot_err)?;

        Ok(IntentOutcome {
            root: fr_to_hex(&new_root),
            leaf_index: slot,
            nonce: intent.payload.nonce,
            closed: true,
        })
    }

    /// 청산 1단계: 증인 캡처 + 리프 제거 + 슬롯 잠금
    pub async fn begin_liquidation(
        &self,
        key: &PositionKey,
    ) -> Result<LiquidationTicket, ApiError> {
        let mut inner = self.inner.write().await;

        let slot = inner.slots.begin_removal(key).map_err(slot_err)?;

        let row = match self.store.find_position(&key.trader, &key.market).await {
            Ok(Some(row)) => row,
            Ok(None) => {
                let _ = inner.slots.abort_removal(key);
                tracing::error!(trader = %key.trader, market = %key.market, "slot occupied but position row missing");
                return Err(ApiError::InternalError);
            }
            Err(e) => {
                let _ = inner.slots.abort_removal(key);
                return Err(db_err(e));
            }
        };

        let parsed = (
            parse_amount(&row.size),
            parse_amount(&row.margin),
            parse_amount(&row.entry_funding),
        );
        let (size, margin, entry_funding) = match parsed {
            (Ok(s), Ok(m), Ok(e)) => (s, m, e),
            _ => {
                let _ = inner.slots.abort_removal(key);
                tracing::error!(trader = %key.trader, market = %key.market, "stored amounts unparseable");
                return Err(ApiError::InternalError);
            }
        };

        // 트리와 DB가 같은 리프를 보고 있는지 확인
        let expected_leaf = leaf_hash(size, margin, entry_funding).map_err(|e| {
            tracing::error!(error = %e, "leaf hash failed");
            ApiError::InternalError
        })?;
        let actual_leaf = inner.tree.get_leaf(slot).map_err(tree_err)?;
        if expected_leaf != actual_leaf {
            let _ = inner.slots.abort_removal(key);
            tracing::error!(trader = %key.trader, market = %key.market, slot, "tree leaf diverges from stored position");
            return Err(ApiError::InternalError);
        }

        let old_root = inner.tree.root();
        let path = inner.tree.path(slot).map_err(tree_err)?;
        let new_root = inner.tree.clear_leaf(slot).map_err(tree_err)?;

        if let Err(e) = self
            .store
            .set_position_status(row.id, PositionStatus::PendingLiquidation)
            .await
        {
            let _ = inner.tree.set_leaf(slot, expected_leaf);
            let _ = inner.slots.abort_removal(key);
            return Err(db_err(e));
        }

        Ok(LiquidationTicket {
            key: key.clone(),
            position_id: row.id,
            leaf_index: slot,
            witness: LiquidationWitness {
                size,
                margin,
                entry_funding,
                path_siblings: path.siblings,
                path_bits: path.bits,
                old_root,
                new_root,
            },
        })
    }

    /// 청산 확정: 슬롯 해제 + 포지션 행 삭제 (리프는 begin에서 이미 제거)
    pub async fn commit_liquidation(&self, ticket: &LiquidationTicket) -> Result<(), ApiError> {
        let mut inner = self.inner.write().await;
        inner.slots.commit_removal(&ticket.key).map_err(slot_err)?;
        self.store
            .delete_position(ticket.position_id)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// 청산 실패 보상: 리프/슬롯/상태 원복
    pub async fn abort_liquidation(&self, ticket: &LiquidationTicket) -> Result<(), ApiError> {
        let mut inner = self.inner.write().await;

        let leaf = leaf_hash(
            ticket.witness.size,
            ticket.witness.margin,
            ticket.witness.entry_funding,
        )
        .map_err(|e| {
            tracing::error!(error = %e, "leaf hash failed during abort");
            ApiError::InternalError
        })?;
        inner
            .tree
            .set_leaf(ticket.leaf_index, leaf)
            .map_err(tree_err)?;
        inner.slots.abort_removal(&ticket.key).map_err(slot_err)?;
        self.store
            .set_position_status(ticket.position_id, PositionStatus::Live)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}

fn intent_row(intent: &SignedIntent, slot: u64, root_after: &str) -> IntentRow {
    IntentRow {
        id: Uuid::new_v4(),
        trader: intent.payload.trader.to_lowercase(),
        market: intent.payload.market.clone(),
        size: intent.payload.size.clone(),
        margin: intent.payload.margin.clone(),
        nonce: intent.payload.nonce as i64,
        leaf_index: slot as i64,
        root_after: root_after.to_string(),
        received_at: Utc::now(),
    }
}

fn db_err(e: anyhow::Error) -> ApiError {
    ApiError::DatabaseError(e.to_string())
}

fn tree_err(e: crate::tree::TreeError) -> ApiError {
    tracing::error!(error = %e, "tree operation failed");
    ApiError::InternalError
}

fn slot_err(e: SlotError) -> ApiError {
    match e {
        SlotError::NotAssigned => ApiError::NotFound("no open position".to_string()),
        SlotError::PendingRemoval { slot } => {
            ApiError::PositionLocked(format!("slot {slot} has a liquidation in progress"))
        }
        SlotError::ProbeExhausted { home, max_probe } => ApiError::TreeFull(format!(
            "no free slot within {max_probe} probes of {home}"
        )),
        SlotError::NotPending | SlotError::SlotConflict { .. } => {
            tracing::error!(error = %e, "slot state violation");
            ApiError::InternalError
        }
    }
}
