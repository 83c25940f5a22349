//! Liquidation Pipeline
//!
//! 청산 한 건의 수명: 자격 확인 → 리프 잠금 → Groth16 증명 →
//! 체인 제출 → 확정(또는 보상). 모든 단계가 liquidations 테이블에
//! 남아 재시작 후에도 추적 가능하다.
//!
//! # Interview Q&A
//!
//! Q: 청산을 세마포어로 직렬화하는 이유는?
//! A: 증명은 (old_root → new_root) 전이를 바인딩한다. 두 청산이
//!    겹치면 두 번째 증명의 old_root가 체인의 currentRoot와 어긋나
//!    리버트된다. 한 번에 하나씩, 루트 체인을 끊기지 않게 잇는다.
//!
//! Q: 증명은 됐는데 체인 제출이 실패하면?
//! A: 트리를 원복한다(abort). 로컬 루트만 앞서 나가면 이후 모든
//!    증명이 체인 루트와 어긋나기 때문에, 제출이 확정되지 않은
//!    전이는 없던 일로 만드는 쪽이 안전하다. 포지션은 live로
//!    돌아가고 스캐너가 다음 틱에 다시 시도한다.
//!
//! Q: 체인이 설정되지 않은 환경에선?
//! A: dry run. 증명 생성과 자체 검증까지 하고 proved로 기록한다.
//!    로컬 개발과 통합 테스트가 이 모드로 돈다.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tokio::sync::Semaphore;
use uuid::Uuid;

use zk_perps_circuits::LiquidationCircuit;

use crate::crypto::poseidon::fr_to_hex;
use crate::db::{LiquidationRow, LiquidationStatus, PositionStatus, PositionStore};
use crate::error::ApiError;
use crate::services::book::{LiquidationTicket, PositionBook};
use crate::services::chain::{submit_with_retry, ChainClient};
use crate::services::funding::FundingOracle;
use crate::services::prover::ZkProver;
use crate::tree::PositionKey;
use crate::types::parse_amount;

#[derive(Debug)]
pub struct LiquidationOutcome {
    pub id: Uuid,
    pub status: LiquidationStatus,
    pub tx_hash: Option<String>,
    pub proof_ms: u128,
}

pub struct Liquidator {
    book: Arc<PositionBook>,
    store: Arc<dyn PositionStore>,
    oracle: Arc<FundingOracle>,
    prover: Arc<ZkProver>,
    chain: Option<Arc<dyn ChainClient>>,
    mmr_bps: u64,
    submit_max_retries: u32,
    submit_backoff_ms: u64,
    /// 루트 전이를 직렬화하는 게이트
    gate: Semaphore,
}

impl Liquidator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        book: Arc<PositionBook>,
        store: Arc<dyn PositionStore>,
        oracle: Arc<FundingOracle>,
        prover: Arc<ZkProver>,
        chain: Option<Arc<dyn ChainClient>>,
        mmr_bps: u64,
        submit_max_retries: u32,
        submit_backoff_ms: u64,
    ) -> Self {
        Self {
            book,
            store,
            oracle,
            prover,
            chain,
            mmr_bps,
            submit_max_retries,
            submit_backoff_ms,
            gate: Semaphore::new(1),
        }
    }

    pub fn dry_run(&self) -> bool {
        self.chain.is_none()
    }

    pub fn executor_address(&self) -> Option<String> {
        self.chain.as_ref().map(|c| c.executor_address())
    }

    pub async fn find(&self, id: Uuid) -> Result<Option<LiquidationRow>, ApiError> {
        self.store
            .find_liquidation(id)
            .await
            .map_err(|e| ApiError::DatabaseError(e.to_string()))
    }

    /// 포지션 하나를 끝까지 청산한다. 동시에 한 건만 진행된다.
    pub async fn liquidate(
        &self,
        trader: &str,
        market: &str,
    ) -> Result<LiquidationOutcome, ApiError> {
        let _permit = self.gate.acquire().await.map_err(|_| {
            ApiError::ServiceUnavailable("liquidation pipeline is shutting down".to_string())
        })?;

        let snapshot = self
            .oracle
            .snapshot(market)
            .ok_or_else(|| ApiError::ValidationError(format!("unknown market {market}")))?;
        let key = PositionKey::new(trader, market);

        // 트리를 건드리기 전에 저장된 행으로 싸게 거른다
        let row = self
            .store
            .find_position(&key.trader, &key.market)
            .await
            .map_err(|e| ApiError::DatabaseError(e.to_string()))?
            .ok_or_else(|| {
                ApiError::NotFound(format!(
                    "no open position for {} in {}",
                    key.trader, key.market
                ))
            })?;
        if row.status == PositionStatus::PendingLiquidation.as_str() {
            return Err(ApiError::PositionLocked(
                "liquidation already in progress".to_string(),
            ));
        }
        let healthy_check = (
            parse_amount(&row.size),
            parse_amount(&row.margin),
            parse_amount(&row.entry_funding),
        );
        if let (Ok(size), Ok(margin), Ok(entry)) = healthy_check {
            if !LiquidationCircuit::is_liquidatable(
                size,
                margin,
                entry,
                snapshot.mark_price,
                snapshot.cum_funding,
                self.mmr_bps,
            ) {
                return Err(ApiError::NotLiquidatable(format!(
                    "margin covers maintenance at mark price {}",
                    snapshot.mark_price
                )));
            }
        }

        let ticket = self.book.begin_liquidation(&key).await?;

        // 락 아래서 뜬 증인으로 다시 확인. begin 직전에 증거금이
        // 보충됐을 수 있다.
        let w = &ticket.witness;
        if !LiquidationCircuit::is_liquidatable(
            w.size,
            w.margin,
            w.entry_funding,
            snapshot.mark_price,
            snapshot.cum_funding,
            self.mmr_bps,
        ) {
            let _ = self.book.abort_liquidation(&ticket).await;
            return Err(ApiError::NotLiquidatable(
                "position recovered before liquidation could start".to_string(),
            ));
        }

        let id = Uuid::new_v4();
        let now = Utc::now();
        let record = LiquidationRow {
            id,
            trader: key.trader.clone(),
            market: key.market.clone(),
            leaf_index: ticket.leaf_index as i64,
            status: LiquidationStatus::Proving.as_str().to_string(),
            old_root: fr_to_hex(&w.old_root),
            new_root: fr_to_hex(&w.new_root),
            mark_price: snapshot.mark_price.to_string(),
            cum_funding: snapshot.cum_funding.to_string(),
            proof: None,
            tx_hash: None,
            attempts: 0,
            error: None,
            created_at: now,
            updated_at: now,
        };
        if let Err(e) = self.store.insert_liquidation(&record).await {
            let _ = self.book.abort_liquidation(&ticket).await;
            return Err(ApiError::DatabaseError(e.to_string()));
        }

        tracing::info!(
            %id,
            trader = %key.trader,
            market = %key.market,
            slot = ticket.leaf_index,
            "liquidation started"
        );

        let generated = match self
            .prover
            .prove(
                ticket.witness.clone(),
                snapshot.mark_price,
                snapshot.cum_funding,
                self.mmr_bps,
            )
            .await
        {
            Ok(g) => g,
            Err(e) => {
                self.fail(&ticket, id, &format!("proof generation: {e}")).await;
                return Err(ApiError::ProofGenerationFailed(e.to_string()));
            }
        };
        tracing::info!(%id, duration_ms = generated.duration_ms, "liquidation proof generated");

        // dry run에서 수동 제출할 수 있도록 증명을 행에 남긴다
        let proof_json = serde_json::json!({
            "a": generated.proof.a,
            "b": generated.proof.b,
            "c": generated.proof.c,
            "publicInputs": generated.public_inputs,
        });
        if let Err(e) = self
            .store
            .set_liquidation_proof(id, &proof_json.to_string())
            .await
        {
            tracing::warn!(%id, error = %e, "proof not persisted");
        }

        match &self.chain {
            Some(chain) => {
                if let Err(e) = self.store.bump_liquidation_attempts(id).await {
                    tracing::warn!(%id, error = %e, "attempt counter not bumped");
                }
                match submit_with_retry(
                    chain.as_ref(),
                    &generated.proof,
                    &generated.public_inputs,
                    self.submit_max_retries,
                    self.submit_backoff_ms,
                )
                .await
                {
                    Ok(tx) => {
                        self.book.commit_liquidation(&ticket).await?;
                        let status = if tx.confirmed {
                            LiquidationStatus::Confirmed
                        } else {
                            LiquidationStatus::Submitted
                        };
                        self.store
                            .update_liquidation(id, status, Some(&tx.tx_hash), None)
                            .await
                            .map_err(|e| ApiError::DatabaseError(e.to_string()))?;
                        tracing::info!(%id, tx_hash = %tx.tx_hash, confirmed = tx.confirmed, "liquidation submitted");
                        Ok(LiquidationOutcome {
                            id,
                            status,
                            tx_hash: Some(tx.tx_hash),
                            proof_ms: generated.duration_ms,
                        })
                    }
                    Err(e) => {
                        self.fail(&ticket, id, &format!("chain submission: {e}")).await;
                        Err(ApiError::ChainSubmissionFailed(e.to_string()))
                    }
                }
            }
            None => {
                self.book.commit_liquidation(&ticket).await?;
                self.store
                    .update_liquidation(id, LiquidationStatus::Proved, None, None)
                    .await
                    .map_err(|e| ApiError::DatabaseError(e.to_string()))?;
                tracing::info!(%id, "liquidation proved (dry run, no chain configured)");
                Ok(LiquidationOutcome {
                    id,
                    status: LiquidationStatus::Proved,
                    tx_hash: None,
                    proof_ms: generated.duration_ms,
                })
            }
        }
    }

    async fn fail(&self, ticket: &LiquidationTicket, id: Uuid, error: &str) {
        if let Err(e) = self.book.abort_liquidation(ticket).await {
            tracing::error!(%id, error = %e, "liquidation abort failed, tree may need a restart rebuild");
        }
        if let Err(e) = self
            .store
            .update_liquidation(id, LiquidationStatus::Failed, None, Some(error))
            .await
        {
            tracing::error!(%id, error = %e, "failed to record liquidation failure");
        }
    }

    /// 전 포지션을 한 번 훑고 자격이 되는 건을 청산한다.
    /// 돌려주는 값은 실제로 청산에 들어간 건수.
    pub async fn scan_once(&self) -> Result<usize> {
        let rows = self.store.load_positions().await?;
        let mut triggered = 0;
        for row in rows {
            if row.status != PositionStatus::Live.as_str() {
                continue;
            }
            let Some(snapshot) = self.oracle.snapshot(&row.market) else {
                continue;
            };
            let parsed = (
                parse_amount(&row.size),
                parse_amount(&row.margin),
                parse_amount(&row.entry_funding),
            );
            let (Ok(size), Ok(margin), Ok(entry)) = parsed else {
                tracing::warn!(trader = %row.trader, market = %row.market, "skipping position with unparseable amounts");
                continue;
            };
            if !LiquidationCircuit::is_liquidatable(
                size,
                margin,
                entry,
                snapshot.mark_price,
                snapshot.cum_funding,
                self.mmr_bps,
            ) {
                continue;
            }

            match self.liquidate(&row.trader, &row.market).await {
                Ok(outcome) => {
                    triggered += 1;
                    tracing::info!(
                        id = %outcome.id,
                        trader = %row.trader,
                        market = %row.market,
                        status = outcome.status.as_str(),
                        "scanner liquidated position"
                    );
                }
                // 스캔과 실행 사이에 상태가 바뀐 경우는 조용히 넘어간다
                Err(ApiError::NotLiquidatable(_)) | Err(ApiError::PositionLocked(_)) => {}
                Err(e) => {
                    tracing::warn!(trader = %row.trader, market = %row.market, error = %e, "scanner liquidation failed");
                }
            }
        }
        Ok(triggered)
    }
}

/// 주기 스캐너. 틱마다 scan_once를 돌린다.
pub fn spawn_scanner(
    liquidator: Arc<Liquidator>,
    interval_secs: u64,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match liquidator.scan_once().await {
                Ok(0) => {}
                Ok(n) => tracing::info!(count = n, "liquidation scan triggered"),
                Err(e) => tracing::error!(error = %e, "liquidation scan failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::InMemoryStore;
    use crate::services::chain::mock::MockChain;
    use crate::types::{IntentPayload, SignedIntent};
    use ethers::signers::{LocalWallet, Signer};

    const DEPTH: usize = 4;
    const PRICE: u64 = 10_000_000_000;
    const MMR_BPS: u64 = 625;

    // size 1e8, price 1e10, mmr 625bps → 유지증거금 6.25e8.
    const SIZE: &str = "100000000";
    const THIN_MARGIN: &str = "400000000";
    const FAT_MARGIN: &str = "1000000000";

    struct Harness {
        store: Arc<InMemoryStore>,
        book: Arc<PositionBook>,
        oracle: Arc<FundingOracle>,
        prover: Arc<ZkProver>,
    }

    fn harness() -> Harness {
        let store = Arc::new(InMemoryStore::new());
        let book = Arc::new(PositionBook::new(DEPTH, 8, store.clone()).unwrap());
        let oracle = Arc::new(FundingOracle::new(
            &[("sAAPL".to_string(), PRICE)],
            0,
            None,
        ));
        let prover = Arc::new(ZkProver::new(DEPTH, 1, true));
        Harness {
            store,
            book,
            oracle,
            prover,
        }
    }

    fn liquidator(h: &Harness, chain: Option<Arc<dyn ChainClient>>) -> Liquidator {
        Liquidator::new(
            h.book.clone(),
            h.store.clone(),
            h.oracle.clone(),
            h.prover.clone(),
            chain,
            MMR_BPS,
            2,
            10,
        )
    }

    async fn open(h: &Harness, wallet: &LocalWallet, margin: &str, nonce: u64) {
        let payload = IntentPayload {
            trader: format!("{:#x}", wallet.address()),
            market: "sAAPL".to_string(),
            size: SIZE.to_string(),
            margin: margin.to_string(),
            nonce,
        };
        let sig = wallet
            .sign_message(payload.signed_message().unwrap())
            .await
            .unwrap();
        let snapshot = h.oracle.snapshot("sAAPL").unwrap();
        h.book
            .apply_intent(
                SignedIntent {
                    payload,
                    sig: format!("0x{}", sig),
                },
                &snapshot,
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_liquidate_rejects_without_touching_tree() {
        let h = harness();
        let liq = liquidator(&h, None);
        let wallet = LocalWallet::new(&mut rand::thread_rng());
        let trader = format!("{:#x}", wallet.address());

        assert!(matches!(
            liq.liquidate(&trader, "sNOPE").await,
            Err(ApiError::ValidationError(_))
        ));
        assert!(matches!(
            liq.liquidate(&trader, "sAAPL").await,
            Err(ApiError::NotFound(_))
        ));

        open(&h, &wallet, FAT_MARGIN, 1).await;
        let (root_before, _, _) = h.book.root_info().await;
        assert!(matches!(
            liq.liquidate(&trader, "sAAPL").await,
            Err(ApiError::NotLiquidatable(_))
        ));
        assert_eq!(h.book.root_info().await.0, root_before);
        let row = h.store.find_position(&trader, "sAAPL").await.unwrap().unwrap();
        assert_eq!(row.status, "live");
    }

    #[tokio::test]
    async fn test_scan_counts_only_underwater_positions() {
        let h = harness();
        let liq = liquidator(&h, None);
        let wallet = LocalWallet::new(&mut rand::thread_rng());
        open(&h, &wallet, FAT_MARGIN, 1).await;

        assert_eq!(liq.scan_once().await.unwrap(), 0);
        assert_eq!(h.book.root_info().await.1, 1);
    }

    // 증명 키 생성을 한 번만 치르도록 시나리오 전체를 한 테스트에 담는다.
    #[tokio::test(flavor = "multi_thread")]
    async fn test_liquidation_end_to_end() {
        let h = harness();
        let w1 = LocalWallet::new(&mut rand::thread_rng());
        let w2 = LocalWallet::new(&mut rand::thread_rng());
        let t1 = format!("{:#x}", w1.address());
        let t2 = format!("{:#x}", w2.address());

        open(&h, &w1, THIN_MARGIN, 1).await;
        open(&h, &w2, FAT_MARGIN, 1).await;
        assert_eq!(h.book.root_info().await.1, 2);

        // 스캐너가 w1만 청산 (w2는 건강)
        let mock = Arc::new(MockChain::new());
        let liq = liquidator(&h, Some(mock.clone() as Arc<dyn ChainClient>));
        assert_eq!(liq.scan_once().await.unwrap(), 1);
        assert_eq!(mock.call_count(), 1);
        assert!(h.store.find_position(&t1, "sAAPL").await.unwrap().is_none());
        assert_eq!(h.book.root_info().await.1, 1);

        // w2 증거금 축소 후 리버트 체인으로 시도 → 원복
        open(&h, &w2, THIN_MARGIN, 2).await;
        let (root_before, _, _) = h.book.root_info().await;
        let reverting = liquidator(&h, Some(Arc::new(MockChain::reverting()) as Arc<dyn ChainClient>));
        let err = reverting.liquidate(&t2, "sAAPL").await.unwrap_err();
        assert!(matches!(err, ApiError::ChainSubmissionFailed(_)));
        assert_eq!(h.book.root_info().await.0, root_before);
        let row = h.store.find_position(&t2, "sAAPL").await.unwrap().unwrap();
        assert_eq!(row.status, "live");

        // dry run으로 마무리 → proved, 트리 비움
        let dry = liquidator(&h, None);
        let outcome = dry.liquidate(&t2, "sAAPL").await.unwrap();
        assert_eq!(outcome.status, LiquidationStatus::Proved);
        assert!(outcome.tx_hash.is_none());
        assert!(outcome.proof_ms > 0);
        let record = dry.find(outcome.id).await.unwrap().unwrap();
        assert_eq!(record.status, "proved");
        let stored_proof = record.proof.as_deref().unwrap();
        assert!(stored_proof.contains("publicInputs"));
        assert_eq!(h.book.root_info().await.1, 0);
        assert!(h.store.find_position(&t2, "sAAPL").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_network_flake_retries_then_succeeds() {
        let h = harness();
        let wallet = LocalWallet::new(&mut rand::thread_rng());
        let trader = format!("{:#x}", wallet.address());
        open(&h, &wallet, THIN_MARGIN, 1).await;

        let flaky = Arc::new(MockChain::failing(1));
        let liq = liquidator(&h, Some(flaky.clone() as Arc<dyn ChainClient>));
        let outcome = liq.liquidate(&trader, "sAAPL").await.unwrap();
        assert_eq!(outcome.status, LiquidationStatus::Confirmed);
        assert_eq!(flaky.call_count(), 2);
        let record = liq.find(outcome.id).await.unwrap().unwrap();
        assert_eq!(record.status, "confirmed");
        assert_eq!(record.attempts, 1);
        assert!(record.tx_hash.is_some());
    }
}
