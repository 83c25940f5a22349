//! ZK Prover Service - Groth16 Liquidation Proofs
//!
//! # Interview Q&A
//!
//! Q: 증명 생성 과정을 설명해주세요
//! A: 4단계 과정
//!
//!    1. Setup (일회성, lazy)
//!       - circuit_specific_setup() → Proving Key + Verifying Key
//!       - 깊이 20 회로 기준 수십 MB, 메모리에 캐싱
//!
//!    2. Witness 준비
//!       - 포지션 북이 잠근 리프의 (size, margin, entry_funding)과
//!         Merkle 경로, old/new 루트
//!
//!    3. Proof 생성
//!       - Groth16::prove() — MSM/FFT 중심의 CPU 집약 작업
//!       - spawn_blocking으로 tokio 워커에서 격리
//!
//!    4. 직렬화
//!       - G1/G2 좌표를 hex로, Solidity verifier 인자 순서에 맞춤
//!
//! Q: Groth16을 선택한 이유는?
//! A: 온체인 검증 비용
//!    - proof 128바이트 고정, 검증 pairing 3회 (~200k gas)
//!    - 회로가 하나뿐이라 circuit-specific setup의 단점이 작음
//!
//! Q: 증명 생성이 몰리면?
//! A: Semaphore로 동시 증명 수를 제한한다. 증명 하나가 코어를
//!    수 초 점유하므로 무제한 병렬은 전체 지연만 키운다.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, bail, Context, Result};
use ark_bn254::{Bn254, Fq};
use ark_ff::{BigInteger, PrimeField};
use ark_groth16::{Groth16, PreparedVerifyingKey, Proof, ProvingKey};
use ark_snark::{CircuitSpecificSetupSNARK, SNARK};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, Semaphore};
use tokio::task;

use zk_perps_circuits::{LiquidationCircuit, LiquidationWitness};

use crate::crypto::poseidon::fr_to_hex;

/// Solidity verifier 인자 형식의 proof
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProofData {
    pub a: [String; 2],
    pub b: [[String; 2]; 2],
    pub c: [String; 2],
}

/// 증명 생성 결과
#[derive(Debug, Clone)]
pub struct GeneratedProof {
    pub proof: ProofData,
    /// [old_root, new_root, mark_price, cum_funding, mmr_bps] (hex)
    pub public_inputs: Vec<String>,
    pub duration_ms: u128,
}

/// Cached proving context
///
/// keygen은 비용이 크고 (깊이 20 기준 수 초) 회로가 하나라
/// 첫 증명 요청 때 한 번 만들어 재사용한다.
#[derive(Clone)]
struct ProvingContext {
    pk: Arc<ProvingKey<Bn254>>,
    pvk: Arc<PreparedVerifyingKey<Bn254>>,
}

/// Groth16 prover
pub struct ZkProver {
    context: Arc<RwLock<Option<ProvingContext>>>,
    depth: usize,
    verify_after_prove: bool,
    /// 동시 증명 상한
    slots: Arc<Semaphore>,
}

impl ZkProver {
    pub fn new(depth: usize, max_concurrent: usize, verify_after_prove: bool) -> Self {
        Self {
            context: Arc::new(RwLock::new(None)),
            depth,
            verify_after_prove,
            slots: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// 키가 준비되어 있는지 (health check용)
    pub async fn keys_ready(&self) -> bool {
        self.context.read().await.is_some()
    }

    /// Proving/Verifying Key lazy 생성 (double-checked)
    pub async fn ensure_keys(&self) -> Result<()> {
        if self.context.read().await.is_some() {
            return Ok(());
        }

        let mut guard = self.context.write().await;
        if guard.is_some() {
            return Ok(());
        }

        tracing::info!(depth = self.depth, "generating Groth16 keys (one-time)");
        let depth = self.depth;
        let (pk, vk) = task::spawn_blocking(move || {
            let mut rng = OsRng;
            Groth16::<Bn254>::circuit_specific_setup(LiquidationCircuit::empty(depth), &mut rng)
        })
        .await
        .context("keygen task panicked")?
        .map_err(|e| anyhow!("groth16 setup failed: {e}"))?;

        let pvk = Groth16::<Bn254>::process_vk(&vk)
            .map_err(|e| anyhow!("verifying key processing failed: {e}"))?;

        *guard = Some(ProvingContext {
            pk: Arc::new(pk),
            pvk: Arc::new(pvk),
        });
        tracing::info!("Groth16 keys ready");
        Ok(())
    }

    /// 청산 증명 생성
    ///
    /// 공개 입력 순서는 회로의 allocation 순서와 같다:
    /// [old_root, new_root, mark_price, cum_funding, mmr_bps]
    pub async fn prove(
        &self,
        witness: LiquidationWitness,
        mark_price: u64,
        cum_funding: u64,
        mmr_bps: u64,
    ) -> Result<GeneratedProof> {
        if witness.path_siblings.len() != self.depth {
            bail!(
                "witness depth {} does not match prover depth {}",
                witness.path_siblings.len(),
                self.depth
            );
        }
        if !LiquidationCircuit::is_liquidatable(
            witness.size,
            witness.margin,
            witness.entry_funding,
            mark_price,
            cum_funding,
            mmr_bps,
        ) {
            bail!("position is not liquidatable under the given snapshot");
        }

        let _permit = self
            .slots
            .acquire()
            .await
            .context("prover semaphore closed")?;
        self.ensure_keys().await?;

        let context = self
            .context
            .read()
            .await
            .clone()
            .ok_or_else(|| anyhow!("proving keys not initialized"))?;

        let publics = LiquidationCircuit::public_inputs(
            witness.old_root,
            witness.new_root,
            mark_price,
            cum_funding,
            mmr_bps,
        );
        let circuit = LiquidationCircuit::new(witness, mark_price, cum_funding, mmr_bps);

        let started = Instant::now();
        let verify = self.verify_after_prove;
        let pk = context.pk.clone();
        let pvk = context.pvk.clone();
        let publics_for_task = publics.clone();
        let proof = task::spawn_blocking(move || -> Result<Proof<Bn254>> {
            let mut rng = OsRng;
            let proof = Groth16::<Bn254>::prove(&pk, circuit, &mut rng)
                .map_err(|e| anyhow!("groth16 proving failed: {e}"))?;
            if verify {
                let ok =
                    Groth16::<Bn254>::verify_with_processed_vk(&pvk, &publics_for_task, &proof)
                        .map_err(|e| anyhow!("self-verification errored: {e}"))?;
                if !ok {
                    bail!("self-verification rejected a freshly generated proof");
                }
            }
            Ok(proof)
        })
        .await
        .context("proving task panicked")??;

        let duration_ms = started.elapsed().as_millis();
        tracing::info!(duration_ms = duration_ms as u64, "liquidation proof generated");

        Ok(GeneratedProof {
            proof: serialize_proof(&proof),
            public_inputs: publics.iter().map(fr_to_hex).collect(),
            duration_ms,
        })
    }
}

fn fq_to_hex(value: &Fq) -> String {
    format!("0x{}", hex::encode(value.into_bigint().to_bytes_be()))
}

/// G1/G2 좌표 → Solidity verifier 인자. G2는 pairing 프리컴파일
/// 관례대로 허수부(c1)가 먼저다.
fn serialize_proof(proof: &Proof<Bn254>) -> ProofData {
    ProofData {
        a: [fq_to_hex(&proof.a.x), fq_to_hex(&proof.a.y)],
        b: [
            [fq_to_hex(&proof.b.x.c1), fq_to_hex(&proof.b.x.c0)],
            [fq_to_hex(&proof.b.y.c1), fq_to_hex(&proof.b.y.c0)],
        ],
        c: [fq_to_hex(&proof.c.x), fq_to_hex(&proof.c.y)],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{leaf_hash, PositionTree};

    const DEPTH: usize = 4;

    // 증거금 $4 < 유지증거금 $5: 청산 가능
    const SIZE: u64 = 100_000_000;
    const MARGIN: u64 = 400_000_000;
    const PRICE: u64 = 10_000_000_000;
    const MMR_BPS: u64 = 500;

    fn liquidatable_witness() -> LiquidationWitness {
        let mut tree = PositionTree::new(DEPTH).unwrap();
        let leaf = leaf_hash(SIZE, MARGIN, 0).unwrap();
        let old_root = tree.set_leaf(3, leaf).unwrap();
        let path = tree.path(3).unwrap();
        let new_root = tree.clear_leaf(3).unwrap();

        LiquidationWitness {
            size: SIZE,
            margin: MARGIN,
            entry_funding: 0,
            path_siblings: path.siblings,
            path_bits: path.bits,
            old_root,
            new_root,
        }
    }

    #[tokio::test]
    async fn test_prove_with_self_verification() {
        let prover = ZkProver::new(DEPTH, 1, true);
        let result = prover
            .prove(liquidatable_witness(), PRICE, 0, MMR_BPS)
            .await
            .unwrap();

        assert_eq!(result.public_inputs.len(), 5);
        for coord in result.proof.a.iter().chain(result.proof.c.iter()) {
            assert!(coord.starts_with("0x"));
            assert_eq!(coord.len(), 66);
        }
        // mark_price 공개 입력 자리 확인
        assert!(result.public_inputs[2].ends_with(&format!("{:x}", PRICE)));
    }

    #[tokio::test]
    async fn test_prove_rejects_healthy_position() {
        let prover = ZkProver::new(DEPTH, 1, false);
        let mut witness = liquidatable_witness();
        witness.margin = 10 * MARGIN;

        let err = prover
            .prove(witness, PRICE, 0, MMR_BPS)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not liquidatable"));
    }

    #[tokio::test]
    async fn test_prove_rejects_depth_mismatch() {
        let prover = ZkProver::new(DEPTH + 1, 1, false);
        let err = prover
            .prove(liquidatable_witness(), PRICE, 0, MMR_BPS)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("depth"));
    }

    #[test]
    fn test_proof_data_serialization() {
        let data = ProofData {
            a: ["0x01".to_string(), "0x02".to_string()],
            b: [
                ["0x03".to_string(), "0x04".to_string()],
                ["0x05".to_string(), "0x06".to_string()],
            ],
            c: ["0x07".to_string(), "0x08".to_string()],
        };
        let json = serde_json::to_string(&data).unwrap();
        let back: ProofData = serde_json::from_str(&json).unwrap();
        assert_eq!(back.a[0], "0x01");
        assert_eq!(back.b[0][1], "0x04");
    }
}
