//! Chain Submitter
//!
//! 청산 증명을 perp 엔진 컨트랙트의 `liquidate()`로 제출한다.
//! 네트워크 실패는 지수 백오프로 재시도하고, revert는 재시도하지
//! 않는다 (같은 증명은 다시 보내도 같은 이유로 거절된다).
//!
//! `ChainClient` trait 뒤에 ethers 구현을 두어 파이프라인 테스트는
//! MockChain으로 돌린다.

use async_trait::async_trait;
use ethers::middleware::SignerMiddleware;
use ethers::prelude::abigen;
use ethers::providers::{Http, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, U256};
use thiserror::Error;

use super::prover::ProofData;

abigen!(
    PerpEngine,
    r#"[
        function liquidate(uint256[2] a, uint256[2][2] b, uint256[2] c, uint256 oldRoot, uint256 newRoot, uint256 markPrice, uint256 cumFunding, uint256 mmrBps) external
        function currentRoot() external view returns (uint256)
    ]"#
);

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("invalid chain configuration: {0}")]
    Config(String),
    #[error("malformed proof encoding: {0}")]
    BadProofEncoding(String),
    /// 네트워크/논스 문제. 재시도 대상.
    #[error("submission failed: {0}")]
    Submission(String),
    /// 컨트랙트 revert. 재시도해도 결과가 같다.
    #[error("transaction {tx_hash} reverted on-chain")]
    Reverted { tx_hash: String },
}

#[derive(Debug, Clone)]
pub struct SubmittedTx {
    pub tx_hash: String,
    /// 영수증까지 확인했는지 (status == 1)
    pub confirmed: bool,
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    /// public_inputs 순서: [old_root, new_root, mark_price, cum_funding, mmr_bps]
    async fn submit_liquidation(
        &self,
        proof: &ProofData,
        public_inputs: &[String],
    ) -> Result<SubmittedTx, ChainError>;

    /// 제출 계정 주소 (로그/health용)
    fn executor_address(&self) -> String;
}

/// ethers 기반 구현
pub struct EthersChain {
    contract: PerpEngine<SignerMiddleware<Provider<Http>, LocalWallet>>,
    executor: Address,
}

impl EthersChain {
    pub fn new(
        rpc_url: &str,
        chain_id: u64,
        contract_address: &str,
        private_key: &str,
    ) -> Result<Self, ChainError> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| ChainError::Config(format!("invalid ETH_RPC_URL: {e}")))?;
        let wallet: LocalWallet = private_key
            .trim_start_matches("0x")
            .parse()
            .map_err(|e| ChainError::Config(format!("invalid EXECUTOR_PRIVATE_KEY: {e}")))?;
        let wallet = wallet.with_chain_id(chain_id);
        let executor = wallet.address();
        let address: Address = contract_address
            .parse()
            .map_err(|e| ChainError::Config(format!("invalid PERP_ENGINE_ADDRESS: {e}")))?;

        let client = std::sync::Arc::new(SignerMiddleware::new(provider, wallet));
        Ok(Self {
            contract: PerpEngine::new(address, client),
            executor,
        })
    }
}

#[async_trait]
impl ChainClient for EthersChain {
    async fn submit_liquidation(
        &self,
        proof: &ProofData,
        public_inputs: &[String],
    ) -> Result<SubmittedTx, ChainError> {
        let (a, b, c) = proof_points(proof)?;
        let pubs = parse_public_inputs(public_inputs)?;

        let call = self
            .contract
            .liquidate(a, b, c, pubs[0], pubs[1], pubs[2], pubs[3], pubs[4])
            .legacy();

        let pending = call
            .send()
            .await
            .map_err(|e| ChainError::Submission(e.to_string()))?;
        let tx_hash = format!("{:#x}", *pending);

        let receipt = pending
            .await
            .map_err(|e| ChainError::Submission(e.to_string()))?;
        match receipt {
            Some(r) if r.status == Some(1u64.into()) => Ok(SubmittedTx {
                tx_hash,
                confirmed: true,
            }),
            Some(_) => Err(ChainError::Reverted { tx_hash }),
            // 영수증 유실: 제출은 됐지만 확인 불가
            None => Ok(SubmittedTx {
                tx_hash,
                confirmed: false,
            }),
        }
    }

    fn executor_address(&self) -> String {
        format!("{:#x}", self.executor)
    }
}

/// 재시도 래퍼. revert는 즉시 실패, 그 외는 backoff * 2^i 대기 후 재시도.
pub async fn submit_with_retry(
    chain: &dyn ChainClient,
    proof: &ProofData,
    public_inputs: &[String],
    max_retries: u32,
    backoff_ms: u64,
) -> Result<SubmittedTx, ChainError> {
    let mut attempt: u32 = 0;
    loop {
        match chain.submit_liquidation(proof, public_inputs).await {
            Ok(tx) => return Ok(tx),
            Err(e @ ChainError::Reverted { .. }) => return Err(e),
            Err(e @ (ChainError::Config(_) | ChainError::BadProofEncoding(_))) => return Err(e),
            Err(e) if attempt < max_retries => {
                attempt += 1;
                let delay = backoff_ms.saturating_mul(1u64 << (attempt - 1).min(10));
                tracing::warn!(
                    attempt,
                    delay_ms = delay,
                    error = %e,
                    "chain submission failed, retrying"
                );
                tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
            }
            Err(e) => return Err(e),
        }
    }
}

fn u256_from_hex(s: &str) -> Result<U256, ChainError> {
    U256::from_str_radix(s.trim_start_matches("0x"), 16)
        .map_err(|_| ChainError::BadProofEncoding(s.to_string()))
}

fn proof_points(
    proof: &ProofData,
) -> Result<([U256; 2], [[U256; 2]; 2], [U256; 2]), ChainError> {
    Ok((
        [u256_from_hex(&proof.a[0])?, u256_from_hex(&proof.a[1])?],
        [
            [u256_from_hex(&proof.b[0][0])?, u256_from_hex(&proof.b[0][1])?],
            [u256_from_hex(&proof.b[1][0])?, u256_from_hex(&proof.b[1][1])?],
        ],
        [u256_from_hex(&proof.c[0])?, u256_from_hex(&proof.c[1])?],
    ))
}

fn parse_public_inputs(public_inputs: &[String]) -> Result<[U256; 5], ChainError> {
    if public_inputs.len() != 5 {
        return Err(ChainError::BadProofEncoding(format!(
            "expected 5 public inputs, got {}",
            public_inputs.len()
        )));
    }
    let mut out = [U256::zero(); 5];
    for (slot, value) in out.iter_mut().zip(public_inputs) {
        *slot = u256_from_hex(value)?;
    }
    Ok(out)
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// 스크립트 가능한 체인 클라이언트
    pub struct MockChain {
        pub calls: Mutex<Vec<Vec<String>>>,
        fail_first: AtomicU32,
        revert: bool,
    }

    impl MockChain {
        pub fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail_first: AtomicU32::new(0),
                revert: false,
            }
        }

        /// 처음 n번 호출을 네트워크 오류로 실패시킨다
        pub fn failing(n: u32) -> Self {
            let chain = Self::new();
            chain.fail_first.store(n, Ordering::SeqCst);
            chain
        }

        pub fn reverting() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail_first: AtomicU32::new(0),
                revert: true,
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ChainClient for MockChain {
        async fn submit_liquidation(
            &self,
            _proof: &ProofData,
            public_inputs: &[String],
        ) -> Result<SubmittedTx, ChainError> {
            self.calls.lock().unwrap().push(public_inputs.to_vec());
            if self.revert {
                return Err(ChainError::Reverted {
                    tx_hash: "0xdeadbeef".to_string(),
                });
            }
            let remaining = self.fail_first.load(Ordering::SeqCst);
            if remaining > 0 {
                self.fail_first.store(remaining - 1, Ordering::SeqCst);
                return Err(ChainError::Submission("connection refused".to_string()));
            }
            Ok(SubmittedTx {
                tx_hash: format!("0x{:064x}", self.call_count()),
                confirmed: true,
            })
        }

        fn executor_address(&self) -> String {
            "0x0000000000000000000000000000000000000001".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockChain;
    use super::*;

    fn dummy_proof() -> ProofData {
        ProofData {
            a: ["0x01".to_string(), "0x02".to_string()],
            b: [
                ["0x03".to_string(), "0x04".to_string()],
                ["0x05".to_string(), "0x06".to_string()],
            ],
            c: ["0x07".to_string(), "0x08".to_string()],
        }
    }

    fn dummy_publics() -> Vec<String> {
        (1..=5).map(|i| format!("0x{:02x}", i)).collect()
    }

    #[test]
    fn test_u256_parsing() {
        assert_eq!(u256_from_hex("0xff").unwrap(), U256::from(255u64));
        assert_eq!(u256_from_hex("10").unwrap(), U256::from(16u64));
        assert!(u256_from_hex("0xzz").is_err());
        assert!(parse_public_inputs(&dummy_publics()).is_ok());
        assert!(parse_public_inputs(&dummy_publics()[..4]).is_err());
    }

    #[test]
    fn test_ethers_chain_rejects_bad_config() {
        // anvil 기본 개발 키
        let key = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
        let addr = "0x5FbDB2315678afecb367f032d93F642f64180aa3";

        assert!(EthersChain::new("http://localhost:8545", 31337, addr, "nothex").is_err());
        assert!(EthersChain::new("http://localhost:8545", 31337, "notanaddr", key).is_err());

        let chain = EthersChain::new("http://localhost:8545", 31337, addr, key).unwrap();
        assert_eq!(
            chain.executor_address(),
            "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266"
        );
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_failure() {
        let chain = MockChain::failing(2);
        let tx = submit_with_retry(&chain, &dummy_proof(), &dummy_publics(), 3, 1)
            .await
            .unwrap();
        assert!(tx.confirmed);
        assert_eq!(chain.call_count(), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_budget() {
        let chain = MockChain::failing(10);
        let err = submit_with_retry(&chain, &dummy_proof(), &dummy_publics(), 2, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, ChainError::Submission(_)));
        assert_eq!(chain.call_count(), 3);
    }

    #[tokio::test]
    async fn test_revert_is_not_retried() {
        let chain = MockChain::reverting();
        let err = submit_with_retry(&chain, &dummy_proof(), &dummy_publics(), 3, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, ChainError::Reverted { .. }));
        assert_eq!(chain.call_count(), 1);
    }
}
