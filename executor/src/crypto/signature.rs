//! EIP-191 personal-sign 검증
//!
//! 복호화된 의도에는 트레이더의 서명이 붙는다. 서명이 payload와 일치하고
//! 서명자가 payload의 trader 주소와 같아야만 포지션 북에 반영한다.
//!
//! # Interview Q&A
//!
//! Q: 서명 검증을 복호화 이후에 하는 이유는?
//! A: 서명 대상이 평문 payload이기 때문이다. 암호문 위에 서명하면
//!    실행기가 키를 바꿀 때마다 서명이 깨지고, 서명만 보고는
//!    트레이더를 식별할 수 없다.

use std::str::FromStr;

use ethers::types::{Address, Signature};
use ethers::utils::to_checksum;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("malformed signature: {0}")]
    MalformedSignature(String),
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("signature recovery failed")]
    RecoveryFailed,
    #[error("signer mismatch: expected {expected}, recovered {recovered}")]
    SignerMismatch { expected: String, recovered: String },
}

/// 서명에서 서명자 주소 복원 (EIP-191 prefix 포함 해시)
pub fn recover_signer(message: &str, signature: &str) -> Result<Address, SignatureError> {
    let sig = Signature::from_str(signature.trim_start_matches("0x"))
        .map_err(|e| SignatureError::MalformedSignature(e.to_string()))?;
    sig.recover(message)
        .map_err(|_| SignatureError::RecoveryFailed)
}

/// 서명자가 기대한 트레이더인지 확인하고 주소 반환
pub fn verify_personal_sign(
    message: &str,
    signature: &str,
    expected_trader: &str,
) -> Result<Address, SignatureError> {
    let expected = Address::from_str(expected_trader)
        .map_err(|_| SignatureError::InvalidAddress(expected_trader.to_string()))?;
    let recovered = recover_signer(message, signature)?;
    if recovered != expected {
        return Err(SignatureError::SignerMismatch {
            expected: to_checksum(&expected, None),
            recovered: to_checksum(&recovered, None),
        });
    }
    Ok(recovered)
}

/// 응답에 내보낼 체크섬 표기
pub fn checksum_address(address: &Address) -> String {
    to_checksum(address, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::signers::{LocalWallet, Signer};

    #[tokio::test]
    async fn test_recover_matches_signer() {
        let wallet = LocalWallet::new(&mut rand::thread_rng());
        let message = r#"{"trader":"0xabc","market":"sAAPL","size":"100000000"}"#;
        let sig = wallet.sign_message(message).await.unwrap();

        let recovered = recover_signer(message, &format!("0x{}", sig)).unwrap();
        assert_eq!(recovered, wallet.address());
    }

    #[tokio::test]
    async fn test_verify_accepts_matching_trader() {
        let wallet = LocalWallet::new(&mut rand::thread_rng());
        let message = "liquidate me not";
        let sig = wallet.sign_message(message).await.unwrap();
        let trader = format!("{:#x}", wallet.address());

        let recovered = verify_personal_sign(message, &sig.to_string(), &trader).unwrap();
        assert_eq!(recovered, wallet.address());
    }

    #[tokio::test]
    async fn test_verify_rejects_wrong_trader() {
        let wallet = LocalWallet::new(&mut rand::thread_rng());
        let other = LocalWallet::new(&mut rand::thread_rng());
        let message = "hello";
        let sig = wallet.sign_message(message).await.unwrap();
        let other_addr = format!("{:#x}", other.address());

        let err = verify_personal_sign(message, &sig.to_string(), &other_addr).unwrap_err();
        assert!(matches!(err, SignatureError::SignerMismatch { .. }));
    }

    #[tokio::test]
    async fn test_tampered_message_recovers_different_signer() {
        let wallet = LocalWallet::new(&mut rand::thread_rng());
        let sig = wallet.sign_message("original").await.unwrap();

        let recovered = recover_signer("tampered", &sig.to_string()).unwrap();
        assert_ne!(recovered, wallet.address());
    }

    #[test]
    fn test_garbage_signature_rejected() {
        assert!(matches!(
            recover_signer("msg", "0xzz"),
            Err(SignatureError::MalformedSignature(_))
        ));
        assert!(matches!(
            recover_signer("msg", "0x1234"),
            Err(SignatureError::MalformedSignature(_))
        ));
    }

    #[test]
    fn test_invalid_address_rejected() {
        let err = verify_personal_sign("msg", "0x00", "not-an-address").unwrap_err();
        assert!(matches!(err, SignatureError::InvalidAddress(_)));
    }
}
