//! Poseidon 해시 래퍼 (circom 호환)
//!
//! 트리의 모든 해시는 여기서 나간다. 회로 크레이트와 동일한
//! light-poseidon 파라미터를 쓰므로 실행기가 계산한 루트와 회로가
//! 재계산한 루트가 항상 일치한다.

use ark_bn254::Fr;
use ark_ff::{BigInteger, PrimeField};
use light_poseidon::{Poseidon, PoseidonError, PoseidonHasher};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HashError {
    #[error("poseidon: {0}")]
    Poseidon(#[from] PoseidonError),

    #[error("invalid field element encoding: {0}")]
    InvalidEncoding(String),
}

/// Poseidon2: 트리 내부 노드
pub fn poseidon2(left: Fr, right: Fr) -> Result<Fr, HashError> {
    let mut hasher = Poseidon::<Fr>::new_circom(2)?;
    Ok(hasher.hash(&[left, right])?)
}

/// Poseidon3: 포지션 리프 = H(size, margin, entry_funding)
pub fn poseidon3(a: Fr, b: Fr, c: Fr) -> Result<Fr, HashError> {
    let mut hasher = Poseidon::<Fr>::new_circom(3)?;
    Ok(hasher.hash(&[a, b, c])?)
}

/// 32바이트 big-endian → Fr (modular reduction)
pub fn fr_from_bytes_be(bytes: &[u8]) -> Fr {
    Fr::from_be_bytes_mod_order(bytes)
}

/// Fr → 0x-접두 64자리 hex (big-endian, 32바이트 고정)
pub fn fr_to_hex(value: &Fr) -> String {
    let bytes = value.into_bigint().to_bytes_be();
    let mut padded = [0u8; 32];
    padded[32 - bytes.len()..].copy_from_slice(&bytes);
    format!("0x{}", hex::encode(padded))
}

/// 0x-접두 hex → Fr
pub fn fr_from_hex(raw: &str) -> Result<Fr, HashError> {
    let stripped = raw.strip_prefix("0x").unwrap_or(raw);
    let bytes = hex::decode(stripped)
        .map_err(|e| HashError::InvalidEncoding(format!("not hex: {}", e)))?;
    if bytes.len() != 32 {
        return Err(HashError::InvalidEncoding(format!(
            "expected 32 bytes, got {}",
            bytes.len()
        )));
    }
    Ok(Fr::from_be_bytes_mod_order(&bytes))
}
