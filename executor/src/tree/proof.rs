//! Merkle 경로 (리프 → 루트 증인)
//!
//! 증명 파이프라인이 회로에 넘기는 형상과 동일하다:
//! siblings는 리프 레벨부터 루트 직전까지, bits는 인덱스의 LSB부터.
//! bit = true 이면 현재 노드가 오른쪽 자식이다.

use ark_bn254::Fr;

use crate::crypto::poseidon::{poseidon2, HashError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerklePath {
    pub siblings: Vec<Fr>,
    pub bits: Vec<bool>,
}

impl MerklePath {
    pub fn depth(&self) -> usize {
        self.siblings.len()
    }

    /// 리프에서 경로를 따라 루트 재계산
    pub fn compute_root(&self, leaf: Fr) -> Result<Fr, HashError> {
        let mut current = leaf;
        for (sibling, bit) in self.siblings.iter().zip(self.bits.iter()) {
            current = if *bit {
                poseidon2(*sibling, current)?
            } else {
                poseidon2(current, *sibling)?
            };
        }
        Ok(current)
    }

    pub fn verify(&self, leaf: Fr, root: Fr) -> Result<bool, HashError> {
        Ok(self.compute_root(leaf)? == root)
    }
}
