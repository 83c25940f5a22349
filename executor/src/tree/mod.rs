//! 포지션 커밋먼트 트리
//!
//! 고정 깊이 Poseidon Merkle 트리. 리프는 Poseidon3(size, margin,
//! entry_funding), 내부 노드는 Poseidon2(left, right). 빈 서브트리는
//! zeros 체인으로 접어서 희소 맵에 실제로 쓰인 노드만 보관한다.
//!
//! 트리는 실행기 메모리가 정본이고, 시작 시 DB의 live 포지션으로
//! 재구축한다. 모든 변경은 services::book의 쓰기 락 아래에서 일어난다.

use std::collections::HashMap;

use ark_bn254::Fr;
use thiserror::Error;

use crate::crypto::poseidon::{poseidon2, poseidon3, HashError};

pub mod proof;
pub mod slots;

pub use proof::MerklePath;
pub use slots::{PositionKey, SlotAssigner, SlotAssignment, SlotError, SlotState};

#[derive(Debug, Error)]
pub enum TreeError {
    #[error(transparent)]
    Hash(#[from] HashError),
    #[error("leaf index {index} out of range for depth {depth}")]
    IndexOutOfRange { index: u64, depth: usize },
}

/// 리프 인코딩: 모든 금액은 1e8 고정소수점 u64
pub fn leaf_hash(size: u64, margin: u64, entry_funding: u64) -> Result<Fr, HashError> {
    poseidon3(Fr::from(size), Fr::from(margin), Fr::from(entry_funding))
}

pub struct PositionTree {
    depth: usize,
    /// zeros[l] = 레벨 l의 빈 서브트리 해시, zeros[depth] = 빈 루트
    zeros: Vec<Fr>,
    /// nodes[l][i] — zeros와 다른 노드만 저장
    nodes: Vec<HashMap<u64, Fr>>,
    leaf_count: u64,
}

impl PositionTree {
    pub fn new(depth: usize) -> Result<Self, TreeError> {
        let mut zeros = Vec::with_capacity(depth + 1);
        zeros.push(Fr::from(0u64));
        for l in 0..depth {
            let z = zeros[l];
            zeros.push(poseidon2(z, z)?);
        }
        Ok(Self {
            depth,
            zeros,
            nodes: vec![HashMap::new(); depth + 1],
            leaf_count: 0,
        })
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn capacity(&self) -> u64 {
        1u64 << self.depth
    }

    /// 0이 아닌 리프 수
    pub fn leaf_count(&self) -> u64 {
        self.leaf_count
    }

    pub fn root(&self) -> Fr {
        self.node(self.depth, 0)
    }

    pub fn get_leaf(&self, index: u64) -> Result<Fr, TreeError> {
        self.check_index(index)?;
        Ok(self.node(0, index))
    }

    /// 리프 기록 후 루트까지 경로 갱신. 새 루트 반환.
    pub fn set_leaf(&mut self, index: u64, value: Fr) -> Result<Fr, TreeError> {
        self.check_index(index)?;

        let old = self.node(0, index);
        let zero = self.zeros[0];
        if old == zero && value != zero {
            self.leaf_count += 1;
        } else if old != zero && value == zero {
            self.leaf_count -= 1;
        }

        self.store(0, index, value);
        let mut idx = index;
        for l in 0..self.depth {
            let left = self.node(l, idx & !1);
            let right = self.node(l, idx | 1);
            let parent = poseidon2(left, right)?;
            idx >>= 1;
            self.store(l + 1, idx, parent);
        }
        Ok(self.root())
    }

    /// 리프를 빈 값으로 되돌림 (청산 확정, 포지션 종료)
    pub fn clear_leaf(&mut self, index: u64) -> Result<Fr, TreeError> {
        self.set_leaf(index, self.zeros[0])
    }

    /// 인덱스의 Merkle 경로 추출 (회로 증인 형상 그대로)
    pub fn path(&self, index: u64) -> Result<MerklePath, TreeError> {
        self.check_index(index)?;
        let mut siblings = Vec::with_capacity(self.depth);
        let mut bits = Vec::with_capacity(self.depth);
        let mut idx = index;
        for l in 0..self.depth {
            siblings.push(self.node(l, idx ^ 1));
            bits.push(idx & 1 == 1);
            idx >>= 1;
        }
        Ok(MerklePath { siblings, bits })
    }

    fn node(&self, level: usize, index: u64) -> Fr {
        self.nodes[level]
            .get(&index)
            .copied()
            .unwrap_or(self.zeros[level])
    }

    fn store(&mut self, level: usize, index: u64, value: Fr) {
        if value == self.zeros[level] {
            self.nodes[level].remove(&index);
        } else {
            self.nodes[level].insert(index, value);
        }
    }

    fn check_index(&self, index: u64) -> Result<(), TreeError> {
        if index >= self.capacity() {
            return Err(TreeError::IndexOutOfRange {
                index,
                depth: self.depth,
            });
        }
        Ok(())
    }
}
