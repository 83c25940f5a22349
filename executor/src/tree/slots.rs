//! 슬롯 배정: (trader, market) → 트리 리프 인덱스
//!
//! 홈 슬롯은 keccak256(trader ":" market)의 하위 depth 비트.
//! 충돌 시 선형 탐사로 빈 슬롯을 찾고, 배정은 DB에 영속되어
//! 조회는 절대 재탐사하지 않는다. 삭제로 탐사 체인이 끊겨도
//! 기존 배정이 어긋나지 않는 이유가 이것이다.
//!
//! # Interview Q&A
//!
//! Q: 단순히 keccak % 2^depth 인덱스를 그대로 쓰면 안 되나?
//! A: 생일 역설 때문에 수천 개 포지션만 돼도 충돌 확률이 상당하다.
//!    충돌한 두 포지션이 같은 리프를 덮어쓰면 한쪽 증거금이 증발한다.
//!    탐사 + 영속 배정으로 슬롯 유일성을 보장한다.
//!
//! Q: 청산 중 슬롯을 왜 PendingRemoval로 잠그는가?
//! A: 증명 생성 중 같은 슬롯에 새 주문이 들어오면 old_root 증인이
//!    무효가 된다. 잠금은 증명이 끝나거나 실패할 때까지 해당
//!    포지션의 변경을 차단한다.

use std::collections::HashMap;

use sha3::{Digest, Keccak256};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SlotError {
    #[error("no slot assigned for this position")]
    NotAssigned,
    #[error("slot {slot} is locked by a pending liquidation")]
    PendingRemoval { slot: u64 },
    #[error("removal not in progress for this position")]
    NotPending,
    #[error("no free slot within {max_probe} probes of home slot {home}")]
    ProbeExhausted { home: u64, max_probe: u32 },
    #[error("slot {slot} already occupied during restore")]
    SlotConflict { slot: u64 },
}

/// 포지션 식별자. trader는 소문자로 정규화된다.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PositionKey {
    pub trader: String,
    pub market: String,
}

impl PositionKey {
    pub fn new(trader: &str, market: &str) -> Self {
        Self {
            trader: trader.to_lowercase(),
            market: market.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Live,
    PendingRemoval,
}

#[derive(Debug, Clone)]
struct Occupant {
    key: PositionKey,
    state: SlotState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotAssignment {
    pub slot: u64,
    pub probes: u32,
}

pub fn key_hash(key: &PositionKey) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(key.trader.as_bytes());
    hasher.update(b":");
    hasher.update(key.market.as_bytes());
    hasher.finalize().into()
}

/// 해시의 하위 depth 비트 (big-endian 정수로 본 mod 2^depth)
pub fn home_slot(hash: &[u8; 32], depth: usize) -> u64 {
    let mut tail = [0u8; 8];
    tail.copy_from_slice(&hash[24..32]);
    u64::from_be_bytes(tail) & slot_mask(depth)
}

fn slot_mask(depth: usize) -> u64 {
    (1u64 << depth) - 1
}

pub struct SlotAssigner {
    depth: usize,
    max_probe: u32,
    assignments: HashMap<PositionKey, u64>,
    occupancy: HashMap<u64, Occupant>,
}

impl SlotAssigner {
    pub fn new(depth: usize, max_probe: u32) -> Self {
        Self {
            depth,
            max_probe,
            assignments: HashMap::new(),
            occupancy: HashMap::new(),
        }
    }

    pub fn occupied(&self) -> usize {
        self.occupancy.len()
    }

    /// 배정 조회. 재탐사하지 않는다.
    pub fn lookup(&self, key: &PositionKey) -> Option<u64> {
        self.assignments.get(key).copied()
    }

    pub fn state_of(&self, key: &PositionKey) -> Option<SlotState> {
        let slot = self.assignments.get(key)?;
        self.occupancy.get(slot).map(|o| o.state)
    }

    /// 슬롯 배정. 이미 Live 배정이 있으면 그대로 돌려준다.
    pub fn assign(&mut self, key: &PositionKey) -> Result<SlotAssignment, SlotError> {
        if let Some(slot) = self.lookup(key) {
            return match self.occupancy.get(&slot).map(|o| o.state) {
                Some(SlotState::Live) => Ok(SlotAssignment { slot, probes: 0 }),
                Some(SlotState::PendingRemoval) => Err(SlotError::PendingRemoval { slot }),
                None => Err(SlotError::NotAssigned),
            };
        }

        let home = home_slot(&key_hash(key), self.depth);
        let mask = slot_mask(self.depth);
        for i in 0..self.max_probe {
            let slot = (home + i as u64) & mask;
            if !self.occupancy.contains_key(&slot) {
                self.assignments.insert(key.clone(), slot);
                self.occupancy.insert(
                    slot,
                    Occupant {
                        key: key.clone(),
                        state: SlotState::Live,
                    },
                );
                return Ok(SlotAssignment { slot, probes: i });
            }
        }
        Err(SlotError::ProbeExhausted {
            home,
            max_probe: self.max_probe,
        })
    }

    /// 시작 시 DB에서 복원. 슬롯이 이미 차 있으면 데이터 불일치다.
    pub fn restore(
        &mut self,
        key: &PositionKey,
        slot: u64,
        state: SlotState,
    ) -> Result<(), SlotError> {
        if self.occupancy.contains_key(&slot) {
            return Err(SlotError::SlotConflict { slot });
        }
        self.assignments.insert(key.clone(), slot);
        self.occupancy.insert(
            slot,
            Occupant {
                key: key.clone(),
                state,
            },
        );
        Ok(())
    }

    /// 포지션 정상 종료 (size=0 의도). Live 배정만 해제할 수 있다.
    pub fn release(&mut self, key: &PositionKey) -> Result<u64, SlotError> {
        let slot = self.lookup(key).ok_or(SlotError::NotAssigned)?;
        match self.occupancy.get(&slot).map(|o| o.state) {
            Some(SlotState::Live) => {
                self.assignments.remove(key);
                self.occupancy.remove(&slot);
                Ok(slot)
            }
            Some(SlotState::PendingRemoval) => Err(SlotError::PendingRemoval { slot }),
            None => Err(SlotError::NotAssigned),
        }
    }

    /// 청산 1단계: 슬롯을 잠그고 인덱스 반환
    pub fn begin_removal(&mut self, key: &PositionKey) -> Result<u64, SlotError> {
        let slot = self.lookup(key).ok_or(SlotError::NotAssigned)?;
        let occupant = self.occupancy.get_mut(&slot).ok_or(SlotError::NotAssigned)?;
        match occupant.state {
            SlotState::Live => {
                occupant.state = SlotState::PendingRemoval;
                Ok(slot)
            }
            SlotState::PendingRemoval => Err(SlotError::PendingRemoval { slot }),
        }
    }

    /// 청산 확정: 배정 해제, 슬롯 재사용 가능
    pub fn commit_removal(&mut self, key: &PositionKey) -> Result<u64, SlotError> {
        let slot = self.lookup(key).ok_or(SlotError::NotAssigned)?;
        match self.occupancy.get(&slot).map(|o| o.state) {
            Some(SlotState::PendingRemoval) => {
                self.assignments.remove(key);
                self.occupancy.remove(&slot);
                Ok(slot)
            }
            _ => Err(SlotError::NotPending),
        }
    }

    /// 청산 실패 보상: 같은 슬롯에서 Live로 복귀
    pub fn abort_removal(&mut self, key: &PositionKey) -> Result<u64, SlotError> {
        let slot = self.lookup(key).ok_or(SlotError::NotAssigned)?;
        let occupant = self.occupancy.get_mut(&slot).ok_or(SlotError::NotAssigned)?;
        match occupant.state {
            SlotState::PendingRemoval => {
                occupant.state = SlotState::Live;
                Ok(slot)
            }
            SlotState::Live => Err(SlotError::NotPending),
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(n: u32) -> PositionKey {
        PositionKey::new(&format!("0xTrader{n:04}"), "sAAPL")
    }

    #[test]
    fn test_home_slot_uses_low_bits() {
        let mut hash = [0u8; 32];
        hash[31] = 0b1010_1101;
        assert_eq!(home_slot(&hash, 4), 0b1101);
        assert_eq!(home_slot(&hash, 8), 0b1010_1101);
        hash[30] = 0x01;
        assert_eq!(home_slot(&hash, 8), 0b1010_1101);
        assert_eq!(home_slot(&hash, 12), 0x1ad);
    }

    #[test]
    fn test_key_normalizes_trader_case() {
        let a = PositionKey::new("0xABCdef", "sTSLA");
        let b = PositionKey::new("0xabcDEF", "sTSLA");
        assert_eq!(a, b);
        assert_eq!(key_hash(&a), key_hash(&b));
    }

    #[test]
    fn test_assign_is_idempotent_for_live_key() {
        let mut slots = SlotAssigner::new(8, 16);
        let k = key(1);
        let first = slots.assign(&k).unwrap();
        let second = slots.assign(&k).unwrap();
        assert_eq!(first.slot, second.slot);
        assert_eq!(slots.occupied(), 1);
    }

    #[test]
    fn test_probing_fills_tiny_tree_then_exhausts() {
        // depth 2 = 슬롯 4개. 어떤 해시가 나와도 랩어라운드 탐사로 다 찬다.
        let mut slots = SlotAssigner::new(2, 4);
        let mut used = std::collections::HashSet::new();
        for n in 0..4 {
            let a = slots.assign(&key(n)).unwrap();
            assert!(used.insert(a.slot), "slot {} assigned twice", a.slot);
        }
        assert_eq!(slots.occupied(), 4);
        assert!(matches!(
            slots.assign(&key(99)),
            Err(SlotError::ProbeExhausted { .. })
        ));
    }

    #[test]
    fn test_lookup_survives_neighbor_release() {
        let mut slots = SlotAssigner::new(2, 4);
        let keys: Vec<_> = (0..4).map(key).collect();
        let assigned: Vec<_> = keys.iter().map(|k| slots.assign(k).unwrap().slot).collect();

        // 탐사 체인 중간을 비워도 기존 배정은 그대로 조회된다.
        slots.release(&keys[1]).unwrap();
        assert_eq!(slots.lookup(&keys[0]), Some(assigned[0]));
        assert_eq!(slots.lookup(&keys[2]), Some(assigned[2]));
        assert_eq!(slots.lookup(&keys[3]), Some(assigned[3]));
        assert_eq!(slots.lookup(&keys[1]), None);
    }

    #[test]
    fn test_removal_lifecycle() {
        let mut slots = SlotAssigner::new(8, 16);
        let k = key(7);
        let slot = slots.assign(&k).unwrap().slot;

        assert_eq!(slots.begin_removal(&k).unwrap(), slot);
        assert_eq!(slots.state_of(&k), Some(SlotState::PendingRemoval));

        // 잠긴 동안 upsert와 release 차단
        assert!(matches!(
            slots.assign(&k),
            Err(SlotError::PendingRemoval { .. })
        ));
        assert!(matches!(
            slots.release(&k),
            Err(SlotError::PendingRemoval { .. })
        ));
        assert!(matches!(
            slots.begin_removal(&k),
            Err(SlotError::PendingRemoval { .. })
        ));

        // abort는 같은 슬롯으로 복귀
        assert_eq!(slots.abort_removal(&k).unwrap(), slot);
        assert_eq!(slots.state_of(&k), Some(SlotState::Live));
        assert_eq!(slots.assign(&k).unwrap().slot, slot);

        // commit은 슬롯을 비운다
        slots.begin_removal(&k).unwrap();
        assert_eq!(slots.commit_removal(&k).unwrap(), slot);
        assert_eq!(slots.lookup(&k), None);
        assert_eq!(slots.occupied(), 0);
    }

    #[test]
    fn test_commit_requires_pending() {
        let mut slots = SlotAssigner::new(8, 16);
        let k = key(3);
        slots.assign(&k).unwrap();
        assert_eq!(slots.commit_removal(&k), Err(SlotError::NotPending));
        assert_eq!(slots.abort_removal(&k), Err(SlotError::NotPending));
        assert_eq!(slots.begin_removal(&key(4)), Err(SlotError::NotAssigned));
    }

    #[test]
    fn test_restore_detects_conflict() {
        let mut slots = SlotAssigner::new(8, 16);
        slots.restore(&key(1), 5, SlotState::Live).unwrap();
        assert_eq!(
            slots.restore(&key(2), 5, SlotState::Live),
            Err(SlotError::SlotConflict { slot: 5 })
        );
        assert_eq!(slots.lookup(&key(1)), Some(5));
    }
}
