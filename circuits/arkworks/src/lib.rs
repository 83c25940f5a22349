//! Liquidation Circuit - arkworks R1CS / Groth16
//!
//! 개인 포지션 트리의 청산 전이를 증명하는 회로.
//!
//! # Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `poseidon` | circom 호환 Poseidon 게이트 + 네이티브 해시 |
//! | `merkle` | 경로 기반 루트 재계산 게이트 |
//! | `liquidation` | 청산 조건 + old/new 루트 전이 증명 |
//!
//! # Interview Q&A
//!
//! Q: 왜 Groth16인가?
//! A: 증명 크기가 상수(~128B)이고 온체인 검증 가스가 가장 싸다.
//!    회로별 trusted setup이 필요하지만 트리 깊이가 고정이라
//!    배포 시 한 번이면 된다.
//!
//! Q: 실행기(executor)와 회로는 어떻게 역할을 나누는가?
//! A: 실행기가 트리를 유지하며 증인(리프 값, sibling 경로, 두 루트)을
//!    캡처하고, 이 크레이트는 그 증인이 공개 입력과 정합함을 증명한다.
//!    해시 파라미터를 공유하므로 양쪽 루트 계산이 항상 같다.

pub mod liquidation;
pub mod merkle;
pub mod poseidon;

pub use liquidation::{LiquidationCircuit, LiquidationWitness, DIFF_BITS, RANGE_BITS};
