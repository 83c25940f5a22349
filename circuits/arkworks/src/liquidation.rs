//! Liquidation Circuit - Groth16 / BN254
//!
//! Proves: a committed position is liquidatable, and the tree transition
//! old_root → new_root is exactly the removal of that one leaf.
//!
//! # Interview Q&A
//!
//! Q: 무엇을 숨기고 무엇을 공개하는가?
//! A: 포지션 내용(size, margin, entry_funding)과 트리 내 위치는 비밀.
//!    공개되는 것은 두 루트와 시장 상태(mark price, 누적 펀딩 지수,
//!    유지증거금 비율)뿐이다. 검증자는 "어떤 리프 하나가 청산 조건을
//!    만족했고, 그 리프만 제거되었다"는 사실만 확인한다.
//!
//! Q: 왜 루트를 두 번 계산하는가?
//! A: 같은 sibling 경로로 (1) 리프 해시 → old_root, (2) 빈 리프(0) →
//!    new_root 를 모두 강제해야 "한 리프 제거 외에 아무것도 변하지
//!    않았다"가 증명된다. 경로를 공유하므로 다른 리프를 건드리는
//!    new_root는 만들 수 없다.
//!
//! Q: 청산 조건의 고정소수점 산술은?
//! A: 모든 값은 1e8 스케일 u64, mmr은 bps(1e4 스케일).
//!    margin − size·Δfunding/1e16 < size·price·mmr/1e20  (실수 기준)
//!    양변에 1e20을 곱하면 필드에서 오버플로 없이:
//!    margin·1e12 < size·Δfunding·1e4 + size·price·mmr
//!    (64비트 입력 기준 양변 < 2^143, BN254 스칼라는 254비트)
//!
//! # Circuit Constraints
//! 1. Range check: size, margin, entry_funding in [0, 2^64)
//! 2. Funding monotonicity: cum_funding - entry_funding in [0, 2^64)
//! 3. leaf = Poseidon3(size, margin, entry_funding)
//! 4. Merkle path: leaf → old_root and empty(0) → new_root, same path
//! 5. Strict liquidation inequality via 160-bit check on rhs - lhs - 1

use ark_bn254::Fr;
use ark_ff::One;
use ark_r1cs_std::{
    alloc::AllocVar, boolean::Boolean, eq::EqGadget, fields::fp::FpVar, fields::FieldVar,
    ToBitsGadget,
};
use ark_relations::r1cs::{ConstraintSynthesizer, ConstraintSystemRef, SynthesisError};

use crate::{merkle, poseidon};

/// Number of bits for range checking private amounts
pub const RANGE_BITS: usize = 64;

/// Width of the strict-inequality difference check.
/// Both sides of the inequality are < 2^143 for 64-bit inputs, so a
/// negative difference wraps to ~2^254 and always fails this check.
pub const DIFF_BITS: usize = 160;

/// lhs scale: margin · 10^12 (1e8 price decimals × 1e4 bps)
pub const MARGIN_SCALE: u64 = 1_000_000_000_000;

/// funding-debt scale: size · Δfunding · 10^4 (bps)
pub const FUNDING_SCALE: u64 = 10_000;

/// Liquidation circuit.
///
/// Public inputs, in allocation order:
/// `[old_root, new_root, mark_price, cum_funding, mmr_bps]`
#[derive(Clone)]
pub struct LiquidationCircuit {
    /// Tree depth (number of path levels)
    pub depth: usize,
    /// Private: position size (1e8 fixed point)
    pub size: Option<Fr>,
    /// Private: posted margin (1e8 fixed point USD)
    pub margin: Option<Fr>,
    /// Private: funding index snapshot at entry
    pub entry_funding: Option<Fr>,
    /// Private: sibling hashes, leaf level first
    pub path_siblings: Option<Vec<Fr>>,
    /// Private: LSB-first index bits (true = right child)
    pub path_bits: Option<Vec<bool>>,
    /// Public: root before removal
    pub old_root: Option<Fr>,
    /// Public: root after the leaf is zeroed
    pub new_root: Option<Fr>,
    /// Public: current mark price (1e8)
    pub mark_price: Option<Fr>,
    /// Public: current cumulative funding index (1e8)
    pub cum_funding: Option<Fr>,
    /// Public: maintenance margin requirement in bps
    pub mmr_bps: Option<Fr>,
}

/// Everything the prover needs besides market state.
/// Mirrors what the position book captures when it reserves a leaf.
#[derive(Clone, Debug)]
pub struct LiquidationWitness {
    pub size: u64,
    pub margin: u64,
    pub entry_funding: u64,
    pub path_siblings: Vec<Fr>,
    pub path_bits: Vec<bool>,
    pub old_root: Fr,
    pub new_root: Fr,
}

impl LiquidationCircuit {
    pub fn new(
        witness: LiquidationWitness,
        mark_price: u64,
        cum_funding: u64,
        mmr_bps: u64,
    ) -> Self {
        let depth = witness.path_siblings.len();
        Self {
            depth,
            size: Some(Fr::from(witness.size)),
            margin: Some(Fr::from(witness.margin)),
            entry_funding: Some(Fr::from(witness.entry_funding)),
            path_siblings: Some(witness.path_siblings),
            path_bits: Some(witness.path_bits),
            old_root: Some(witness.old_root),
            new_root: Some(witness.new_root),
            mark_price: Some(Fr::from(mark_price)),
            cum_funding: Some(Fr::from(cum_funding)),
            mmr_bps: Some(Fr::from(mmr_bps)),
        }
    }

    /// Create empty circuit for setup
    pub fn empty(depth: usize) -> Self {
        Self {
            depth,
            size: None,
            margin: None,
            entry_funding: None,
            path_siblings: None,
            path_bits: None,
            old_root: None,
            new_root: None,
            mark_price: None,
            cum_funding: None,
            mmr_bps: None,
        }
    }

    /// Public input vector in the order the verifier expects.
    pub fn public_inputs(
        old_root: Fr,
        new_root: Fr,
        mark_price: u64,
        cum_funding: u64,
        mmr_bps: u64,
    ) -> Vec<Fr> {
        vec![
            old_root,
            new_root,
            Fr::from(mark_price),
            Fr::from(cum_funding),
            Fr::from(mmr_bps),
        ]
    }

    /// Leaf commitment: Poseidon3(size, margin, entry_funding).
    pub fn leaf_hash(size: u64, margin: u64, entry_funding: u64) -> Result<Fr, light_poseidon::PoseidonError> {
        poseidon::hash_native(&[Fr::from(size), Fr::from(margin), Fr::from(entry_funding)])
    }

    /// Native liquidation check, same fixed-point layout as the circuit.
    ///
    /// Values are 1e8 fixed point; mmr_bps in basis points. Saturating
    /// intermediates keep the check total for adversarial magnitudes.
    pub fn is_liquidatable(
        size: u64,
        margin: u64,
        entry_funding: u64,
        mark_price: u64,
        cum_funding: u64,
        mmr_bps: u64,
    ) -> bool {
        let delta = match cum_funding.checked_sub(entry_funding) {
            Some(d) => d,
            // funding index regressed below entry: not a provable state
            None => return false,
        };
        let lhs = margin as u128 * MARGIN_SCALE as u128;
        let funding_debt = (size as u128)
            .saturating_mul(delta as u128)
            .saturating_mul(FUNDING_SCALE as u128);
        let maintenance = (size as u128)
            .saturating_mul(mark_price as u128)
            .saturating_mul(mmr_bps as u128);
        lhs < funding_debt.saturating_add(maintenance)
    }
}

/// Enforce `var < 2^bits` by pinning the high bits of its decomposition.
fn enforce_bit_width(var: &FpVar<Fr>, bits: usize) -> Result<(), SynthesisError> {
    let decomposed = var.to_bits_le()?;
    for bit in decomposed.iter().skip(bits) {
        bit.enforce_equal(&Boolean::constant(false))?;
    }
    Ok(())
}

impl ConstraintSynthesizer<Fr> for LiquidationCircuit {
    fn generate_constraints(self, cs: ConstraintSystemRef<Fr>) -> Result<(), SynthesisError> {
        if let Some(siblings) = &self.path_siblings {
            if siblings.len() != self.depth {
                return Err(SynthesisError::Unsatisfiable);
            }
        }
        if let Some(bits) = &self.path_bits {
            if bits.len() != self.depth {
                return Err(SynthesisError::Unsatisfiable);
            }
        }

        let params2 = poseidon::circom_parameters(2).map_err(|_| SynthesisError::Unsatisfiable)?;
        let params3 = poseidon::circom_parameters(3).map_err(|_| SynthesisError::Unsatisfiable)?;

        // ======== Allocate Private Inputs ========

        let size_var = FpVar::new_witness(cs.clone(), || {
            self.size.ok_or(SynthesisError::AssignmentMissing)
        })?;

        let margin_var = FpVar::new_witness(cs.clone(), || {
            self.margin.ok_or(SynthesisError::AssignmentMissing)
        })?;

        let entry_funding_var = FpVar::new_witness(cs.clone(), || {
            self.entry_funding.ok_or(SynthesisError::AssignmentMissing)
        })?;

        let mut sibling_vars = Vec::with_capacity(self.depth);
        for i in 0..self.depth {
            sibling_vars.push(FpVar::new_witness(cs.clone(), || {
                self.path_siblings
                    .as_ref()
                    .map(|p| p[i])
                    .ok_or(SynthesisError::AssignmentMissing)
            })?);
        }

        let mut bit_vars = Vec::with_capacity(self.depth);
        for i in 0..self.depth {
            bit_vars.push(Boolean::new_witness(cs.clone(), || {
                self.path_bits
                    .as_ref()
                    .map(|b| b[i])
                    .ok_or(SynthesisError::AssignmentMissing)
            })?);
        }

        // ======== Allocate Public Inputs ========

        let old_root_var = FpVar::new_input(cs.clone(), || {
            self.old_root.ok_or(SynthesisError::AssignmentMissing)
        })?;

        let new_root_var = FpVar::new_input(cs.clone(), || {
            self.new_root.ok_or(SynthesisError::AssignmentMissing)
        })?;

        let mark_price_var = FpVar::new_input(cs.clone(), || {
            self.mark_price.ok_or(SynthesisError::AssignmentMissing)
        })?;

        let cum_funding_var = FpVar::new_input(cs.clone(), || {
            self.cum_funding.ok_or(SynthesisError::AssignmentMissing)
        })?;

        let mmr_bps_var = FpVar::new_input(cs.clone(), || {
            self.mmr_bps.ok_or(SynthesisError::AssignmentMissing)
        })?;

        // ======== Constraint 1: Range Checks ========

        enforce_bit_width(&size_var, RANGE_BITS)?;
        enforce_bit_width(&margin_var, RANGE_BITS)?;
        enforce_bit_width(&entry_funding_var, RANGE_BITS)?;

        // ======== Constraint 2: Funding Monotonicity ========
        // cum_funding >= entry_funding, delta bounded to 64 bits

        let funding_delta = &cum_funding_var - &entry_funding_var;
        enforce_bit_width(&funding_delta, RANGE_BITS)?;

        // ======== Constraint 3: Leaf Commitment ========

        let leaf = poseidon::hash_var(
            &params3,
            &[size_var.clone(), margin_var.clone(), entry_funding_var],
        )?;

        // ======== Constraint 4: Merkle Transition ========
        // Same siblings and bits bind both walks: removing this leaf is
        // the only difference between the two roots.

        let computed_old = merkle::compute_root_var(&params2, &leaf, &sibling_vars, &bit_vars)?;
        computed_old.enforce_equal(&old_root_var)?;

        let empty_leaf = FpVar::constant(Fr::from(0u64));
        let computed_new =
            merkle::compute_root_var(&params2, &empty_leaf, &sibling_vars, &bit_vars)?;
        computed_new.enforce_equal(&new_root_var)?;

        // ======== Constraint 5: Liquidation Check ========
        // Prove: margin * 1e12 < size * delta * 1e4 + size * price * mmr
        //
        // For strict inequality (a < b), we prove (b - a - 1) fits DIFF_BITS.

        let margin_scale = FpVar::constant(Fr::from(MARGIN_SCALE));
        let funding_scale = FpVar::constant(Fr::from(FUNDING_SCALE));

        let lhs = &margin_var * &margin_scale;
        let funding_debt = &size_var * &funding_delta * &funding_scale;
        let maintenance = &size_var * &mark_price_var * &mmr_bps_var;
        let rhs = &funding_debt + &maintenance;

        let one = FpVar::constant(Fr::one());
        let diff = &rhs - &lhs - &one;
        enforce_bit_width(&diff, DIFF_BITS)?;

        Ok(())
    }
}
