//! Merkle Path Gadget
//!
//! 리프에서 루트까지 경로를 따라 올라가며 Poseidon2로 루트를 재계산한다.
//! bits는 LSB-first: bits[i] = (leaf_index >> i) & 1, 1이면 현재 노드가
//! 오른쪽 자식이다. 네이티브 버전은 증인 생성과 테스트에서 같은 경로
//! 계산을 수행한다.

use ark_bn254::Fr;
use ark_r1cs_std::{boolean::Boolean, fields::fp::FpVar, select::CondSelectGadget};
use ark_relations::r1cs::SynthesisError;
use light_poseidon::{Poseidon, PoseidonError, PoseidonHasher, PoseidonParameters};

use crate::poseidon;

/// Recompute the root from `leaf` along the path, inside the circuit.
pub fn compute_root_var(
    params2: &PoseidonParameters<Fr>,
    leaf: &FpVar<Fr>,
    siblings: &[FpVar<Fr>],
    bits: &[Boolean<Fr>],
) -> Result<FpVar<Fr>, SynthesisError> {
    if siblings.len() != bits.len() {
        return Err(SynthesisError::Unsatisfiable);
    }

    let mut current = leaf.clone();
    for (sibling, bit) in siblings.iter().zip(bits.iter()) {
        // bit = 1 → current is the right child
        let left = FpVar::conditionally_select(bit, sibling, &current)?;
        let right = FpVar::conditionally_select(bit, &current, sibling)?;
        current = poseidon::hash_var(params2, &[left, right])?;
    }
    Ok(current)
}

/// Native counterpart of [`compute_root_var`].
pub fn compute_root_native(
    leaf: Fr,
    siblings: &[Fr],
    bits: &[bool],
) -> Result<Fr, PoseidonError> {
    let mut hasher = Poseidon::<Fr>::new_circom(2)?;
    let mut current = leaf;
    for (sibling, bit) in siblings.iter().zip(bits.iter()) {
        current = if *bit {
            hasher.hash(&[*sibling, current])?
        } else {
            hasher.hash(&[current, *sibling])?
        };
    }
    Ok(current)
}
