//! Poseidon Hash Gadget (circom-compatible)
//!
//! 회로 안에서 쓰는 Poseidon 해시. 파라미터는 light-poseidon의
//! circom(BN254, x^5) 상수를 그대로 가져오므로, 네이티브 트리가 계산한
//! 해시와 회로가 계산한 해시가 항상 일치한다.
//!
//! # Interview Q&A
//!
//! Q: 왜 Keccak이 아니라 Poseidon인가?
//! A: Keccak은 비트 연산 기반이라 R1CS로 표현하면 수만 개의 제약이 생긴다.
//!    Poseidon은 필드 연산(덧셈/곱셈)만 사용 → 해시 하나에 ~250 제약.
//!    Merkle 경로 검증(depth 20 × 2회)이 회로의 대부분을 차지하므로
//!    해시 선택이 증명 비용을 결정한다.
//!
//! Q: 게이트와 네이티브 해시가 어긋나면?
//! A: 증명이 생성은 되지만 검증자가 기대하는 루트와 절대 일치하지 않는다.
//!    그래서 상수를 두 번 정의하지 않고 light-poseidon 파라미터 하나를
//!    양쪽에서 공유하며, 테스트로 게이트 == 네이티브를 고정한다.
//!
//! Permutation layout (light-poseidon과 동일):
//! state = [0, inputs...], 전체 라운드 = full + partial,
//! 각 라운드는 ark 덧셈 → S-box(x^5, partial은 state[0]만) → MDS 곱.

use ark_bn254::Fr;
use ark_ff::Zero;
use ark_r1cs_std::fields::{fp::FpVar, FieldVar};
use ark_relations::r1cs::SynthesisError;
use light_poseidon::{
    parameters::bn254_x5, Poseidon, PoseidonError, PoseidonHasher, PoseidonParameters,
};

/// Load the circom BN254 parameters for a given input arity (width = arity + 1).
pub fn circom_parameters(arity: usize) -> Result<PoseidonParameters<Fr>, PoseidonError> {
    bn254_x5::get_poseidon_parameters::<Fr>((arity + 1) as u8)
}

/// Native hash over the same parameters the gadget uses.
pub fn hash_native(inputs: &[Fr]) -> Result<Fr, PoseidonError> {
    let mut hasher = Poseidon::<Fr>::new_circom(inputs.len())?;
    hasher.hash(inputs)
}

/// In-circuit Poseidon hash.
///
/// `inputs.len()` must equal `params.width - 1`.
pub fn hash_var(
    params: &PoseidonParameters<Fr>,
    inputs: &[FpVar<Fr>],
) -> Result<FpVar<Fr>, SynthesisError> {
    if inputs.len() + 1 != params.width {
        return Err(SynthesisError::Unsatisfiable);
    }

    let mut state: Vec<FpVar<Fr>> = Vec::with_capacity(params.width);
    state.push(FpVar::constant(Fr::zero()));
    for input in inputs {
        state.push(input.clone());
    }

    let half_full = params.full_rounds / 2;
    let all_rounds = params.full_rounds + params.partial_rounds;

    for round in 0..all_rounds {
        state = apply_ark(params, &state, round);
        if round < half_full || round >= half_full + params.partial_rounds {
            for s in state.iter_mut() {
                *s = pow5(s);
            }
        } else {
            state[0] = pow5(&state[0]);
        }
        state = apply_mds(params, &state);
    }

    Ok(state[0].clone())
}

/// x^5 S-box: 3 multiplications.
fn pow5(x: &FpVar<Fr>) -> FpVar<Fr> {
    let x2 = x * x;
    let x4 = &x2 * &x2;
    &x4 * x
}

fn apply_ark(
    params: &PoseidonParameters<Fr>,
    state: &[FpVar<Fr>],
    round: usize,
) -> Vec<FpVar<Fr>> {
    state
        .iter()
        .enumerate()
        .map(|(i, s)| s + FpVar::constant(params.ark[round * params.width + i]))
        .collect()
}

fn apply_mds(params: &PoseidonParameters<Fr>, state: &[FpVar<Fr>]) -> Vec<FpVar<Fr>> {
    (0..state.len())
        .map(|i| {
            let mut acc = FpVar::constant(Fr::zero());
            for (j, s) in state.iter().enumerate() {
                acc += s * FpVar::constant(params.mds[i][j]);
            }
            acc
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ark_r1cs_std::{alloc::AllocVar, R1CSVar};
    use ark_relations::r1cs::ConstraintSystem;
    use core::str::FromStr;

    fn gadget_hash(inputs: &[Fr]) -> Fr {
        let params = circom_parameters(inputs.len()).unwrap();
        let cs = ConstraintSystem::<Fr>::new_ref();
        let vars: Vec<FpVar<Fr>> = inputs
            .iter()
            .map(|v| FpVar::new_witness(cs.clone(), || Ok(*v)).unwrap())
            .collect();
        let out = hash_var(&params, &vars).unwrap();
        assert!(cs.is_satisfied().unwrap());
        out.value().unwrap()
    }

    #[test]
    fn test_gadget_matches_native_two_inputs() {
        let inputs = [Fr::from(123u64), Fr::from(456u64)];
        assert_eq!(gadget_hash(&inputs), hash_native(&inputs).unwrap());
    }

    #[test]
    fn test_gadget_matches_native_three_inputs() {
        let inputs = [Fr::from(7u64), Fr::from(0u64), Fr::from(u64::MAX)];
        assert_eq!(gadget_hash(&inputs), hash_native(&inputs).unwrap());
    }

    #[test]
    fn test_circom_vector() {
        // circomlib Poseidon([1, 2])
        let expected = Fr::from_str(
            "7853200120776062878684798364095072458815029376092732009249414926327459813530",
        )
        .unwrap();
        let native = hash_native(&[Fr::from(1u64), Fr::from(2u64)]).unwrap();
        assert_eq!(native, expected);
        assert_eq!(gadget_hash(&[Fr::from(1u64), Fr::from(2u64)]), expected);
    }

    #[test]
    fn test_arity_mismatch_rejected() {
        let params = circom_parameters(2).unwrap();
        let cs = ConstraintSystem::<Fr>::new_ref();
        let one = FpVar::new_witness(cs, || Ok(Fr::from(1u64))).unwrap();
        assert!(hash_var(&params, &[one]).is_err());
    }
}
