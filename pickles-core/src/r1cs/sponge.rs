//! Algebraic sponge over a prime field, with a native implementation and an
//! in-circuit gadget that produce identical outputs.
//!
//! The permutation is a width-3 full-round construction with an `x^7` S-box
//! and a Cauchy MDS matrix. Round constants are derived from Keccak so the
//! parameters are reproducible for any field.

use ark_ff::PrimeField;
use once_cell::sync::Lazy;

use super::builder::{CircuitBuilder, FieldVar};
use crate::curves::StepField;
use crate::utils::transcript::keccak_digest;

pub const WIDTH: usize = 3;
pub const RATE: usize = 2;
pub const FULL_ROUNDS: usize = 8;

pub struct SpongeParams<F: PrimeField> {
    round_constants: Vec<[F; WIDTH]>,
    mds: [[F; WIDTH]; WIDTH],
}

impl<F: PrimeField> SpongeParams<F> {
    pub fn new(label: &[u8]) -> Self {
        let round_constants = (0..FULL_ROUNDS)
            .map(|round| {
                let mut row = [F::zero(); WIDTH];
                for (i, c) in row.iter_mut().enumerate() {
                    let digest = keccak_digest(
                        label,
                        &[&(round as u64).to_le_bytes(), &(i as u64).to_le_bytes()],
                    );
                    *c = F::from_le_bytes_mod_order(&digest);
                }
                row
            })
            .collect();

        // Cauchy matrix 1 / (x_i + y_j) with x = 0..WIDTH, y = WIDTH..2*WIDTH
        let mut mds = [[F::zero(); WIDTH]; WIDTH];
        for (i, row) in mds.iter_mut().enumerate() {
            for (j, entry) in row.iter_mut().enumerate() {
                let denom = F::from((i + WIDTH + j) as u64);
                *entry = denom.inverse().unwrap_or_default();
            }
        }

        Self {
            round_constants,
            mds,
        }
    }
}

static STEP_SPONGE: Lazy<SpongeParams<StepField>> =
    Lazy::new(|| SpongeParams::new(b"pickles/sponge/step"));

pub fn step_params() -> &'static SpongeParams<StepField> {
    &STEP_SPONGE
}

fn sbox<F: PrimeField>(x: F) -> F {
    let x2 = x.square();
    let x4 = x2.square();
    x4 * x2 * x
}

pub fn permute<F: PrimeField>(params: &SpongeParams<F>, state: &mut [F; WIDTH]) {
    for rc in params.round_constants.iter() {
        for s in state.iter_mut() {
            *s = sbox(*s);
        }
        let mut next = [F::zero(); WIDTH];
        for (i, n) in next.iter_mut().enumerate() {
            *n = rc[i];
            for (j, s) in state.iter().enumerate() {
                *n += params.mds[i][j] * s;
            }
        }
        *state = next;
    }
}

/// Fixed-length hash: capacity element seeded with the input length.
pub fn hash<F: PrimeField>(params: &SpongeParams<F>, inputs: &[F]) -> F {
    let mut state = [F::zero(); WIDTH];
    state[RATE] = F::from(inputs.len() as u64);
    if inputs.is_empty() {
        permute(params, &mut state);
    }
    for chunk in inputs.chunks(RATE) {
        for (s, x) in state.iter_mut().zip(chunk) {
            *s += x;
        }
        permute(params, &mut state);
    }
    state[0]
}

fn sbox_gadget<F: PrimeField>(cs: &mut CircuitBuilder<F>, x: &FieldVar<F>) -> FieldVar<F> {
    let x2 = cs.square(x);
    let x4 = cs.square(&x2);
    let x6 = cs.mul(&x4, &x2);
    cs.mul(&x6, x)
}

fn permute_gadget<F: PrimeField>(
    cs: &mut CircuitBuilder<F>,
    params: &SpongeParams<F>,
    state: &mut [FieldVar<F>; WIDTH],
) {
    for rc in params.round_constants.iter() {
        let boxed: Vec<FieldVar<F>> = state.iter().map(|s| sbox_gadget(cs, s)).collect();
        for (i, s) in state.iter_mut().enumerate() {
            let mixed = cs.linear_combination(boxed.iter().zip(params.mds[i].iter().copied()));
            *s = cs.add(&mixed, &FieldVar::constant(rc[i]));
        }
    }
}

/// In-circuit [`hash`].
pub fn hash_gadget<F: PrimeField>(
    cs: &mut CircuitBuilder<F>,
    params: &SpongeParams<F>,
    inputs: &[FieldVar<F>],
) -> FieldVar<F> {
    let mut state = [
        FieldVar::constant(F::zero()),
        FieldVar::constant(F::zero()),
        FieldVar::constant(F::from(inputs.len() as u64)),
    ];
    if inputs.is_empty() {
        permute_gadget(cs, params, &mut state);
    }
    for chunk in inputs.chunks(RATE) {
        for (s, x) in state.iter_mut().zip(chunk) {
            *s = cs.add(s, x);
        }
        permute_gadget(cs, params, &mut state);
    }
    let [out, _, _] = state;
    out
}
