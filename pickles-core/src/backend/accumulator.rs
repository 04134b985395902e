//! Deferred inner-product accumulators.
//!
//! An accumulator is a vector of `k` challenges together with a commitment
//! that is claimed to equal `MSM(g, coefficients(b))`, where
//! `b(X) = prod_i (1 + chals[i] * X^(2^(k-1-i)))`. Checking the MSM is the
//! expensive part of verification, so it is postponed and batched.

use ark_ec::short_weierstrass::{Affine, Projective};
use ark_ec::{CurveGroup, VariableBaseMSM};
use ark_ff::Field;

use crate::curves::{CycleCurve, SRS_LOG2};
use crate::utils::errors::PicklesError;
use crate::utils::math::Math;
use crate::utils::transcript::{KeccakTranscript, Transcript};

/// Evaluates the challenge polynomial at `x` in `O(k)`.
pub fn b_poly<F: Field>(chals: &[F], x: F) -> F {
    let k = chals.len();
    let mut pow_twos = Vec::with_capacity(k);
    let mut acc = x;
    for _ in 0..k {
        pow_twos.push(acc);
        acc.square_in_place();
    }
    (0..k)
        .map(|i| F::one() + chals[i] * pow_twos[k - 1 - i])
        .product()
}

/// Expands the challenge polynomial into its `2^k` coefficients.
pub fn b_poly_coefficients<F: Field>(chals: &[F]) -> Vec<F> {
    let rounds = chals.len();
    let s_length = rounds.pow2();
    let mut s = vec![F::one(); s_length];
    let mut k: usize = 0;
    let mut pow: usize = 1;
    for i in 1..s_length {
        k += if i == pow { 1 } else { 0 };
        pow <<= if i == pow { 1 } else { 0 };
        s[i] = s[i - (pow >> 1)] * chals[rounds - 1 - (k - 1)];
    }
    s
}

/// `MSM(g, coefficients(b))` for the curve's SRS.
pub fn challenge_polynomial_commitment<P: CycleCurve>(
    chals: &[P::ScalarField],
) -> Result<Affine<P>, PicklesError> {
    if chals.len() > SRS_LOG2 {
        return Err(PicklesError::ProofShape(format!(
            "{} accumulator challenges exceed the SRS size 2^{SRS_LOG2}",
            chals.len()
        )));
    }
    P::srs().commit(&b_poly_coefficients(chals))
}

/// Checks many accumulators with a single MSM:
/// `sum_i rho^i comm_i == MSM(g, sum_i rho^i coefficients(b_i))`.
/// The combiner `rho` is derived from all inputs. An empty batch is valid.
#[tracing::instrument(skip_all, name = "batch_dlog_accumulator_check", fields(curve = P::NAME, n = accumulators.len()))]
pub fn batch_dlog_accumulator_check<P: CycleCurve>(
    accumulators: &[(Affine<P>, Vec<P::ScalarField>)],
) -> Result<bool, PicklesError> {
    if accumulators.is_empty() {
        return Ok(true);
    }
    let mut transcript = KeccakTranscript::new(b"pickles/accumulators");
    for (comm, chals) in accumulators {
        transcript.append_serializable(comm);
        transcript.append_scalars(chals);
    }
    let rho: P::ScalarField = transcript.challenge_scalar();

    let max_rounds = accumulators
        .iter()
        .map(|(_, chals)| chals.len())
        .max()
        .unwrap_or(0);
    if max_rounds > SRS_LOG2 {
        return Err(PicklesError::ProofShape(format!(
            "{max_rounds} accumulator challenges exceed the SRS size 2^{SRS_LOG2}"
        )));
    }

    let mut combined = vec![P::ScalarField::from(0u64); max_rounds.pow2()];
    let mut points = Vec::with_capacity(accumulators.len());
    let mut weights = Vec::with_capacity(accumulators.len());
    let mut rho_i = P::ScalarField::from(1u64);
    for (comm, chals) in accumulators {
        for (acc, c) in combined.iter_mut().zip(b_poly_coefficients(chals)) {
            *acc += rho_i * c;
        }
        points.push(*comm);
        weights.push(rho_i);
        rho_i *= rho;
    }

    let lhs = Projective::<P>::msm(&points, &weights)
        .map_err(|n| PicklesError::Circuit(format!("msm length mismatch at {n}")))?;
    let rhs = P::srs().commit(&combined)?;
    Ok(lhs.into_affine() == rhs)
}

/// Checks many commitment claims `comm_i == MSM(g, scalars_i)` with one MSM
/// on each side, combined like [`batch_dlog_accumulator_check`]. An empty
/// batch is valid.
#[tracing::instrument(skip_all, name = "batch_commitment_check", fields(curve = P::NAME, n = claims.len()))]
pub fn batch_commitment_check<P: CycleCurve>(
    claims: &[(Affine<P>, Vec<P::ScalarField>)],
) -> Result<bool, PicklesError> {
    if claims.is_empty() {
        return Ok(true);
    }
    let mut transcript = KeccakTranscript::new(b"pickles/commitments");
    for (comm, scalars) in claims {
        transcript.append_serializable(comm);
        transcript.append_scalars(scalars);
    }
    let rho: P::ScalarField = transcript.challenge_scalar();

    let width = claims.iter().map(|(_, s)| s.len()).max().unwrap_or(0);
    let mut combined = vec![P::ScalarField::from(0u64); width];
    let mut points = Vec::with_capacity(claims.len());
    let mut weights = Vec::with_capacity(claims.len());
    let mut rho_i = P::ScalarField::from(1u64);
    for (comm, scalars) in claims {
        for (acc, s) in combined.iter_mut().zip(scalars.iter()) {
            *acc += rho_i * s;
        }
        points.push(*comm);
        weights.push(rho_i);
        rho_i *= rho;
    }

    let lhs = Projective::<P>::msm(&points, &weights)
        .map_err(|n| PicklesError::Circuit(format!("msm length mismatch at {n}")))?;
    let rhs = P::srs().commit(&combined)?;
    Ok(lhs.into_affine() == rhs)
}
