//! The Pasta cycle: step circuits are proved over Vesta (scalar field Fp),
//! wrap circuits over Pallas (scalar field Fq). Each curve's base field is
//! the other's scalar field.

use ark_ec::short_weierstrass::{Affine, Projective, SWCurveConfig};
use ark_ec::{CurveGroup, VariableBaseMSM};
use ark_ff::{Field, PrimeField};
use once_cell::sync::Lazy;
#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::backend::accumulator::challenge_polynomial_commitment;
use crate::backend::RecursionChallenge;
use crate::utils::errors::PicklesError;
use crate::utils::math::Math;
use crate::utils::transcript::{keccak_digest, KeccakTranscript, Transcript};

pub type StepConfig = ark_vesta::VestaConfig;
pub type WrapConfig = ark_pallas::PallasConfig;
/// Fp
pub type StepField = ark_vesta::Fr;
/// Fq
pub type WrapField = ark_pallas::Fr;
pub type StepAffine = ark_vesta::Affine;
pub type WrapAffine = ark_pallas::Affine;

/// log2 of the number of SRS generators per curve. Every circuit domain and
/// every accumulator must fit.
pub const SRS_LOG2: usize = 11;
/// Number of challenges in the placeholder accumulators.
pub const DUMMY_LOG2: usize = 4;

/// Structured reference string: independent generators obtained by hashing
/// to the curve, so nobody knows relations between them.
pub struct Srs<P: SWCurveConfig> {
    pub g: Vec<Affine<P>>,
}

impl<P: SWCurveConfig> Srs<P> {
    #[tracing::instrument(skip_all, name = "Srs::create")]
    pub fn create(label: &'static [u8], log2: usize) -> Self {
        let n = log2.pow2();
        #[cfg(feature = "parallel")]
        let g = (0..n)
            .into_par_iter()
            .map(|i| hash_to_curve::<P>(label, i as u64))
            .collect();
        #[cfg(not(feature = "parallel"))]
        let g = (0..n).map(|i| hash_to_curve::<P>(label, i as u64)).collect();
        Self { g }
    }

    pub fn len(&self) -> usize {
        self.g.len()
    }

    pub fn is_empty(&self) -> bool {
        self.g.is_empty()
    }

    /// `sum_i scalars[i] * g[i]`
    pub fn commit(&self, scalars: &[P::ScalarField]) -> Result<Affine<P>, PicklesError> {
        if scalars.len() > self.g.len() {
            return Err(PicklesError::ProofShape(format!(
                "{} scalars exceed the {} SRS generators",
                scalars.len(),
                self.g.len()
            )));
        }
        let point = Projective::<P>::msm(&self.g[..scalars.len()], scalars)
            .map_err(|n| PicklesError::Circuit(format!("msm length mismatch at {n}")))?;
        Ok(point.into_affine())
    }
}

/// Try-and-increment: hash `(label, index, attempt)` to a base field element
/// and take the first one that is an x-coordinate. Pasta curves have cofactor
/// one so any such point lies in the prime-order group.
pub fn hash_to_curve<P: SWCurveConfig>(label: &[u8], index: u64) -> Affine<P> {
    let mut attempt = 0u64;
    loop {
        let digest = keccak_digest(label, &[&index.to_le_bytes(), &attempt.to_le_bytes()]);
        if let Some(x) = P::BaseField::from_random_bytes(&digest) {
            let greatest = digest[31] & 1 == 1;
            if let Some(point) = Affine::<P>::get_point_from_x_unchecked(x, greatest) {
                if !point.infinity {
                    return point;
                }
            }
        }
        attempt += 1;
    }
}

static VESTA_SRS: Lazy<Srs<StepConfig>> = Lazy::new(|| Srs::create(b"pickles/srs/vesta", SRS_LOG2));
static PALLAS_SRS: Lazy<Srs<WrapConfig>> =
    Lazy::new(|| Srs::create(b"pickles/srs/pallas", SRS_LOG2));

static VESTA_DUMMY: Lazy<RecursionChallenge<StepConfig>> =
    Lazy::new(|| dummy_accumulator::<StepConfig>(b"pickles/dummy/vesta"));
static PALLAS_DUMMY: Lazy<RecursionChallenge<WrapConfig>> =
    Lazy::new(|| dummy_accumulator::<WrapConfig>(b"pickles/dummy/pallas"));

/// A curve of the cycle together with its process-wide parameters.
pub trait CycleCurve: SWCurveConfig {
    const NAME: &'static str;

    fn srs() -> &'static Srs<Self>;

    /// Well-formed accumulator used where a predecessor is not verified.
    fn dummy_accumulator() -> &'static RecursionChallenge<Self>;
}

impl CycleCurve for StepConfig {
    const NAME: &'static str = "vesta";

    fn srs() -> &'static Srs<Self> {
        &VESTA_SRS
    }

    fn dummy_accumulator() -> &'static RecursionChallenge<Self> {
        &VESTA_DUMMY
    }
}

impl CycleCurve for WrapConfig {
    const NAME: &'static str = "pallas";

    fn srs() -> &'static Srs<Self> {
        &PALLAS_SRS
    }

    fn dummy_accumulator() -> &'static RecursionChallenge<Self> {
        &PALLAS_DUMMY
    }
}

fn dummy_accumulator<P: CycleCurve>(label: &'static [u8]) -> RecursionChallenge<P> {
    let mut transcript = KeccakTranscript::new(label);
    let chals: Vec<P::ScalarField> = transcript.challenge_vector(DUMMY_LOG2);
    // DUMMY_LOG2 < SRS_LOG2, so the commitment always fits
    let comm = challenge_polynomial_commitment::<P>(&chals).unwrap_or_else(|_| Affine::identity());
    RecursionChallenge { chals, comm }
}

/// Maps a 32-byte digest into the step field.
pub fn step_field_from_digest(digest: &[u8; 32]) -> StepField {
    StepField::from_le_bytes_mod_order(digest)
}

/// Maps a 32-byte digest into the wrap field.
pub fn wrap_field_from_digest(digest: &[u8; 32]) -> WrapField {
    WrapField::from_le_bytes_mod_order(digest)
}
