//! The proof-system seam. The recursion layer only talks to a backend
//! through [`ProofSystem`]: index generation, proving with previous
//! accumulators, oracle derivation, and verification with the MSMs split
//! off so they can be batched across proofs.

use std::fmt;

use ark_ec::short_weierstrass::{Affine, SWCurveConfig};
use ark_serialize::{
    CanonicalDeserialize, CanonicalSerialize, Compress, Read, SerializationError, Valid, Validate,
};

use crate::compiler::MAX_PROOFS_VERIFIED;
use crate::curves::{CycleCurve, SRS_LOG2};
use crate::r1cs::constraint_system::ConstraintSystem;
use crate::serializable::deserialize_vec;
use crate::utils::errors::PicklesError;
use crate::utils::transcript::{KeccakTranscript, Transcript};

pub mod accumulator;
pub mod transparent;

use accumulator::{batch_commitment_check, batch_dlog_accumulator_check};
use transparent::circuit_domain_log2;

/// A previous proof's deferred accumulator: challenges and the claimed
/// commitment to the challenge polynomial.
#[derive(CanonicalSerialize)]
pub struct RecursionChallenge<P: SWCurveConfig> {
    pub chals: Vec<P::ScalarField>,
    pub comm: Affine<P>,
}

/// Verifier-side circuit description. The constraint system travels with
/// the index so verifiers can check the relation itself.
#[derive(CanonicalSerialize)]
pub struct VerifierIndex<P: SWCurveConfig> {
    pub cs: ConstraintSystem<P::ScalarField>,
    /// Digest of `cs`.
    pub digest: [u8; 32],
    pub num_public: u64,
    pub num_aux: u64,
    pub domain_log2: u8,
    pub circuit_commitment: Affine<P>,
}

impl<P: SWCurveConfig> VerifierIndex<P> {
    /// Checks that the summary fields describe `cs`.
    pub fn check_consistency(&self) -> Result<(), PicklesError> {
        let log2 = circuit_domain_log2(&self.cs);
        if self.digest != self.cs.digest()
            || self.num_public != self.cs.num_public as u64
            || self.num_aux != self.cs.num_aux as u64
            || self.domain_log2 as usize != log2
            || log2 > SRS_LOG2
        {
            return Err(PicklesError::Serialization(
                "verifier index does not describe its constraint system".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(CanonicalSerialize, CanonicalDeserialize)]
pub struct ProverIndex<P: SWCurveConfig> {
    pub verifier_index: VerifierIndex<P>,
}

impl<P: SWCurveConfig> ProverIndex<P> {
    pub fn cs(&self) -> &ConstraintSystem<P::ScalarField> {
        &self.verifier_index.cs
    }
}

/// A transparent proof: the auxiliary witness in the clear, bound to the
/// transcript through its commitment.
#[derive(CanonicalSerialize)]
pub struct BackendProof<P: SWCurveConfig> {
    pub witness: Vec<P::ScalarField>,
    /// Commitment to `public ‖ witness`.
    pub witness_commitment: Affine<P>,
    /// Commitment to this proof's own challenge polynomial.
    pub challenge_polynomial_commitment: Affine<P>,
    pub prev_challenges: Vec<RecursionChallenge<P>>,
}

/// Fiat-Shamir values of a proof, recomputable from the verifier index,
/// public input and proof alone.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Oracles<F> {
    pub zeta: F,
    pub bulletproof_challenges: Vec<F>,
    /// Transcript state before evaluation challenges are squeezed.
    pub sponge_digest: [u8; 32],
}

/// MSM claims a verifier postponed. Claims of any number of proofs on the
/// same curve are settled together by [`MsmChecks::check`].
pub struct MsmChecks<P: SWCurveConfig> {
    /// `comm == MSM(g, scalars)`
    pub commitments: Vec<(Affine<P>, Vec<P::ScalarField>)>,
    /// `(comm, chals)` accumulators.
    pub accumulators: Vec<(Affine<P>, Vec<P::ScalarField>)>,
}

impl<P: SWCurveConfig> Default for MsmChecks<P> {
    fn default() -> Self {
        Self {
            commitments: vec![],
            accumulators: vec![],
        }
    }
}

impl<P: CycleCurve> MsmChecks<P> {
    pub fn push_accumulator(&mut self, acc: &RecursionChallenge<P>) {
        self.accumulators.push((acc.comm, acc.chals.clone()));
    }

    pub fn append(&mut self, other: &mut Self) {
        self.commitments.append(&mut other.commitments);
        self.accumulators.append(&mut other.accumulators);
    }

    pub fn is_empty(&self) -> bool {
        self.commitments.is_empty() && self.accumulators.is_empty()
    }

    pub fn check(&self) -> Result<bool, PicklesError> {
        Ok(batch_commitment_check::<P>(&self.commitments)?
            && batch_dlog_accumulator_check::<P>(&self.accumulators)?)
    }
}

pub trait ProofSystem<P: CycleCurve> {
    fn setup(cs: ConstraintSystem<P::ScalarField>) -> Result<ProverIndex<P>, PicklesError>;

    fn create(
        index: &ProverIndex<P>,
        public: &[P::ScalarField],
        aux: &[P::ScalarField],
        prev_challenges: Vec<RecursionChallenge<P>>,
    ) -> Result<BackendProof<P>, PicklesError>;

    /// Everything a verifier derives without doing an MSM.
    fn oracles(
        index: &VerifierIndex<P>,
        public: &[P::ScalarField],
        proof: &BackendProof<P>,
    ) -> Result<Oracles<P::ScalarField>, PicklesError>;

    /// Checks everything except MSMs and records those in `checks`. The
    /// proof is valid once `checks` passes.
    fn verify_deferred(
        index: &VerifierIndex<P>,
        public: &[P::ScalarField],
        proof: &BackendProof<P>,
        checks: &mut MsmChecks<P>,
    ) -> Result<Oracles<P::ScalarField>, PicklesError>;

    fn batch_verify(
        index: &VerifierIndex<P>,
        batch: &[(&[P::ScalarField], &BackendProof<P>)],
    ) -> Result<bool, PicklesError>;
}

/// Squeezes `zeta` and `rounds` challenges from a sponge digest. Anyone
/// holding the digest can recompute them.
pub fn expand_oracles<P: CycleCurve>(
    sponge_digest: [u8; 32],
    rounds: usize,
) -> Oracles<P::ScalarField> {
    let mut transcript = KeccakTranscript::from_state(b"pickles/oracles", sponge_digest);
    let zeta = transcript.challenge_scalar();
    let bulletproof_challenges = transcript.challenge_vector(rounds);
    Oracles {
        zeta,
        bulletproof_challenges,
        sponge_digest,
    }
}

impl<P: SWCurveConfig> Valid for RecursionChallenge<P> {
    fn check(&self) -> Result<(), SerializationError> {
        self.chals.check()?;
        self.comm.check()
    }
}

impl<P: SWCurveConfig> CanonicalDeserialize for RecursionChallenge<P> {
    fn deserialize_with_mode<R: Read>(
        mut reader: R,
        compress: Compress,
        validate: Validate,
    ) -> Result<Self, SerializationError> {
        let chals = deserialize_vec(&mut reader, compress, validate, SRS_LOG2)?;
        let comm = Affine::<P>::deserialize_with_mode(&mut reader, compress, validate)?;
        Ok(Self { chals, comm })
    }
}

impl<P: SWCurveConfig> Valid for VerifierIndex<P> {
    fn check(&self) -> Result<(), SerializationError> {
        self.cs.check()?;
        self.circuit_commitment.check()
    }
}

impl<P: SWCurveConfig> CanonicalDeserialize for VerifierIndex<P> {
    fn deserialize_with_mode<R: Read>(
        mut reader: R,
        compress: Compress,
        validate: Validate,
    ) -> Result<Self, SerializationError> {
        let index = Self {
            cs: ConstraintSystem::deserialize_with_mode(&mut reader, compress, validate)?,
            digest: <[u8; 32]>::deserialize_with_mode(&mut reader, compress, validate)?,
            num_public: u64::deserialize_with_mode(&mut reader, compress, validate)?,
            num_aux: u64::deserialize_with_mode(&mut reader, compress, validate)?,
            domain_log2: u8::deserialize_with_mode(&mut reader, compress, validate)?,
            circuit_commitment: Affine::<P>::deserialize_with_mode(&mut reader, compress, validate)?,
        };
        index
            .check_consistency()
            .map_err(|_| SerializationError::InvalidData)?;
        Ok(index)
    }
}

impl<P: SWCurveConfig> Valid for BackendProof<P> {
    fn check(&self) -> Result<(), SerializationError> {
        self.witness.check()?;
        self.witness_commitment.check()?;
        self.challenge_polynomial_commitment.check()?;
        self.prev_challenges.check()
    }
}

impl<P: SWCurveConfig> CanonicalDeserialize for BackendProof<P> {
    fn deserialize_with_mode<R: Read>(
        mut reader: R,
        compress: Compress,
        validate: Validate,
    ) -> Result<Self, SerializationError> {
        Ok(Self {
            witness: deserialize_vec(&mut reader, compress, validate, 1 << SRS_LOG2)?,
            witness_commitment: Affine::<P>::deserialize_with_mode(&mut reader, compress, validate)?,
            challenge_polynomial_commitment: Affine::<P>::deserialize_with_mode(
                &mut reader,
                compress,
                validate,
            )?,
            prev_challenges: deserialize_vec(&mut reader, compress, validate, MAX_PROOFS_VERIFIED)?,
        })
    }
}

impl<P: SWCurveConfig> Clone for RecursionChallenge<P> {
    fn clone(&self) -> Self {
        Self {
            chals: self.chals.clone(),
            comm: self.comm,
        }
    }
}

impl<P: SWCurveConfig> PartialEq for RecursionChallenge<P> {
    fn eq(&self, other: &Self) -> bool {
        self.chals == other.chals && self.comm == other.comm
    }
}

impl<P: SWCurveConfig> Eq for RecursionChallenge<P> {}

impl<P: SWCurveConfig> fmt::Debug for RecursionChallenge<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecursionChallenge")
            .field("rounds", &self.chals.len())
            .field("comm", &self.comm)
            .finish()
    }
}

impl<P: SWCurveConfig> Clone for VerifierIndex<P> {
    fn clone(&self) -> Self {
        Self {
            cs: self.cs.clone(),
            digest: self.digest,
            num_public: self.num_public,
            num_aux: self.num_aux,
            domain_log2: self.domain_log2,
            circuit_commitment: self.circuit_commitment,
        }
    }
}

impl<P: SWCurveConfig> PartialEq for VerifierIndex<P> {
    fn eq(&self, other: &Self) -> bool {
        self.cs == other.cs
            && self.digest == other.digest
            && self.num_public == other.num_public
            && self.num_aux == other.num_aux
            && self.domain_log2 == other.domain_log2
            && self.circuit_commitment == other.circuit_commitment
    }
}

impl<P: SWCurveConfig> Eq for VerifierIndex<P> {}

impl<P: SWCurveConfig> fmt::Debug for VerifierIndex<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerifierIndex")
            .field("digest", &hex::encode(self.digest))
            .field("num_public", &self.num_public)
            .field("num_aux", &self.num_aux)
            .field("domain_log2", &self.domain_log2)
            .finish()
    }
}

impl<P: SWCurveConfig> Clone for BackendProof<P> {
    fn clone(&self) -> Self {
        Self {
            witness: self.witness.clone(),
            witness_commitment: self.witness_commitment,
            challenge_polynomial_commitment: self.challenge_polynomial_commitment,
            prev_challenges: self.prev_challenges.clone(),
        }
    }
}

impl<P: SWCurveConfig> PartialEq for BackendProof<P> {
    fn eq(&self, other: &Self) -> bool {
        self.witness == other.witness
            && self.witness_commitment == other.witness_commitment
            && self.challenge_polynomial_commitment == other.challenge_polynomial_commitment
            && self.prev_challenges == other.prev_challenges
    }
}

impl<P: SWCurveConfig> Eq for BackendProof<P> {}

impl<P: SWCurveConfig> fmt::Debug for BackendProof<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendProof")
            .field("witness", &self.witness.len())
            .field("witness_commitment", &self.witness_commitment)
            .field(
                "challenge_polynomial_commitment",
                &self.challenge_polynomial_commitment,
            )
            .field("prev_challenges", &self.prev_challenges)
            .finish()
    }
}
