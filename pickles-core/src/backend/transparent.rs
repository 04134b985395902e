//! A deterministic, transparent backend. Proofs carry the auxiliary witness
//! in the clear together with its SRS commitment and the accumulators of
//! the proofs they consumed. Verifiers check the constraint relation,
//! replay the transcript, and check the commitments and accumulators.
//! There is no zero knowledge.

use std::marker::PhantomData;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use super::accumulator::{batch_dlog_accumulator_check, challenge_polynomial_commitment};
use super::{
    expand_oracles, BackendProof, MsmChecks, Oracles, ProofSystem, ProverIndex,
    RecursionChallenge, VerifierIndex,
};
use crate::curves::{CycleCurve, SRS_LOG2};
use crate::r1cs::constraint_system::ConstraintSystem;
use crate::utils::errors::PicklesError;
use crate::utils::math::domain_log2;
use crate::utils::transcript::{KeccakTranscript, Transcript};

/// Smallest evaluation domain a circuit gets.
pub const MIN_DOMAIN_LOG2: usize = 4;

/// log2 of the domain the backend lays `cs` out on.
pub fn circuit_domain_log2<F: ark_ff::PrimeField>(cs: &ConstraintSystem<F>) -> usize {
    domain_log2(cs.rows().max(cs.num_vars()), MIN_DOMAIN_LOG2)
}

pub struct TransparentBackend<P: CycleCurve>(PhantomData<P>);

impl<P: CycleCurve> TransparentBackend<P> {
    fn transcript(
        index: &VerifierIndex<P>,
        public: &[P::ScalarField],
        proof: &BackendProof<P>,
    ) -> KeccakTranscript {
        let mut transcript = KeccakTranscript::new(b"pickles/transparent");
        transcript.append_message(P::NAME.as_bytes());
        transcript.append_bytes(&index.digest);
        transcript.append_u64(index.domain_log2 as u64);
        transcript.append_serializable(&index.circuit_commitment);
        transcript.append_scalars(public);
        transcript.append_u64(proof.witness.len() as u64);
        transcript.append_serializable(&proof.witness_commitment);
        transcript.append_u64(proof.prev_challenges.len() as u64);
        for prev in proof.prev_challenges.iter() {
            transcript.append_serializable(&prev.comm);
            transcript.append_scalars(&prev.chals);
        }
        transcript
    }

    fn check_prev_challenges(prev: &[RecursionChallenge<P>]) -> Result<(), PicklesError> {
        match prev.iter().find(|p| p.chals.len() > SRS_LOG2) {
            Some(p) => Err(PicklesError::ProofShape(format!(
                "previous accumulator has {} challenges",
                p.chals.len()
            ))),
            None => Ok(()),
        }
    }
}

impl<P: CycleCurve> ProofSystem<P> for TransparentBackend<P> {
    #[tracing::instrument(skip_all, name = "TransparentBackend::setup", fields(curve = P::NAME))]
    fn setup(cs: ConstraintSystem<P::ScalarField>) -> Result<ProverIndex<P>, PicklesError> {
        let log2 = circuit_domain_log2(&cs);
        if log2 > SRS_LOG2 {
            return Err(PicklesError::Configuration(format!(
                "circuit needs a domain of 2^{log2} rows, the SRS supports 2^{SRS_LOG2}"
            )));
        }
        let circuit_commitment = P::srs().commit(&cs.row_scalars())?;
        let verifier_index = VerifierIndex {
            digest: cs.digest(),
            num_public: cs.num_public as u64,
            num_aux: cs.num_aux as u64,
            domain_log2: log2 as u8,
            circuit_commitment,
            cs,
        };
        tracing::debug!(
            rows = verifier_index.cs.rows(),
            domain_log2 = log2,
            digest = %hex::encode(verifier_index.digest),
            "index created"
        );
        Ok(ProverIndex { verifier_index })
    }

    #[tracing::instrument(skip_all, name = "TransparentBackend::create", fields(curve = P::NAME))]
    fn create(
        index: &ProverIndex<P>,
        public: &[P::ScalarField],
        aux: &[P::ScalarField],
        prev_challenges: Vec<RecursionChallenge<P>>,
    ) -> Result<BackendProof<P>, PicklesError> {
        index.cs().is_satisfied(public, aux)?;
        Self::check_prev_challenges(&prev_challenges)?;
        let previous: Vec<_> = prev_challenges
            .iter()
            .map(|prev| (prev.comm, prev.chals.clone()))
            .collect();
        if !batch_dlog_accumulator_check::<P>(&previous)? {
            return Err(PicklesError::VerificationFailure(
                "previous accumulators do not verify".to_string(),
            ));
        }

        let assignment: Vec<P::ScalarField> = public.iter().chain(aux.iter()).copied().collect();
        let witness_commitment = P::srs().commit(&assignment)?;
        let mut proof = BackendProof {
            witness: aux.to_vec(),
            witness_commitment,
            challenge_polynomial_commitment: witness_commitment,
            prev_challenges,
        };
        let oracles = Self::oracles(&index.verifier_index, public, &proof)?;
        proof.challenge_polynomial_commitment =
            challenge_polynomial_commitment::<P>(&oracles.bulletproof_challenges)?;
        Ok(proof)
    }

    fn oracles(
        index: &VerifierIndex<P>,
        public: &[P::ScalarField],
        proof: &BackendProof<P>,
    ) -> Result<Oracles<P::ScalarField>, PicklesError> {
        if public.len() as u64 != index.num_public {
            return Err(PicklesError::ProofShape(format!(
                "public input has {} elements, index expects {}",
                public.len(),
                index.num_public
            )));
        }
        Self::check_prev_challenges(&proof.prev_challenges)?;
        let transcript = Self::transcript(index, public, proof);
        Ok(expand_oracles::<P>(
            transcript.state(),
            index.domain_log2 as usize,
        ))
    }

    fn verify_deferred(
        index: &VerifierIndex<P>,
        public: &[P::ScalarField],
        proof: &BackendProof<P>,
        checks: &mut MsmChecks<P>,
    ) -> Result<Oracles<P::ScalarField>, PicklesError> {
        let oracles = Self::oracles(index, public, proof)?;
        if proof.witness.len() as u64 != index.num_aux {
            return Err(PicklesError::ProofShape(format!(
                "witness has {} elements, index expects {}",
                proof.witness.len(),
                index.num_aux
            )));
        }
        if let Err(e) = index.cs.is_satisfied(public, &proof.witness) {
            return Err(PicklesError::VerificationFailure(e.to_string()));
        }

        let assignment = public.iter().chain(proof.witness.iter()).copied().collect();
        checks
            .commitments
            .push((proof.witness_commitment, assignment));
        checks.accumulators.push((
            proof.challenge_polynomial_commitment,
            oracles.bulletproof_challenges.clone(),
        ));
        for prev in proof.prev_challenges.iter() {
            checks.push_accumulator(prev);
        }
        Ok(oracles)
    }

    #[tracing::instrument(skip_all, name = "TransparentBackend::batch_verify", fields(curve = P::NAME, n = batch.len()))]
    fn batch_verify(
        index: &VerifierIndex<P>,
        batch: &[(&[P::ScalarField], &BackendProof<P>)],
    ) -> Result<bool, PicklesError> {
        #[cfg(feature = "parallel")]
        let deferred: Result<Vec<MsmChecks<P>>, PicklesError> = batch
            .par_iter()
            .map(|(public, proof)| {
                let mut checks = MsmChecks::default();
                Self::verify_deferred(index, public, proof, &mut checks).map(|_| checks)
            })
            .collect();
        #[cfg(not(feature = "parallel"))]
        let deferred: Result<Vec<MsmChecks<P>>, PicklesError> = batch
            .iter()
            .map(|(public, proof)| {
                let mut checks = MsmChecks::default();
                Self::verify_deferred(index, public, proof, &mut checks).map(|_| checks)
            })
            .collect();

        let deferred = match deferred {
            Ok(deferred) => deferred,
            Err(e) if e.is_rejection() => {
                tracing::debug!(reason = %e, "proof rejected");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };
        let mut checks = MsmChecks::default();
        for mut proof_checks in deferred {
            checks.append(&mut proof_checks);
        }
        checks.check()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curves::{StepConfig, StepField};
    use crate::r1cs::builder::{CircuitBuilder, SynthesisMode};

    type Backend = TransparentBackend<StepConfig>;

    fn product_circuit(
        mode: SynthesisMode,
        a: u64,
        b: u64,
    ) -> (ConstraintSystem<StepField>, Option<crate::r1cs::builder::Witness<StepField>>) {
        let mut cs = CircuitBuilder::new(mode);
        let a = cs.exists(|| StepField::from(a));
        let b = cs.exists(|| StepField::from(b));
        let c = cs.mul(&a, &b);
        cs.expose(&c);
        cs.finish().unwrap()
    }

    #[test]
    fn prove_and_verify() {
        let (cs, _) = product_circuit(SynthesisMode::Setup, 0, 0);
        let index = Backend::setup(cs).unwrap();
        let (_, witness) = product_circuit(SynthesisMode::Prove, 6, 7);
        let witness = witness.unwrap();
        let prev = vec![StepConfig::dummy_accumulator().clone()];
        let proof = Backend::create(&index, &witness.public, &witness.aux, prev).unwrap();

        let vi = &index.verifier_index;
        assert!(Backend::batch_verify(vi, &[(witness.public.as_slice(), &proof)]).unwrap());

        let wrong_public = vec![StepField::from(43u64)];
        assert!(!Backend::batch_verify(vi, &[(wrong_public.as_slice(), &proof)]).unwrap());
    }

    #[test]
    fn verifier_checks_the_relation() {
        let (cs, _) = product_circuit(SynthesisMode::Setup, 0, 0);
        let index = Backend::setup(cs).unwrap();
        let vi = &index.verifier_index;
        let (_, witness) = product_circuit(SynthesisMode::Prove, 6, 7);
        let witness = witness.unwrap();
        let honest = Backend::create(&index, &witness.public, &witness.aux, vec![]).unwrap();

        // 6 * 7 = 43, with the commitment and accumulator recomputed so
        // only the relation is wrong
        let public = vec![StepField::from(43u64)];
        let mut forged = honest.clone();
        let assignment: Vec<StepField> =
            public.iter().chain(forged.witness.iter()).copied().collect();
        forged.witness_commitment = StepConfig::srs().commit(&assignment).unwrap();
        let oracles = Backend::oracles(vi, &public, &forged).unwrap();
        forged.challenge_polynomial_commitment =
            challenge_polynomial_commitment::<StepConfig>(&oracles.bulletproof_challenges).unwrap();
        assert!(!Backend::batch_verify(vi, &[(public.as_slice(), &forged)]).unwrap());

        // Witness swapped after committing
        let mut swapped = honest.clone();
        swapped.witness[0] = StepField::from(42u64);
        assert!(!Backend::batch_verify(vi, &[(witness.public.as_slice(), &swapped)]).unwrap());

        let mut truncated = honest.clone();
        truncated.witness.pop();
        let mut checks = MsmChecks::default();
        assert!(matches!(
            Backend::verify_deferred(vi, &witness.public, &truncated, &mut checks),
            Err(PicklesError::ProofShape(_))
        ));
        assert!(checks.is_empty());
    }

    #[test]
    fn refuses_unsatisfied_witness() {
        let (cs, _) = product_circuit(SynthesisMode::Setup, 0, 0);
        let index = Backend::setup(cs).unwrap();
        let (_, witness) = product_circuit(SynthesisMode::Prove, 6, 7);
        let mut witness = witness.unwrap();
        witness.public[0] += StepField::from(1u64);
        assert!(matches!(
            Backend::create(&index, &witness.public, &witness.aux, vec![]),
            Err(PicklesError::Unsatisfied { .. })
        ));
    }

    #[test]
    fn refuses_invalid_previous_accumulator() {
        let (cs, _) = product_circuit(SynthesisMode::Setup, 0, 0);
        let index = Backend::setup(cs).unwrap();
        let (_, witness) = product_circuit(SynthesisMode::Prove, 6, 7);
        let witness = witness.unwrap();
        // Challenges no longer match the commitment
        let mut forged = StepConfig::dummy_accumulator().clone();
        forged.chals[0] += StepField::from(1u64);
        assert!(matches!(
            Backend::create(&index, &witness.public, &witness.aux, vec![forged]),
            Err(PicklesError::VerificationFailure(_))
        ));
    }

    #[test]
    fn oracles_are_reproducible_from_the_digest() {
        let (cs, _) = product_circuit(SynthesisMode::Setup, 0, 0);
        let index = Backend::setup(cs).unwrap();
        let (_, witness) = product_circuit(SynthesisMode::Prove, 2, 3);
        let witness = witness.unwrap();
        let proof = Backend::create(&index, &witness.public, &witness.aux, vec![]).unwrap();
        let oracles = Backend::oracles(&index.verifier_index, &witness.public, &proof).unwrap();
        let expanded = expand_oracles::<StepConfig>(
            oracles.sponge_digest,
            index.verifier_index.domain_log2 as usize,
        );
        assert_eq!(oracles, expanded);
    }
}
