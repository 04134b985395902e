//! Placeholder proofs for predecessor slots that are not required to verify.

use ark_ec::AffineRepr;
use ark_ff::Zero;

use crate::backend::BackendProof;
use crate::curves::{CycleCurve, StepAffine, StepConfig, StepField, WrapAffine, WrapConfig};
use crate::proof::{BranchData, DeferredValues, Proof, ProofState, Statement, StatementShape};

/// A proof with the shape of a real one for `branch` whose accumulators are
/// the fixed dummies. Its deferred values do not match its sponge digest and
/// it carries no witness, so it never passes verification.
pub(crate) fn dummy_proof(max_proofs_verified: usize, branch: BranchData) -> Proof {
    let step = StepConfig::dummy_accumulator();
    let wrap = WrapConfig::dummy_accumulator();
    let mut chals = step.chals.clone();
    chals.resize(branch.domain_log2 as usize, StepField::zero());
    Proof {
        max_proofs_verified: max_proofs_verified as u8,
        proof_state: ProofState {
            deferred_values: DeferredValues {
                zeta: StepField::zero(),
                bulletproof_challenges: chals,
                branch_data: branch,
            },
            sponge_digest_before_evaluations: [0u8; 32],
            challenge_polynomial_commitment: step.comm,
        },
        step_public_input: vec![StepField::zero(); 1 + branch.proofs_verified as usize],
        step_proof: BackendProof {
            witness: vec![],
            witness_commitment: StepAffine::generator(),
            challenge_polynomial_commitment: step.comm,
            prev_challenges: vec![step.clone(); branch.proofs_verified as usize],
        },
        previous: vec![],
        wrap_proof: BackendProof {
            witness: vec![],
            witness_commitment: WrapAffine::generator(),
            challenge_polynomial_commitment: wrap.comm,
            prev_challenges: vec![wrap.clone(); max_proofs_verified],
        },
    }
}

/// The all-zero statement of `shape`, paired with dummy proofs.
pub fn dummy_statement(shape: StatementShape) -> Statement {
    Statement::new(
        vec![StepField::zero(); shape.input as usize],
        vec![StepField::zero(); shape.output as usize],
    )
}
