//! The wrap circuit of a compiled system. It is shared by every branch and
//! re-exposes a step proof over the other curve.
//!
//! Public input layout is [`crate::verifier::wrap_public_input`]. The circuit
//! selects the branch with one-hot booleans, binds the branch data and step
//! circuit digest of the selected branch, carries the step statement digest
//! through, and pins challenges beyond the branch's domain to zero.

use ark_ff::{One, Zero};

use super::step::StepProof;
use super::CompiledSystem;
use crate::backend::ProofSystem;
use crate::curves::{wrap_field_from_digest, CycleCurve, StepField, WrapConfig, WrapField};
use crate::proof::{BranchData, DeferredValues, Proof, ProofState};
use crate::r1cs::builder::{Boolean, CircuitBuilder, FieldVar, SynthesisMode, Witness};
use crate::r1cs::constraint_system::ConstraintSystem;
use crate::utils::errors::PicklesError;
use crate::utils::math::convert_field;
use crate::verifier::{wrap_public_input, wrap_public_input_len, StepBackend, WrapBackend};

/// Position of the branch data in the wrap public input.
const BRANCH_DATA: usize = 5;
/// Position of the first step challenge.
const CHALLENGES: usize = 6;

/// What the wrap circuit is built from.
#[derive(Clone, Debug)]
pub(crate) struct WrapShape {
    pub branches: Vec<BranchData>,
    pub step_digests: Vec<[u8; 32]>,
    pub max_step_domain_log2: u8,
}

pub(crate) struct WrapWitness<'a> {
    pub branch: usize,
    pub public: &'a [WrapField],
    pub step_statement_digest: StepField,
}

pub(crate) fn synthesize(
    shape: &WrapShape,
    witness: Option<&WrapWitness<'_>>,
) -> Result<(ConstraintSystem<WrapField>, Option<Witness<WrapField>>), PicklesError> {
    let num_public = wrap_public_input_len(shape.max_step_domain_log2);
    if let Some(w) = witness {
        if w.public.len() != num_public || w.branch >= shape.branches.len() {
            return Err(PicklesError::Circuit(format!(
                "wrap witness for branch {} has {} public inputs, expected {num_public}",
                w.branch,
                w.public.len()
            )));
        }
    }
    let mode = match witness {
        Some(_) => SynthesisMode::Prove,
        None => SynthesisMode::Setup,
    };
    let mut cs = CircuitBuilder::<WrapField>::new(mode);
    let one = FieldVar::constant(WrapField::one());
    let zero = FieldVar::constant(WrapField::zero());

    let public: Vec<FieldVar<WrapField>> = (0..num_public)
        .map(|i| cs.public_input(|| witness.map(|w| w.public[i]).unwrap_or_default()))
        .collect();

    let selectors: Vec<Boolean<WrapField>> = (0..shape.branches.len())
        .map(|j| cs.boolean(|| witness.is_some_and(|w| w.branch == j)))
        .collect();
    let selected = cs.sum(selectors.iter().map(|b| b.var()));
    cs.constrain_eq(&selected, &one);

    let branch_data = cs.linear_combination(
        selectors
            .iter()
            .zip(shape.branches.iter())
            .map(|(b, data)| (b.var(), WrapField::from(data.packed()))),
    );
    cs.constrain_eq(&public[BRANCH_DATA], &branch_data);

    let step_key = cs.linear_combination(
        selectors
            .iter()
            .zip(shape.step_digests.iter())
            .map(|(b, digest)| (b.var(), wrap_field_from_digest(digest))),
    );
    let step_key_witness = cs.exists(|| {
        witness
            .map(|w| wrap_field_from_digest(&shape.step_digests[w.branch]))
            .unwrap_or_default()
    });
    cs.constrain_eq(&step_key_witness, &step_key);

    // Challenge k is padding for every branch whose domain is at most 2^k
    for k in 0..shape.max_step_domain_log2 as usize {
        let padded = cs.linear_combination(
            selectors
                .iter()
                .zip(shape.branches.iter())
                .filter(|(_, data)| data.domain_log2 as usize <= k)
                .map(|(b, _)| (b.var(), WrapField::one())),
        );
        cs.constrain_r1cs(&padded, &public[CHALLENGES + k], &zero);
    }

    let statement_digest = cs.exists(|| {
        witness
            .map(|w| convert_field(w.step_statement_digest))
            .unwrap_or_default()
    });
    cs.constrain_eq(&statement_digest, &public[0]);

    cs.finish()
}

/// Checks the step proof natively and wraps it.
#[tracing::instrument(skip_all, name = "wrap::prove", fields(branch))]
pub(crate) fn prove(
    system: &CompiledSystem,
    branch: usize,
    step: &StepProof,
) -> Result<Proof, PicklesError> {
    let step_index = &system.step_indices[branch].verifier_index;
    if !StepBackend::batch_verify(step_index, &[(step.public_input.as_slice(), &step.proof)])? {
        return Err(PicklesError::VerificationFailure(
            "step proof does not verify".to_string(),
        ));
    }
    let oracles = StepBackend::oracles(step_index, &step.public_input, &step.proof)?;

    let proof_state = ProofState {
        deferred_values: DeferredValues {
            zeta: oracles.zeta,
            bulletproof_challenges: oracles.bulletproof_challenges,
            branch_data: system.wrap_shape.branches[branch],
        },
        sponge_digest_before_evaluations: oracles.sponge_digest,
        challenge_polynomial_commitment: step.proof.challenge_polynomial_commitment,
    };
    let statement_digest = step
        .public_input
        .first()
        .copied()
        .ok_or_else(|| PicklesError::Circuit("step proof exposes no statement digest".into()))?;
    let public = wrap_public_input(
        system.wrap_shape.max_step_domain_log2,
        statement_digest,
        &proof_state,
    );

    let (cs, witness) = synthesize(
        &system.wrap_shape,
        Some(&WrapWitness {
            branch,
            public: &public,
            step_statement_digest: statement_digest,
        }),
    )?;
    if cs.digest() != system.wrap_index.verifier_index.digest {
        return Err(PicklesError::Circuit(
            "wrap circuit differs from the compiled one".to_string(),
        ));
    }
    let witness =
        witness.ok_or_else(|| PicklesError::Circuit("wrap synthesis produced no witness".into()))?;

    let max_proofs_verified = system.tag.max_proofs_verified();
    let mut prev_challenges = step.wrap_accumulators.clone();
    prev_challenges.resize(max_proofs_verified, WrapConfig::dummy_accumulator().clone());
    let wrap_proof =
        WrapBackend::create(&system.wrap_index, &witness.public, &witness.aux, prev_challenges)?;

    Ok(Proof {
        max_proofs_verified: max_proofs_verified as u8,
        proof_state,
        step_public_input: step.public_input.clone(),
        step_proof: step.proof.clone(),
        previous: step.previous.clone(),
        wrap_proof,
    })
}
