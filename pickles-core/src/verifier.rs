//! Batched verification of wrapped proofs.
//!
//! Per proof the verifier checks shape, re-derives the deferred step values
//! from the sponge digest, re-verifies the step proof and the wrap proof,
//! and walks the predecessor slots of the step proof, recursing into every
//! predecessor that had to verify. The MSMs of every proof in the batch are
//! then checked at once, one combined check per curve.

use ark_ff::{One, Zero};
#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::backend::transparent::TransparentBackend;
use crate::backend::{expand_oracles, MsmChecks, ProofSystem, RecursionChallenge, VerifierIndex};
use crate::curves::{
    step_field_from_digest, wrap_field_from_digest, StepAffine, StepConfig, StepField, WrapConfig,
    WrapField,
};
use crate::keys::{PredecessorKey, VerificationKey};
use crate::proof::{BranchData, PreviousProof, Proof, ProofState, Statement, StatementShape};
use crate::r1cs::sponge;
use crate::serializable::Serializable;
use crate::utils::deferred::Deferred;
use crate::utils::errors::PicklesError;
use crate::utils::math::convert_field;
use crate::utils::transcript::keccak_digest;

pub(crate) type StepBackend = TransparentBackend<StepConfig>;
pub(crate) type WrapBackend = TransparentBackend<WrapConfig>;

/// The parts of a compiled or side-loaded key the verifier reads.
#[derive(Clone, Copy)]
pub(crate) struct KeyView<'a> {
    pub max_proofs_verified: usize,
    pub statement: StatementShape,
    pub branches: &'a [BranchData],
    pub step_indices: &'a [VerifierIndex<StepConfig>],
    pub slots: &'a [Vec<PredecessorKey>],
    pub max_step_domain_log2: u8,
    pub wrap_index: &'a VerifierIndex<WrapConfig>,
}

impl KeyView<'_> {
    /// Checks that the per-branch parts of the key line up.
    pub fn check(&self) -> Result<(), PicklesError> {
        let n = self.branches.len();
        if n == 0 || self.step_indices.len() != n || self.slots.len() != n {
            return Err(PicklesError::ProofShape(format!(
                "key has {n} branches, {} step indices and {} slot lists",
                self.step_indices.len(),
                self.slots.len()
            )));
        }
        for (j, ((branch, index), slots)) in self
            .branches
            .iter()
            .zip(self.step_indices.iter())
            .zip(self.slots.iter())
            .enumerate()
        {
            let width = branch.proofs_verified as usize;
            if width > self.max_proofs_verified
                || slots.len() != width
                || index.num_public != 1 + width as u64
                || index.domain_log2 != branch.domain_log2
                || branch.domain_log2 > self.max_step_domain_log2
            {
                return Err(PicklesError::ProofShape(format!(
                    "branch {j} does not match its step index"
                )));
            }
        }
        if self.wrap_index.num_public != wrap_public_input_len(self.max_step_domain_log2) as u64 {
            return Err(PicklesError::ProofShape(
                "wrap index does not match the step domains".to_string(),
            ));
        }
        Ok(())
    }
}

/// Accumulators a verified proof hands on to its consumer.
pub(crate) struct Accumulators {
    /// Step-curve accumulator from the proof state.
    pub step: RecursionChallenge<StepConfig>,
    /// The wrap proof's own accumulator.
    pub wrap: RecursionChallenge<WrapConfig>,
}

/// MSMs postponed while verifying, on both curves.
#[derive(Default)]
pub(crate) struct PendingChecks {
    pub step: MsmChecks<StepConfig>,
    pub wrap: MsmChecks<WrapConfig>,
}

impl PendingChecks {
    pub fn append(&mut self, other: &mut Self) {
        self.step.append(&mut other.step);
        self.wrap.append(&mut other.wrap);
    }

    /// Malformed claims count as a failed check.
    pub fn check(&self) -> Result<bool, PicklesError> {
        Ok(reject_as_false(self.wrap.check())? && reject_as_false(self.step.check())?)
    }
}

/// Digest of a statement as the step circuit exposes it.
pub(crate) fn statement_digest(statement: &Statement) -> StepField {
    sponge::hash(sponge::step_params(), &statement.flatten())
}

fn coordinates(point: &StepAffine) -> (WrapField, WrapField) {
    if point.infinity {
        (WrapField::zero(), WrapField::zero())
    } else {
        (convert_field(point.x), convert_field(point.y))
    }
}

/// Public input of the wrap circuit:
/// `[s, sg.x, sg.y, zeta, sponge_digest, branch_data, chal_0 .. chal_{K-1}]`.
pub(crate) fn wrap_public_input(
    max_step_domain_log2: u8,
    statement_digest: StepField,
    state: &ProofState,
) -> Vec<WrapField> {
    let deferred = &state.deferred_values;
    let (x, y) = coordinates(&state.challenge_polynomial_commitment);
    let mut public = vec![
        convert_field(statement_digest),
        x,
        y,
        convert_field(deferred.zeta),
        wrap_field_from_digest(&state.sponge_digest_before_evaluations),
        WrapField::from(deferred.branch_data.packed()),
    ];
    let k = max_step_domain_log2 as usize;
    public.extend(
        deferred
            .bulletproof_challenges
            .iter()
            .map(|c| convert_field::<StepField, WrapField>(*c))
            .chain(std::iter::repeat(WrapField::zero()))
            .take(k),
    );
    public
}

/// Number of wrap public inputs for a key whose largest step domain is
/// `2^max_step_domain_log2`.
pub(crate) fn wrap_public_input_len(max_step_domain_log2: u8) -> usize {
    6 + max_step_domain_log2 as usize
}

fn check_shape(view: &KeyView<'_>, statement: &Statement, proof: &Proof) -> Result<(), PicklesError> {
    statement.check_shape(view.statement)?;
    if proof.max_proofs_verified as usize != view.max_proofs_verified {
        return Err(PicklesError::ProofShape(format!(
            "proof verifies {} predecessors, key expects {}",
            proof.max_proofs_verified, view.max_proofs_verified
        )));
    }
    if proof.wrap_proof.prev_challenges.len() != view.max_proofs_verified {
        return Err(PicklesError::ProofShape(format!(
            "proof carries {} accumulators, key expects {}",
            proof.wrap_proof.prev_challenges.len(),
            view.max_proofs_verified
        )));
    }
    let deferred = &proof.proof_state.deferred_values;
    if !view.branches.contains(&deferred.branch_data) {
        return Err(PicklesError::ProofShape(format!(
            "branch data {:?} is not one of the key's branches",
            deferred.branch_data
        )));
    }
    if deferred.bulletproof_challenges.len() != deferred.branch_data.domain_log2 as usize {
        return Err(PicklesError::ProofShape(format!(
            "{} step challenges for a domain of 2^{}",
            deferred.bulletproof_challenges.len(),
            deferred.branch_data.domain_log2
        )));
    }
    Ok(())
}

fn check_deferred_values(proof: &Proof) -> Result<(), PicklesError> {
    let state = &proof.proof_state;
    let deferred = &state.deferred_values;
    let expected = expand_oracles::<StepConfig>(
        state.sponge_digest_before_evaluations,
        deferred.branch_data.domain_log2 as usize,
    );
    if expected.zeta != deferred.zeta
        || expected.bulletproof_challenges != deferred.bulletproof_challenges
    {
        return Err(PicklesError::VerificationFailure(
            "deferred values do not match the sponge digest".to_string(),
        ));
    }
    Ok(())
}

/// Digest a step circuit binds for a predecessor proof.
pub(crate) fn accumulator_digest(proof: &Proof) -> Result<StepField, PicklesError> {
    let bytes = proof.to_bytes()?;
    Ok(step_field_from_digest(&keccak_digest(
        b"pickles/accumulator",
        &[bytes.as_slice()],
    )))
}

/// Key digest a step circuit binds for a compiled predecessor.
pub(crate) fn compiled_key_digest(wrap_index: &VerifierIndex<WrapConfig>) -> StepField {
    step_field_from_digest(&wrap_index.digest)
}

/// `pred_i` of a step public input.
pub(crate) fn predecessor_digest(
    statement: &Statement,
    accumulator_digest: StepField,
    must_verify: bool,
    key_digest: StepField,
) -> StepField {
    let mut preimage = statement.flatten();
    preimage.push(accumulator_digest);
    preimage.push(if must_verify {
        StepField::one()
    } else {
        StepField::zero()
    });
    preimage.push(key_digest);
    sponge::hash(sponge::step_params(), &preimage)
}

/// Branch whose step index produced the proof's sponge digest.
fn find_branch(view: &KeyView<'_>, proof: &Proof) -> Result<usize, PicklesError> {
    let state = &proof.proof_state;
    view.branches
        .iter()
        .enumerate()
        .filter(|(_, data)| **data == state.deferred_values.branch_data)
        .map(|(j, _)| j)
        .find(|j| {
            StepBackend::oracles(&view.step_indices[*j], &proof.step_public_input, &proof.step_proof)
                .is_ok_and(|o| o.sponge_digest == state.sponge_digest_before_evaluations)
        })
        .ok_or_else(|| {
            PicklesError::VerificationFailure(
                "step proof does not belong to any branch of the key".to_string(),
            )
        })
}

/// Checks the proof behind predecessor slot `slot` of `branch` and returns
/// the `pred_i` it implies.
fn check_previous(
    view: &KeyView<'_>,
    branch: usize,
    slot: usize,
    previous: &PreviousProof,
    checks: &mut PendingChecks,
) -> Result<StepField, PicklesError> {
    let (statement, key, proof) = match previous {
        PreviousProof::Skipped {
            statement,
            accumulator_digest,
            key_digest,
        } => {
            return Ok(predecessor_digest(
                statement,
                *accumulator_digest,
                false,
                *key_digest,
            ))
        }
        PreviousProof::Verified {
            statement,
            key,
            proof,
        } => (statement, key, proof),
    };

    let key_digest = match (&view.slots[branch][slot], key) {
        (PredecessorKey::Own, None) => {
            partial_verify(view, statement, proof, checks)?;
            compiled_key_digest(view.wrap_index)
        }
        (PredecessorKey::Compiled(key), None) => {
            partial_verify(&key.view(), statement, proof, checks)?;
            compiled_key_digest(key.wrap_index())
        }
        (PredecessorKey::Pending { name, tag }, None) => {
            let key = tag
                .as_ref()
                .ok_or_else(|| PicklesError::TagNotCompiled(name.clone()))?
                .verification_key()?;
            partial_verify(&key.view(), statement, proof, checks)?;
            compiled_key_digest(key.wrap_index())
        }
        (
            PredecessorKey::SideLoaded {
                statement: shape,
                max_proofs_verified,
            },
            Some(key),
        ) => {
            if key.statement != *shape || key.max_proofs_verified > *max_proofs_verified {
                return Err(PicklesError::ProofShape(format!(
                    "slot {slot} carries a key outside its bounds"
                )));
            }
            key.check_bounds()?;
            partial_verify(&key.view(), statement, proof, checks)?;
            key.digest()?
        }
        (_, key) => {
            return Err(PicklesError::ProofShape(format!(
                "slot {slot} {} a side-loaded key",
                if key.is_some() { "carries" } else { "lacks" }
            )))
        }
    };
    Ok(predecessor_digest(
        statement,
        accumulator_digest(proof)?,
        true,
        key_digest,
    ))
}

/// Everything except the MSMs, which are recorded in `checks`. This is the
/// work a step circuit does for a predecessor; the returned accumulators are
/// what it defers.
pub(crate) fn partial_verify(
    view: &KeyView<'_>,
    statement: &Statement,
    proof: &Proof,
    checks: &mut PendingChecks,
) -> Result<Accumulators, PicklesError> {
    check_shape(view, statement, proof)?;
    check_deferred_values(proof)?;

    let state = &proof.proof_state;
    let branch = find_branch(view, proof)?;
    StepBackend::verify_deferred(
        &view.step_indices[branch],
        &proof.step_public_input,
        &proof.step_proof,
        &mut checks.step,
    )?;
    let digest = statement_digest(statement);
    if proof.step_public_input.first() != Some(&digest) {
        return Err(PicklesError::VerificationFailure(
            "step proof is about another statement".to_string(),
        ));
    }
    if proof.step_proof.challenge_polynomial_commitment != state.challenge_polynomial_commitment {
        return Err(PicklesError::VerificationFailure(
            "proof state does not carry the step accumulator".to_string(),
        ));
    }

    let public = wrap_public_input(view.max_step_domain_log2, digest, state);
    let oracles = WrapBackend::verify_deferred(
        view.wrap_index,
        &public,
        &proof.wrap_proof,
        &mut checks.wrap,
    )?;

    if proof.previous.len() != view.slots[branch].len() {
        return Err(PicklesError::ProofShape(format!(
            "{} predecessor entries for {} slots",
            proof.previous.len(),
            view.slots[branch].len()
        )));
    }
    for (slot, previous) in proof.previous.iter().enumerate() {
        let expected = check_previous(view, branch, slot, previous, checks)?;
        if proof.step_public_input.get(1 + slot) != Some(&expected) {
            return Err(PicklesError::VerificationFailure(format!(
                "predecessor {slot} does not match the step public input"
            )));
        }
    }

    Ok(Accumulators {
        step: RecursionChallenge {
            chals: state.deferred_values.bulletproof_challenges.clone(),
            comm: state.challenge_polynomial_commitment,
        },
        wrap: RecursionChallenge {
            chals: oracles.bulletproof_challenges,
            comm: proof.wrap_proof.challenge_polynomial_commitment,
        },
    })
}

/// Verifies every `(key, statement, proof)` triple and all of their deferred
/// MSMs. Bad proofs yield `Ok(false)`; errors are reserved for failures
/// unrelated to the proofs themselves.
#[tracing::instrument(skip_all, name = "verify_batch", fields(n = items.len()))]
pub(crate) fn verify_batch(items: &[(KeyView<'_>, &Statement, &Proof)]) -> Result<bool, PicklesError> {
    #[cfg(feature = "parallel")]
    let partials: Vec<Result<PendingChecks, PicklesError>> = items.par_iter().map(verify_one).collect();
    #[cfg(not(feature = "parallel"))]
    let partials: Vec<Result<PendingChecks, PicklesError>> = items.iter().map(verify_one).collect();

    let mut checks = PendingChecks::default();
    for partial in partials {
        match partial {
            Ok(mut proof_checks) => checks.append(&mut proof_checks),
            Err(e) if e.is_rejection() => {
                tracing::debug!(reason = %e, "proof rejected");
                return Ok(false);
            }
            Err(e) => return Err(e),
        }
    }
    checks.check()
}

fn verify_one(
    (view, statement, proof): &(KeyView<'_>, &Statement, &Proof),
) -> Result<PendingChecks, PicklesError> {
    let mut checks = PendingChecks::default();
    partial_verify(view, statement, proof, &mut checks).map(|_| checks)
}

fn reject_as_false(result: Result<bool, PicklesError>) -> Result<bool, PicklesError> {
    match result {
        Err(e) if e.is_rejection() => {
            tracing::debug!(reason = %e, "accumulator rejected");
            Ok(false)
        }
        other => other,
    }
}

/// Verifier for one compiled proof system.
#[derive(Clone, Debug)]
pub struct Verifier {
    key: VerificationKey,
}

impl Verifier {
    pub fn new(key: VerificationKey) -> Self {
        Self { key }
    }

    pub fn key(&self) -> &VerificationKey {
        &self.key
    }

    /// One boolean for the whole batch. An empty batch is accepted.
    pub fn verify_blocking(&self, batch: &[(Statement, Proof)]) -> Result<bool, PicklesError> {
        let view = self.key.view();
        let items: Vec<_> = batch
            .iter()
            .map(|(statement, proof)| (view, statement, proof))
            .collect();
        verify_batch(&items)
    }

    pub async fn verify(&self, batch: Vec<(Statement, Proof)>) -> Result<bool, PicklesError> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.verify_blocking(&batch)).await?
    }

    /// Like [`Self::verify`] but every clone of the handle observes the same
    /// run, and dropping a clone does not cancel it.
    pub fn verify_shared(&self, batch: Vec<(Statement, Proof)>) -> Deferred<bool> {
        let this = self.clone();
        Deferred::spawn_blocking(move || this.verify_blocking(&batch))
    }

    /// Verifies each element on its own. Unlike [`Self::verify`], accumulators
    /// are not batched across elements, so the result pinpoints which proofs
    /// fail.
    pub fn verify_each(&self, batch: &[(Statement, Proof)]) -> Vec<Result<(), PicklesError>> {
        let view = self.key.view();
        batch
            .iter()
            .map(|(statement, proof)| match verify_batch(&[(view, statement, proof)]) {
                Ok(true) => Ok(()),
                Ok(false) => partial_verify(&view, statement, proof, &mut PendingChecks::default())
                    .and(Err(PicklesError::VerificationFailure(
                        "accumulator check failed".to_string(),
                    ))),
                Err(e) => Err(e),
            })
            .collect()
    }
}
