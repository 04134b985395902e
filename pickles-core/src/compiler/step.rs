//! The step circuit of a rule: the rule's own logic plus, per predecessor
//! slot, the partial verification of the predecessor's wrap proof.
//!
//! Public input layout: `[s, pred_0, .., pred_{n-1}]`, where `s` is the
//! sponge digest of `input ‖ output` and `pred_i` hashes the i-th
//! predecessor statement, its accumulator digest, the slot's `must_verify`
//! bit and the key digest. For side-loaded slots the key digest is the
//! variable `main` bound.

use ark_ff::Zero;

use super::prover::ProveRequest;
use super::CompiledSystem;
use crate::backend::{BackendProof, ProofSystem, RecursionChallenge};
use crate::curves::{CycleCurve, StepConfig, StepField, WrapConfig};
use crate::proof::{PreviousProof, Proof, Statement, StatementShape};
use crate::r1cs::constraint_system::ConstraintSystem;
use crate::r1cs::sponge::{hash_gadget, step_params};
use crate::rule::{InductiveRule, Predecessor, SideLoadedBinding, StepContext, Var};
use crate::utils::errors::PicklesError;
use crate::verifier::{
    accumulator_digest, compiled_key_digest, partial_verify, PendingChecks, StepBackend,
};

/// Accumulators one predecessor slot hands on.
pub(crate) struct SlotAccumulators {
    pub step: RecursionChallenge<StepConfig>,
    pub wrap: RecursionChallenge<WrapConfig>,
}

impl SlotAccumulators {
    fn dummy() -> Self {
        Self {
            step: StepConfig::dummy_accumulator().clone(),
            wrap: WrapConfig::dummy_accumulator().clone(),
        }
    }
}

pub(crate) struct StepSynthesis {
    pub cs: ConstraintSystem<StepField>,
    /// Prove mode only.
    pub proving: Option<StepWitness>,
}

pub(crate) struct StepWitness {
    pub statement: Statement,
    pub auxiliary_output: Option<Vec<StepField>>,
    pub public: Vec<StepField>,
    pub aux: Vec<StepField>,
    pub slots: Vec<SlotAccumulators>,
    pub previous: Vec<PreviousProof>,
}

/// Result of the step half of proving.
pub(crate) struct StepProof {
    pub statement: Statement,
    pub auxiliary_output: Option<Vec<StepField>>,
    pub public_input: Vec<StepField>,
    pub proof: BackendProof<StepConfig>,
    /// Wrap accumulators of the predecessors, one per slot.
    pub wrap_accumulators: Vec<RecursionChallenge<WrapConfig>>,
    pub previous: Vec<PreviousProof>,
}

/// Outcome of checking one predecessor natively while proving.
struct SlotCheck {
    acc_digest: StepField,
    key_digest: StepField,
    accumulators: SlotAccumulators,
    previous: PreviousProof,
}

/// Fully verifies the predecessor in `slot` when it must verify. Otherwise
/// the proof is only digested and the slot hands on dummy accumulators.
fn check_slot(
    slot: usize,
    predecessor: &Predecessor,
    binding: Option<&SideLoadedBinding>,
    statement: &Statement,
    proof: &Proof,
    must_verify: bool,
) -> Result<SlotCheck, PicklesError> {
    let side_loaded = binding.and_then(|b| b.key.as_ref());
    let acc_digest = accumulator_digest(proof)?;
    if !must_verify {
        let key_digest = match side_loaded {
            Some(key) => key.digest()?,
            None => StepField::zero(),
        };
        return Ok(SlotCheck {
            acc_digest,
            key_digest,
            accumulators: SlotAccumulators::dummy(),
            previous: PreviousProof::Skipped {
                statement: statement.clone(),
                accumulator_digest: acc_digest,
                key_digest,
            },
        });
    }

    let mut checks = PendingChecks::default();
    let (accumulators, key_digest, key) = match predecessor {
        Predecessor::Compiled(tag) => {
            let key = tag.verification_key()?;
            let accumulators = partial_verify(&key.view(), statement, proof, &mut checks)?;
            (accumulators, compiled_key_digest(key.wrap_index()), None)
        }
        Predecessor::SideLoaded(tag) => {
            let key = side_loaded.ok_or_else(|| {
                PicklesError::SideLoadedBinding(format!("slot {slot} for {tag} has no key"))
            })?;
            let accumulators = partial_verify(&key.view(), statement, proof, &mut checks)?;
            (accumulators, key.digest()?, Some(key.clone()))
        }
    };
    if !checks.check()? {
        return Err(PicklesError::VerificationFailure(format!(
            "slot {slot}: predecessor accumulators do not verify"
        )));
    }
    Ok(SlotCheck {
        acc_digest,
        key_digest,
        accumulators: SlotAccumulators {
            step: accumulators.step,
            wrap: accumulators.wrap,
        },
        previous: PreviousProof::Verified {
            statement: statement.clone(),
            key,
            proof: Box::new(proof.clone()),
        },
    })
}

/// Matches the key bindings `main` made to the side-loaded slots: the n-th
/// binding of a tag serves the n-th slot declaring that tag.
fn assign_bindings(
    predecessors: &[Predecessor],
    mut bindings: Vec<SideLoadedBinding>,
) -> Result<Vec<Option<SideLoadedBinding>>, PicklesError> {
    let mut assigned = Vec::with_capacity(predecessors.len());
    for (slot, predecessor) in predecessors.iter().enumerate() {
        match predecessor {
            Predecessor::Compiled(_) => assigned.push(None),
            Predecessor::SideLoaded(tag) => {
                let position = bindings
                    .iter()
                    .position(|b| b.tag == tag.id())
                    .ok_or_else(|| {
                        PicklesError::SideLoadedBinding(format!(
                            "slot {slot} expects a key for {tag}, main bound none"
                        ))
                    })?;
                assigned.push(Some(bindings.remove(position)));
            }
        }
    }
    if let Some(extra) = bindings.first() {
        return Err(PicklesError::SideLoadedBinding(format!(
            "main bound a key for tag {} with no matching predecessor slot",
            extra.tag
        )));
    }
    Ok(assigned)
}

fn arity_error(rule: &InductiveRule, what: &str, got: usize, expected: usize) -> PicklesError {
    PicklesError::configuration(format!(
        "rule {} returned {got} {what}, expected {expected}",
        rule.identifier
    ))
}

/// Runs `rule` to build its step circuit. With a request the witness is
/// produced as well.
pub(crate) fn synthesize(
    shape: StatementShape,
    rule: &InductiveRule,
    request: Option<&ProveRequest>,
) -> Result<StepSynthesis, PicklesError> {
    if let Some(request) = request {
        if request.input.len() != shape.input as usize {
            return Err(PicklesError::InvalidProverInput(format!(
                "{} public inputs, the system takes {}",
                request.input.len(),
                shape.input
            )));
        }
        if request.previous.len() != rule.predecessors.len() {
            return Err(PicklesError::InvalidProverInput(format!(
                "{} previous proofs for {} predecessor slots",
                request.previous.len(),
                rule.predecessors.len()
            )));
        }
    }

    let mut ctx = StepContext::new(rule, request);
    let input: Vec<Var> = (0..shape.input as usize)
        .map(|i| ctx.exists(|| request.map(|r| r.input[i]).unwrap_or_default()))
        .collect();

    let output = rule.main(&mut ctx, &input)?;
    if output.public_output.len() != shape.output as usize {
        return Err(arity_error(rule, "outputs", output.public_output.len(), shape.output as usize));
    }
    if output.previous_proof_statements.len() != rule.predecessors.len() {
        return Err(arity_error(
            rule,
            "previous proof statements",
            output.previous_proof_statements.len(),
            rule.predecessors.len(),
        ));
    }
    for (slot, (previous, predecessor)) in output
        .previous_proof_statements
        .iter()
        .zip(rule.predecessors.iter())
        .enumerate()
    {
        if previous.public_input.shape() != predecessor.statement() {
            return Err(PicklesError::configuration(format!(
                "rule {} slot {slot}: statement shape {:?} does not match {predecessor}",
                rule.identifier,
                previous.public_input.shape()
            )));
        }
    }

    let bindings = ctx.take_side_loaded();
    let bindings = assign_bindings(&rule.predecessors, bindings)?;

    let mut predecessor_digests = Vec::with_capacity(rule.predecessors.len());
    let mut slots = Vec::with_capacity(rule.predecessors.len());
    let mut previous_proofs = Vec::with_capacity(rule.predecessors.len());
    for (slot, ((previous, predecessor), binding)) in output
        .previous_proof_statements
        .iter()
        .zip(rule.predecessors.iter())
        .zip(bindings.iter())
        .enumerate()
    {
        let check = match request {
            Some(request) => {
                let statement = previous.public_input.value().ok_or_else(|| {
                    PicklesError::Circuit(format!("slot {slot} statement has no value"))
                })?;
                let must_verify = previous.proof_must_verify.value().unwrap_or(true);
                let (_, proof) = &request.previous[slot];
                Some(check_slot(
                    slot,
                    predecessor,
                    binding.as_ref(),
                    &statement,
                    proof,
                    must_verify,
                )?)
            }
            None => None,
        };

        let acc = ctx.exists(|| check.as_ref().map(|c| c.acc_digest).unwrap_or_default());
        let key = match binding {
            Some(binding) => binding.var.clone(),
            None => ctx.exists(|| check.as_ref().map(|c| c.key_digest).unwrap_or_default()),
        };
        let mut preimage = previous.public_input.flatten();
        preimage.push(acc);
        preimage.push(previous.proof_must_verify.var().clone());
        preimage.push(key);
        predecessor_digests.push(hash_gadget(&mut *ctx, step_params(), &preimage));

        if let Some(check) = check {
            slots.push(check.accumulators);
            previous_proofs.push(check.previous);
        }
    }

    let statement_vars: Vec<Var> = input.iter().chain(output.public_output.iter()).cloned().collect();
    let s = hash_gadget(&mut *ctx, step_params(), &statement_vars);
    ctx.expose(&s);
    for digest in predecessor_digests.iter() {
        ctx.expose(digest);
    }

    let statement = request
        .map(|r| {
            output
                .public_output
                .iter()
                .map(|v| v.value())
                .collect::<Option<Vec<_>>>()
                .map(|out| Statement::new(r.input.clone(), out))
                .ok_or_else(|| PicklesError::Circuit("public output has no value".to_string()))
        })
        .transpose()?;

    let (cs, witness) = ctx.into_builder()?.finish()?;
    let proving = match (statement, witness) {
        (Some(statement), Some(witness)) => Some(StepWitness {
            statement,
            auxiliary_output: output.auxiliary_output,
            public: witness.public,
            aux: witness.aux,
            slots,
            previous: previous_proofs,
        }),
        _ => None,
    };
    Ok(StepSynthesis { cs, proving })
}

/// Synthesizes the witness for `branch` and proves the step circuit.
#[tracing::instrument(skip_all, name = "step::prove", fields(branch))]
pub(crate) fn prove(
    system: &CompiledSystem,
    branch: usize,
    request: &ProveRequest,
) -> Result<StepProof, PicklesError> {
    let rule = &system.rules[branch];
    let index = &system.step_indices[branch];
    let synthesis = synthesize(system.tag.statement(), rule, Some(request))?;
    if synthesis.cs != *index.cs() {
        return Err(PicklesError::Circuit(format!(
            "rule {} built a different circuit while proving than at compile time",
            rule.identifier
        )));
    }
    let witness = synthesis
        .proving
        .ok_or_else(|| PicklesError::Circuit("step synthesis produced no witness".to_string()))?;

    let (step_accumulators, wrap_accumulators): (Vec<_>, Vec<_>) = witness
        .slots
        .into_iter()
        .map(|slot| (slot.step, slot.wrap))
        .unzip();
    let proof = StepBackend::create(index, &witness.public, &witness.aux, step_accumulators)?;
    Ok(StepProof {
        statement: witness.statement,
        auxiliary_output: witness.auxiliary_output,
        public_input: witness.public,
        proof,
        wrap_accumulators,
        previous: witness.previous,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ark_ff::One;
    use crate::r1cs::builder::Boolean;
    use crate::r1cs::sponge::hash;
    use crate::rule::RuleOutput;
    use crate::side_loaded::SideLoadedTag;
    use crate::tag::Tag;

    fn add_one() -> InductiveRule {
        InductiveRule::new("add-one", vec![], |ctx, input| {
            let one = ctx.constant(StepField::one());
            let out = ctx.add(&input[0], &one);
            Ok(RuleOutput::new(vec![out]))
        })
    }

    #[test]
    fn base_case_exposes_the_statement_digest() {
        let shape = StatementShape::new(1, 1);
        let rule = add_one();
        let setup = synthesize(shape, &rule, None).unwrap();
        assert!(setup.proving.is_none());
        assert_eq!(setup.cs.num_public, 1);

        let request = ProveRequest::new(vec![StepField::from(41u64)]);
        let proving = synthesize(shape, &rule, Some(&request)).unwrap();
        assert_eq!(proving.cs.digest(), setup.cs.digest());
        let witness = proving.proving.unwrap();
        assert_eq!(witness.statement.output, vec![StepField::from(42u64)]);
        assert_eq!(
            witness.public,
            vec![hash(step_params(), &witness.statement.flatten())]
        );
        assert!(proving.cs.is_satisfied(&witness.public, &witness.aux).is_ok());
    }

    #[test]
    fn wrong_output_arity_is_a_configuration_error() {
        let rule = InductiveRule::new("empty", vec![], |_, _| Ok(RuleOutput::new(vec![])));
        assert!(matches!(
            synthesize(StatementShape::new(0, 1), &rule, None),
            Err(PicklesError::Configuration(_))
        ));
    }

    #[test]
    fn prover_input_is_checked_against_the_shape() {
        let request = ProveRequest::new(vec![]);
        assert!(matches!(
            synthesize(StatementShape::new(1, 1), &add_one(), Some(&request)),
            Err(PicklesError::InvalidProverInput(_))
        ));
    }

    #[test]
    fn side_loaded_slot_needs_a_binding() {
        let side = SideLoadedTag::create("side", StatementShape::new(1, 0), 1);
        let predecessor = Predecessor::from(&side);
        let rule = InductiveRule::new("unbound", vec![predecessor], |ctx, _| {
            let previous = ctx.previous_statement(0)?;
            let must = Boolean::constant(true);
            Ok(RuleOutput::new(vec![]).with_previous(previous, must))
        });
        assert!(matches!(
            synthesize(StatementShape::new(0, 0), &rule, None),
            Err(PicklesError::SideLoadedBinding(_))
        ));
    }

    #[test]
    fn predecessor_slots_add_public_inputs() {
        let inner = Tag::create("inner", StatementShape::new(1, 0), 0, 1);
        let rule = InductiveRule::new("outer", vec![Predecessor::from(&inner)], |ctx, _| {
            let previous = ctx.previous_statement(0)?;
            let must = ctx.boolean(|| false);
            Ok(RuleOutput::new(vec![]).with_previous(previous, must))
        });
        let setup = synthesize(StatementShape::new(0, 0), &rule, None).unwrap();
        assert_eq!(setup.cs.num_public, 2);
    }
}
