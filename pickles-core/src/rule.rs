//! Inductive rules and the context their `main` runs in.

use std::any::Any;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use crate::compiler::prover::ProveRequest;
use crate::curves::StepField;
use crate::proof::{Statement, StatementShape};
use crate::r1cs::builder::{Boolean, CircuitBuilder, FieldVar, SynthesisMode};
use crate::r1cs::constraint_system::LookupTable;
use crate::side_loaded::{SideLoadedKey, SideLoadedTag};
use crate::tag::{Tag, TagId};
use crate::utils::errors::PicklesError;

pub type Var = FieldVar<StepField>;

/// A predecessor slot: which proof system the rule recursively verifies.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Predecessor {
    Compiled(Tag),
    SideLoaded(SideLoadedTag),
}

impl Predecessor {
    pub fn statement(&self) -> StatementShape {
        match self {
            Predecessor::Compiled(tag) => tag.statement(),
            Predecessor::SideLoaded(tag) => tag.statement(),
        }
    }

    pub fn max_proofs_verified(&self) -> usize {
        match self {
            Predecessor::Compiled(tag) => tag.max_proofs_verified(),
            Predecessor::SideLoaded(tag) => tag.max_proofs_verified(),
        }
    }

    pub fn tag_id(&self) -> TagId {
        match self {
            Predecessor::Compiled(tag) => tag.id(),
            Predecessor::SideLoaded(tag) => tag.id(),
        }
    }
}

impl fmt::Display for Predecessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predecessor::Compiled(tag) => write!(f, "{tag}"),
            Predecessor::SideLoaded(tag) => write!(f, "side-loaded {tag}"),
        }
    }
}

impl From<&Tag> for Predecessor {
    fn from(tag: &Tag) -> Self {
        Predecessor::Compiled(tag.clone())
    }
}

impl From<&SideLoadedTag> for Predecessor {
    fn from(tag: &SideLoadedTag) -> Self {
        Predecessor::SideLoaded(tag.clone())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct FeatureFlags {
    /// Lets `main` use lookup tables.
    pub lookup: bool,
}

/// A statement inside the circuit.
#[derive(Clone, Debug)]
pub struct StatementVar {
    pub input: Vec<Var>,
    pub output: Vec<Var>,
}

impl StatementVar {
    pub fn flatten(&self) -> Vec<Var> {
        self.input.iter().chain(self.output.iter()).cloned().collect()
    }

    pub fn shape(&self) -> StatementShape {
        StatementShape::new(self.input.len(), self.output.len())
    }

    /// `None` unless every component has a value.
    pub fn value(&self) -> Option<Statement> {
        let collect = |vars: &[Var]| vars.iter().map(|v| v.value()).collect::<Option<Vec<_>>>();
        Some(Statement::new(collect(&self.input)?, collect(&self.output)?))
    }
}

/// Obligation to recursively verify one predecessor proof.
#[derive(Clone, Debug)]
pub struct PreviousProofStatement {
    pub public_input: StatementVar,
    pub proof_must_verify: Boolean<StepField>,
}

#[derive(Clone, Debug, Default)]
pub struct RuleOutput {
    /// One entry per declared predecessor, in order.
    pub previous_proof_statements: Vec<PreviousProofStatement>,
    pub public_output: Vec<Var>,
    /// Returned to the caller of `prove` but not part of the statement.
    pub auxiliary_output: Option<Vec<StepField>>,
}

impl RuleOutput {
    pub fn new(public_output: Vec<Var>) -> Self {
        Self {
            public_output,
            ..Default::default()
        }
    }

    pub fn with_previous(mut self, statement: StatementVar, must_verify: Boolean<StepField>) -> Self {
        self.previous_proof_statements.push(PreviousProofStatement {
            public_input: statement,
            proof_must_verify: must_verify,
        });
        self
    }

    pub fn with_auxiliary_output(mut self, values: Vec<StepField>) -> Self {
        self.auxiliary_output = Some(values);
        self
    }
}

type RuleMain =
    dyn Fn(&mut StepContext<'_>, &[Var]) -> Result<RuleOutput, PicklesError> + Send + Sync;

/// One branch of a proof system.
#[derive(Clone)]
pub struct InductiveRule {
    pub identifier: String,
    pub predecessors: Vec<Predecessor>,
    pub feature_flags: FeatureFlags,
    main: Arc<RuleMain>,
}

impl InductiveRule {
    pub fn new<F>(identifier: impl Into<String>, predecessors: Vec<Predecessor>, main: F) -> Self
    where
        F: Fn(&mut StepContext<'_>, &[Var]) -> Result<RuleOutput, PicklesError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            identifier: identifier.into(),
            predecessors,
            feature_flags: FeatureFlags::default(),
            main: Arc::new(main),
        }
    }

    pub fn with_feature_flags(mut self, feature_flags: FeatureFlags) -> Self {
        self.feature_flags = feature_flags;
        self
    }

    pub(crate) fn main(
        &self,
        ctx: &mut StepContext<'_>,
        input: &[Var],
    ) -> Result<RuleOutput, PicklesError> {
        (self.main)(ctx, input)
    }
}

impl fmt::Debug for InductiveRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InductiveRule")
            .field("identifier", &self.identifier)
            .field("predecessors", &self.predecessors)
            .field("feature_flags", &self.feature_flags)
            .finish()
    }
}

/// Key digest variable registered through [`StepContext::side_loaded_key`].
pub(crate) struct SideLoadedBinding {
    pub tag: TagId,
    pub var: Var,
    /// Present when proving.
    pub key: Option<SideLoadedKey>,
}

/// What `main` sees: the constraint builder plus access to prover-side
/// inputs. Outside of proving every accessor still allocates variables but
/// never reads the request.
pub struct StepContext<'a> {
    builder: CircuitBuilder<StepField>,
    predecessors: &'a [Predecessor],
    request: Option<&'a ProveRequest>,
    side_loaded: Vec<SideLoadedBinding>,
    consumed_keys: Vec<bool>,
}

impl<'a> StepContext<'a> {
    pub(crate) fn new(rule: &'a InductiveRule, request: Option<&'a ProveRequest>) -> Self {
        let mode = if request.is_some() {
            SynthesisMode::Prove
        } else {
            SynthesisMode::Setup
        };
        Self {
            builder: CircuitBuilder::new(mode).with_lookups(rule.feature_flags.lookup),
            predecessors: &rule.predecessors,
            request,
            side_loaded: vec![],
            consumed_keys: request
                .map(|r| vec![false; r.side_loaded_keys.len()])
                .unwrap_or_default(),
        }
    }

    fn request(&self) -> Result<&'a ProveRequest, PicklesError> {
        self.request
            .ok_or_else(|| PicklesError::Circuit("prover input read outside of proving".into()))
    }

    /// Allocates the statement of the predecessor in `slot` as witnesses,
    /// reading the value from the `(statement, proof)` pair passed to
    /// `prove`.
    pub fn previous_statement(&mut self, slot: usize) -> Result<StatementVar, PicklesError> {
        let shape = self
            .predecessors
            .get(slot)
            .map(|p| p.statement())
            .ok_or_else(|| {
                PicklesError::Circuit(format!("rule has no predecessor slot {slot}"))
            })?;
        let value = if self.is_proving() {
            let request = self.request()?;
            let (statement, _) = request.previous.get(slot).ok_or_else(|| {
                PicklesError::InvalidProverInput(format!("no previous proof for slot {slot}"))
            })?;
            statement
                .check_shape(shape)
                .map_err(|e| PicklesError::InvalidProverInput(e.to_string()))?;
            Some(statement.clone())
        } else {
            None
        };
        let input = (0..shape.input as usize)
            .map(|i| self.builder.exists(|| value.as_ref().map(|s| s.input[i]).unwrap_or_default()))
            .collect();
        let output = (0..shape.output as usize)
            .map(|i| self.builder.exists(|| value.as_ref().map(|s| s.output[i]).unwrap_or_default()))
            .collect();
        Ok(StatementVar { input, output })
    }

    /// Allocates private input `index` of the request.
    pub fn private_input(&mut self, index: usize) -> Result<Var, PicklesError> {
        let request = self.request;
        self.builder.try_exists(|| {
            request
                .and_then(|r| r.private_inputs.get(index).copied())
                .ok_or_else(|| {
                    PicklesError::InvalidProverInput(format!("missing private input {index}"))
                })
        })
    }

    /// Binds the key digest of the side-loaded `tag`. Each call consumes one
    /// key registered on the request for the same tag; the n-th binding of a
    /// tag serves its n-th predecessor slot.
    pub fn side_loaded_key(&mut self, tag: &SideLoadedTag) -> Result<Var, PicklesError> {
        let key = if self.is_proving() {
            let request = self.request()?;
            let position = request
                .side_loaded_keys
                .iter()
                .enumerate()
                .position(|(i, (id, _))| *id == tag.id() && !self.consumed_keys[i])
                .ok_or_else(|| {
                    PicklesError::SideLoadedBinding(format!(
                        "no key registered for {tag} on this proving call"
                    ))
                })?;
            self.consumed_keys[position] = true;
            let key = request.side_loaded_keys[position].1.clone();
            tag.admits(&key)?;
            Some(key)
        } else {
            None
        };
        let digest = key.as_ref().map(|k| k.digest()).transpose()?;
        let var = self.builder.exists(|| digest.unwrap_or_default());
        self.side_loaded.push(SideLoadedBinding {
            tag: tag.id(),
            var: var.clone(),
            key,
        });
        Ok(var)
    }

    /// Data attached to the request with [`ProveRequest::with_prover_data`].
    pub fn prover_data<T: Any + Send + Sync>(&self) -> Option<&'a T> {
        self.request?.prover_data.as_deref()?.downcast_ref::<T>()
    }

    pub fn assert_lookup(&mut self, value: &Var, table: LookupTable) -> Result<(), PicklesError> {
        self.builder.lookup(value, table)
    }

    /// Hands the key bindings made by `main` to the step circuit, which
    /// matches them to side-loaded predecessor slots.
    pub(crate) fn take_side_loaded(&mut self) -> Vec<SideLoadedBinding> {
        std::mem::take(&mut self.side_loaded)
    }

    /// Ends synthesis. Every key registered on the request must have been
    /// bound by `main`.
    pub(crate) fn into_builder(self) -> Result<CircuitBuilder<StepField>, PicklesError> {
        if let (Some(request), Some(unused)) = (
            self.request,
            self.consumed_keys.iter().position(|used| !used),
        ) {
            return Err(PicklesError::SideLoadedBinding(format!(
                "key registered for side-loaded tag {} was never bound in the circuit",
                request.side_loaded_keys[unused].0
            )));
        }
        Ok(self.builder)
    }
}

impl Deref for StepContext<'_> {
    type Target = CircuitBuilder<StepField>;

    fn deref(&self) -> &Self::Target {
        &self.builder
    }
}

impl DerefMut for StepContext<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.builder
    }
}
