use std::any::Any;
use std::sync::Arc;

use super::{step, wrap, CompiledSystem};
use crate::curves::StepField;
use crate::proof::{Proof, Statement};
use crate::side_loaded::{SideLoadedKey, SideLoadedTag};
use crate::tag::TagId;
use crate::utils::deferred::Deferred;
use crate::utils::errors::PicklesError;

/// Everything one proving call consumes.
#[derive(Clone, Default)]
pub struct ProveRequest {
    pub input: Vec<StepField>,
    /// One `(statement, proof)` per predecessor slot, in order.
    pub previous: Vec<(Statement, Proof)>,
    pub private_inputs: Vec<StepField>,
    /// Keys for side-loaded slots. Keys for the same tag are consumed in
    /// registration order.
    pub side_loaded_keys: Vec<(TagId, SideLoadedKey)>,
    pub prover_data: Option<Arc<dyn Any + Send + Sync>>,
}

impl ProveRequest {
    pub fn new(input: Vec<StepField>) -> Self {
        Self {
            input,
            ..Default::default()
        }
    }

    pub fn with_previous(mut self, statement: Statement, proof: Proof) -> Self {
        self.previous.push((statement, proof));
        self
    }

    pub fn with_private_input(mut self, value: StepField) -> Self {
        self.private_inputs.push(value);
        self
    }

    pub fn with_private_inputs(mut self, values: impl IntoIterator<Item = StepField>) -> Self {
        self.private_inputs.extend(values);
        self
    }

    pub fn with_side_loaded_key(mut self, tag: &SideLoadedTag, key: SideLoadedKey) -> Self {
        self.side_loaded_keys.push((tag.id(), key));
        self
    }

    /// Opaque data `main` can read back with
    /// [`crate::rule::StepContext::prover_data`].
    pub fn with_prover_data<T: Any + Send + Sync>(mut self, data: T) -> Self {
        self.prover_data = Some(Arc::new(data));
        self
    }
}

impl std::fmt::Debug for ProveRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProveRequest")
            .field("input", &self.input)
            .field("previous", &self.previous.len())
            .field("private_inputs", &self.private_inputs.len())
            .field("side_loaded_keys", &self.side_loaded_keys.len())
            .field("prover_data", &self.prover_data.is_some())
            .finish()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProverOutput {
    pub statement: Statement,
    pub auxiliary_output: Option<Vec<StepField>>,
    pub proof: Proof,
}

/// Proves statements of one branch of a compiled system.
#[derive(Clone)]
pub struct Prover {
    system: Arc<CompiledSystem>,
    branch: usize,
}

impl Prover {
    pub(crate) fn new(system: Arc<CompiledSystem>, branch: usize) -> Self {
        Self { system, branch }
    }

    /// The rule this prover runs.
    pub fn identifier(&self) -> &str {
        &self.system.rules[self.branch].identifier
    }

    pub fn branch(&self) -> usize {
        self.branch
    }

    #[tracing::instrument(
        skip_all,
        name = "Prover::prove",
        fields(system = %self.system.tag, rule = self.identifier())
    )]
    pub fn prove_blocking(&self, request: &ProveRequest) -> Result<ProverOutput, PicklesError> {
        let step = step::prove(&self.system, self.branch, request)?;
        let proof = wrap::prove(&self.system, self.branch, &step)?;
        tracing::info!("proof created");
        Ok(ProverOutput {
            statement: step.statement,
            auxiliary_output: step.auxiliary_output,
            proof,
        })
    }

    /// Runs [`Self::prove_blocking`] on the blocking pool.
    pub async fn prove(&self, request: ProveRequest) -> Result<ProverOutput, PicklesError> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.prove_blocking(&request)).await?
    }

    /// Like [`Self::prove`] but the result can be awaited by several
    /// observers, and dropping one does not cancel proving.
    pub fn prove_shared(&self, request: ProveRequest) -> Deferred<ProverOutput> {
        let this = self.clone();
        Deferred::spawn_blocking(move || this.prove_blocking(&request))
    }
}

impl std::fmt::Debug for Prover {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Prover")
            .field("system", &self.system.tag)
            .field("rule", &self.identifier())
            .finish()
    }
}
