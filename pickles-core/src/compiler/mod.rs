//! Compilation of a tag's inductive rules into step and wrap circuits, their
//! keys, a verifier and one prover per rule.

use std::collections::HashSet;
use std::sync::Arc;

use futures_util::future::try_join_all;
use itertools::Itertools;

use crate::backend::transparent::circuit_domain_log2;
use crate::backend::{ProofSystem, ProverIndex};
use crate::curves::{StepConfig, WrapConfig, SRS_LOG2};
use crate::keys::{
    CacheHandle, KeyCache, KeyData, KeyId, KeyKind, PredecessorKey, VerificationKey,
};
use crate::proof::BranchData;
use crate::rule::InductiveRule;
use crate::tag::Tag;
use crate::utils::errors::PicklesError;
use crate::verifier::{StepBackend, Verifier, WrapBackend};

pub(crate) mod dummy;
pub mod prover;
pub(crate) mod step;
pub(crate) mod wrap;

pub use dummy::dummy_statement;
use prover::Prover;
use wrap::WrapShape;

/// Largest number of predecessors any rule may verify.
pub const MAX_PROOFS_VERIFIED: usize = 2;

#[derive(Clone, Default)]
pub struct CompileConfig {
    pub cache: KeyCache,
    /// When set, compilation fails unless it derives exactly these key ids
    /// (step keys in rule order, then the wrap key).
    pub expected_key_ids: Option<Vec<KeyId>>,
}

impl CompileConfig {
    pub fn new(cache: KeyCache) -> Self {
        Self {
            cache,
            expected_key_ids: None,
        }
    }

    pub fn with_expected_key_ids(mut self, ids: Vec<KeyId>) -> Self {
        self.expected_key_ids = Some(ids);
        self
    }
}

/// Everything proving needs, shared by the provers of one system.
pub(crate) struct CompiledSystem {
    pub tag: Tag,
    pub rules: Vec<InductiveRule>,
    pub step_indices: Vec<Arc<ProverIndex<StepConfig>>>,
    pub wrap_index: Arc<ProverIndex<WrapConfig>>,
    pub wrap_shape: WrapShape,
}

pub struct Compiled {
    pub tag: Tag,
    pub cache_handle: CacheHandle,
    pub verifier: Verifier,
    /// One per rule, in rule order.
    pub provers: Vec<Prover>,
}

impl Compiled {
    pub fn prover(&self, identifier: &str) -> Option<&Prover> {
        self.provers.iter().find(|p| p.identifier() == identifier)
    }
}

impl std::fmt::Debug for Compiled {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compiled")
            .field("tag", &self.tag)
            .field("cache_handle", &self.cache_handle)
            .field("provers", &self.provers)
            .finish()
    }
}

fn validate(tag: &Tag, rules: &[InductiveRule]) -> Result<(), PicklesError> {
    if tag.is_compiled() {
        return Err(PicklesError::configuration(format!("{tag} is already compiled")));
    }
    if rules.is_empty() {
        return Err(PicklesError::configuration(format!("{tag} has no rules")));
    }
    if rules.len() != tag.branches() {
        return Err(PicklesError::configuration(format!(
            "{tag} declares {} branches, got {} rules",
            tag.branches(),
            rules.len()
        )));
    }
    if tag.max_proofs_verified() > MAX_PROOFS_VERIFIED {
        return Err(PicklesError::configuration(format!(
            "{tag} verifies up to {} proofs, the limit is {MAX_PROOFS_VERIFIED}",
            tag.max_proofs_verified()
        )));
    }
    let mut identifiers = HashSet::new();
    for rule in rules {
        if !identifiers.insert(rule.identifier.as_str()) {
            return Err(PicklesError::configuration(format!(
                "duplicate rule identifier {}",
                rule.identifier
            )));
        }
        if rule.predecessors.len() > tag.max_proofs_verified() {
            return Err(PicklesError::configuration(format!(
                "rule {} has {} predecessors, {tag} verifies at most {}",
                rule.identifier,
                rule.predecessors.len(),
                tag.max_proofs_verified()
            )));
        }
        if let Some(p) = rule
            .predecessors
            .iter()
            .find(|p| p.max_proofs_verified() > MAX_PROOFS_VERIFIED)
        {
            return Err(PicklesError::configuration(format!(
                "predecessor {p} of rule {} verifies too many proofs",
                rule.identifier
            )));
        }
    }
    Ok(())
}

fn check_domain(label: &str, log2: usize) -> Result<u8, PicklesError> {
    if log2 > SRS_LOG2 {
        return Err(PicklesError::configuration(format!(
            "{label} needs a domain of 2^{log2} rows, the SRS supports 2^{SRS_LOG2}"
        )));
    }
    Ok(log2 as u8)
}

/// Compiles `rules` for `tag`. Keys are looked up in the configured cache
/// and generated only on a miss. On success the tag becomes usable as a
/// predecessor of other systems.
#[tracing::instrument(skip_all, name = "compile", fields(tag = %tag))]
pub async fn compile(
    tag: &Tag,
    config: CompileConfig,
    rules: Vec<InductiveRule>,
) -> Result<Compiled, PicklesError> {
    validate(tag, &rules)?;

    let shape = tag.statement();
    let setup_rules = rules.clone();
    let step_circuits = tokio::task::spawn_blocking(move || {
        setup_rules
            .iter()
            .map(|rule| step::synthesize(shape, rule, None).map(|s| s.cs))
            .collect::<Result<Vec<_>, PicklesError>>()
    })
    .await??;

    let mut branches = Vec::with_capacity(rules.len());
    let mut step_ids = Vec::with_capacity(rules.len());
    for (rule, cs) in rules.iter().zip(step_circuits.iter()) {
        let label = format!("{}-{}", tag.name(), rule.identifier);
        let domain_log2 = check_domain(&label, circuit_domain_log2(cs))?;
        tracing::debug!(rule = %rule.identifier, rows = cs.rows(), domain_log2, "step circuit");
        branches.push(BranchData {
            proofs_verified: rule.predecessors.len() as u8,
            domain_log2,
        });
        step_ids.push(KeyId::new(KeyKind::Step, label, cs.digest()));
    }

    let wrap_shape = WrapShape {
        branches: branches.clone(),
        step_digests: step_ids.iter().map(|id| *id.digest()).collect(),
        max_step_domain_log2: branches.iter().map(|b| b.domain_log2).max().unwrap_or_default(),
    };
    let (wrap_cs, _) = wrap::synthesize(&wrap_shape, None)?;
    check_domain(tag.name(), circuit_domain_log2(&wrap_cs))?;
    let wrap_id = KeyId::new(KeyKind::Wrap, tag.name(), wrap_cs.digest());

    if let Some(expected) = config.expected_key_ids.as_ref() {
        let derived: Vec<KeyId> = step_ids.iter().chain([&wrap_id]).cloned().collect();
        if *expected != derived {
            return Err(PicklesError::KeyMismatch {
                expected: expected.iter().join(", "),
                actual: derived.iter().join(", "),
            });
        }
    }

    let step_loads = step_ids
        .iter()
        .cloned()
        .zip(step_circuits)
        .map(|(id, cs)| config.cache.load(id, move || StepBackend::setup(cs)));
    let wrap_load = config
        .cache
        .load(wrap_id.clone(), move || WrapBackend::setup(wrap_cs));
    let (step_keys, (wrap_index, wrap_dirty)) =
        futures_util::try_join!(try_join_all(step_loads), wrap_load)?;

    let mut cache_handle = CacheHandle::default();
    let mut step_indices = Vec::with_capacity(step_keys.len());
    for (id, (index, dirty)) in step_ids.into_iter().zip(step_keys) {
        cache_handle.push(id, dirty);
        step_indices.push(index);
    }
    cache_handle.push(wrap_id, wrap_dirty);

    let key = VerificationKey::new(KeyData {
        name: tag.name().to_string(),
        max_proofs_verified: tag.max_proofs_verified() as u8,
        statement: tag.statement(),
        branches: wrap_shape.branches.clone(),
        step_indices: step_indices
            .iter()
            .map(|index| index.verifier_index.clone())
            .collect(),
        slots: rules
            .iter()
            .map(|rule| {
                rule.predecessors
                    .iter()
                    .map(|p| PredecessorKey::for_slot(tag, p))
                    .collect()
            })
            .collect(),
        max_step_domain_log2: wrap_shape.max_step_domain_log2,
        wrap_index: wrap_index.verifier_index.clone(),
    });
    tag.set_compiled(key.clone())?;
    tracing::info!(key = %key.id(), dirty = ?cache_handle.dirty(), "compiled");

    let system = Arc::new(CompiledSystem {
        tag: tag.clone(),
        rules,
        step_indices,
        wrap_index,
        wrap_shape,
    });
    let provers = (0..system.rules.len())
        .map(|branch| Prover::new(system.clone(), branch))
        .collect();
    Ok(Compiled {
        tag: tag.clone(),
        cache_handle,
        verifier: Verifier::new(key),
        provers,
    })
}

/// [`compile`] on a runtime of its own, for callers outside of async code.
pub fn compile_blocking(
    tag: &Tag,
    config: CompileConfig,
    rules: Vec<InductiveRule>,
) -> Result<Compiled, PicklesError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| PicklesError::Task(e.to_string()))?;
    runtime.block_on(compile(tag, config, rules))
}
