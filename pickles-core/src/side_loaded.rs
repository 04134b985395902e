//! Side-loaded verification: a rule declares a predecessor slot by shape and
//! width bounds only, and the concrete verification key is supplied when
//! proving.

use std::fmt;
use std::sync::Arc;

use ark_serialize::{
    CanonicalDeserialize, CanonicalSerialize, Compress, Read, SerializationError, Valid, Validate,
};

use crate::backend::VerifierIndex;
use crate::curves::{step_field_from_digest, StepConfig, StepField, WrapConfig};
use crate::keys::verification_key::deserialize_slots;
use crate::keys::PredecessorKey;
use crate::proof::{BranchData, Proof, Statement, StatementShape};
use crate::serializable::{deserialize_vec, Serializable};
use crate::tag::{Tag, TagId};
use crate::utils::errors::PicklesError;
use crate::utils::transcript::keccak_digest;
use crate::verifier::{verify_batch, KeyView};

/// Upper bound on the number of branches a side-loaded key may describe.
pub const MAX_SIDE_LOADED_BRANCHES: usize = 8;

struct SideLoadedTagInner {
    id: TagId,
    name: String,
    statement: StatementShape,
    max_proofs_verified: usize,
}

/// Declares the bounds every key bound to this slot must respect.
#[derive(Clone)]
pub struct SideLoadedTag {
    inner: Arc<SideLoadedTagInner>,
}

impl SideLoadedTag {
    pub fn create(
        name: impl Into<String>,
        statement: StatementShape,
        max_proofs_verified: usize,
    ) -> Self {
        Self {
            inner: Arc::new(SideLoadedTagInner {
                id: TagId::fresh(),
                name: name.into(),
                statement,
                max_proofs_verified,
            }),
        }
    }

    pub fn id(&self) -> TagId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn statement(&self) -> StatementShape {
        self.inner.statement
    }

    pub fn max_proofs_verified(&self) -> usize {
        self.inner.max_proofs_verified
    }

    /// Checks that `key` fits the declared bounds.
    pub fn admits(&self, key: &SideLoadedKey) -> Result<(), PicklesError> {
        if key.statement != self.statement() {
            return Err(PicklesError::SideLoadedBinding(format!(
                "key statement {:?} does not match {:?} declared by {self}",
                key.statement,
                self.statement()
            )));
        }
        if key.max_proofs_verified as usize > self.max_proofs_verified() {
            return Err(PicklesError::SideLoadedBinding(format!(
                "key verifies up to {} proofs, {self} allows {}",
                key.max_proofs_verified,
                self.max_proofs_verified()
            )));
        }
        key.check_bounds()
            .map_err(|e| PicklesError::SideLoadedBinding(e.to_string()))
    }
}

impl PartialEq for SideLoadedTag {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for SideLoadedTag {}

impl std::hash::Hash for SideLoadedTag {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id().hash(state)
    }
}

impl fmt::Display for SideLoadedTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.name(), self.id())
    }
}

impl fmt::Debug for SideLoadedTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SideLoadedTag")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("statement", &self.statement())
            .field("max_proofs_verified", &self.max_proofs_verified())
            .finish()
    }
}

/// Verification key detached from its compiled system, suitable for
/// shipping to provers of other systems.
#[derive(Clone, Debug, PartialEq, Eq, CanonicalSerialize)]
pub struct SideLoadedKey {
    pub max_proofs_verified: u8,
    pub branches: Vec<BranchData>,
    pub step_indices: Vec<VerifierIndex<StepConfig>>,
    pub slots: Vec<Vec<PredecessorKey>>,
    pub statement: StatementShape,
    pub max_step_domain_log2: u8,
    pub wrap_index: VerifierIndex<WrapConfig>,
}

impl SideLoadedKey {
    /// Extracts the side-loadable part of a compiled tag's key.
    pub fn of_compiled(tag: &Tag) -> Result<Self, PicklesError> {
        let vk = tag.verification_key()?;
        let key = Self {
            max_proofs_verified: vk.max_proofs_verified() as u8,
            branches: vk.branches().to_vec(),
            step_indices: vk.step_indices().to_vec(),
            slots: vk.slots().to_vec(),
            statement: vk.statement(),
            max_step_domain_log2: vk.max_step_domain_log2(),
            wrap_index: vk.wrap_index().clone(),
        };
        key.check_bounds()
            .map_err(|e| PicklesError::configuration(format!("{tag} cannot be side-loaded: {e}")))?;
        Ok(key)
    }

    pub(crate) fn check_bounds(&self) -> Result<(), PicklesError> {
        if self.branches.is_empty() || self.branches.len() > MAX_SIDE_LOADED_BRANCHES {
            return Err(PicklesError::ProofShape(format!(
                "{} branches, side-loaded keys support 1 to {MAX_SIDE_LOADED_BRANCHES}",
                self.branches.len()
            )));
        }
        self.view().check()
    }

    /// The value a step circuit binds for this key. It commits to the whole
    /// key, predecessor slots included.
    pub fn digest(&self) -> Result<StepField, PicklesError> {
        let bytes = self.to_bytes()?;
        Ok(step_field_from_digest(&keccak_digest(
            b"pickles/side-loaded-key",
            &[bytes.as_slice()],
        )))
    }

    pub(crate) fn view(&self) -> KeyView<'_> {
        KeyView {
            max_proofs_verified: self.max_proofs_verified as usize,
            statement: self.statement,
            branches: &self.branches,
            step_indices: &self.step_indices,
            slots: &self.slots,
            max_step_domain_log2: self.max_step_domain_log2,
            wrap_index: &self.wrap_index,
        }
    }
}

impl Serializable for SideLoadedKey {}

impl Valid for SideLoadedKey {
    fn check(&self) -> Result<(), SerializationError> {
        self.branches.check()?;
        self.step_indices.check()?;
        self.slots.check()?;
        self.wrap_index.check()
    }
}

impl CanonicalDeserialize for SideLoadedKey {
    fn deserialize_with_mode<R: Read>(
        mut reader: R,
        compress: Compress,
        validate: Validate,
    ) -> Result<Self, SerializationError> {
        let max_proofs_verified = u8::deserialize_with_mode(&mut reader, compress, validate)?;
        let branches: Vec<BranchData> =
            deserialize_vec(&mut reader, compress, validate, MAX_SIDE_LOADED_BRANCHES)?;
        let step_indices = deserialize_vec(&mut reader, compress, validate, branches.len())?;
        let slots = deserialize_slots(&mut reader, compress, validate, branches.len())?;
        Ok(Self {
            max_proofs_verified,
            branches,
            step_indices,
            slots,
            statement: StatementShape::deserialize_with_mode(&mut reader, compress, validate)?,
            max_step_domain_log2: u8::deserialize_with_mode(&mut reader, compress, validate)?,
            wrap_index: VerifierIndex::deserialize_with_mode(&mut reader, compress, validate)?,
        })
    }
}

/// Verifies proofs against keys supplied at verification time, with the
/// same checks as the compiled verifier. Keys failing their bounds reject
/// the batch.
pub fn verify_blocking(batch: &[(SideLoadedKey, Statement, Proof)]) -> Result<bool, PicklesError> {
    if let Some(err) = batch.iter().find_map(|(key, _, _)| key.check_bounds().err()) {
        tracing::debug!(reason = %err, "side-loaded key rejected");
        return Ok(false);
    }
    let items: Vec<_> = batch
        .iter()
        .map(|(key, statement, proof)| (key.view(), statement, proof))
        .collect();
    verify_batch(&items)
}

pub async fn verify(batch: Vec<(SideLoadedKey, Statement, Proof)>) -> Result<bool, PicklesError> {
    tokio::task::spawn_blocking(move || verify_blocking(&batch)).await?
}
