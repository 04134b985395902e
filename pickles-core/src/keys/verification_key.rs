use std::sync::{Arc, OnceLock};

use ark_serialize::{
    CanonicalDeserialize, CanonicalSerialize, Compress, Read, SerializationError, Valid, Validate,
    Write,
};

use super::{KeyId, KeyKind};
use crate::backend::VerifierIndex;
use crate::compiler::dummy::dummy_proof;
use crate::compiler::MAX_PROOFS_VERIFIED;
use crate::curves::{StepConfig, WrapConfig};
use crate::proof::{BranchData, Proof, StatementShape};
use crate::serializable::{deserialize_string, deserialize_vec, nested, Serializable};
use crate::rule::Predecessor;
use crate::tag::Tag;
use crate::verifier::KeyView;

/// Longest system name a decoder accepts.
const MAX_NAME_LEN: usize = 1 << 12;

#[derive(CanonicalSerialize)]
pub(crate) struct KeyData {
    pub name: String,
    pub max_proofs_verified: u8,
    pub statement: StatementShape,
    pub branches: Vec<BranchData>,
    /// Step verifier index of each branch.
    pub step_indices: Vec<VerifierIndex<StepConfig>>,
    /// Per branch, the key each predecessor slot is verified against.
    pub slots: Vec<Vec<PredecessorKey>>,
    pub max_step_domain_log2: u8,
    pub wrap_index: VerifierIndex<WrapConfig>,
}

/// The key a predecessor slot's proofs are verified against.
#[derive(Clone, Debug)]
pub enum PredecessorKey {
    /// The key this slot belongs to.
    Own,
    /// A system compiled before this one.
    Compiled(VerificationKey),
    /// A system that was not compiled yet when this one was. Resolved
    /// through its tag at verification time; a decoded key only knows the
    /// name and cannot verify proofs that recurse through this slot.
    Pending { name: String, tag: Option<Tag> },
    /// Keys travel with each proof and must fit these bounds.
    SideLoaded {
        statement: StatementShape,
        max_proofs_verified: u8,
    },
}

impl PredecessorKey {
    /// Slot key for `predecessor` of a rule of `own`.
    pub(crate) fn for_slot(own: &Tag, predecessor: &Predecessor) -> Self {
        match predecessor {
            Predecessor::Compiled(tag) if tag == own => PredecessorKey::Own,
            Predecessor::Compiled(tag) => match tag.verification_key() {
                Ok(key) => PredecessorKey::Compiled(key),
                Err(_) => PredecessorKey::Pending {
                    name: tag.name().to_string(),
                    tag: Some(tag.clone()),
                },
            },
            Predecessor::SideLoaded(tag) => PredecessorKey::SideLoaded {
                statement: tag.statement(),
                max_proofs_verified: tag.max_proofs_verified() as u8,
            },
        }
    }
}

impl PartialEq for PredecessorKey {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (PredecessorKey::Own, PredecessorKey::Own) => true,
            (PredecessorKey::Compiled(a), PredecessorKey::Compiled(b)) => a == b,
            (PredecessorKey::Pending { name: a, .. }, PredecessorKey::Pending { name: b, .. }) => {
                a == b
            }
            (
                PredecessorKey::SideLoaded {
                    statement: a,
                    max_proofs_verified: m,
                },
                PredecessorKey::SideLoaded {
                    statement: b,
                    max_proofs_verified: n,
                },
            ) => a == b && m == n,
            _ => false,
        }
    }
}

impl Eq for PredecessorKey {}

const OWN: u8 = 0;
const COMPILED: u8 = 1;
const PENDING: u8 = 2;
const SIDE_LOADED: u8 = 3;

impl CanonicalSerialize for PredecessorKey {
    fn serialize_with_mode<W: Write>(
        &self,
        mut writer: W,
        compress: Compress,
    ) -> Result<(), SerializationError> {
        match self {
            PredecessorKey::Own => OWN.serialize_with_mode(writer, compress),
            PredecessorKey::Compiled(key) => {
                COMPILED.serialize_with_mode(&mut writer, compress)?;
                key.serialize_with_mode(&mut writer as &mut dyn Write, compress)
            }
            PredecessorKey::Pending { name, .. } => {
                PENDING.serialize_with_mode(&mut writer, compress)?;
                name.serialize_with_mode(writer, compress)
            }
            PredecessorKey::SideLoaded {
                statement,
                max_proofs_verified,
            } => {
                SIDE_LOADED.serialize_with_mode(&mut writer, compress)?;
                statement.serialize_with_mode(&mut writer, compress)?;
                max_proofs_verified.serialize_with_mode(writer, compress)
            }
        }
    }

    fn serialized_size(&self, compress: Compress) -> usize {
        1 + match self {
            PredecessorKey::Own => 0,
            PredecessorKey::Compiled(key) => key.serialized_size(compress),
            PredecessorKey::Pending { name, .. } => name.serialized_size(compress),
            PredecessorKey::SideLoaded { statement, .. } => statement.serialized_size(compress) + 1,
        }
    }
}

impl Valid for PredecessorKey {
    fn check(&self) -> Result<(), SerializationError> {
        match self {
            PredecessorKey::Compiled(key) => key.check(),
            _ => Ok(()),
        }
    }
}

impl CanonicalDeserialize for PredecessorKey {
    fn deserialize_with_mode<R: Read>(
        mut reader: R,
        compress: Compress,
        validate: Validate,
    ) -> Result<Self, SerializationError> {
        match u8::deserialize_with_mode(&mut reader, compress, validate)? {
            OWN => Ok(PredecessorKey::Own),
            COMPILED => Ok(PredecessorKey::Compiled(nested(|| {
                VerificationKey::deserialize_with_mode(&mut reader as &mut dyn Read, compress, validate)
            })?)),
            PENDING => Ok(PredecessorKey::Pending {
                name: deserialize_string(&mut reader, compress, validate, MAX_NAME_LEN)?,
                tag: None,
            }),
            SIDE_LOADED => Ok(PredecessorKey::SideLoaded {
                statement: StatementShape::deserialize_with_mode(&mut reader, compress, validate)?,
                max_proofs_verified: u8::deserialize_with_mode(&mut reader, compress, validate)?,
            }),
            _ => Err(SerializationError::InvalidData),
        }
    }
}

/// Decodes per-branch slot keys, at most `branches` of them.
pub(crate) fn deserialize_slots<R: Read>(
    mut reader: R,
    compress: Compress,
    validate: Validate,
    branches: usize,
) -> Result<Vec<Vec<PredecessorKey>>, SerializationError> {
    let len = u64::deserialize_with_mode(&mut reader, compress, validate)?;
    if len > branches as u64 {
        return Err(SerializationError::InvalidData);
    }
    (0..len)
        .map(|_| deserialize_vec(&mut reader, compress, validate, MAX_PROOFS_VERIFIED))
        .collect()
}

impl Valid for KeyData {
    fn check(&self) -> Result<(), SerializationError> {
        self.branches.check()?;
        self.step_indices.check()?;
        self.slots.check()?;
        self.wrap_index.check()
    }
}

impl CanonicalDeserialize for KeyData {
    fn deserialize_with_mode<R: Read>(
        mut reader: R,
        compress: Compress,
        validate: Validate,
    ) -> Result<Self, SerializationError> {
        let name = deserialize_string(&mut reader, compress, validate, MAX_NAME_LEN)?;
        let max_proofs_verified = u8::deserialize_with_mode(&mut reader, compress, validate)?;
        let statement = StatementShape::deserialize_with_mode(&mut reader, compress, validate)?;
        let branches: Vec<BranchData> =
            deserialize_vec(&mut reader, compress, validate, usize::MAX)?;
        let step_indices = deserialize_vec(&mut reader, compress, validate, branches.len())?;
        let slots = deserialize_slots(&mut reader, compress, validate, branches.len())?;
        Ok(Self {
            name,
            max_proofs_verified,
            statement,
            branches,
            step_indices,
            slots,
            max_step_domain_log2: u8::deserialize_with_mode(&mut reader, compress, validate)?,
            wrap_index: VerifierIndex::deserialize_with_mode(&mut reader, compress, validate)?,
        })
    }
}

/// Everything needed to verify proofs of one compiled system.
#[derive(Clone)]
pub struct VerificationKey {
    data: Arc<KeyData>,
    dummy: Arc<OnceLock<Proof>>,
}

impl VerificationKey {
    pub(crate) fn new(data: KeyData) -> Self {
        Self {
            data: Arc::new(data),
            dummy: Arc::new(OnceLock::new()),
        }
    }

    pub fn id(&self) -> KeyId {
        KeyId::new(KeyKind::Wrap, &self.data.name, self.data.wrap_index.digest)
    }

    pub fn name(&self) -> &str {
        &self.data.name
    }

    pub fn max_proofs_verified(&self) -> usize {
        self.data.max_proofs_verified as usize
    }

    pub fn statement(&self) -> StatementShape {
        self.data.statement
    }

    pub fn branches(&self) -> &[BranchData] {
        &self.data.branches
    }

    pub fn step_indices(&self) -> &[VerifierIndex<StepConfig>] {
        &self.data.step_indices
    }

    /// Digest of each branch's step constraint system.
    pub fn step_digests(&self) -> Vec<[u8; 32]> {
        self.data.step_indices.iter().map(|index| index.digest).collect()
    }

    pub fn slots(&self) -> &[Vec<PredecessorKey>] {
        &self.data.slots
    }

    pub fn max_step_domain_log2(&self) -> u8 {
        self.data.max_step_domain_log2
    }

    pub fn wrap_index(&self) -> &VerifierIndex<WrapConfig> {
        &self.data.wrap_index
    }

    /// A well-formed proof of the right shape that does not verify. Used to
    /// fill predecessor slots that are not required to verify.
    pub fn dummy_proof(&self) -> &Proof {
        self.dummy.get_or_init(|| {
            dummy_proof(
                self.max_proofs_verified(),
                self.data.branches.first().copied().unwrap_or_default(),
            )
        })
    }

    pub(crate) fn view(&self) -> KeyView<'_> {
        KeyView {
            max_proofs_verified: self.max_proofs_verified(),
            statement: self.data.statement,
            branches: &self.data.branches,
            step_indices: &self.data.step_indices,
            slots: &self.data.slots,
            max_step_domain_log2: self.data.max_step_domain_log2,
            wrap_index: &self.data.wrap_index,
        }
    }
}

impl PartialEq for VerificationKey {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes().ok() == other.to_bytes().ok()
    }
}

impl Eq for VerificationKey {}

impl std::fmt::Debug for VerificationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerificationKey")
            .field("id", &self.id().to_string())
            .field("branches", &self.data.branches)
            .finish()
    }
}

impl Valid for VerificationKey {
    fn check(&self) -> Result<(), SerializationError> {
        self.data.check()
    }
}

impl CanonicalSerialize for VerificationKey {
    fn serialize_with_mode<W: Write>(
        &self,
        writer: W,
        compress: Compress,
    ) -> Result<(), SerializationError> {
        self.data.serialize_with_mode(writer, compress)
    }

    fn serialized_size(&self, compress: Compress) -> usize {
        self.data.serialized_size(compress)
    }
}

impl CanonicalDeserialize for VerificationKey {
    fn deserialize_with_mode<R: Read>(
        reader: R,
        compress: Compress,
        validate: Validate,
    ) -> Result<Self, SerializationError> {
        let key = Self::new(KeyData::deserialize_with_mode(reader, compress, validate)?);
        key.view()
            .check()
            .map_err(|_| SerializationError::InvalidData)?;
        Ok(key)
    }
}

impl Serializable for VerificationKey {}
