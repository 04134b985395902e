use ark_serialize::{
    CanonicalDeserialize, CanonicalSerialize, Compress, Read, SerializationError, Valid, Validate,
    Write,
};

use crate::backend::BackendProof;
use crate::compiler::MAX_PROOFS_VERIFIED;
use crate::curves::{StepAffine, StepConfig, StepField, WrapConfig, SRS_LOG2};
use crate::serializable::{deserialize_vec, nested, Serializable};
use crate::side_loaded::SideLoadedKey;
use crate::utils::errors::PicklesError;

/// Declared arity of a proof system's statement.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, CanonicalSerialize, CanonicalDeserialize,
)]
pub struct StatementShape {
    pub input: u32,
    pub output: u32,
}

impl StatementShape {
    pub fn new(input: usize, output: usize) -> Self {
        Self {
            input: input as u32,
            output: output as u32,
        }
    }

    pub fn len(&self) -> usize {
        (self.input + self.output) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// What a proof attests to: the rule's public input and public output.
#[derive(Clone, Debug, Default, PartialEq, Eq, CanonicalSerialize)]
pub struct Statement {
    pub input: Vec<StepField>,
    pub output: Vec<StepField>,
}

impl Statement {
    pub fn new(input: Vec<StepField>, output: Vec<StepField>) -> Self {
        Self { input, output }
    }

    pub fn shape(&self) -> StatementShape {
        StatementShape::new(self.input.len(), self.output.len())
    }

    /// `input ‖ output`
    pub fn flatten(&self) -> Vec<StepField> {
        self.input.iter().chain(self.output.iter()).copied().collect()
    }

    pub fn check_shape(&self, expected: StatementShape) -> Result<(), PicklesError> {
        if self.shape() != expected {
            return Err(PicklesError::ProofShape(format!(
                "statement has shape {:?}, expected {:?}",
                self.shape(),
                expected
            )));
        }
        Ok(())
    }
}

impl Serializable for Statement {}

/// Which branch produced a proof and the step domain it ran over.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, CanonicalSerialize, CanonicalDeserialize,
)]
pub struct BranchData {
    pub proofs_verified: u8,
    pub domain_log2: u8,
}

impl BranchData {
    /// `proofs_verified + 256 * domain_log2`, the form the wrap circuit
    /// exposes.
    pub fn packed(&self) -> u64 {
        self.proofs_verified as u64 + 256 * self.domain_log2 as u64
    }
}

/// Step-side verifier values the wrap circuit could not check natively.
#[derive(Clone, Debug, PartialEq, Eq, CanonicalSerialize)]
pub struct DeferredValues {
    pub zeta: StepField,
    pub bulletproof_challenges: Vec<StepField>,
    pub branch_data: BranchData,
}

#[derive(Clone, Debug, PartialEq, Eq, CanonicalSerialize, CanonicalDeserialize)]
pub struct ProofState {
    pub deferred_values: DeferredValues,
    pub sponge_digest_before_evaluations: [u8; 32],
    /// Step accumulator commitment, checked together with the step
    /// challenges by whoever consumes this proof.
    pub challenge_polynomial_commitment: StepAffine,
}

/// A wrapped recursive proof.
///
/// Besides the wrap proof it carries the step proof it wraps and the
/// evidence behind every predecessor slot of that step proof, so a verifier
/// can check the whole recursion. Its size grows with the depth of the
/// recursion.
#[derive(Clone, Debug, PartialEq, Eq, CanonicalSerialize)]
pub struct Proof {
    pub max_proofs_verified: u8,
    pub proof_state: ProofState,
    /// `[s, pred_0, .., pred_{n-1}]`
    pub step_public_input: Vec<StepField>,
    pub step_proof: BackendProof<StepConfig>,
    /// One entry per predecessor slot of the branch, in slot order.
    pub previous: Vec<PreviousProof>,
    pub wrap_proof: BackendProof<WrapConfig>,
}

impl Serializable for Proof {}

/// What stands behind one predecessor slot of a step proof. The slot's
/// public input `pred_i` hashes the statement, the accumulator digest, the
/// `must_verify` bit and the key digest.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PreviousProof {
    /// `must_verify` was set: the predecessor proof itself, and the key it
    /// was checked against when the slot is side-loaded.
    Verified {
        statement: Statement,
        key: Option<SideLoadedKey>,
        proof: Box<Proof>,
    },
    /// `must_verify` was unset and the predecessor was never checked.
    Skipped {
        statement: Statement,
        accumulator_digest: StepField,
        key_digest: StepField,
    },
}

impl PreviousProof {
    pub fn statement(&self) -> &Statement {
        match self {
            PreviousProof::Verified { statement, .. } => statement,
            PreviousProof::Skipped { statement, .. } => statement,
        }
    }
}

const VERIFIED: u8 = 0;
const SKIPPED: u8 = 1;

impl CanonicalSerialize for PreviousProof {
    fn serialize_with_mode<W: Write>(
        &self,
        mut writer: W,
        compress: Compress,
    ) -> Result<(), SerializationError> {
        match self {
            PreviousProof::Verified {
                statement,
                key,
                proof,
            } => {
                VERIFIED.serialize_with_mode(&mut writer, compress)?;
                statement.serialize_with_mode(&mut writer, compress)?;
                key.serialize_with_mode(&mut writer, compress)?;
                Proof::serialize_with_mode(proof, &mut writer as &mut dyn Write, compress)
            }
            PreviousProof::Skipped {
                statement,
                accumulator_digest,
                key_digest,
            } => {
                SKIPPED.serialize_with_mode(&mut writer, compress)?;
                statement.serialize_with_mode(&mut writer, compress)?;
                accumulator_digest.serialize_with_mode(&mut writer, compress)?;
                key_digest.serialize_with_mode(&mut writer, compress)
            }
        }
    }

    fn serialized_size(&self, compress: Compress) -> usize {
        1 + match self {
            PreviousProof::Verified {
                statement,
                key,
                proof,
            } => {
                statement.serialized_size(compress)
                    + key.serialized_size(compress)
                    + Proof::serialized_size(proof, compress)
            }
            PreviousProof::Skipped {
                statement,
                accumulator_digest,
                key_digest,
            } => {
                statement.serialized_size(compress)
                    + accumulator_digest.serialized_size(compress)
                    + key_digest.serialized_size(compress)
            }
        }
    }
}

impl Valid for PreviousProof {
    fn check(&self) -> Result<(), SerializationError> {
        match self {
            PreviousProof::Verified {
                statement,
                key,
                proof,
            } => {
                statement.check()?;
                if let Some(key) = key {
                    key.check()?;
                }
                Proof::check(proof)
            }
            PreviousProof::Skipped {
                statement,
                accumulator_digest,
                key_digest,
            } => {
                statement.check()?;
                accumulator_digest.check()?;
                key_digest.check()
            }
        }
    }
}

impl CanonicalDeserialize for PreviousProof {
    fn deserialize_with_mode<R: Read>(
        mut reader: R,
        compress: Compress,
        validate: Validate,
    ) -> Result<Self, SerializationError> {
        let variant = u8::deserialize_with_mode(&mut reader, compress, validate)?;
        let statement = Statement::deserialize_with_mode(&mut reader, compress, validate)?;
        match variant {
            VERIFIED => {
                let key = match bool::deserialize_with_mode(&mut reader, compress, validate)? {
                    true => Some(nested(|| {
                        SideLoadedKey::deserialize_with_mode(&mut reader, compress, validate)
                    })?),
                    false => None,
                };
                let proof = nested(|| Proof::deserialize_with_mode(&mut reader as &mut dyn Read, compress, validate))?;
                Ok(PreviousProof::Verified {
                    statement,
                    key,
                    proof: Box::new(proof),
                })
            }
            SKIPPED => Ok(PreviousProof::Skipped {
                statement,
                accumulator_digest: StepField::deserialize_with_mode(&mut reader, compress, validate)?,
                key_digest: StepField::deserialize_with_mode(&mut reader, compress, validate)?,
            }),
            _ => Err(SerializationError::InvalidData),
        }
    }
}

impl Valid for Statement {
    fn check(&self) -> Result<(), SerializationError> {
        self.input.check()?;
        self.output.check()
    }
}

impl CanonicalDeserialize for Statement {
    fn deserialize_with_mode<R: Read>(
        mut reader: R,
        compress: Compress,
        validate: Validate,
    ) -> Result<Self, SerializationError> {
        Ok(Self {
            input: deserialize_vec(&mut reader, compress, validate, usize::MAX)?,
            output: deserialize_vec(&mut reader, compress, validate, usize::MAX)?,
        })
    }
}

impl Valid for DeferredValues {
    fn check(&self) -> Result<(), SerializationError> {
        self.zeta.check()?;
        self.bulletproof_challenges.check()?;
        self.branch_data.check()
    }
}

impl CanonicalDeserialize for DeferredValues {
    fn deserialize_with_mode<R: Read>(
        mut reader: R,
        compress: Compress,
        validate: Validate,
    ) -> Result<Self, SerializationError> {
        Ok(Self {
            zeta: StepField::deserialize_with_mode(&mut reader, compress, validate)?,
            bulletproof_challenges: deserialize_vec(&mut reader, compress, validate, SRS_LOG2)?,
            branch_data: BranchData::deserialize_with_mode(&mut reader, compress, validate)?,
        })
    }
}

impl Valid for Proof {
    fn check(&self) -> Result<(), SerializationError> {
        self.proof_state.check()?;
        self.step_public_input.check()?;
        self.step_proof.check()?;
        self.previous.check()?;
        self.wrap_proof.check()
    }
}

impl CanonicalDeserialize for Proof {
    fn deserialize_with_mode<R: Read>(
        mut reader: R,
        compress: Compress,
        validate: Validate,
    ) -> Result<Self, SerializationError> {
        Ok(Self {
            max_proofs_verified: u8::deserialize_with_mode(&mut reader, compress, validate)?,
            proof_state: ProofState::deserialize_with_mode(&mut reader, compress, validate)?,
            step_public_input: deserialize_vec(
                &mut reader,
                compress,
                validate,
                1 + MAX_PROOFS_VERIFIED,
            )?,
            step_proof: BackendProof::deserialize_with_mode(&mut reader, compress, validate)?,
            previous: deserialize_vec(&mut reader, compress, validate, MAX_PROOFS_VERIFIED)?,
            wrap_proof: BackendProof::deserialize_with_mode(&mut reader, compress, validate)?,
        })
    }
}
