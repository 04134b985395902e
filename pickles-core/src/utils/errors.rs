use thiserror::Error;

/// Errors surfaced by compilation, proving, key caching and verification.
///
/// The type is `Clone` so a single failure can be handed to every observer of
/// a shared computation (see [`crate::utils::deferred::Deferred`]).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PicklesError {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Verification key mismatch: expected {expected}, derived {actual}")]
    KeyMismatch { expected: String, actual: String },
    #[error("Cache I/O error in {store}: {message}")]
    CacheIo { store: String, message: String },
    #[error("Proof shape error: {0}")]
    ProofShape(String),
    #[error("Proof verification failed: {0}")]
    VerificationFailure(String),
    #[error("Constraint {constraint} is not satisfied by the witness")]
    Unsatisfied { constraint: usize },
    #[error("Circuit error: {0}")]
    Circuit(String),
    #[error("Tag {0} has not been compiled yet")]
    TagNotCompiled(String),
    #[error("Side-loaded key binding error: {0}")]
    SideLoadedBinding(String),
    #[error("Invalid prover input: {0}")]
    InvalidProverInput(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Background task failed: {0}")]
    Task(String),
}

impl PicklesError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn cache_io(store: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::CacheIo {
            store: store.into(),
            message: err.to_string(),
        }
    }

    /// Errors that describe a bad proof rather than a bad call. Verification
    /// reports these as `false` instead of propagating them.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::ProofShape(_) | Self::VerificationFailure(_) | Self::Serialization(_)
        )
    }
}

impl From<ark_serialize::SerializationError> for PicklesError {
    fn from(err: ark_serialize::SerializationError) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<tokio::task::JoinError> for PicklesError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Task(err.to_string())
    }
}
