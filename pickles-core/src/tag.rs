//! Tags name proof systems before they exist, so rule sets can refer to
//! themselves or to each other as predecessors.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use crate::keys::VerificationKey;
use crate::proof::StatementShape;
use crate::utils::errors::PicklesError;

static NEXT_TAG_ID: AtomicU64 = AtomicU64::new(0);

/// Process-unique tag identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TagId(u64);

impl TagId {
    pub(crate) fn fresh() -> Self {
        TagId(NEXT_TAG_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TagId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

struct TagInner {
    id: TagId,
    name: String,
    statement: StatementShape,
    max_proofs_verified: usize,
    branches: usize,
    key: OnceLock<VerificationKey>,
}

/// Handle to a (possibly not yet compiled) proof system. Cloning shares the
/// handle; equality is identity.
#[derive(Clone)]
pub struct Tag {
    inner: Arc<TagInner>,
}

impl Tag {
    pub fn create(
        name: impl Into<String>,
        statement: StatementShape,
        max_proofs_verified: usize,
        branches: usize,
    ) -> Self {
        Self {
            inner: Arc::new(TagInner {
                id: TagId::fresh(),
                name: name.into(),
                statement,
                max_proofs_verified,
                branches,
                key: OnceLock::new(),
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

    pub fn branches(&self) -> usize {
        self.inner.branches
    }

    pub fn is_compiled(&self) -> bool {
        self.inner.key.get().is_some()
    }

    /// Resolves the compiled system's key. Fails until `compile` for this
    /// tag has finished.
    pub fn verification_key(&self) -> Result<VerificationKey, PicklesError> {
        self.inner
            .key
            .get()
            .cloned()
            .ok_or_else(|| PicklesError::TagNotCompiled(self.to_string()))
    }

    pub(crate) fn set_compiled(&self, key: VerificationKey) -> Result<(), PicklesError> {
        self.inner
            .key
            .set(key)
            .map_err(|_| PicklesError::configuration(format!("tag {self} was already compiled")))
    }
}

impl PartialEq for Tag {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Tag {}

impl Hash for Tag {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.name(), self.id())
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tag")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("statement", &self.statement())
            .field("max_proofs_verified", &self.max_proofs_verified())
            .field("branches", &self.branches())
            .field("compiled", &self.is_compiled())
            .finish()
    }
}
