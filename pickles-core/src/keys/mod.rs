//! Content-addressed key identities, cache status reporting, and the
//! verification key handed out by `compile`.

use std::fmt;
use std::str::FromStr;

use crate::utils::errors::PicklesError;

pub mod cache;
pub mod store;
pub(crate) mod verification_key;

pub use cache::KeyCache;
pub use store::{FileSystemStore, KeyStore, MemoryStore};
pub(crate) use verification_key::KeyData;
pub use verification_key::{PredecessorKey, VerificationKey};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyKind {
    Step,
    Wrap,
}

impl KeyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyKind::Step => "step",
            KeyKind::Wrap => "wrap",
        }
    }
}

/// Stable key identifier: kind, a human readable label, and the digest of
/// the constraint system the key was derived from. Only the kind and digest
/// take part in equality.
#[derive(Clone, Debug)]
pub struct KeyId {
    kind: KeyKind,
    label: String,
    digest: [u8; 32],
}

impl KeyId {
    pub fn new(kind: KeyKind, label: impl Into<String>, digest: [u8; 32]) -> Self {
        Self {
            kind,
            label: label.into(),
            digest,
        }
    }

    pub fn kind(&self) -> KeyKind {
        self.kind
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn digest(&self) -> &[u8; 32] {
        &self.digest
    }

    /// Name under which stores persist the key.
    pub fn file_name(&self) -> String {
        format!("{}-{}.key", self.kind.as_str(), hex::encode(self.digest))
    }
}

impl PartialEq for KeyId {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.digest == other.digest
    }
}

impl Eq for KeyId {}

impl std::hash::Hash for KeyId {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.digest.hash(state);
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}",
            self.kind.as_str(),
            self.label,
            hex::encode(self.digest)
        )
    }
}

impl FromStr for KeyId {
    type Err = PicklesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || PicklesError::configuration(format!("malformed key id {s:?}"));
        let (kind, rest) = s.split_once('-').ok_or_else(invalid)?;
        let (label, digest) = rest.rsplit_once('-').ok_or_else(invalid)?;
        let kind = match kind {
            "step" => KeyKind::Step,
            "wrap" => KeyKind::Wrap,
            _ => return Err(invalid()),
        };
        let digest: [u8; 32] = hex::decode(digest)
            .ok()
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or_else(invalid)?;
        Ok(KeyId::new(kind, label, digest))
    }
}

/// Where the keys of a compile call came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Dirty {
    CacheHit,
    LocallyGenerated,
    GeneratedSomething,
}

impl Dirty {
    /// Equal statuses are kept, anything mixed becomes `GeneratedSomething`.
    pub fn combine(self, other: Dirty) -> Dirty {
        if self == other {
            self
        } else {
            Dirty::GeneratedSomething
        }
    }
}

/// Cache outcome of every key one `compile` call loaded.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CacheHandle {
    entries: Vec<(KeyId, Dirty)>,
}

impl CacheHandle {
    pub(crate) fn push(&mut self, id: KeyId, dirty: Dirty) {
        self.entries.push((id, dirty));
    }

    pub fn entries(&self) -> &[(KeyId, Dirty)] {
        &self.entries
    }

    pub fn key_ids(&self) -> Vec<KeyId> {
        self.entries.iter().map(|(id, _)| id.clone()).collect()
    }

    /// Combined status; a handle with no keys counts as a cache hit.
    pub fn dirty(&self) -> Dirty {
        self.entries
            .iter()
            .map(|(_, d)| *d)
            .reduce(Dirty::combine)
            .unwrap_or(Dirty::CacheHit)
    }
}
