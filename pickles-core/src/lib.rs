#![allow(clippy::type_complexity)]
#![allow(clippy::too_many_arguments)]

pub mod backend;
pub mod compiler;
pub mod curves;
pub mod keys;
pub mod proof;
pub mod r1cs;
pub mod rule;
pub mod serializable;
pub mod side_loaded;
pub mod tag;
pub mod utils;
pub mod verifier;

#[cfg(test)]
mod tests;

pub use compiler::prover::{ProveRequest, Prover, ProverOutput};
pub use compiler::{compile, compile_blocking, dummy_statement, CompileConfig, Compiled};
pub use curves::{StepField, WrapField};
pub use keys::{CacheHandle, Dirty, KeyCache, KeyId, VerificationKey};
pub use proof::{Proof, Statement, StatementShape};
pub use rule::{FeatureFlags, InductiveRule, Predecessor, RuleOutput, StatementVar, StepContext, Var};
pub use serializable::Serializable;
pub use side_loaded::{SideLoadedKey, SideLoadedTag};
pub use tag::{Tag, TagId};
pub use utils::errors::PicklesError;
pub use verifier::Verifier;
