use ark_ff::{BigInteger, PrimeField};
use ark_serialize::{
    CanonicalDeserialize, CanonicalSerialize, Compress, Read, SerializationError, Valid, Validate,
};
#[cfg(feature = "parallel")]
use rayon::prelude::*;

use super::ops::LC;
use crate::curves::SRS_LOG2;
use crate::serializable::deserialize_vec;
use crate::utils::errors::PicklesError;
use crate::utils::transcript::keccak_digest;

/// A single rank-1 constraint `a * b == c`.
#[derive(Clone, Debug, PartialEq, Eq, CanonicalSerialize, CanonicalDeserialize)]
pub struct Constraint<F: PrimeField> {
    pub a: LC<F>,
    pub b: LC<F>,
    pub c: LC<F>,
}

impl<F: PrimeField> Constraint<F> {
    fn is_satisfied(&self, public: &[F], aux: &[F]) -> bool {
        match (
            self.a.evaluate(public, aux),
            self.b.evaluate(public, aux),
            self.c.evaluate(public, aux),
        ) {
            (Some(a), Some(b), Some(c)) => a * b == c,
            _ => false,
        }
    }
}

/// Fixed lookup table. Only range tables are supported: the looked-up value
/// must fit in `bits` bits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, CanonicalSerialize, CanonicalDeserialize)]
pub struct LookupTable {
    pub bits: u8,
}

impl LookupTable {
    pub fn range(bits: u8) -> Self {
        Self { bits }
    }

    pub fn contains<F: PrimeField>(&self, value: F) -> bool {
        value.into_bigint().num_bits() <= self.bits as u32
    }
}

#[derive(Clone, Debug, PartialEq, Eq, CanonicalSerialize, CanonicalDeserialize)]
pub struct Lookup<F: PrimeField> {
    pub value: LC<F>,
    pub table: LookupTable,
}

/// Output of setup-mode synthesis: the circuit shape, independent of any
/// witness.
#[derive(Clone, Debug, PartialEq, Eq, CanonicalSerialize)]
pub struct ConstraintSystem<F: PrimeField> {
    pub num_public: usize,
    pub num_aux: usize,
    pub constraints: Vec<Constraint<F>>,
    pub lookups: Vec<Lookup<F>>,
    pub lookups_enabled: bool,
}

/// Most rows or variables a decoded circuit may declare: everything has to
/// fit the largest SRS domain.
const MAX_DECODED_SIZE: usize = 1 << SRS_LOG2;

impl<F: PrimeField> Valid for ConstraintSystem<F> {
    fn check(&self) -> Result<(), SerializationError> {
        self.constraints.check()?;
        self.lookups.check()
    }
}

impl<F: PrimeField> CanonicalDeserialize for ConstraintSystem<F> {
    fn deserialize_with_mode<R: Read>(
        mut reader: R,
        compress: Compress,
        validate: Validate,
    ) -> Result<Self, SerializationError> {
        let num_public = usize::deserialize_with_mode(&mut reader, compress, validate)?;
        let num_aux = usize::deserialize_with_mode(&mut reader, compress, validate)?;
        if num_public > MAX_DECODED_SIZE || num_aux > MAX_DECODED_SIZE {
            return Err(SerializationError::InvalidData);
        }
        let constraints = deserialize_vec(&mut reader, compress, validate, MAX_DECODED_SIZE)?;
        let lookups = deserialize_vec(&mut reader, compress, validate, MAX_DECODED_SIZE)?;
        let lookups_enabled = bool::deserialize_with_mode(&mut reader, compress, validate)?;
        Ok(Self {
            num_public,
            num_aux,
            constraints,
            lookups,
            lookups_enabled,
        })
    }
}

impl<F: PrimeField> ConstraintSystem<F> {
    /// Number of gate rows the backend has to lay out.
    pub fn rows(&self) -> usize {
        self.constraints.len() + self.lookups.len()
    }

    pub fn num_vars(&self) -> usize {
        self.num_public + self.num_aux
    }

    pub fn digest(&self) -> [u8; 32] {
        let mut bytes = Vec::with_capacity(self.compressed_size());
        // Vec<u8> as a writer never fails
        let _ = self.serialize_compressed(&mut bytes);
        keccak_digest(b"pickles/constraint-system", &[&bytes])
    }

    /// One field element per row, derived from the row's encoding. The
    /// backend commits to these as its circuit commitment.
    pub fn row_scalars(&self) -> Vec<F> {
        fn scalar<F: PrimeField, T: CanonicalSerialize>(index: usize, row: &T) -> F {
            let mut bytes = Vec::with_capacity(row.compressed_size());
            let _ = row.serialize_compressed(&mut bytes);
            let digest = keccak_digest(b"pickles/row", &[&(index as u64).to_le_bytes(), &bytes]);
            F::from_le_bytes_mod_order(&digest)
        }

        #[cfg(feature = "parallel")]
        let gates: Vec<F> = self
            .constraints
            .par_iter()
            .enumerate()
            .map(|(i, c)| scalar(i, c))
            .collect();
        #[cfg(not(feature = "parallel"))]
        let gates: Vec<F> = self
            .constraints
            .iter()
            .enumerate()
            .map(|(i, c)| scalar(i, c))
            .collect();

        let offset = self.constraints.len();
        gates
            .into_iter()
            .chain(
                self.lookups
                    .iter()
                    .enumerate()
                    .map(|(i, l)| scalar(offset + i, l)),
            )
            .collect()
    }

    /// Checks a full assignment. Rows are numbered constraints first, then
    /// lookups.
    pub fn is_satisfied(&self, public: &[F], aux: &[F]) -> Result<(), PicklesError> {
        if public.len() != self.num_public || aux.len() != self.num_aux {
            return Err(PicklesError::InvalidProverInput(format!(
                "assignment has {} public / {} auxiliary values, circuit expects {} / {}",
                public.len(),
                aux.len(),
                self.num_public,
                self.num_aux
            )));
        }
        if let Some(row) = self
            .constraints
            .iter()
            .position(|c| !c.is_satisfied(public, aux))
        {
            return Err(PicklesError::Unsatisfied { constraint: row });
        }
        for (i, lookup) in self.lookups.iter().enumerate() {
            let ok = lookup
                .value
                .evaluate(public, aux)
                .map(|v| lookup.table.contains(v))
                .unwrap_or(false);
            if !ok {
                return Err(PicklesError::Unsatisfied {
                    constraint: self.constraints.len() + i,
                });
            }
        }
        Ok(())
    }
}
