//! Defines the Linear Combination (LC) object and associated operations.
//! A LinearCombination is a vector of Terms, where each Term is a pair of a Variable and a coefficient.

use ark_ff::PrimeField;
use ark_serialize::{
    CanonicalDeserialize, CanonicalSerialize, Compress, Read, SerializationError, Valid, Validate,
    Write,
};

use crate::serializable::deserialize_vec;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Variable {
    Public(usize),
    Auxiliary(usize),
    Constant,
}

impl Variable {
    fn encode(&self) -> (u8, u64) {
        match self {
            Variable::Public(i) => (0, *i as u64),
            Variable::Auxiliary(i) => (1, *i as u64),
            Variable::Constant => (2, 0),
        }
    }
}

impl Valid for Variable {
    fn check(&self) -> Result<(), SerializationError> {
        Ok(())
    }
}

impl CanonicalSerialize for Variable {
    fn serialize_with_mode<W: Write>(
        &self,
        mut writer: W,
        compress: Compress,
    ) -> Result<(), SerializationError> {
        let (tag, index) = self.encode();
        tag.serialize_with_mode(&mut writer, compress)?;
        index.serialize_with_mode(&mut writer, compress)
    }

    fn serialized_size(&self, compress: Compress) -> usize {
        0u8.serialized_size(compress) + 0u64.serialized_size(compress)
    }
}

impl CanonicalDeserialize for Variable {
    fn deserialize_with_mode<R: Read>(
        mut reader: R,
        compress: Compress,
        validate: Validate,
    ) -> Result<Self, SerializationError> {
        let tag = u8::deserialize_with_mode(&mut reader, compress, validate)?;
        let index = u64::deserialize_with_mode(&mut reader, compress, validate)? as usize;
        match (tag, index) {
            (0, i) => Ok(Variable::Public(i)),
            (1, i) => Ok(Variable::Auxiliary(i)),
            (2, 0) => Ok(Variable::Constant),
            _ => Err(SerializationError::InvalidData),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, CanonicalSerialize, CanonicalDeserialize)]
pub struct Term<F: PrimeField> {
    pub var: Variable,
    pub coeff: F,
}

/// Linear Combination of terms. Terms are kept merged: one entry per variable,
/// no zero coefficients.
#[derive(Clone, Debug, PartialEq, Eq, CanonicalSerialize)]
pub struct LC<F: PrimeField> {
    terms: Vec<Term<F>>,
}

impl<F: PrimeField> Valid for LC<F> {
    fn check(&self) -> Result<(), SerializationError> {
        self.terms.check()
    }
}

impl<F: PrimeField> CanonicalDeserialize for LC<F> {
    fn deserialize_with_mode<R: Read>(
        reader: R,
        compress: Compress,
        validate: Validate,
    ) -> Result<Self, SerializationError> {
        let terms = deserialize_vec(reader, compress, validate, usize::MAX)?;
        Ok(LC { terms })
    }
}

impl<F: PrimeField> LC<F> {
    pub fn new(terms: Vec<Term<F>>) -> Self {
        let mut lc = LC::zero();
        for term in terms {
            lc.push(term);
        }
        lc
    }

    pub fn zero() -> Self {
        LC { terms: vec![] }
    }

    pub fn constant(c: F) -> Self {
        LC::new(vec![Term {
            var: Variable::Constant,
            coeff: c,
        }])
    }

    pub fn terms(&self) -> &[Term<F>] {
        &self.terms
    }

    pub fn is_zero(&self) -> bool {
        self.terms.is_empty()
    }

    fn push(&mut self, term: Term<F>) {
        if let Some(existing) = self.terms.iter_mut().find(|t| t.var == term.var) {
            existing.coeff += term.coeff;
        } else {
            self.terms.push(term);
        }
        self.terms.retain(|t| !t.coeff.is_zero());
    }

    pub fn scale(&self, c: F) -> Self {
        if c.is_zero() {
            return LC::zero();
        }
        LC {
            terms: self
                .terms
                .iter()
                .map(|t| Term {
                    var: t.var,
                    coeff: t.coeff * c,
                })
                .collect(),
        }
    }

    /// Evaluates against a full assignment; `None` if a variable is out of range.
    pub fn evaluate(&self, public: &[F], aux: &[F]) -> Option<F> {
        let mut result = F::zero();
        for term in self.terms.iter() {
            let value = match term.var {
                Variable::Public(i) => *public.get(i)?,
                Variable::Auxiliary(i) => *aux.get(i)?,
                Variable::Constant => F::one(),
            };
            result += value * term.coeff;
        }
        Some(result)
    }
}

// Arithmetic for LC

impl<F: PrimeField> std::ops::Add for LC<F> {
    type Output = Self;

    fn add(self, other: Self) -> Self::Output {
        let mut combined = self;
        for term in other.terms {
            combined.push(term);
        }
        combined
    }
}

impl<F: PrimeField> std::ops::Neg for LC<F> {
    type Output = Self;

    fn neg(self) -> Self::Output {
        self.scale(-F::one())
    }
}

impl<F: PrimeField> std::ops::Sub for LC<F> {
    type Output = Self;

    fn sub(self, other: Self) -> Self::Output {
        self + (-other)
    }
}

// Into<LC<F>>

impl<F: PrimeField> From<Variable> for LC<F> {
    fn from(var: Variable) -> Self {
        LC::new(vec![Term {
            var,
            coeff: F::one(),
        }])
    }
}

impl<F: PrimeField> From<Term<F>> for LC<F> {
    fn from(term: Term<F>) -> Self {
        LC::new(vec![term])
    }
}
