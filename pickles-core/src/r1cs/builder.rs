use ark_ff::PrimeField;

use super::constraint_system::{Constraint, ConstraintSystem, Lookup, LookupTable};
use super::ops::{Variable, LC};
use crate::utils::errors::PicklesError;

/// Whether synthesis records only the circuit shape or also a witness.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SynthesisMode {
    Setup,
    Prove,
}

/// A circuit value: its linear form over allocated variables plus, when
/// proving, its concrete value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldVar<F: PrimeField> {
    lc: LC<F>,
    value: Option<F>,
}

impl<F: PrimeField> FieldVar<F> {
    pub fn constant(c: F) -> Self {
        Self {
            lc: LC::constant(c),
            value: Some(c),
        }
    }

    pub fn lc(&self) -> &LC<F> {
        &self.lc
    }

    /// `None` during setup.
    pub fn value(&self) -> Option<F> {
        self.value
    }
}

/// A [`FieldVar`] constrained to 0 or 1.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Boolean<F: PrimeField>(FieldVar<F>);

impl<F: PrimeField> Boolean<F> {
    pub fn constant(b: bool) -> Self {
        Boolean(FieldVar::constant(if b { F::one() } else { F::zero() }))
    }

    pub fn var(&self) -> &FieldVar<F> {
        &self.0
    }

    pub fn value(&self) -> Option<bool> {
        self.0.value.map(|v| !v.is_zero())
    }
}

/// Witness produced by prove-mode synthesis.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Witness<F: PrimeField> {
    pub public: Vec<F>,
    pub aux: Vec<F>,
}

/// Records constraints over freshly allocated variables. The same circuit
/// code runs in both modes; in [`SynthesisMode::Setup`] witness closures are
/// never invoked.
pub struct CircuitBuilder<F: PrimeField> {
    mode: SynthesisMode,
    public: Vec<F>,
    aux: Vec<F>,
    num_public: usize,
    num_aux: usize,
    constraints: Vec<Constraint<F>>,
    lookups: Vec<Lookup<F>>,
    lookups_enabled: bool,
    missing_witness: Option<String>,
}

impl<F: PrimeField> CircuitBuilder<F> {
    pub fn new(mode: SynthesisMode) -> Self {
        Self {
            mode,
            public: vec![],
            aux: vec![],
            num_public: 0,
            num_aux: 0,
            constraints: vec![],
            lookups: vec![],
            lookups_enabled: false,
            missing_witness: None,
        }
    }

    pub fn with_lookups(mut self, enabled: bool) -> Self {
        self.lookups_enabled = enabled;
        self
    }

    pub fn mode(&self) -> SynthesisMode {
        self.mode
    }

    pub fn is_proving(&self) -> bool {
        self.mode == SynthesisMode::Prove
    }

    fn record_value(&mut self, value: Option<F>, what: &str) -> F {
        match value {
            Some(v) => v,
            None => {
                if self.is_proving() && self.missing_witness.is_none() {
                    self.missing_witness = Some(what.to_string());
                }
                F::zero()
            }
        }
    }

    fn alloc_aux(&mut self, value: Option<F>) -> FieldVar<F> {
        let var = Variable::Auxiliary(self.num_aux);
        self.num_aux += 1;
        if self.is_proving() {
            let v = self.record_value(value, "auxiliary variable");
            self.aux.push(v);
        }
        FieldVar {
            lc: var.into(),
            value: if self.is_proving() { value } else { None },
        }
    }

    /// Allocates an auxiliary variable; `compute` runs only when proving.
    pub fn exists(&mut self, compute: impl FnOnce() -> F) -> FieldVar<F> {
        let value = self.is_proving().then(compute);
        self.alloc_aux(value)
    }

    pub fn try_exists<E>(
        &mut self,
        compute: impl FnOnce() -> Result<F, E>,
    ) -> Result<FieldVar<F>, E> {
        let value = if self.is_proving() {
            Some(compute()?)
        } else {
            None
        };
        Ok(self.alloc_aux(value))
    }

    /// Allocates a public input variable directly.
    pub fn public_input(&mut self, compute: impl FnOnce() -> F) -> FieldVar<F> {
        let var = Variable::Public(self.num_public);
        self.num_public += 1;
        let value = self.is_proving().then(compute);
        if self.is_proving() {
            let v = self.record_value(value, "public input");
            self.public.push(v);
        }
        FieldVar {
            lc: var.into(),
            value,
        }
    }

    /// Copies `var` into a new public input slot.
    pub fn expose(&mut self, var: &FieldVar<F>) -> FieldVar<F> {
        let value = var.value;
        let public = self.public_input(|| value.unwrap_or_default());
        if self.is_proving() && value.is_none() {
            self.record_value(None, "exposed value");
        }
        self.constrain_eq(&public, var);
        public
    }

    pub fn constant(&self, c: F) -> FieldVar<F> {
        FieldVar::constant(c)
    }

    pub fn add(&self, a: &FieldVar<F>, b: &FieldVar<F>) -> FieldVar<F> {
        FieldVar {
            lc: a.lc.clone() + b.lc.clone(),
            value: a.value.zip(b.value).map(|(x, y)| x + y),
        }
    }

    pub fn sub(&self, a: &FieldVar<F>, b: &FieldVar<F>) -> FieldVar<F> {
        FieldVar {
            lc: a.lc.clone() - b.lc.clone(),
            value: a.value.zip(b.value).map(|(x, y)| x - y),
        }
    }

    pub fn scale(&self, a: &FieldVar<F>, c: F) -> FieldVar<F> {
        FieldVar {
            lc: a.lc.scale(c),
            value: a.value.map(|x| x * c),
        }
    }

    pub fn sum<'a>(&self, vars: impl IntoIterator<Item = &'a FieldVar<F>>) -> FieldVar<F> {
        vars.into_iter()
            .fold(FieldVar::constant(F::zero()), |acc, v| self.add(&acc, v))
    }

    /// Linear combination with constant coefficients; no constraint needed.
    pub fn linear_combination<'a>(
        &self,
        terms: impl IntoIterator<Item = (&'a FieldVar<F>, F)>,
    ) -> FieldVar<F> {
        terms
            .into_iter()
            .fold(FieldVar::constant(F::zero()), |acc, (v, c)| {
                self.add(&acc, &self.scale(v, c))
            })
    }

    pub fn mul(&mut self, a: &FieldVar<F>, b: &FieldVar<F>) -> FieldVar<F> {
        let product = self.alloc_aux(a.value.zip(b.value).map(|(x, y)| x * y));
        self.constrain_r1cs(a, b, &product);
        product
    }

    pub fn square(&mut self, a: &FieldVar<F>) -> FieldVar<F> {
        self.mul(a, a)
    }

    /// Allocates a boolean and constrains it to {0, 1}.
    pub fn boolean(&mut self, compute: impl FnOnce() -> bool) -> Boolean<F> {
        let var = self.exists(|| if compute() { F::one() } else { F::zero() });
        self.constrain_binary(&var);
        Boolean(var)
    }

    pub fn not(&self, b: &Boolean<F>) -> Boolean<F> {
        Boolean(self.sub(&FieldVar::constant(F::one()), &b.0))
    }

    pub fn and(&mut self, a: &Boolean<F>, b: &Boolean<F>) -> Boolean<F> {
        Boolean(self.mul(&a.0, &b.0))
    }

    /// 1 iff `a == b`.
    pub fn equals(&mut self, a: &FieldVar<F>, b: &FieldVar<F>) -> Boolean<F> {
        let diff = self.sub(a, b);
        let d = diff.value;
        let inverse = self.exists(|| d.and_then(|d| d.inverse()).unwrap_or_default());
        let is_equal = self.exists(|| {
            if d.map(|d| d.is_zero()).unwrap_or(false) {
                F::one()
            } else {
                F::zero()
            }
        });
        // diff * inverse == 1 - is_equal
        let one_minus = self.sub(&FieldVar::constant(F::one()), &is_equal);
        self.constrain_r1cs(&diff, &inverse, &one_minus);
        // diff * is_equal == 0
        self.constrain_r1cs(&diff, &is_equal, &FieldVar::constant(F::zero()));
        Boolean(is_equal)
    }

    /// `if condition { when_true } else { when_false }`
    pub fn select(
        &mut self,
        condition: &Boolean<F>,
        when_true: &FieldVar<F>,
        when_false: &FieldVar<F>,
    ) -> FieldVar<F> {
        let value = condition
            .value()
            .and_then(|c| if c { when_true.value } else { when_false.value });
        let result = self.alloc_aux(value);
        self.constrain_if_else(&condition.0, when_true, when_false, &result);
        result
    }

    pub fn constrain_r1cs(&mut self, a: &FieldVar<F>, b: &FieldVar<F>, c: &FieldVar<F>) {
        self.constraints.push(Constraint {
            a: a.lc.clone(),
            b: b.lc.clone(),
            c: c.lc.clone(),
        });
    }

    pub fn constrain_eq(&mut self, left: &FieldVar<F>, right: &FieldVar<F>) {
        // left - right == 0
        self.constraints.push(Constraint {
            a: left.lc.clone() - right.lc.clone(),
            b: Variable::Constant.into(),
            c: LC::zero(),
        });
    }

    pub fn constrain_binary(&mut self, value: &FieldVar<F>) {
        // value * (1 - value) == 0
        let one: LC<F> = Variable::Constant.into();
        self.constraints.push(Constraint {
            a: value.lc.clone(),
            b: one - value.lc.clone(),
            c: LC::zero(),
        });
    }

    pub fn constrain_if_else(
        &mut self,
        condition: &FieldVar<F>,
        when_true: &FieldVar<F>,
        when_false: &FieldVar<F>,
        alleged: &FieldVar<F>,
    ) {
        // condition * (true - false) == (alleged - false)
        self.constraints.push(Constraint {
            a: condition.lc.clone(),
            b: when_true.lc.clone() - when_false.lc.clone(),
            c: alleged.lc.clone() - when_false.lc.clone(),
        });
    }

    /// Little-endian packing of `bits` with the given operand width.
    pub fn pack_le(&self, bits: &[FieldVar<F>], operand_bits: usize) -> FieldVar<F> {
        let mut coeff = F::one();
        let step = F::from(2u64).pow([operand_bits as u64]);
        let mut terms = Vec::with_capacity(bits.len());
        for bit in bits {
            terms.push((bit, coeff));
            coeff *= step;
        }
        self.linear_combination(terms)
    }

    /// Requires `value` to appear in `table`.
    pub fn lookup(&mut self, value: &FieldVar<F>, table: LookupTable) -> Result<(), PicklesError> {
        if !self.lookups_enabled {
            return Err(PicklesError::Circuit(
                "lookup used by a rule that did not enable the lookup feature".to_string(),
            ));
        }
        self.lookups.push(Lookup {
            value: value.lc.clone(),
            table,
        });
        Ok(())
    }

    pub fn num_constraints(&self) -> usize {
        self.constraints.len()
    }

    /// Consumes the builder. The witness is present iff synthesis ran in
    /// [`SynthesisMode::Prove`].
    pub fn finish(self) -> Result<(ConstraintSystem<F>, Option<Witness<F>>), PicklesError> {
        if let Some(what) = self.missing_witness {
            return Err(PicklesError::Circuit(format!(
                "no witness value for {what} while proving"
            )));
        }
        let witness = self.is_proving().then(|| Witness {
            public: self.public,
            aux: self.aux,
        });
        let cs = ConstraintSystem {
            num_public: self.num_public,
            num_aux: self.num_aux,
            constraints: self.constraints,
            lookups: self.lookups,
            lookups_enabled: self.lookups_enabled,
        };
        Ok((cs, witness))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ark_vesta::Fr;

    fn cube_plus_x(mode: SynthesisMode, x: u64) -> (ConstraintSystem<Fr>, Option<Witness<Fr>>) {
        let mut cs = CircuitBuilder::<Fr>::new(mode);
        let x = cs.exists(|| Fr::from(x));
        let x2 = cs.square(&x);
        let x3 = cs.mul(&x2, &x);
        let out = cs.add(&x3, &x);
        cs.expose(&out);
        cs.finish().unwrap()
    }

    #[test]
    fn setup_and_prove_agree_on_shape() {
        let (setup, none) = cube_plus_x(SynthesisMode::Setup, 0);
        let (proved, witness) = cube_plus_x(SynthesisMode::Prove, 3);
        assert!(none.is_none());
        assert_eq!(setup.digest(), proved.digest());

        let witness = witness.unwrap();
        assert_eq!(witness.public, vec![Fr::from(30u64)]);
        assert!(proved
            .is_satisfied(&witness.public, &witness.aux)
            .is_ok());
    }

    #[test]
    fn equals_and_select() {
        let mut cs = CircuitBuilder::<Fr>::new(SynthesisMode::Prove);
        let a = cs.exists(|| Fr::from(5u64));
        let b = cs.exists(|| Fr::from(5u64));
        let c = cs.exists(|| Fr::from(6u64));
        let same = cs.equals(&a, &b);
        let different = cs.equals(&a, &c);
        assert_eq!(same.value(), Some(true));
        assert_eq!(different.value(), Some(false));

        let picked = cs.select(&different, &a, &c);
        assert_eq!(picked.value(), Some(Fr::from(6u64)));
        let (system, witness) = cs.finish().unwrap();
        let witness = witness.unwrap();
        assert!(system.is_satisfied(&witness.public, &witness.aux).is_ok());
    }

    #[test]
    fn bad_witness_is_caught_by_the_system() {
        let mut cs = CircuitBuilder::<Fr>::new(SynthesisMode::Prove);
        let flag = cs.exists(|| Fr::from(2u64));
        cs.constrain_binary(&flag);
        let (system, witness) = cs.finish().unwrap();
        let witness = witness.unwrap();
        assert_eq!(
            system.is_satisfied(&witness.public, &witness.aux),
            Err(PicklesError::Unsatisfied { constraint: 0 })
        );
    }

    #[test]
    fn lookups_require_the_feature() {
        let mut cs = CircuitBuilder::<Fr>::new(SynthesisMode::Prove);
        let x = cs.exists(|| Fr::from(200u64));
        assert!(matches!(
            cs.lookup(&x, LookupTable::range(8)),
            Err(PicklesError::Circuit(_))
        ));

        let mut cs = CircuitBuilder::<Fr>::new(SynthesisMode::Prove).with_lookups(true);
        let x = cs.exists(|| Fr::from(300u64));
        cs.lookup(&x, LookupTable::range(8)).unwrap();
        let (system, witness) = cs.finish().unwrap();
        let witness = witness.unwrap();
        assert!(system.is_satisfied(&witness.public, &witness.aux).is_err());
    }
}
