use ark_ff::{Field, PrimeField};

pub trait Math {
    fn pow2(self) -> usize;
    fn log_2(self) -> usize;
}

impl Math for usize {
    #[inline]
    fn pow2(self) -> usize {
        1usize << self
    }

    /// Ceiling log: the smallest `k` with `2^k >= self`.
    fn log_2(self) -> usize {
        assert_ne!(self, 0);

        if self.is_power_of_two() {
            (1usize.leading_zeros() - self.leading_zeros()) as usize
        } else {
            (0usize.leading_zeros() - self.leading_zeros()) as usize
        }
    }
}

/// Evaluation domain size (as log2) for a circuit with `rows` rows, never
/// smaller than `min_log2`.
pub fn domain_log2(rows: usize, min_log2: usize) -> usize {
    rows.max(1).log_2().max(min_log2)
}

/// (1, q, q^2, ..., q^(len-1))
pub fn powers<F: Field>(q: F, len: usize) -> Vec<F> {
    let mut out = Vec::with_capacity(len);
    let mut acc = F::one();
    for _ in 0..len {
        out.push(acc);
        acc *= q;
    }
    out
}

/// Re-encodes an element of one prime field into another by its canonical
/// little-endian integer representation, reducing if the target is smaller.
pub fn convert_field<A: PrimeField, B: PrimeField>(a: A) -> B {
    use ark_ff::BigInteger;
    B::from_le_bytes_mod_order(&a.into_bigint().to_bytes_le())
}
