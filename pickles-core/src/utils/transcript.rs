use ark_ff::{BigInteger, PrimeField};
use ark_serialize::CanonicalSerialize;
use sha3::{Digest, Keccak256};

pub trait Transcript: Clone + Send + Sync + 'static {
    fn new(label: &'static [u8]) -> Self;
    fn append_message(&mut self, msg: &'static [u8]);
    fn append_bytes(&mut self, bytes: &[u8]);
    fn append_u64(&mut self, x: u64);
    fn append_scalar<F: PrimeField>(&mut self, scalar: &F);
    fn append_scalars<F: PrimeField>(&mut self, scalars: &[F]);
    fn append_serializable<S: CanonicalSerialize>(&mut self, item: &S);
    fn challenge_scalar<F: PrimeField>(&mut self) -> F;
    fn challenge_vector<F: PrimeField>(&mut self, len: usize) -> Vec<F>;
    /// Running state; used as the "sponge digest" of a proof.
    fn state(&self) -> [u8; 32];
}

/// Fiat-Shamir transcript over a Keccak256 running state.
#[derive(Clone)]
pub struct KeccakTranscript {
    state: [u8; 32],
    /// We append an ordinal to each invocation of the hash
    n_rounds: u32,
}

impl KeccakTranscript {
    fn hasher(&self) -> Keccak256 {
        Keccak256::new()
            .chain_update(self.state)
            .chain_update(self.n_rounds.to_be_bytes())
    }

    fn update_state(&mut self, new_state: [u8; 32]) {
        self.state = new_state;
        self.n_rounds += 1;
    }

    fn challenge_bytes32(&mut self) -> [u8; 32] {
        let rand: [u8; 32] = self.hasher().finalize().into();
        self.update_state(rand);
        rand
    }

    /// Reseeds a transcript from a previously exported state.
    pub fn from_state(label: &'static [u8], state: [u8; 32]) -> Self {
        let mut transcript = Self::new(label);
        transcript.append_bytes(&state);
        transcript
    }
}

impl Transcript for KeccakTranscript {
    fn new(label: &'static [u8]) -> Self {
        assert!(label.len() < 33);
        let mut padded = [0u8; 32];
        padded[..label.len()].copy_from_slice(label);
        Self {
            state: Keccak256::digest(padded).into(),
            n_rounds: 0,
        }
    }

    fn append_message(&mut self, msg: &'static [u8]) {
        // Messages are right padded to one 32-byte word
        assert!(msg.len() < 33);
        let mut packed = [0u8; 32];
        packed[..msg.len()].copy_from_slice(msg);
        let hasher = self.hasher().chain_update(packed);
        self.update_state(hasher.finalize().into());
    }

    fn append_bytes(&mut self, bytes: &[u8]) {
        let hasher = self
            .hasher()
            .chain_update((bytes.len() as u64).to_be_bytes())
            .chain_update(bytes);
        self.update_state(hasher.finalize().into());
    }

    fn append_u64(&mut self, x: u64) {
        let mut packed = [0u8; 32];
        packed[24..].copy_from_slice(&x.to_be_bytes());
        let hasher = self.hasher().chain_update(packed);
        self.update_state(hasher.finalize().into());
    }

    fn append_scalar<F: PrimeField>(&mut self, scalar: &F) {
        self.append_bytes(&scalar.into_bigint().to_bytes_be());
    }

    fn append_scalars<F: PrimeField>(&mut self, scalars: &[F]) {
        self.append_message(b"begin_append_vector");
        self.append_u64(scalars.len() as u64);
        for item in scalars.iter() {
            self.append_scalar(item);
        }
        self.append_message(b"end_append_vector");
    }

    fn append_serializable<S: CanonicalSerialize>(&mut self, item: &S) {
        let mut buf = Vec::with_capacity(item.compressed_size());
        item.serialize_compressed(&mut buf)
            .expect("serializing into a Vec cannot fail");
        self.append_bytes(&buf);
    }

    fn challenge_scalar<F: PrimeField>(&mut self) -> F {
        // 64 bytes so the reduction mod |F| is close to uniform
        let lo = self.challenge_bytes32();
        let hi = self.challenge_bytes32();
        let mut wide = [0u8; 64];
        wide[..32].copy_from_slice(&lo);
        wide[32..].copy_from_slice(&hi);
        F::from_le_bytes_mod_order(&wide)
    }

    fn challenge_vector<F: PrimeField>(&mut self, len: usize) -> Vec<F> {
        (0..len).map(|_| self.challenge_scalar()).collect()
    }

    fn state(&self) -> [u8; 32] {
        self.state
    }
}

/// Keccak digest of a labelled sequence of byte strings; used for content
/// addressing.
pub fn keccak_digest(label: &[u8], parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Keccak256::new().chain_update((label.len() as u64).to_be_bytes());
    hasher.update(label);
    for part in parts {
        hasher.update((part.len() as u64).to_be_bytes());
        hasher.update(part);
    }
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ark_vesta::Fr;

    #[test]
    fn prover_and_verifier_agree() {
        let mut p = KeccakTranscript::new(b"test");
        let mut v = KeccakTranscript::new(b"test");
        for t in [&mut p, &mut v] {
            t.append_u64(7);
            t.append_scalars(&[Fr::from(1u64), Fr::from(2u64)]);
        }
        let a: Fr = p.challenge_scalar();
        let b: Fr = v.challenge_scalar();
        assert_eq!(a, b);
        assert_eq!(p.state(), v.state());
    }

    #[test]
    fn length_is_bound() {
        let mut a = KeccakTranscript::new(b"test");
        let mut b = KeccakTranscript::new(b"test");
        a.append_bytes(&[1, 2]);
        a.append_bytes(&[3]);
        b.append_bytes(&[1]);
        b.append_bytes(&[2, 3]);
        assert_ne!(a.challenge_scalar::<Fr>(), b.challenge_scalar::<Fr>());
    }
}
