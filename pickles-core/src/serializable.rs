use std::cell::Cell;
use std::fs;
use std::io::Cursor;
use std::path::Path;

use ark_serialize::{
    CanonicalDeserialize, CanonicalSerialize, Compress, Read, SerializationError, Validate,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::utils::errors::PicklesError;

/// Compressed canonical encoding with strict decoding: every decoder rejects
/// trailing bytes, so each value has exactly one accepted encoding.
pub trait Serializable: CanonicalSerialize + CanonicalDeserialize + Sized {
    /// Gets the byte size of the serialized data
    fn size(&self) -> usize {
        self.compressed_size()
    }

    fn to_bytes(&self) -> Result<Vec<u8>, PicklesError> {
        let mut buffer = Vec::with_capacity(self.compressed_size());
        self.serialize_compressed(&mut buffer)?;
        Ok(buffer)
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, PicklesError> {
        let mut cursor = Cursor::new(bytes);
        let value = Self::deserialize_compressed(&mut cursor)?;
        if cursor.position() as usize != bytes.len() {
            return Err(PicklesError::Serialization(format!(
                "{} trailing bytes",
                bytes.len() - cursor.position() as usize
            )));
        }
        Ok(value)
    }

    fn to_hex(&self) -> Result<String, PicklesError> {
        Ok(hex::encode(self.to_bytes()?))
    }

    fn from_hex(s: &str) -> Result<Self, PicklesError> {
        let bytes = hex::decode(s.trim())
            .map_err(|e| PicklesError::Serialization(format!("invalid hex: {e}")))?;
        Self::from_bytes(&bytes)
    }

    fn to_base64(&self) -> Result<String, PicklesError> {
        Ok(BASE64.encode(self.to_bytes()?))
    }

    fn from_base64(s: &str) -> Result<Self, PicklesError> {
        let bytes = BASE64
            .decode(s.trim())
            .map_err(|e| PicklesError::Serialization(format!("invalid base64: {e}")))?;
        Self::from_bytes(&bytes)
    }

    /// Saves the data to a file
    fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), PicklesError> {
        fs::write(path.as_ref(), self.to_bytes()?)
            .map_err(|e| PicklesError::Serialization(format!("{}: {e}", path.as_ref().display())))
    }

    /// Reads data from a file
    fn from_file(path: impl AsRef<Path>) -> Result<Self, PicklesError> {
        let bytes = fs::read(path.as_ref())
            .map_err(|e| PicklesError::Serialization(format!("{}: {e}", path.as_ref().display())))?;
        Self::from_bytes(&bytes)
    }
}

/// Decodes a `u64`-length-prefixed vector in the layout ark-serialize writes.
/// Nothing is reserved up front: every element has to be read before it
/// takes memory, so a forged length runs out of input instead of allocating.
/// Lengths above `max_len` are rejected before any element is read.
pub(crate) fn deserialize_vec<T: CanonicalDeserialize, R: Read>(
    mut reader: R,
    compress: Compress,
    validate: Validate,
    max_len: usize,
) -> Result<Vec<T>, SerializationError> {
    let len = u64::deserialize_with_mode(&mut reader, compress, validate)?;
    if len > max_len as u64 {
        return Err(SerializationError::InvalidData);
    }
    let mut values = Vec::new();
    for _ in 0..len {
        values.push(T::deserialize_with_mode(&mut reader, compress, validate)?);
    }
    Ok(values)
}

/// [`deserialize_vec`] for UTF-8 strings.
pub(crate) fn deserialize_string<R: Read>(
    reader: R,
    compress: Compress,
    validate: Validate,
    max_len: usize,
) -> Result<String, SerializationError> {
    let bytes: Vec<u8> = deserialize_vec(reader, compress, validate, max_len)?;
    String::from_utf8(bytes).map_err(|_| SerializationError::InvalidData)
}

/// Deepest nesting of proofs inside proofs, or keys inside keys, a decoder
/// follows.
pub const MAX_NESTING: usize = 128;

thread_local! {
    static NESTING: Cell<usize> = const { Cell::new(0) };
}

/// Runs a decoder one nesting level deeper, failing once [`MAX_NESTING`]
/// levels are open on this thread.
pub(crate) fn nested<T>(
    decode: impl FnOnce() -> Result<T, SerializationError>,
) -> Result<T, SerializationError> {
    let depth = NESTING.with(|n| n.get());
    if depth >= MAX_NESTING {
        return Err(SerializationError::InvalidData);
    }
    NESTING.with(|n| n.set(depth + 1));
    let result = decode();
    NESTING.with(|n| n.set(depth));
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(len: u64, items: &[u8]) -> Vec<u8> {
        let mut bytes = len.to_le_bytes().to_vec();
        bytes.extend_from_slice(items);
        bytes
    }

    #[test]
    fn forged_lengths_fail_without_allocating() {
        let bytes = encode(1 << 60, &[1, 2, 3]);
        let decoded: Result<Vec<u64>, _> =
            deserialize_vec(&bytes[..], Compress::Yes, Validate::Yes, usize::MAX);
        assert!(decoded.is_err());

        let decoded: Result<Vec<u8>, _> =
            deserialize_vec(&encode(3, &[1, 2, 3])[..], Compress::Yes, Validate::Yes, 2);
        assert!(matches!(decoded, Err(SerializationError::InvalidData)));

        let decoded: Vec<u8> =
            deserialize_vec(&encode(3, &[1, 2, 3])[..], Compress::Yes, Validate::Yes, 3).unwrap();
        assert_eq!(decoded, vec![1, 2, 3]);
    }

    #[test]
    fn layout_matches_ark_vectors() {
        let values = vec![7u32, 8, 9];
        let mut bytes = Vec::new();
        values.serialize_compressed(&mut bytes).unwrap();
        let decoded: Vec<u32> =
            deserialize_vec(&bytes[..], Compress::Yes, Validate::Yes, usize::MAX).unwrap();
        assert_eq!(decoded, values);

        let mut bytes = Vec::new();
        "pickles".to_string().serialize_compressed(&mut bytes).unwrap();
        assert_eq!(
            deserialize_string(&bytes[..], Compress::Yes, Validate::Yes, 16).unwrap(),
            "pickles"
        );
    }

    #[test]
    fn nesting_is_bounded() {
        fn descend(levels: usize) -> Result<usize, SerializationError> {
            if levels == 0 {
                return Ok(0);
            }
            nested(|| descend(levels - 1).map(|d| d + 1))
        }
        assert_eq!(descend(MAX_NESTING).unwrap(), MAX_NESTING);
        assert!(descend(MAX_NESTING + 1).is_err());
        // The counter unwinds after a failure
        assert_eq!(descend(3).unwrap(), 3);
    }
}
