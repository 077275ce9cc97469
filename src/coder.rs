use crate::error::{Error, Result};
use serde::{de::DeserializeOwned, Serialize};

/// An object that can encode a particular type to, and decode it from, a
/// `Vec<u8>`. The implementation can be based on a `serde` data format, or
/// anything else.
pub trait Coder {
    type Type;

    /// Convert an instance of the encodable type to bytes.
    fn encode(&self, inst: &Self::Type) -> Result<Vec<u8>>;

    /// Decode a buffer of bytes to the decodable type.
    fn decode(&self, data: &[u8]) -> Result<Self::Type>;
}

/// `Coder` implementation based on the CBOR format.
pub struct CborCoder<T> {
    phantom: std::marker::PhantomData<T>,
}

impl<T> CborCoder<T> {
    pub fn new() -> Self {
        Self {
            phantom: std::marker::PhantomData::<T> {},
        }
    }
}

impl<T> Default for CborCoder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Coder for CborCoder<T>
where
    T: Serialize + DeserializeOwned,
{
    type Type = T;

    fn encode(&self, inst: &Self::Type) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        ciborium::ser::into_writer(inst, &mut buffer).map_err(|e| Error::Codec(e.to_string()))?;
        Ok(buffer)
    }

    fn decode(&self, data: &[u8]) -> Result<Self::Type> {
        ciborium::de::from_reader(data).map_err(|e| Error::Codec(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
    enum Outcome {
        Accepted { rows: usize },
        Rejected(String),
    }

    #[test]
    fn cbor_coder_works() {
        let code = CborCoder::<Outcome>::new();
        for outcome in [Outcome::Accepted { rows: 4 }, Outcome::Rejected("no".into())] {
            let bytes = code.encode(&outcome).unwrap();
            assert_eq!(code.decode(&bytes).unwrap(), outcome);
        }
    }

    #[test]
    fn garbage_fails_to_decode() {
        let code = CborCoder::<Outcome>::new();
        assert!(matches!(code.decode(&[0xff, 0x00]), Err(Error::Codec(_))));
    }
}
