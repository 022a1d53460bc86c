use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Failed to encode: {0}")]
    Encode(serde_cbor::Error),
    #[error("Failed to decode: {0}")]
    Decode(serde_cbor::Error),
}

pub fn encode<T: Serialize>(value: &T) -> Result<Bytes, CodecError> {
    serde_cbor::to_vec(value).map(Bytes::from).map_err(CodecError::Encode)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    serde_cbor::from_slice(bytes).map_err(CodecError::Decode)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn garbage_fails_to_decode() {
        let result = decode::<Result<u32, String>>(b"\xff\x00garbage");

        assert!(matches!(result, Err(CodecError::Decode(_))));
    }
}
