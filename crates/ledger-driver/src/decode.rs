use bytes::Bytes;

/// Converts one binary value blob into one structured value. The driver
/// invokes `decode` exactly once per blob, in page order.
pub trait Decoder: Send + Sync + 'static {
    type Value: Send;

    fn decode(&self, blob: &Bytes) -> crate::Result<Self::Value>;
}

/// Passes blobs through undecoded.
#[derive(Debug, Clone, Default)]
pub struct RawDecoder;

impl Decoder for RawDecoder {
    type Value = Bytes;

    fn decode(&self, blob: &Bytes) -> crate::Result<Bytes> {
        Ok(blob.clone())
    }
}

/// Decodes each blob as a UTF-8 string.
#[derive(Debug, Clone, Default)]
pub struct Utf8Decoder;

impl Decoder for Utf8Decoder {
    type Value = String;

    fn decode(&self, blob: &Bytes) -> crate::Result<String> {
        std::str::from_utf8(blob)
            .map(str::to_owned)
            .map_err(|err| crate::Error::Decode(err.into()))
    }
}
