//! Value codec: the boundary between typed values and stored documents.
//!
//! Payloads, metadata and aggregate state are all persisted as a
//! storage-neutral [`Document`] tree. Backends never see typed values.

use serde::{Serialize, de::DeserializeOwned};

/// Structured document as written to and read from storage.
pub type Document = serde_json::Value;

/// Serialization strategy for payloads, metadata and aggregate state.
pub trait Codec: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Encode a value into a stored document.
    ///
    /// # Errors
    ///
    /// Returns a codec error if the value cannot be represented.
    fn encode<T>(&self, value: &T) -> Result<Document, Self::Error>
    where
        T: Serialize + ?Sized;

    /// Decode a stored document back into a typed value.
    ///
    /// # Errors
    ///
    /// Returns a codec error if the document does not match `T`.
    fn decode<T>(&self, document: &Document) -> Result<T, Self::Error>
    where
        T: DeserializeOwned;
}

/// JSON codec backed by `serde_json`.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    type Error = serde_json::Error;

    fn encode<T>(&self, value: &T) -> Result<Document, Self::Error>
    where
        T: Serialize + ?Sized,
    {
        serde_json::to_value(value)
    }

    fn decode<T>(&self, document: &Document) -> Result<T, Self::Error>
    where
        T: DeserializeOwned,
    {
        T::deserialize(document)
    }
}
