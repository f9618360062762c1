//! Turning payloads into typed values.
//!
//! All helpers report failures as [`Error::Parse`]. Callers holding more context (a
//! response's status code, for example) merge it into the error afterwards.

use std::path::PathBuf;

use bytes::Bytes;
use serde::de::DeserializeOwned;

use crate::error::Error;
use crate::response::Payload;
use crate::BoxError;

/// Types which can be produced from a [`Payload`].
pub trait FromPayload: Sized {
    /// Convert the payload.
    fn from_payload(payload: &Payload) -> Result<Self, Error>;
}

impl FromPayload for Payload {
    fn from_payload(payload: &Payload) -> Result<Self, Error> {
        Ok(payload.clone())
    }
}

impl FromPayload for Bytes {
    fn from_payload(payload: &Payload) -> Result<Self, Error> {
        match payload {
            Payload::Bytes(bytes) => Ok(bytes.clone()),
            Payload::File(path) => std::fs::read(path)
                .map(Bytes::from)
                .map_err(|error| failed(error, payload)),
        }
    }
}

impl FromPayload for Vec<u8> {
    fn from_payload(payload: &Payload) -> Result<Self, Error> {
        Bytes::from_payload(payload).map(Vec::from)
    }
}

impl FromPayload for String {
    fn from_payload(payload: &Payload) -> Result<Self, Error> {
        let bytes = Bytes::from_payload(payload)?;
        String::from_utf8(bytes.to_vec()).map_err(|error| failed(error, payload))
    }
}

impl FromPayload for PathBuf {
    fn from_payload(payload: &Payload) -> Result<Self, Error> {
        match payload {
            Payload::File(path) => Ok(path.clone()),
            Payload::Bytes(_) => {
                Err(Error::parse("payload is not a file").with_payload(Some(payload.clone())))
            }
        }
    }
}

impl FromPayload for serde_json::Value {
    fn from_payload(payload: &Payload) -> Result<Self, Error> {
        decode(Some(payload))
    }
}

fn failed<E: Into<BoxError>>(error: E, payload: &Payload) -> Error {
    Error::from_parse_error(error).with_payload(Some(payload.clone()))
}

fn require(payload: Option<&Payload>) -> Result<&Payload, Error> {
    payload.ok_or_else(|| Error::parse("no payload to transform"))
}

/// Convert an optional payload into `T`.
pub fn object<T: FromPayload>(payload: Option<&Payload>) -> Result<T, Error> {
    T::from_payload(require(payload)?)
}

/// The payload's contents, reading file payloads from disk.
pub fn bytes(payload: Option<&Payload>) -> Result<Bytes, Error> {
    object(payload)
}

/// Deserialize a JSON payload.
pub fn decode<D: DeserializeOwned>(payload: Option<&Payload>) -> Result<D, Error> {
    decode_with(payload, |bytes| serde_json::from_slice(bytes))
}

/// Decode a payload with a custom decoder.
pub fn decode_with<T, E, F>(payload: Option<&Payload>, decoder: F) -> Result<T, Error>
where
    F: FnOnce(&[u8]) -> Result<T, E>,
    E: Into<BoxError>,
{
    let payload = require(payload)?;
    let bytes = Bytes::from_payload(payload)?;
    decoder(&bytes).map_err(|error| failed(error, payload))
}
