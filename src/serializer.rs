//! Canonical encoding and content fingerprinting for checkpoint payloads.
//!
//! Three flavors are selectable at session construction (`spec.md` §4.A):
//! human-readable text, opaque binary, and compressed binary. All three
//! must be round-trip-lossless for the [`Value`] subset and all three must
//! agree on the fingerprint of semantically equal payloads, since the
//! fingerprint is computed from the canonical form, not from the flavor's
//! own bytes.

use miette::Diagnostic;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::value::Value;

#[derive(Debug, Error, Diagnostic)]
pub enum SerializationError {
    #[error("payload contains an unrepresentable value: {0}")]
    #[diagnostic(
        code(mindtrace::serializer::unrepresentable),
        help("Only JSON-representable values (null, bool, number, string, list, map) are admissible.")
    )]
    Unrepresentable(String),

    #[error("decode failed: {0}")]
    #[diagnostic(code(mindtrace::serializer::decode))]
    Decode(String),

    #[error("compression error: {0}")]
    #[diagnostic(code(mindtrace::serializer::compress))]
    Compress(String),
}

pub type Result<T> = std::result::Result<T, SerializationError>;

/// Selects which on-wire encoding a [`Serializer`] produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SerializerFlavor {
    /// Pretty, human-readable JSON. Preferred for the file-tree backend.
    #[default]
    Text,
    /// Compact JSON bytes. Fastest; no human-readability requirement.
    Binary,
    /// Binary flavor, zstd-compressed when that actually shrinks the payload.
    Compressed,
}

/// Converts a [`Value`] to/from its on-wire byte form and computes a
/// deterministic content fingerprint.
///
/// Semantic equality of two payloads implies equal fingerprints: the
/// fingerprint is always computed from [`Value::canonical_bytes`], never
/// from the flavor-specific encoding.
#[derive(Debug, Clone, Copy)]
pub struct Serializer {
    flavor: SerializerFlavor,
}

impl Serializer {
    #[must_use]
    pub fn new(flavor: SerializerFlavor) -> Self {
        Self { flavor }
    }

    #[must_use]
    pub fn flavor(&self) -> SerializerFlavor {
        self.flavor
    }

    /// Encode a value to its on-wire byte form for the configured flavor.
    pub fn encode(&self, value: &Value) -> Result<Vec<u8>> {
        check_representable(value)?;
        let json = serde_json::to_value(value.clone()).map_err(|e| {
            SerializationError::Unrepresentable(format!("value not JSON-representable: {e}"))
        })?;
        match self.flavor {
            SerializerFlavor::Text => serde_json::to_vec_pretty(&json)
                .map_err(|e| SerializationError::Unrepresentable(e.to_string())),
            SerializerFlavor::Binary => serde_json::to_vec(&json)
                .map_err(|e| SerializationError::Unrepresentable(e.to_string())),
            SerializerFlavor::Compressed => {
                let raw = serde_json::to_vec(&json)
                    .map_err(|e| SerializationError::Unrepresentable(e.to_string()))?;
                compress(&raw)
            }
        }
    }

    /// Decode bytes produced by [`Serializer::encode`] back into a [`Value`].
    pub fn decode(&self, bytes: &[u8]) -> Result<Value> {
        let raw = match self.flavor {
            SerializerFlavor::Text | SerializerFlavor::Binary => bytes.to_vec(),
            SerializerFlavor::Compressed => decompress(bytes)?,
        };
        let json: serde_json::Value = serde_json::from_slice(&raw)
            .map_err(|e| SerializationError::Decode(e.to_string()))?;
        Ok(Value::from(json))
    }

    /// Compute the deterministic content fingerprint over
    /// `(state, metadata, logic_step)`, independent of the configured
    /// flavor and independent of map key insertion order.
    #[must_use]
    pub fn fingerprint(state: &Value, metadata: &Value, logic_step: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(state.canonical_bytes());
        hasher.update([0u8]); // separator so {"a":{}} + "b" can't alias {"a":{"b"...
        hasher.update(metadata.canonical_bytes());
        hasher.update([0u8]);
        hasher.update(logic_step.as_bytes());
        let digest = hasher.finalize();
        format!("{digest:x}")[..16].to_string()
    }
}

/// `serde_json` silently maps non-finite floats to `null` rather than
/// erroring, which would defeat `SerializationError`'s whole purpose: walk
/// the tree ourselves first so a `NaN`/`Infinity` leaf is caught as
/// unrepresentable instead of being swallowed.
fn check_representable(value: &Value) -> Result<()> {
    match value {
        Value::Number(n) if !n.is_finite() => Err(SerializationError::Unrepresentable(format!(
            "non-finite number: {n}"
        ))),
        Value::List(items) => items.iter().try_for_each(check_representable),
        Value::Map(map) => map.values().try_for_each(check_representable),
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => Ok(()),
    }
}

/// One tag byte distinguishing whether the payload that follows was
/// actually zstd-compressed, so payloads that don't shrink (small or
/// already-dense payloads) aren't penalized with a negative compression
/// ratio.
const TAG_RAW: u8 = 0;
const TAG_ZSTD: u8 = 1;

fn compress(raw: &[u8]) -> Result<Vec<u8>> {
    let compressed = zstd::stream::encode_all(raw, 3)
        .map_err(|e| SerializationError::Compress(e.to_string()))?;
    if compressed.len() < raw.len() {
        let mut out = Vec::with_capacity(compressed.len() + 1);
        out.push(TAG_ZSTD);
        out.extend_from_slice(&compressed);
        Ok(out)
    } else {
        let mut out = Vec::with_capacity(raw.len() + 1);
        out.push(TAG_RAW);
        out.extend_from_slice(raw);
        Ok(out)
    }
}

fn decompress(bytes: &[u8]) -> Result<Vec<u8>> {
    let (tag, rest) = bytes
        .split_first()
        .ok_or_else(|| SerializationError::Decode("empty payload".to_string()))?;
    match *tag {
        TAG_RAW => Ok(rest.to_vec()),
        TAG_ZSTD => zstd::stream::decode_all(rest)
            .map_err(|e| SerializationError::Compress(e.to_string())),
        other => Err(SerializationError::Decode(format!(
            "unknown compression tag {other}"
        ))),
    }
}
