//! Text encoding of sealed envelopes, and recovery of structured values from
//! blobs written by older producers
//!
//! Sealed blobs are standard (padded) base64 of `nonce || ciphertext || tag`.
//! Wrapped keys are base64-encoded on their own.
//!
//! Producers have changed their blob format several times without tagging
//! it, so [`decode`] tries a fixed, ordered list of [`Strategy`] values and
//! returns the first one that yields a structured value:
//!
//! 1. base64, then UTF-8 JSON text
//! 2. already structured (returned unchanged)
//! 3. plain JSON text
//! 4. lenient base64, invalid UTF-8 sequences dropped, then JSON
//! 5. lenient base64, bytes read as Latin-1, then JSON
//!
//! Strategies 4 and 5 accept corrupted input instead of rejecting it. They
//! are kept because stored records depend on them.

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::cipher::Envelope;
use crate::error::{ErrorCategory, ErrorKind, PqsealError, Result};

/// Base64 engine used by the lossy strategies: padding is optional.
const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// Longest prefix of an undecodable input quoted in error messages.
const QUOTED_INPUT_LIMIT: usize = 64;

/// One way of turning a stored blob into a structured value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Base64Json,
    Structured,
    PlainJson,
    Base64LossyUtf8,
    Base64Latin1,
}

/// All strategies, in the order [`decode`] tries them.
pub const STRATEGIES: [Strategy; 5] = [
    Strategy::Base64Json,
    Strategy::Structured,
    Strategy::PlainJson,
    Strategy::Base64LossyUtf8,
    Strategy::Base64Latin1,
];

impl Strategy {
    pub fn name(self) -> &'static str {
        match self {
            Strategy::Base64Json => "base64-json",
            Strategy::Structured => "structured",
            Strategy::PlainJson => "plain-json",
            Strategy::Base64LossyUtf8 => "base64-lossy-utf8",
            Strategy::Base64Latin1 => "base64-latin1",
        }
    }

    /// Whether the strategy may silently alter corrupted input.
    pub fn is_lossy(self) -> bool {
        matches!(self, Strategy::Base64LossyUtf8 | Strategy::Base64Latin1)
    }

    /// Runs this strategy alone. The error is a short reason string.
    pub fn attempt(self, input: &Value) -> std::result::Result<Value, String> {
        match self {
            Strategy::Structured => match input {
                Value::String(_) => Err("input is text".to_string()),
                other => Ok(other.clone()),
            },
            Strategy::Base64Json => base64_json(as_text(input)?),
            Strategy::PlainJson => plain_json(as_text(input)?),
            Strategy::Base64LossyUtf8 => base64_lossy_utf8(as_text(input)?),
            Strategy::Base64Latin1 => base64_latin1(as_text(input)?),
        }
    }
}

fn as_text(input: &Value) -> std::result::Result<&str, String> {
    input
        .as_str()
        .ok_or_else(|| "input is not text".to_string())
}

fn parse_json(text: &str) -> std::result::Result<Value, String> {
    serde_json::from_str(text).map_err(|e| format!("invalid JSON: {}", e))
}

/// Strategy 1: strict base64, strict UTF-8, JSON.
pub fn base64_json(text: &str) -> std::result::Result<Value, String> {
    let bytes = STANDARD
        .decode(text)
        .map_err(|e| format!("base64 decoding failed: {}", e))?;
    let text = String::from_utf8(bytes).map_err(|e| format!("invalid UTF-8: {}", e))?;
    parse_json(&text)
}

/// Strategy 3: the blob is JSON text that was never base64-wrapped.
pub fn plain_json(text: &str) -> std::result::Result<Value, String> {
    parse_json(text)
}

/// Strategy 4: lenient base64, invalid UTF-8 sequences dropped.
pub fn base64_lossy_utf8(text: &str) -> std::result::Result<Value, String> {
    let bytes = lenient_decode(text)?;
    parse_json(&drop_invalid_utf8(&bytes))
}

fn drop_invalid_utf8(bytes: &[u8]) -> String {
    let mut recovered = String::with_capacity(bytes.len());
    for chunk in bytes.utf8_chunks() {
        recovered.push_str(chunk.valid());
    }
    recovered
}

/// Strategy 5: lenient base64, each byte taken as the code point of the
/// same value.
pub fn base64_latin1(text: &str) -> std::result::Result<Value, String> {
    let bytes = lenient_decode(text)?;
    let recovered: String = bytes.iter().map(|&b| char::from(b)).collect();
    parse_json(&recovered)
}

fn lenient_decode(text: &str) -> std::result::Result<Vec<u8>, String> {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    LENIENT
        .decode(compact)
        .map_err(|e| format!("lenient base64 decoding failed: {}", e))
}

/// Recovers a structured value from a stored blob, trying every strategy in
/// order.
pub fn decode(input: &Value) -> Result<Value> {
    let mut failures = Vec::with_capacity(STRATEGIES.len());

    for strategy in STRATEGIES {
        match strategy.attempt(input) {
            Ok(value) => {
                if strategy.is_lossy() {
                    warn!(strategy = strategy.name(), "blob recovered by lossy legacy decoding");
                } else {
                    info!(strategy = strategy.name(), "blob decoded");
                }
                return Ok(value);
            }
            Err(reason) => {
                debug!(strategy = strategy.name(), %reason, "decode strategy did not apply");
                failures.push(format!("{}: {}", strategy.name(), reason));
            }
        }
    }

    let original = match input {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    Err(PqsealError::decoding_exhausted(
        format!(
            "all decoding strategies failed for input {:?} ({})",
            quote(&original),
            failures.join("; ")
        ),
        original,
    ))
}

/// Shorthand for [`decode`] on a text blob.
pub fn decode_text(text: &str) -> Result<Value> {
    decode(&Value::String(text.to_string()))
}

fn quote(input: &str) -> String {
    match input.char_indices().nth(QUOTED_INPUT_LIMIT) {
        Some((end, _)) => format!("{}...", &input[..end]),
        None => input.to_string(),
    }
}

/// Encodes a sealed envelope as a single transport-safe string.
pub fn encode(envelope: &Envelope) -> String {
    STANDARD.encode(envelope.to_bytes())
}

/// Encodes the wrapped key for storage next to the blob.
pub fn encode_wrapped_key(wrapped_key: &[u8]) -> String {
    STANDARD.encode(wrapped_key)
}

/// Decodes a stored wrapped key.
pub fn decode_wrapped_key(text: &str) -> Result<Vec<u8>> {
    STANDARD.decode(text.trim()).map_err(|e| {
        PqsealError::with_kind_and_source(
            ErrorCategory::User,
            ErrorKind::MalformedRecord,
            format!("wrapped key is not valid base64: {}", e),
            e,
        )
    })
}

/// Recognizes a blob produced by [`encode`].
///
/// Surrounding whitespace is ignored, as for wrapped keys. Returns `None`
/// for anything the legacy chain should handle instead:
/// text that is not strict base64, too short to hold a nonce and tag, or
/// whose decoded bytes are themselves JSON text once invalid UTF-8 is
/// dropped.
pub fn sealed_envelope(blob: &str) -> Option<Envelope> {
    let bytes = STANDARD.decode(blob.trim()).ok()?;
    if bytes.len() < Envelope::MIN_LEN {
        return None;
    }
    if parse_json(&drop_invalid_utf8(&bytes)).is_ok() {
        return None;
    }
    Envelope::from_bytes(&bytes).ok()
}
