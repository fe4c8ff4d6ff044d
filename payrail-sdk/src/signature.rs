//! HMAC signing and verification of webhook bodies.
//!
//! Every webhook POST carries the signature of its raw body:
//!
//! ```text
//! Payrail-Signature: {base64(HMAC-SHA256(raw_body, subscription_secret))}
//! Payrail-Event: payment.completed
//! ```
//!
//! Base64 is RFC 4648 without padding. Subscribers verify against the exact
//! bytes they received, never a re-serialization.

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Header name for the HMAC signature.
pub const SIGNATURE_HEADER: &str = "Payrail-Signature";

/// Header name carrying the event name of a webhook body.
pub const EVENT_HEADER: &str = "Payrail-Event";

/// Errors produced by signature operations.
#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    #[error("invalid base64 encoding")]
    InvalidBase64,
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid signature")]
    SignatureMismatch,
}

impl From<ring::error::Unspecified> for SignatureError {
    fn from(_: ring::error::Unspecified) -> Self {
        Self::SignatureMismatch
    }
}

// ---------------------------------------------------------------------------
// SignedObject
// ---------------------------------------------------------------------------

/// A serialized body together with the HMAC-SHA256 signature of its bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedObject<T> {
    pub body: T,
    pub json: String,
    pub signature: Box<[u8]>,
}

impl<T: Serialize> SignedObject<T> {
    /// Serialize `body` to JSON and sign the resulting bytes with `key`.
    pub fn new(body: T, key: &[u8]) -> Result<Self, serde_json::Error> {
        let json = serde_json::to_string(&body)?;
        let signature = sign_bytes(json.as_bytes(), key);
        Ok(Self {
            body,
            json,
            signature,
        })
    }

    /// Format the `Payrail-Signature` header value.
    pub fn to_header(&self) -> String {
        encode_signature(&self.signature)
    }
}

impl<T: DeserializeOwned> SignedObject<T> {
    /// Reconstruct from a raw `Payrail-Signature` header value and the raw
    /// body. Does **not** verify; call [`verify`](Self::verify).
    pub fn from_header_and_body(header_value: &str, body_json: String) -> Result<Self, SignatureError> {
        let signature = decode_signature(header_value)?;
        let body: T = serde_json::from_str(&body_json)?;
        Ok(Self {
            body,
            json: body_json,
            signature,
        })
    }

    /// Verify the HMAC, consuming `self` and returning the authenticated body.
    pub fn verify(self, key: &[u8]) -> Result<T, SignatureError> {
        verify_bytes(self.json.as_bytes(), &self.signature, key)?;
        Ok(self.body)
    }
}

// ---------------------------------------------------------------------------
// Raw helpers
// ---------------------------------------------------------------------------

/// HMAC-SHA256 of `data` keyed by `key`.
pub fn sign_bytes(data: &[u8], key: &[u8]) -> Box<[u8]> {
    let tag = ring::hmac::sign(&ring::hmac::Key::new(ring::hmac::HMAC_SHA256, key), data);
    tag.as_ref().to_owned().into_boxed_slice()
}

/// Compute the `Payrail-Signature` header value for a raw body.
pub fn signature_header(body: &[u8], key: &[u8]) -> String {
    encode_signature(&sign_bytes(body, key))
}

/// Constant-time check of `signature` against `data`.
pub fn verify_bytes(data: &[u8], signature: &[u8], key: &[u8]) -> Result<(), SignatureError> {
    ring::hmac::verify(
        &ring::hmac::Key::new(ring::hmac::HMAC_SHA256, key),
        data,
        signature,
    )?;
    Ok(())
}

pub fn encode_signature(signature: &[u8]) -> String {
    fast32::base64::RFC4648_NOPAD.encode(signature)
}

pub fn decode_signature(value: &str) -> Result<Box<[u8]>, SignatureError> {
    fast32::base64::RFC4648_NOPAD
        .decode_str(value.trim())
        .map(Vec::into_boxed_slice)
        .map_err(|_| SignatureError::InvalidBase64)
}

/// Verify and deserialize an incoming Payrail webhook.
///
/// * `signature_header` – value of the `Payrail-Signature` request header.
/// * `body` – raw request body as received.
/// * `secret` – the subscription secret shared with Payrail.
pub fn verify_webhook<T: DeserializeOwned>(
    signature_header: &str,
    body: &str,
    secret: &[u8],
) -> Result<T, SignatureError> {
    SignedObject::<T>::from_header_and_body(signature_header, body.to_owned())?.verify(secret)
}
