//! Interaction signature verification middleware.
//!
//! Discord signs every interaction it delivers. This middleware intercepts
//! each request to the interactions endpoint to:
//! 1. Read the `X-Signature-Ed25519` and `X-Signature-Timestamp` headers
//! 2. Buffer the body and verify the signature over `timestamp ++ body`
//! 3. Hand the untouched body to the next handler
//! 4. Reject anything unsigned or tampered with HTTP 401

use axum::{
    body::{Body, to_bytes},
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use ed25519_dalek::{Signature, Verifier as _, VerifyingKey};

use crate::error::AppError;

pub const SIGNATURE_HEADER: &str = "x-signature-ed25519";
pub const TIMESTAMP_HEADER: &str = "x-signature-timestamp";

/// Interactions are small JSON documents.
const MAX_BODY_BYTES: usize = 64 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum PublicKeyError {
    #[error("public key is not hex: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("public key must be 32 bytes, got {0}")]
    Length(usize),

    #[error("public key is not a valid ed25519 point: {0}")]
    Invalid(#[from] ed25519_dalek::SignatureError),
}

/// Parse the application's hex-encoded public key.
pub fn parse_public_key(hex_key: &str) -> Result<VerifyingKey, PublicKeyError> {
    let bytes = hex::decode(hex_key.trim())?;
    let bytes: [u8; 32] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| PublicKeyError::Length(bytes.len()))?;

    Ok(VerifyingKey::from_bytes(&bytes)?)
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, AppError> {
    headers
        .get(name)
        .and_then(|h| h.to_str().ok())
        .ok_or(AppError::InvalidSignature)
}

/// Signature verification middleware function.
///
/// # Returns
///
/// - `Ok(Response)` from the next handler when the signature verifies
/// - `Err(AppError::InvalidSignature)` otherwise (401)
/// - `Err(AppError::InvalidRequest)` if the body cannot be read (400)
pub async fn verify_signature(
    State(public_key): State<VerifyingKey>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let (parts, body) = request.into_parts();

    let signature_hex = header(&parts.headers, SIGNATURE_HEADER)?;
    let timestamp = header(&parts.headers, TIMESTAMP_HEADER)?;

    let signature_bytes = hex::decode(signature_hex).map_err(|_| AppError::InvalidSignature)?;
    let signature =
        Signature::from_slice(&signature_bytes).map_err(|_| AppError::InvalidSignature)?;

    let body = to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| AppError::InvalidRequest(format!("unreadable body: {e}")))?;

    let mut message = Vec::with_capacity(timestamp.len() + body.len());
    message.extend_from_slice(timestamp.as_bytes());
    message.extend_from_slice(&body);

    if public_key.verify(&message, &signature).is_err() {
        tracing::warn!("Rejected interaction with invalid signature");
        return Err(AppError::InvalidSignature);
    }

    let request = Request::from_parts(parts, Body::from(body));
    Ok(next.run(request).await)
}

#[cfg(test)]
pub(crate) mod test_keys {
    use ed25519_dalek::{Signer as _, SigningKey};

    pub(crate) fn signing_key() -> SigningKey {
        SigningKey::from_bytes(&[7u8; 32])
    }

    /// Hex signature over `timestamp ++ body`.
    pub(crate) fn sign(timestamp: &str, body: &str) -> String {
        let message = [timestamp.as_bytes(), body.as_bytes()].concat();
        hex::encode(signing_key().sign(&message).to_bytes())
    }
}
