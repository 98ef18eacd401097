//! ES512 (ECDSA over P-521 with SHA-512), which `jsonwebtoken` cannot do.
//!
//! Signatures use the fixed-width `r || s` form of RFC 7518 section 3.4.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use ecdsa::signature::{Signer, Verifier};
use p521::ecdsa::{Signature, SigningKey, VerifyingKey};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;

use super::{Jwk, KeyError};

/// Byte length of a P-521 scalar or coordinate.
const COORDINATE_LEN: usize = 66;

pub fn signing_key(jwk: &Jwk) -> Result<SigningKey, KeyError> {
    let d = jwk.fixed_param("d", &jwk.d, COORDINATE_LEN)?;
    SigningKey::from_slice(&d)
        .map_err(|e| jwk.config_error(format!("bad P-521 private key: {e}")))
}

pub fn verifying_key(jwk: &Jwk) -> Result<VerifyingKey, KeyError> {
    let x = jwk.fixed_param("x", &jwk.x, COORDINATE_LEN)?;
    let y = jwk.fixed_param("y", &jwk.y, COORDINATE_LEN)?;
    let mut sec1 = Vec::with_capacity(1 + 2 * COORDINATE_LEN);
    sec1.push(0x04);
    sec1.extend_from_slice(&x);
    sec1.extend_from_slice(&y);
    VerifyingKey::from_sec1_bytes(&sec1)
        .map_err(|e| jwk.config_error(format!("bad P-521 public key: {e}")))
}

pub fn sign(key: &SigningKey, message: &[u8]) -> Result<Vec<u8>, KeyError> {
    let signature: Signature = key
        .try_sign(message)
        .map_err(|e| KeyError::Config(format!("ES512 signing failed: {e}")))?;
    Ok(signature.to_bytes().to_vec())
}

pub fn verify(key: &VerifyingKey, message: &[u8], signature: &[u8]) -> bool {
    Signature::from_slice(signature).is_ok_and(|sig| key.verify(message, &sig).is_ok())
}

/// Sign `claims` into a compact JWS.
pub fn encode<T: Serialize>(
    kid: Option<&str>,
    claims: &T,
    key: &SigningKey,
) -> Result<String, KeyError> {
    let mut header = json!({ "typ": "JWT", "alg": "ES512" });
    if let Some(kid) = kid {
        header["kid"] = json!(kid);
    }
    let header = serde_json::to_vec(&header)
        .map_err(|e| KeyError::Config(format!("ES512 header: {e}")))?;
    let payload = serde_json::to_vec(claims)
        .map_err(|e| KeyError::Config(format!("ES512 payload: {e}")))?;

    let signing_input = format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(header),
        URL_SAFE_NO_PAD.encode(payload)
    );
    let signature = sign(key, signing_input.as_bytes())?;
    Ok(format!("{signing_input}.{}", URL_SAFE_NO_PAD.encode(signature)))
}

/// Check a compact JWS signature and decode its payload. Claims are not
/// validated here.
pub fn decode<T: DeserializeOwned>(token: &str, key: &VerifyingKey) -> Result<T, KeyError> {
    let bad = |message: &str| KeyError::BadToken(message.to_string());

    let mut parts = token.split('.');
    let (Some(header), Some(payload), Some(signature), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(bad("token must have three segments"));
    };
    let signature = URL_SAFE_NO_PAD
        .decode(signature)
        .map_err(|_| bad("signature is not base64url"))?;
    let signing_input = &token[..header.len() + 1 + payload.len()];
    if !verify(key, signing_input.as_bytes(), &signature) {
        return Err(bad("ES512 signature does not verify"));
    }

    let payload = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|_| bad("payload is not base64url"))?;
    serde_json::from_slice(&payload).map_err(|e| KeyError::BadToken(format!("claims: {e}")))
}
