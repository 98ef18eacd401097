//! Access token issuing and verification.
//!
//! Tokens are signed with the key set's single signing key; its `kid` goes in
//! the header so verifiers can pick the right key after rotation. ES512 keys
//! sign and verify through [`crate::keys::es512`], everything else through
//! `jsonwebtoken`.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use jsonwebtoken::{Header, Validation, decode, encode};
use serde::Deserialize;
use thiserror::Error;

use crate::keys::{JwsAlgorithm, KeyError, KeySet, SigningMaterial, VerificationMaterial, es512};
use crate::models::auth::{AccessTokenClaims, User};

/// Token errors.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("Signing error: {0}")]
    Signing(String),

    #[error("Invalid token: {0}")]
    Invalid(String),

    #[error(transparent)]
    Key(#[from] KeyError),
}

/// A freshly minted access token.
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: String,
    /// Lifetime in seconds.
    pub expires_in: i64,
    /// Expiry as a unix timestamp.
    pub expires_at: i64,
}

/// Mints access tokens.
#[derive(Debug, Clone)]
pub struct TokenIssuer {
    keys: Arc<KeySet>,
    expires_after: i64,
}

impl TokenIssuer {
    pub fn new(keys: Arc<KeySet>, expires_after_secs: i64) -> Self {
        Self {
            keys,
            expires_after: expires_after_secs,
        }
    }

    /// Access token lifetime in seconds.
    pub fn expires_after(&self) -> i64 {
        self.expires_after
    }

    /// Issue an access token for `user`, valid from now.
    pub fn issue(&self, user: &User) -> Result<AccessToken, TokenError> {
        self.issue_at(user, Utc::now().timestamp())
    }

    /// Issue an access token as if the current time were `now`.
    pub fn issue_at(&self, user: &User, now: i64) -> Result<AccessToken, TokenError> {
        let signer = self.keys.signing_key()?;
        let cannot_sign = || {
            TokenError::Signing(format!(
                "key {} cannot produce {} signatures",
                signer.kid(),
                signer.algorithm()
            ))
        };
        let material = signer.signing_material().ok_or_else(cannot_sign)?;

        let claims = AccessTokenClaims {
            sub: user.id.to_string(),
            iat: now,
            exp: now + self.expires_after,
            email: user.email.clone(),
            username: user.username.clone(),
        };
        let kid = (!signer.kid().is_empty()).then(|| signer.kid().to_string());

        let token = match material {
            SigningMaterial::Jwt(key) => {
                let alg = signer.algorithm().jsonwebtoken().ok_or_else(cannot_sign)?;
                let mut header = Header::new(alg);
                header.kid = kid;
                encode(&header, &claims, key)
                    .map_err(|e| TokenError::Signing(format!("jwt encode: {e}")))?
            }
            SigningMaterial::Es512(key) => es512::encode(kid.as_deref(), &claims, key)
                .map_err(|e| TokenError::Signing(e.to_string()))?,
        };
        Ok(AccessToken {
            token,
            expires_in: self.expires_after,
            expires_at: claims.exp,
        })
    }
}

#[derive(Deserialize)]
struct RawHeader {
    alg: String,
    #[serde(default)]
    kid: Option<String>,
}

/// Read `alg` and `kid` from the protected header without trusting it.
fn read_header(token: &str) -> Result<(JwsAlgorithm, Option<String>), TokenError> {
    let malformed = |e: String| TokenError::Invalid(format!("malformed token: {e}"));
    let encoded = token.split('.').next().unwrap_or_default();
    let bytes = URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|e| malformed(e.to_string()))?;
    let header: RawHeader = serde_json::from_slice(&bytes).map_err(|e| malformed(e.to_string()))?;
    let alg = JwsAlgorithm::parse(&header.alg).ok_or_else(|| {
        TokenError::Invalid(format!("algorithm {:?} is not allowed", header.alg))
    })?;
    Ok((alg, header.kid))
}

/// Verifies access tokens against the key set and an algorithm allow-list.
#[derive(Debug, Clone)]
pub struct TokenVerifier {
    keys: Arc<KeySet>,
    allowed: Vec<JwsAlgorithm>,
}

impl TokenVerifier {
    /// Verifier accepting only the algorithms in `allowed`.
    pub fn new(keys: Arc<KeySet>, allowed: Vec<JwsAlgorithm>) -> Self {
        Self { keys, allowed }
    }

    /// Verifier accepting every algorithm the key set can verify.
    pub fn from_keys(keys: Arc<KeySet>) -> Self {
        let allowed = keys.allowed_algorithms();
        Self::new(keys, allowed)
    }

    pub fn verify(&self, token: &str) -> Result<AccessTokenClaims, TokenError> {
        self.verify_at(token, Utc::now().timestamp())
    }

    /// Verify a token as if the current time were `now`.
    pub fn verify_at(&self, token: &str, now: i64) -> Result<AccessTokenClaims, TokenError> {
        let (alg, kid) = read_header(token)?;
        if !self.allowed.contains(&alg) {
            return Err(TokenError::Invalid(format!("algorithm {alg} is not allowed")));
        }
        let key = self
            .keys
            .verification_key(kid.as_deref(), alg)
            .map_err(|e| TokenError::Invalid(e.to_string()))?;

        let claims: AccessTokenClaims = match (key, alg.jsonwebtoken()) {
            (VerificationMaterial::Jwt(key), Some(jwt_alg)) => {
                // Expiry is checked below against `now` so callers can pin the clock.
                let mut validation = Validation::new(jwt_alg);
                validation.leeway = 0;
                validation.validate_exp = false;
                validation.set_required_spec_claims(&["exp", "iat", "sub"]);

                decode::<AccessTokenClaims>(token, key, &validation)
                    .map_err(|e| TokenError::Invalid(e.to_string()))?
                    .claims
            }
            (VerificationMaterial::Es512(key), None) => {
                es512::decode(token, key).map_err(|e| TokenError::Invalid(e.to_string()))?
            }
            _ => {
                return Err(TokenError::Invalid(format!(
                    "key {kid:?} cannot verify {alg} tokens"
                )));
            }
        };

        if claims.exp <= now {
            return Err(TokenError::Invalid("token has expired".into()));
        }
        if claims.iat > now {
            return Err(TokenError::Invalid("token was issued in the future".into()));
        }
        Ok(claims)
    }
}
