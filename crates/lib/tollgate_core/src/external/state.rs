//! Signed OAuth `state` parameter.
//!
//! The state is an HS256 JWT over the shared secret carrying the provider,
//! where to send the browser afterwards and, for account linking, the user to
//! attach the identity to. It expires five minutes after issue.

use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// State lifetime in seconds.
pub const STATE_TTL_SECS: i64 = 5 * 60;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("Could not sign OAuth state: {0}")]
    Signing(String),

    #[error("OAuth state is invalid: {0}")]
    Invalid(String),
}

/// Claims carried through the provider round trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthState {
    pub exp: i64,
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referrer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linking_target_id: Option<Uuid>,
}

/// Signs and verifies [`OAuthState`] tokens.
#[derive(Clone)]
pub struct StateCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl std::fmt::Debug for StateCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateCodec").finish_non_exhaustive()
    }
}

impl StateCodec {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
        }
    }

    pub fn sign(
        &self,
        provider: &str,
        referrer: Option<&str>,
        linking_target_id: Option<Uuid>,
    ) -> Result<String, StateError> {
        self.sign_at(provider, referrer, linking_target_id, Utc::now().timestamp())
    }

    pub fn sign_at(
        &self,
        provider: &str,
        referrer: Option<&str>,
        linking_target_id: Option<Uuid>,
        now: i64,
    ) -> Result<String, StateError> {
        let claims = OAuthState {
            exp: now + STATE_TTL_SECS,
            provider: provider.to_string(),
            referrer: referrer.map(str::to_string),
            linking_target_id,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| StateError::Signing(e.to_string()))
    }

    pub fn verify(&self, token: &str) -> Result<OAuthState, StateError> {
        self.verify_at(token, Utc::now().timestamp())
    }

    pub fn verify_at(&self, token: &str, now: i64) -> Result<OAuthState, StateError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = false;
        validation.set_required_spec_claims(&["exp"]);

        let state = decode::<OAuthState>(token, &self.decoding, &validation)
            .map_err(|e| StateError::Invalid(e.to_string()))?
            .claims;
        if state.exp <= now {
            return Err(StateError::Invalid("state has expired".into()));
        }
        if state.provider.is_empty() {
            return Err(StateError::Invalid("state names no provider".into()));
        }
        Ok(state)
    }
}
