//! OpenID Connect plumbing shared by providers: discovery, provider JWKS,
//! ID-token verification and the authorization-code exchange.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use sha2::{Digest, Sha256, Sha384, Sha512};
use tokio::sync::{OnceCell, RwLock};
use tracing::debug;

use super::provider::{ProviderTokens, UserClaims, UserData, UserEmail};
use super::{ProviderConfig, ProviderError, google};
use crate::keys::{Jwk, JwkSet};

/// Timeout for every request to a provider.
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Subset of the OpenID provider metadata we use.
#[derive(Debug, Clone, Deserialize)]
pub struct Discovery {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    #[serde(default)]
    pub userinfo_endpoint: Option<String>,
    pub jwks_uri: String,
}

/// Client for one OpenID issuer. Discovery is fetched once; the provider's
/// signing keys are cached and refetched when an unknown `kid` shows up.
pub struct OidcClient {
    issuer: String,
    http: reqwest::Client,
    discovery: OnceCell<Discovery>,
    jwks: RwLock<Vec<Jwk>>,
}

impl std::fmt::Debug for OidcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OidcClient")
            .field("issuer", &self.issuer)
            .finish_non_exhaustive()
    }
}

impl OidcClient {
    pub fn new(issuer: &str) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::Config(format!("HTTP client: {e}")))?;
        Ok(Self {
            issuer: issuer.trim_end_matches('/').to_string(),
            http,
            discovery: OnceCell::new(),
            jwks: RwLock::new(Vec::new()),
        })
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    // =========================================================================
    // Discovery
    // =========================================================================

    pub async fn discovery(&self) -> Result<&Discovery, ProviderError> {
        self.discovery.get_or_try_init(|| self.discover()).await
    }

    async fn discover(&self) -> Result<Discovery, ProviderError> {
        let url = format!("{}/.well-known/openid-configuration", self.issuer);
        let doc: Discovery = self.get_json(&url, None).await?;
        if doc.issuer.trim_end_matches('/') != self.issuer {
            return Err(ProviderError::Config(format!(
                "issuer mismatch: expected {:?}, discovery returned {:?}",
                self.issuer, doc.issuer
            )));
        }
        debug!(issuer = %self.issuer, "Loaded OpenID discovery document");
        Ok(doc)
    }

    // =========================================================================
    // HTTP helpers
    // =========================================================================

    /// GET a JSON document, optionally with a bearer token.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        bearer: Option<&str>,
    ) -> Result<T, ProviderError> {
        let mut request = self.http.get(url);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }
        let resp = request
            .send()
            .await
            .map_err(|e| ProviderError::Http(format!("GET {url}: {e}")))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Http(format!(
                "GET {url} returned HTTP {status}: {body}"
            )));
        }
        resp.json::<T>()
            .await
            .map_err(|e| ProviderError::Http(format!("GET {url}: invalid JSON: {e}")))
    }

    /// Exchange an authorization code at the token endpoint.
    pub async fn exchange_code(
        &self,
        config: &ProviderConfig,
        code: &str,
    ) -> Result<ProviderTokens, ProviderError> {
        let token_url = &self.discovery().await?.token_endpoint;
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", config.primary_client_id()),
            ("client_secret", config.client_secret.as_str()),
            ("redirect_uri", config.redirect_uri.as_str()),
        ];

        let resp = self
            .http
            .post(token_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&params)
            .send()
            .await
            .map_err(|e| ProviderError::Exchange(format!("token request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Exchange(format!("HTTP {status}: {body}")));
        }

        let tokens = resp
            .json::<ProviderTokens>()
            .await
            .map_err(|e| ProviderError::Exchange(format!("token response parse error: {e}")))?;
        if tokens.access_token.is_empty() {
            return Err(ProviderError::Exchange("no access token returned".into()));
        }
        Ok(tokens)
    }

    // =========================================================================
    // ID tokens
    // =========================================================================

    /// Verify an ID token's signature, issuer, audience and expiry, plus
    /// `at_hash` when both the claim and an access token are present.
    pub async fn verify_id_token(
        &self,
        id_token: &str,
        audiences: &[String],
        access_token: Option<&str>,
    ) -> Result<Value, ProviderError> {
        let header = decode_header(id_token)
            .map_err(|e| ProviderError::IdToken(format!("malformed header: {e}")))?;
        if matches!(
            header.alg,
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512
        ) {
            return Err(ProviderError::IdToken(
                "symmetric signatures are not accepted".into(),
            ));
        }
        let key = self.signing_key(header.kid.as_deref()).await?;
        let discovery = self.discovery().await?;

        let mut validation = Validation::new(header.alg);
        validation.set_audience(audiences);
        validation.set_issuer(&[discovery.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);

        let claims = decode::<Value>(id_token, &key, &validation)
            .map_err(|e| ProviderError::IdToken(e.to_string()))?
            .claims;

        if let (Some(at_hash), Some(access_token)) =
            (claims.get("at_hash").and_then(Value::as_str), access_token)
        {
            verify_at_hash(header.alg, at_hash, access_token)?;
        }
        Ok(claims)
    }

    async fn signing_key(&self, kid: Option<&str>) -> Result<DecodingKey, ProviderError> {
        if let Some(key) = self.cached_key(kid).await? {
            return Ok(key);
        }
        self.refresh_jwks().await?;
        self.cached_key(kid).await?.ok_or_else(|| {
            ProviderError::IdToken(format!("no provider key matches kid {kid:?}"))
        })
    }

    async fn cached_key(&self, kid: Option<&str>) -> Result<Option<DecodingKey>, ProviderError> {
        let keys = self.jwks.read().await;
        let found = match kid {
            Some(kid) => keys.iter().find(|k| k.kid.as_deref() == Some(kid)),
            None if keys.len() == 1 => keys.first(),
            None => None,
        };
        found
            .map(|jwk| {
                jwk.decoding_key()
                    .map_err(|e| ProviderError::IdToken(e.to_string()))
            })
            .transpose()
    }

    async fn refresh_jwks(&self) -> Result<(), ProviderError> {
        let jwks_uri = self.discovery().await?.jwks_uri.clone();
        let set: JwkSet = self.get_json(&jwks_uri, None).await?;
        debug!(issuer = %self.issuer, keys = set.keys.len(), "Fetched provider JWKS");
        *self.jwks.write().await = set.keys;
        Ok(())
    }
}

/// Check `at_hash`: the left half of the access token's digest, base64url.
pub fn verify_at_hash(
    alg: Algorithm,
    at_hash: &str,
    access_token: &str,
) -> Result<(), ProviderError> {
    let data = access_token.as_bytes();
    let digest: Vec<u8> = match alg {
        Algorithm::HS256 | Algorithm::RS256 | Algorithm::PS256 | Algorithm::ES256 => {
            Sha256::digest(data).to_vec()
        }
        Algorithm::HS384 | Algorithm::RS384 | Algorithm::PS384 | Algorithm::ES384 => {
            Sha384::digest(data).to_vec()
        }
        Algorithm::HS512 | Algorithm::RS512 | Algorithm::PS512 | Algorithm::EdDSA => {
            Sha512::digest(data).to_vec()
        }
    };
    let expected = URL_SAFE_NO_PAD.encode(&digest[..digest.len() / 2]);
    if expected != at_hash {
        return Err(ProviderError::IdToken("access token hash mismatch".into()));
    }
    Ok(())
}

/// Map verified ID-token claims, choosing the mapper by issuer.
pub fn map_id_token_claims(claims: Value) -> Result<UserData, ProviderError> {
    match claims.get("iss").and_then(Value::as_str) {
        Some(google::GOOGLE_ISSUER) => google::map_google_claims(claims),
        _ => map_generic_claims(claims),
    }
}

/// Standard OIDC claims. The token must carry an email.
pub fn map_generic_claims(claims: Value) -> Result<UserData, ProviderError> {
    let claims: UserClaims = serde_json::from_value(claims)
        .map_err(|e| ProviderError::UserData(format!("unreadable claims: {e}")))?;

    let mut emails = Vec::new();
    if let Some(email) = claims.email.as_deref().filter(|e| !e.is_empty()) {
        emails.push(UserEmail {
            email: email.to_string(),
            verified: claims.email_verified,
            primary: true,
        });
    }
    if emails.is_empty() {
        return Err(ProviderError::UserData(format!(
            "ID token from issuer {:?} must contain an email address",
            claims.iss.as_deref().unwrap_or_default()
        )));
    }
    Ok(UserData { emails, claims })
}
