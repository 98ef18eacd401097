//! Key manager: loads signing/verification keys and publishes the JWKS.
//!
//! Keys come from a JSON array of private JWKs, or, when none are configured,
//! from the shared secret as a single HS256 key. Exactly one key may sign.
//! The shared secret also stays available for verifying tokens minted before
//! key sets were introduced (no `kid`, or the configured legacy `kid`).

pub mod es512;
pub mod jwk;

#[cfg(test)]
pub(crate) mod fixtures;

use std::collections::HashSet;
use std::fmt;

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey};
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

pub use jwk::{Jwk, JwkSet, KeyType};

/// Key manager errors.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("Key configuration error: {0}")]
    Config(String),

    #[error("No signing key configured")]
    NoSigningKey,

    #[error("Bad token: {0}")]
    BadToken(String),
}

/// Raw key settings as read from configuration.
#[derive(Debug, Clone, Default)]
pub struct KeyConfig {
    /// Shared secret. Signs OAuth state and backs legacy HS256 tokens.
    pub secret: String,
    /// JSON array (or `{"keys": [...]}` document) of private JWKs.
    pub keys: Option<String>,
    /// `kid` for the secret-derived key and legacy tokens.
    pub key_id: Option<String>,
    /// Treat keys with a missing or unknown `alg` as HS256 instead of failing.
    pub legacy_algorithm_fallback: bool,
}

/// JWS algorithms a configured key can sign and verify with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JwsAlgorithm {
    HS256,
    RS256,
    RS512,
    ES256,
    ES512,
    EdDSA,
}

impl JwsAlgorithm {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "HS256" => Some(Self::HS256),
            "RS256" => Some(Self::RS256),
            "RS512" => Some(Self::RS512),
            "ES256" => Some(Self::ES256),
            "ES512" => Some(Self::ES512),
            "EdDSA" => Some(Self::EdDSA),
            _ => None,
        }
    }

    /// Canonical JOSE name.
    pub fn name(self) -> &'static str {
        match self {
            Self::HS256 => "HS256",
            Self::RS256 => "RS256",
            Self::RS512 => "RS512",
            Self::ES256 => "ES256",
            Self::ES512 => "ES512",
            Self::EdDSA => "EdDSA",
        }
    }

    /// The `jsonwebtoken` counterpart. ES512 has none and goes through [`es512`].
    pub fn jsonwebtoken(self) -> Option<Algorithm> {
        match self {
            Self::HS256 => Some(Algorithm::HS256),
            Self::RS256 => Some(Algorithm::RS256),
            Self::RS512 => Some(Algorithm::RS512),
            Self::ES256 => Some(Algorithm::ES256),
            Self::ES512 => None,
            Self::EdDSA => Some(Algorithm::EdDSA),
        }
    }
}

impl fmt::Display for JwsAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn key_type_matches(key_type: KeyType, alg: JwsAlgorithm) -> bool {
    matches!(
        (key_type, alg),
        (KeyType::Oct, JwsAlgorithm::HS256)
            | (KeyType::Rsa, JwsAlgorithm::RS256 | JwsAlgorithm::RS512)
            | (KeyType::EcP256, JwsAlgorithm::ES256)
            | (KeyType::EcP521, JwsAlgorithm::ES512)
            | (KeyType::Ed25519, JwsAlgorithm::EdDSA)
    )
}

const KEY_CHECK_MESSAGE: &[u8] = b"tollgate key check";

/// Private half of a key, ready to sign.
pub enum SigningMaterial {
    Jwt(EncodingKey),
    Es512(p521::ecdsa::SigningKey),
}

impl SigningMaterial {
    /// Load and test-sign. `alg` must fit the key type.
    fn load(jwk: &Jwk, alg: JwsAlgorithm) -> Result<Self, KeyError> {
        let kid = jwk.kid.as_deref().unwrap_or_default();
        match alg.jsonwebtoken() {
            Some(jwt_alg) => {
                let key = jwk.encoding_key()?;
                jsonwebtoken::crypto::sign(KEY_CHECK_MESSAGE, &key, jwt_alg).map_err(|e| {
                    KeyError::Config(format!("key {kid}: unusable private key: {e}"))
                })?;
                Ok(Self::Jwt(key))
            }
            None => {
                let key = es512::signing_key(jwk)?;
                let signature = es512::sign(&key, KEY_CHECK_MESSAGE)?;
                let public = es512::verifying_key(jwk)?;
                if !es512::verify(&public, KEY_CHECK_MESSAGE, &signature) {
                    return Err(KeyError::Config(format!(
                        "key {kid}: private key does not match x/y"
                    )));
                }
                Ok(Self::Es512(key))
            }
        }
    }
}

/// Public half of a key, ready to verify.
pub enum VerificationMaterial {
    Jwt(DecodingKey),
    Es512(p521::ecdsa::VerifyingKey),
}

impl VerificationMaterial {
    fn load(jwk: &Jwk) -> Result<Self, KeyError> {
        match jwk.key_type()? {
            KeyType::EcP521 => Ok(Self::Es512(es512::verifying_key(jwk)?)),
            _ => Ok(Self::Jwt(jwk.decoding_key()?)),
        }
    }
}

/// One loaded key with its capabilities.
pub struct KeyPair {
    kid: String,
    algorithm: JwsAlgorithm,
    can_sign: bool,
    jwk: Jwk,
    signing: Option<SigningMaterial>,
    verification: VerificationMaterial,
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .field("can_sign", &self.can_sign)
            .finish_non_exhaustive()
    }
}

impl KeyPair {
    /// Load a private JWK. `sign` in `key_ops` grants signing (and verifying);
    /// anything else, including no `key_ops`, is verify-only.
    pub fn from_jwk(jwk: Jwk, legacy_algorithm_fallback: bool) -> Result<Self, KeyError> {
        let key_type = jwk.key_type()?;
        let kid = jwk.kid.clone().unwrap_or_default();

        let (algorithm, fell_back) = match jwk.alg.as_deref() {
            Some(name) => match JwsAlgorithm::parse(name) {
                Some(alg) => (alg, false),
                None if legacy_algorithm_fallback => {
                    warn!(kid = %kid, alg = name, "Unknown key algorithm, falling back to HS256");
                    (JwsAlgorithm::HS256, true)
                }
                None => {
                    return Err(KeyError::Config(format!(
                        "key {kid}: unknown algorithm {name:?}"
                    )));
                }
            },
            None if legacy_algorithm_fallback => {
                warn!(kid = %kid, "Key has no algorithm, falling back to HS256");
                (JwsAlgorithm::HS256, true)
            }
            None => {
                return Err(KeyError::Config(format!("key {kid}: missing alg")));
            }
        };

        let compatible = key_type_matches(key_type, algorithm);
        if !compatible && !fell_back {
            return Err(KeyError::Config(format!(
                "key {kid}: algorithm {algorithm} does not match key type {}",
                jwk.kty
            )));
        }

        let can_sign = jwk
            .key_ops
            .as_ref()
            .is_some_and(|ops| ops.iter().any(|op| op == "sign"));

        // A fallback algorithm that does not fit the key leaves it unable to
        // sign; issuing with it fails at signing time.
        let signing = if can_sign && compatible {
            if !jwk.has_private_material() {
                return Err(KeyError::Config(format!(
                    "key {kid}: signing key is missing private parameters"
                )));
            }
            Some(SigningMaterial::load(&jwk, algorithm)?)
        } else {
            None
        };

        let verification = VerificationMaterial::load(&jwk)?;

        Ok(Self {
            kid,
            algorithm,
            can_sign,
            jwk,
            signing,
            verification,
        })
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    pub fn algorithm(&self) -> JwsAlgorithm {
        self.algorithm
    }

    pub fn can_sign(&self) -> bool {
        self.can_sign
    }

    /// Signing material, if this key can actually produce signatures.
    pub fn signing_material(&self) -> Option<&SigningMaterial> {
        self.signing.as_ref()
    }

    pub fn verification_material(&self) -> &VerificationMaterial {
        &self.verification
    }

    /// Public JWK for asymmetric keys.
    pub fn public_jwk(&self) -> Option<Jwk> {
        self.jwk.public(&self.kid, self.algorithm.name())
    }
}

struct LegacySecret {
    kid: Option<String>,
    verification: VerificationMaterial,
}

/// The active key set.
pub struct KeySet {
    keys: Vec<KeyPair>,
    legacy: Option<LegacySecret>,
}

impl fmt::Debug for KeySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeySet")
            .field("keys", &self.keys)
            .field("legacy", &self.legacy.is_some())
            .finish()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawKeys {
    List(Vec<Jwk>),
    Set(JwkSet),
}

/// Parse a JSON array of JWKs, or a `{"keys": [...]}` document.
pub fn parse_jwks(raw: &str) -> Result<Vec<Jwk>, KeyError> {
    let parsed: RawKeys = serde_json::from_str(raw)
        .map_err(|e| KeyError::Config(format!("invalid key set JSON: {e}")))?;
    Ok(match parsed {
        RawKeys::List(keys) => keys,
        RawKeys::Set(set) => set.keys,
    })
}

impl KeySet {
    /// Parse and validate configured keys.
    pub fn load(config: &KeyConfig) -> Result<Self, KeyError> {
        let raw = config
            .keys
            .as_deref()
            .map(str::trim)
            .filter(|raw| !raw.is_empty());
        let set = match raw {
            Some(raw) => Self::new(parse_jwks(raw)?, config)?,
            None => Self::from_secret(config)?,
        };
        set.validate()?;
        Ok(set)
    }

    /// Build from explicit JWKs. Does not enforce the signing-key count;
    /// call [`KeySet::validate`] for that.
    pub fn new(jwks: Vec<Jwk>, config: &KeyConfig) -> Result<Self, KeyError> {
        let mut seen = HashSet::new();
        let mut keys = Vec::with_capacity(jwks.len());
        for jwk in jwks {
            let pair = KeyPair::from_jwk(jwk, config.legacy_algorithm_fallback)?;
            if pair.kid.is_empty() {
                return Err(KeyError::Config("configured keys must have a kid".into()));
            }
            if !seen.insert(pair.kid.clone()) {
                return Err(KeyError::Config(format!("duplicate kid {:?}", pair.kid)));
            }
            keys.push(pair);
        }
        Ok(Self {
            keys,
            legacy: Self::legacy(config),
        })
    }

    /// Single HS256 key derived from the shared secret.
    pub fn from_secret(config: &KeyConfig) -> Result<Self, KeyError> {
        if config.secret.is_empty() {
            return Err(KeyError::Config(
                "either a shared secret or a key set is required".into(),
            ));
        }
        let mut jwk = Jwk::from_secret(config.secret.as_bytes());
        jwk.kid = config.key_id.clone().filter(|kid| !kid.is_empty());
        jwk.alg = Some("HS256".into());
        jwk.key_ops = Some(vec!["sign".into(), "verify".into()]);
        let pair = KeyPair::from_jwk(jwk, false)?;
        Ok(Self {
            keys: vec![pair],
            legacy: Self::legacy(config),
        })
    }

    fn legacy(config: &KeyConfig) -> Option<LegacySecret> {
        (!config.secret.is_empty()).then(|| LegacySecret {
            kid: config.key_id.clone().filter(|kid| !kid.is_empty()),
            verification: VerificationMaterial::Jwt(DecodingKey::from_secret(
                config.secret.as_bytes(),
            )),
        })
    }

    /// Check structure of every key and that exactly one key can sign.
    pub fn validate(&self) -> Result<(), KeyError> {
        for key in &self.keys {
            key.jwk.key_type()?;
        }
        let signers = self.keys.iter().filter(|k| k.can_sign).count();
        if signers != 1 {
            return Err(KeyError::Config(format!(
                "exactly one signing key is required, found {signers}"
            )));
        }
        Ok(())
    }

    /// The unique key that may sign.
    pub fn signing_key(&self) -> Result<&KeyPair, KeyError> {
        self.keys
            .iter()
            .find(|k| k.can_sign)
            .ok_or(KeyError::NoSigningKey)
    }

    /// Resolve the key to verify a token with, given its header `kid` and `alg`.
    pub fn verification_key(
        &self,
        kid: Option<&str>,
        alg: JwsAlgorithm,
    ) -> Result<&VerificationMaterial, KeyError> {
        match kid.filter(|kid| !kid.is_empty()) {
            Some(kid) => {
                if let Some(pair) = self.keys.iter().find(|k| k.kid == kid) {
                    if pair.algorithm != alg {
                        return Err(KeyError::BadToken(format!(
                            "algorithm {alg} does not match key {kid}"
                        )));
                    }
                    return Ok(&pair.verification);
                }
                match &self.legacy {
                    Some(legacy)
                        if legacy.kid.as_deref() == Some(kid) && alg == JwsAlgorithm::HS256 =>
                    {
                        Ok(&legacy.verification)
                    }
                    _ => Err(KeyError::BadToken(format!("unknown kid {kid:?}"))),
                }
            }
            None => match &self.legacy {
                Some(legacy) if alg == JwsAlgorithm::HS256 => Ok(&legacy.verification),
                _ => Err(KeyError::BadToken("token has no kid".into())),
            },
        }
    }

    /// Every algorithm some loaded key (or the legacy secret) verifies with.
    pub fn allowed_algorithms(&self) -> Vec<JwsAlgorithm> {
        let mut algs: Vec<JwsAlgorithm> = Vec::new();
        let legacy = self.legacy.as_ref().map(|_| JwsAlgorithm::HS256);
        for alg in self.keys.iter().map(|k| k.algorithm).chain(legacy) {
            if !algs.contains(&alg) {
                algs.push(alg);
            }
        }
        algs
    }

    /// Public JWKS document. Symmetric keys are never published.
    pub fn public_jwks(&self) -> JwkSet {
        JwkSet {
            keys: self.keys.iter().filter_map(KeyPair::public_jwk).collect(),
        }
    }

    pub fn keys(&self) -> &[KeyPair] {
        &self.keys
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::{EC_PRIVATE_JWK, ED_PRIVATE_JWK, P521_PRIVATE_JWK, RSA_PRIVATE_JWK};
    use super::*;

    fn jwk(raw: &str, ops: &[&str]) -> Jwk {
        let mut jwk: Jwk = serde_json::from_str(raw).unwrap();
        if !ops.is_empty() {
            jwk.key_ops = Some(ops.iter().map(|s| s.to_string()).collect());
        }
        jwk
    }

    fn config() -> KeyConfig {
        KeyConfig {
            secret: "legacy-secret".into(),
            ..KeyConfig::default()
        }
    }

    #[test]
    fn loads_each_supported_key_type_as_signer() {
        for raw in [RSA_PRIVATE_JWK, EC_PRIVATE_JWK, P521_PRIVATE_JWK, ED_PRIVATE_JWK] {
            let set = KeySet::new(vec![jwk(raw, &["sign", "verify"])], &config()).unwrap();
            set.validate().unwrap();
            assert!(set.signing_key().unwrap().signing_material().is_some());
        }
    }

    #[test]
    fn validate_requires_exactly_one_signer() {
        let none = KeySet::new(vec![jwk(RSA_PRIVATE_JWK, &["verify"])], &config()).unwrap();
        assert!(matches!(none.validate(), Err(KeyError::Config(_))));

        let two = KeySet::new(
            vec![
                jwk(RSA_PRIVATE_JWK, &["sign"]),
                jwk(EC_PRIVATE_JWK, &["sign", "verify"]),
            ],
            &config(),
        )
        .unwrap();
        assert!(matches!(two.validate(), Err(KeyError::Config(_))));

        let one = KeySet::new(
            vec![jwk(RSA_PRIVATE_JWK, &["sign"]), jwk(EC_PRIVATE_JWK, &[])],
            &config(),
        )
        .unwrap();
        one.validate().unwrap();
        assert_eq!(one.signing_key().unwrap().kid(), "rsa-1");
    }

    #[test]
    fn missing_key_ops_means_verify_only() {
        let pair = KeyPair::from_jwk(jwk(EC_PRIVATE_JWK, &[]), false).unwrap();
        assert!(!pair.can_sign());
        assert!(pair.signing_material().is_none());
    }

    #[test]
    fn no_signing_key_is_reported() {
        let set = KeySet::new(vec![jwk(ED_PRIVATE_JWK, &["verify"])], &config()).unwrap();
        assert!(matches!(set.signing_key(), Err(KeyError::NoSigningKey)));
    }

    #[test]
    fn duplicate_kids_are_rejected() {
        let err = KeySet::new(
            vec![jwk(RSA_PRIVATE_JWK, &["sign"]), jwk(RSA_PRIVATE_JWK, &[])],
            &config(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate kid"));
    }

    #[test]
    fn es512_key_set_loads_and_publishes() {
        let raw = format!("[{P521_PRIVATE_JWK}]")
            .replace("\"alg\"", "\"key_ops\":[\"sign\",\"verify\"],\"alg\"");
        let set = KeySet::load(&KeyConfig {
            keys: Some(raw),
            ..config()
        })
        .unwrap();
        let signer = set.signing_key().unwrap();
        assert_eq!(signer.algorithm(), JwsAlgorithm::ES512);
        assert!(matches!(
            signer.signing_material(),
            Some(SigningMaterial::Es512(_))
        ));

        let public = &set.public_jwks().keys[0];
        assert_eq!(public.alg.as_deref(), Some("ES512"));
        assert_eq!(public.crv.as_deref(), Some("P-521"));
        assert!(public.d.is_none());
    }

    #[test]
    fn verify_only_es512_key_loads() {
        let pair = KeyPair::from_jwk(jwk(P521_PRIVATE_JWK, &["verify"]), false).unwrap();
        assert!(pair.signing_material().is_none());
        assert!(matches!(
            pair.verification_material(),
            VerificationMaterial::Es512(_)
        ));
    }

    #[test]
    fn es512_private_key_must_match_public_point() {
        let mut key = jwk(P521_PRIVATE_JWK, &["sign"]);
        let other: Jwk = serde_json::from_str(P521_PRIVATE_JWK).unwrap();
        key.d = other.x;
        assert!(matches!(
            KeyPair::from_jwk(key, false),
            Err(KeyError::Config(_))
        ));
    }

    #[test]
    fn es512_on_p256_key_is_rejected() {
        let mut key = jwk(EC_PRIVATE_JWK, &["sign"]);
        key.alg = Some("ES512".into());
        assert!(matches!(
            KeyPair::from_jwk(key, true),
            Err(KeyError::Config(_))
        ));
    }

    #[test]
    fn unknown_algorithm_depends_on_fallback_flag() {
        let mut key = jwk(EC_PRIVATE_JWK, &["verify"]);
        key.alg = Some("XX999".into());
        assert!(KeyPair::from_jwk(key.clone(), false).is_err());

        let pair = KeyPair::from_jwk(key, true).unwrap();
        assert_eq!(pair.algorithm(), JwsAlgorithm::HS256);
    }

    #[test]
    fn fallback_on_asymmetric_signer_cannot_sign() {
        let mut key = jwk(RSA_PRIVATE_JWK, &["sign"]);
        key.alg = None;
        let pair = KeyPair::from_jwk(key, true).unwrap();
        assert!(pair.can_sign());
        assert!(pair.signing_material().is_none());
    }

    #[test]
    fn mismatched_explicit_algorithm_is_rejected() {
        let mut key = jwk(EC_PRIVATE_JWK, &["sign"]);
        key.alg = Some("RS256".into());
        assert!(KeyPair::from_jwk(key, false).is_err());
    }

    #[test]
    fn signer_without_private_parameters_is_rejected() {
        let mut key = jwk(ED_PRIVATE_JWK, &["sign"]);
        key.d = None;
        assert!(KeyPair::from_jwk(key, false).is_err());
    }

    #[test]
    fn load_parses_array_and_document_forms() {
        let array = format!("[{RSA_PRIVATE_JWK}]").replace("\"alg\"", "\"key_ops\":[\"sign\"],\"alg\"");
        let set = KeySet::load(&KeyConfig {
            keys: Some(array.clone()),
            ..config()
        })
        .unwrap();
        assert_eq!(set.keys().len(), 1);

        let document = format!("{{\"keys\":{array}}}");
        let set = KeySet::load(&KeyConfig {
            keys: Some(document),
            ..config()
        })
        .unwrap();
        assert_eq!(set.signing_key().unwrap().kid(), "rsa-1");
    }

    #[test]
    fn load_without_keys_derives_hs256_from_secret() {
        let set = KeySet::load(&KeyConfig {
            key_id: Some("legacy".into()),
            ..config()
        })
        .unwrap();
        let signer = set.signing_key().unwrap();
        assert_eq!(signer.algorithm(), JwsAlgorithm::HS256);
        assert_eq!(signer.kid(), "legacy");
        assert!(set.public_jwks().keys.is_empty());
    }

    #[test]
    fn load_without_keys_or_secret_fails() {
        assert!(KeySet::load(&KeyConfig::default()).is_err());
    }

    #[test]
    fn jwks_publishes_only_public_parameters() {
        let set = KeySet::new(
            vec![
                jwk(RSA_PRIVATE_JWK, &["sign"]),
                jwk(EC_PRIVATE_JWK, &[]),
                jwk(ED_PRIVATE_JWK, &["verify"]),
            ],
            &config(),
        )
        .unwrap();
        let jwks = set.public_jwks();
        assert_eq!(jwks.keys.len(), 3);
        for key in &jwks.keys {
            assert!(key.d.is_none() && key.p.is_none() && key.qi.is_none());
            assert_eq!(key.key_use.as_deref(), Some("sig"));
            assert_eq!(key.key_ops, Some(vec!["verify".to_string()]));
        }
        let json = serde_json::to_string(&jwks).unwrap();
        assert!(json.contains("\"use\":\"sig\""));
    }

    #[test]
    fn verification_key_resolution() {
        let set = KeySet::new(
            vec![jwk(RSA_PRIVATE_JWK, &["sign"]), jwk(EC_PRIVATE_JWK, &[])],
            &KeyConfig {
                key_id: Some("old".into()),
                ..config()
            },
        )
        .unwrap();

        assert!(set.verification_key(Some("ec-1"), JwsAlgorithm::ES256).is_ok());
        assert!(set.verification_key(Some("ec-1"), JwsAlgorithm::RS256).is_err());
        assert!(set.verification_key(Some("old"), JwsAlgorithm::HS256).is_ok());
        assert!(set.verification_key(Some("old"), JwsAlgorithm::RS256).is_err());
        assert!(set.verification_key(None, JwsAlgorithm::HS256).is_ok());
        assert!(set.verification_key(None, JwsAlgorithm::RS256).is_err());
        assert!(set.verification_key(Some("gone"), JwsAlgorithm::RS256).is_err());
    }

    #[test]
    fn allowed_algorithms_cover_keys_and_legacy_secret() {
        let set = KeySet::new(
            vec![jwk(RSA_PRIVATE_JWK, &["sign"]), jwk(ED_PRIVATE_JWK, &[])],
            &config(),
        )
        .unwrap();
        let algs = set.allowed_algorithms();
        assert!(algs.contains(&JwsAlgorithm::RS256));
        assert!(algs.contains(&JwsAlgorithm::EdDSA));
        assert!(algs.contains(&JwsAlgorithm::HS256));
        assert!(!algs.contains(&JwsAlgorithm::ES256));
    }
}
