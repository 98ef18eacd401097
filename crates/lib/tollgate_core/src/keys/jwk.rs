//! JSON Web Key model and conversion into `jsonwebtoken` keys.
//!
//! Private keys arrive as JWKs (RFC 7517/7518/8037). `jsonwebtoken` signs from
//! DER, so asymmetric private keys are re-encoded: RSA as PKCS#1, P-256 and
//! Ed25519 as PKCS#8. P-521 keys bypass `jsonwebtoken`; see [`super::es512`].

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{DecodingKey, EncodingKey};
use serde::{Deserialize, Serialize};

use super::KeyError;

/// A JSON Web Key. Private parameters are only present on configured keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Jwk {
    pub kty: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_ops: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
    // oct
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub k: Option<String>,
    // RSA
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub d: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub q: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dq: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qi: Option<String>,
    // EC / OKP
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
}

/// Key families we know how to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    Oct,
    Rsa,
    EcP256,
    EcP521,
    Ed25519,
}

/// JWKS document shape: `{"keys": [...]}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JwkSet {
    pub keys: Vec<Jwk>,
}

impl Jwk {
    /// Build a symmetric JWK from raw secret bytes.
    pub fn from_secret(secret: &[u8]) -> Self {
        Self {
            kty: "oct".to_string(),
            k: Some(URL_SAFE_NO_PAD.encode(secret)),
            ..Self::default()
        }
    }

    /// Classify the key and check the parameters its type requires.
    pub fn key_type(&self) -> Result<KeyType, KeyError> {
        match self.kty.as_str() {
            "oct" => {
                self.param("k", &self.k)?;
                Ok(KeyType::Oct)
            }
            "RSA" => {
                for (name, value) in [("n", &self.n), ("e", &self.e)] {
                    self.param(name, value)?;
                }
                Ok(KeyType::Rsa)
            }
            "EC" => {
                let key_type = match self.crv.as_deref() {
                    Some("P-256") => KeyType::EcP256,
                    Some("P-521") => KeyType::EcP521,
                    Some(other) => {
                        return Err(self.config_error(format!("unsupported curve {other}")));
                    }
                    None => return Err(self.config_error("missing crv")),
                };
                self.param("x", &self.x)?;
                self.param("y", &self.y)?;
                Ok(key_type)
            }
            "OKP" => {
                match self.crv.as_deref() {
                    Some("Ed25519") => {}
                    Some(other) => {
                        return Err(self.config_error(format!("unsupported curve {other}")));
                    }
                    None => return Err(self.config_error("missing crv")),
                }
                self.param("x", &self.x)?;
                Ok(KeyType::Ed25519)
            }
            other => Err(self.config_error(format!("unsupported kty {other:?}"))),
        }
    }

    /// Whether the private parameters needed for signing are present.
    pub fn has_private_material(&self) -> bool {
        match self.kty.as_str() {
            "oct" => self.k.is_some(),
            "RSA" => [&self.d, &self.p, &self.q, &self.dp, &self.dq, &self.qi]
                .iter()
                .all(|v| v.is_some()),
            "EC" | "OKP" => self.d.is_some(),
            _ => false,
        }
    }

    /// Public projection advertised through JWKS. Symmetric keys have none.
    pub fn public(&self, kid: &str, alg: &str) -> Option<Jwk> {
        let base = Jwk {
            kty: self.kty.clone(),
            kid: (!kid.is_empty()).then(|| kid.to_string()),
            alg: Some(alg.to_string()),
            key_use: Some("sig".to_string()),
            key_ops: Some(vec!["verify".to_string()]),
            crv: self.crv.clone(),
            ..Jwk::default()
        };
        match self.kty.as_str() {
            "RSA" => Some(Jwk {
                n: self.n.clone(),
                e: self.e.clone(),
                ..base
            }),
            "EC" => Some(Jwk {
                x: self.x.clone(),
                y: self.y.clone(),
                ..base
            }),
            "OKP" => Some(Jwk {
                x: self.x.clone(),
                ..base
            }),
            _ => None,
        }
    }

    /// Key used to check signatures.
    pub fn decoding_key(&self) -> Result<DecodingKey, KeyError> {
        let key = match self.key_type()? {
            KeyType::Oct => DecodingKey::from_secret(&decode_param("k", self.param("k", &self.k)?)?),
            KeyType::Rsa => DecodingKey::from_rsa_components(
                self.param("n", &self.n)?,
                self.param("e", &self.e)?,
            )
            .map_err(|e| self.config_error(format!("bad RSA public key: {e}")))?,
            KeyType::EcP256 => DecodingKey::from_ec_components(
                self.param("x", &self.x)?,
                self.param("y", &self.y)?,
            )
            .map_err(|e| self.config_error(format!("bad EC public key: {e}")))?,
            KeyType::Ed25519 => DecodingKey::from_ed_components(self.param("x", &self.x)?)
                .map_err(|e| self.config_error(format!("bad Ed25519 public key: {e}")))?,
            KeyType::EcP521 => return Err(self.config_error("P-521 keys verify through ES512")),
        };
        Ok(key)
    }

    /// Key used to produce signatures. Fails when private material is absent.
    pub fn encoding_key(&self) -> Result<EncodingKey, KeyError> {
        let key = match self.key_type()? {
            KeyType::Oct => EncodingKey::from_secret(&decode_param("k", self.param("k", &self.k)?)?),
            KeyType::Rsa => {
                let mut parts = Vec::with_capacity(8);
                for (name, value) in [
                    ("n", &self.n),
                    ("e", &self.e),
                    ("d", &self.d),
                    ("p", &self.p),
                    ("q", &self.q),
                    ("dp", &self.dp),
                    ("dq", &self.dq),
                    ("qi", &self.qi),
                ] {
                    parts.push(decode_param(name, self.param(name, value)?)?);
                }
                EncodingKey::from_rsa_der(&der::rsa_pkcs1(&parts))
            }
            KeyType::EcP256 => {
                let d = self.fixed_param("d", &self.d, 32)?;
                let x = self.fixed_param("x", &self.x, 32)?;
                let y = self.fixed_param("y", &self.y, 32)?;
                EncodingKey::from_ec_der(&der::p256_pkcs8(&d, &x, &y))
            }
            KeyType::Ed25519 => {
                let d = self.fixed_param("d", &self.d, 32)?;
                EncodingKey::from_ed_der(&der::ed25519_pkcs8(&d))
            }
            KeyType::EcP521 => return Err(self.config_error("P-521 keys sign through ES512")),
        };
        Ok(key)
    }

    fn param<'a>(&self, name: &str, value: &'a Option<String>) -> Result<&'a str, KeyError> {
        match value.as_deref() {
            Some(v) if !v.is_empty() => Ok(v),
            _ => Err(self.config_error(format!("missing parameter {name:?}"))),
        }
    }

    pub(super) fn fixed_param(&self, name: &str, value: &Option<String>, len: usize) -> Result<Vec<u8>, KeyError> {
        let bytes = decode_param(name, self.param(name, value)?)?;
        if bytes.len() != len {
            return Err(self.config_error(format!(
                "parameter {name:?} must be {len} bytes, got {}",
                bytes.len()
            )));
        }
        Ok(bytes)
    }

    pub(super) fn config_error(&self, message: impl Into<String>) -> KeyError {
        KeyError::Config(format!(
            "key {}: {}",
            self.kid.as_deref().unwrap_or("<no kid>"),
            message.into()
        ))
    }
}

fn decode_param(name: &str, value: &str) -> Result<Vec<u8>, KeyError> {
    URL_SAFE_NO_PAD
        .decode(value.trim_end_matches('='))
        .map_err(|e| KeyError::Config(format!("parameter {name:?} is not base64url: {e}")))
}

mod der {
    //! Minimal DER writers for the three private key layouts.

    const ED25519_PKCS8_PREFIX: [u8; 16] = [
        0x30, 0x2e, 0x02, 0x01, 0x00, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70, 0x04, 0x22, 0x04,
        0x20,
    ];

    // SEQUENCE { version 0, AlgorithmIdentifier { id-ecPublicKey, prime256v1 },
    //   OCTET STRING { ECPrivateKey { version 1, OCTET STRING d, [1] BIT STRING ... } } }
    const P256_PKCS8_PREFIX: [u8; 36] = [
        0x30, 0x81, 0x87, 0x02, 0x01, 0x00, 0x30, 0x13, 0x06, 0x07, 0x2a, 0x86, 0x48, 0xce, 0x3d,
        0x02, 0x01, 0x06, 0x08, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x03, 0x01, 0x07, 0x04, 0x6d, 0x30,
        0x6b, 0x02, 0x01, 0x01, 0x04, 0x20,
    ];
    const P256_PUBLIC_PREFIX: [u8; 6] = [0xa1, 0x44, 0x03, 0x42, 0x00, 0x04];

    pub(super) fn ed25519_pkcs8(d: &[u8]) -> Vec<u8> {
        let mut out = ED25519_PKCS8_PREFIX.to_vec();
        out.extend_from_slice(d);
        out
    }

    pub(super) fn p256_pkcs8(d: &[u8], x: &[u8], y: &[u8]) -> Vec<u8> {
        let mut out = P256_PKCS8_PREFIX.to_vec();
        out.extend_from_slice(d);
        out.extend_from_slice(&P256_PUBLIC_PREFIX);
        out.extend_from_slice(x);
        out.extend_from_slice(y);
        out
    }

    /// RSAPrivateKey (PKCS#1) from n, e, d, p, q, dp, dq, qi.
    pub(super) fn rsa_pkcs1(parts: &[Vec<u8>]) -> Vec<u8> {
        let mut body = Vec::new();
        integer(&[], &mut body);
        for part in parts {
            integer(part, &mut body);
        }
        let mut out = vec![0x30];
        length(body.len(), &mut out);
        out.extend(body);
        out
    }

    fn integer(magnitude: &[u8], out: &mut Vec<u8>) {
        let start = magnitude
            .iter()
            .position(|b| *b != 0)
            .unwrap_or(magnitude.len());
        let trimmed = &magnitude[start..];
        let mut body = Vec::with_capacity(trimmed.len() + 1);
        if trimmed.first().is_none_or(|b| b & 0x80 != 0) {
            body.push(0);
        }
        body.extend_from_slice(trimmed);
        out.push(0x02);
        length(body.len(), out);
        out.extend(body);
    }

    fn length(len: usize, out: &mut Vec<u8>) {
        if len < 0x80 {
            out.push(len as u8);
            return;
        }
        let bytes = len.to_be_bytes();
        let skip = bytes.iter().take_while(|b| **b == 0).count();
        out.push(0x80 | (bytes.len() - skip) as u8);
        out.extend_from_slice(&bytes[skip..]);
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn integer_adds_sign_byte() {
            let mut out = Vec::new();
            integer(&[0x80], &mut out);
            assert_eq!(out, vec![0x02, 0x02, 0x00, 0x80]);
        }

        #[test]
        fn integer_strips_leading_zeros() {
            let mut out = Vec::new();
            integer(&[0x00, 0x00, 0x01], &mut out);
            assert_eq!(out, vec![0x02, 0x01, 0x01]);
        }

        #[test]
        fn zero_encodes_as_single_byte() {
            let mut out = Vec::new();
            integer(&[], &mut out);
            assert_eq!(out, vec![0x02, 0x01, 0x00]);
        }

        #[test]
        fn long_lengths_use_multibyte_form() {
            let mut out = Vec::new();
            length(0x0102, &mut out);
            assert_eq!(out, vec![0x82, 0x01, 0x02]);
        }

        #[test]
        fn p256_template_has_expected_size() {
            let der = p256_pkcs8(&[1; 32], &[2; 32], &[3; 32]);
            // 0x87 content bytes plus the 3-byte outer header.
            assert_eq!(der.len(), 0x87 + 3);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_use_field() {
        let jwk: Jwk = serde_json::from_str(
            r#"{"kty":"oct","k":"c2VjcmV0","use":"sig","key_ops":["sign","verify"]}"#,
        )
        .unwrap();
        assert_eq!(jwk.key_use.as_deref(), Some("sig"));
        assert_eq!(jwk.key_type().unwrap(), KeyType::Oct);
    }

    #[test]
    fn rejects_unknown_kty() {
        let jwk = Jwk {
            kty: "XYZ".into(),
            ..Jwk::default()
        };
        assert!(matches!(jwk.key_type(), Err(KeyError::Config(_))));
    }

    #[test]
    fn rejects_rsa_without_modulus() {
        let jwk = Jwk {
            kty: "RSA".into(),
            e: Some("AQAB".into()),
            ..Jwk::default()
        };
        let err = jwk.key_type().unwrap_err();
        assert!(err.to_string().contains("\"n\""));
    }

    #[test]
    fn classifies_ec_curves() {
        let mut jwk = Jwk {
            kty: "EC".into(),
            crv: Some("P-521".into()),
            x: Some("AA".into()),
            y: Some("AA".into()),
            ..Jwk::default()
        };
        assert_eq!(jwk.key_type().unwrap(), KeyType::EcP521);
        assert!(matches!(jwk.decoding_key(), Err(KeyError::Config(_))));

        jwk.crv = Some("P-384".into());
        assert!(matches!(jwk.key_type(), Err(KeyError::Config(_))));
    }

    #[test]
    fn public_projection_drops_private_parameters() {
        let jwk = Jwk {
            kty: "OKP".into(),
            crv: Some("Ed25519".into()),
            x: Some("x".into()),
            d: Some("d".into()),
            ..Jwk::default()
        };
        let public = jwk.public("ed-1", "EdDSA").unwrap();
        assert!(public.d.is_none());
        assert_eq!(public.key_use.as_deref(), Some("sig"));
        assert_eq!(public.key_ops, Some(vec!["verify".to_string()]));
        assert_eq!(public.kid.as_deref(), Some("ed-1"));
    }

    #[test]
    fn symmetric_keys_have_no_public_projection() {
        assert!(Jwk::from_secret(b"secret").public("k", "HS256").is_none());
    }

    #[test]
    fn ec_private_scalar_must_be_32_bytes() {
        let jwk = Jwk {
            kty: "EC".into(),
            crv: Some("P-256".into()),
            x: Some(URL_SAFE_NO_PAD.encode([1u8; 32])),
            y: Some(URL_SAFE_NO_PAD.encode([2u8; 32])),
            d: Some(URL_SAFE_NO_PAD.encode([3u8; 16])),
            ..Jwk::default()
        };
        assert!(matches!(jwk.encoding_key(), Err(KeyError::Config(_))));
    }
}
