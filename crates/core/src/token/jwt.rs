//! Compact JWS encoding with the versioned access token header.
//!
//! The header is `{"alg","typ","version","kid"}` in that order, `kid` only
//! for V3. A header without `version` is a V1 token.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{DecodingKey, EncodingKey, crypto};
use serde::{Deserialize, Serialize};

use super::claims::TokenVersion;
use crate::{
    error::{AuthError, Result},
    validation::{SupportedAlgorithm, validate_algorithm},
};

const TYP: &str = "JWT";

/// The JOSE header of an access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenHeader {
    /// Signature algorithm.
    pub alg: String,
    /// Always `JWT`.
    pub typ: String,
    /// Wire version; absent on legacy V1 tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Signing key id, V3 only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
}

impl TokenHeader {
    /// Header for a token of `version` signed with `algorithm`. `kid` is
    /// dropped for versions that do not carry one.
    #[must_use]
    pub fn new(version: TokenVersion, algorithm: SupportedAlgorithm, kid: &str) -> Self {
        Self {
            alg: algorithm.as_str().to_owned(),
            typ: TYP.to_owned(),
            version: Some(version.as_str().to_owned()),
            kid: version.has_key_id().then(|| kid.to_owned()),
        }
    }
}

/// A token split and header-checked, signature not yet verified.
#[derive(Debug, Clone)]
pub struct PreParsedToken {
    /// Declared wire version.
    pub version: TokenVersion,
    /// Declared signing key id. Always set for V3.
    pub kid: Option<String>,
    /// Declared algorithm.
    pub algorithm: SupportedAlgorithm,
    signing_input: String,
    payload: String,
    signature: String,
}

fn decode_part(part: &str, name: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(part)
        .map_err(|e| AuthError::invalid_token_format(format!("{name} is not base64url: {e}")))
}

/// Splits `token` and reads its header without checking the signature.
///
/// # Errors
///
/// Returns [`AuthError::InvalidTokenFormat`] if the token is not three
/// base64url parts with a JSON header, declares an unknown version, or is a
/// V3 token without `kid`; [`AuthError::UnsupportedAlgorithm`] if the
/// declared algorithm is not accepted.
pub fn pre_parse(token: &str) -> Result<PreParsedToken> {
    let mut parts = token.split('.');
    let (Some(header), Some(payload), Some(signature), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(AuthError::invalid_token_format("JWT must have 3 parts separated by dots"));
    };

    let header_json: TokenHeader = serde_json::from_slice(&decode_part(header, "header")?)
        .map_err(|e| AuthError::invalid_token_format(format!("Failed to parse JWT header: {e}")))?;
    if header_json.typ != TYP {
        return Err(AuthError::invalid_token_format(format!(
            "unexpected typ '{}'",
            header_json.typ
        )));
    }
    let algorithm = validate_algorithm(&header_json.alg)?;
    let version = match header_json.version.as_deref() {
        None => TokenVersion::V1,
        Some(v) => v.parse()?,
    };

    let kid = if version.has_key_id() {
        match header_json.kid {
            Some(kid) if !kid.is_empty() => Some(kid),
            _ => return Err(AuthError::invalid_token_format("JWT header missing 'kid' field")),
        }
    } else {
        None
    };

    Ok(PreParsedToken {
        version,
        kid,
        algorithm,
        signing_input: format!("{header}.{payload}"),
        payload: payload.to_owned(),
        signature: signature.to_owned(),
    })
}

impl PreParsedToken {
    /// `true` if the signature verifies under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error only if `key` is unusable for the declared algorithm.
    pub fn verify(&self, key: &DecodingKey) -> Result<bool> {
        match crypto::verify(
            &self.signature,
            self.signing_input.as_bytes(),
            key,
            self.algorithm.jwt_algorithm(),
        ) {
            Ok(valid) => Ok(valid),
            // A malformed signature is a mismatch, not a key problem.
            Err(e) if matches!(e.kind(), jsonwebtoken::errors::ErrorKind::Base64(_)) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// The decoded payload bytes.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidTokenFormat`] if the payload is not
    /// base64url.
    pub fn payload(&self) -> Result<Vec<u8>> {
        decode_part(&self.payload, "payload")
    }
}

/// Signs `payload` under `header`.
///
/// # Errors
///
/// Returns [`AuthError::UnsupportedAlgorithm`] if the header names an
/// algorithm that is not accepted, or an error from the signer.
pub fn encode(header: &TokenHeader, payload: &[u8], key: &EncodingKey) -> Result<String> {
    let algorithm = validate_algorithm(&header.alg)?;
    let header_json = serde_json::to_vec(header)
        .map_err(|e| AuthError::invalid_token_format(format!("failed to encode header: {e}")))?;
    let signing_input =
        format!("{}.{}", URL_SAFE_NO_PAD.encode(header_json), URL_SAFE_NO_PAD.encode(payload));
    let signature = crypto::sign(signing_input.as_bytes(), key, algorithm.jwt_algorithm())?;
    Ok(format!("{signing_input}.{signature}"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;
    use crate::{signing_keys::keypair, testutil::craft_raw_jwt};

    fn header_of(token: &str) -> serde_json::Value {
        let header = token.split('.').next().unwrap();
        serde_json::from_slice(&URL_SAFE_NO_PAD.decode(header).unwrap()).unwrap()
    }

    #[test]
    fn test_header_field_order() {
        let header = TokenHeader::new(TokenVersion::V3, SupportedAlgorithm::Rs256, "d-1");
        assert_eq!(
            serde_json::to_string(&header).unwrap(),
            r#"{"alg":"RS256","typ":"JWT","version":"3","kid":"d-1"}"#
        );

        let legacy = TokenHeader::new(TokenVersion::V2, SupportedAlgorithm::Rs256, "d-1");
        assert_eq!(
            serde_json::to_string(&legacy).unwrap(),
            r#"{"alg":"RS256","typ":"JWT","version":"2"}"#
        );
    }

    #[test]
    fn test_sign_and_verify() {
        let key_string = keypair::generate_key_string().unwrap();
        let other = keypair::generate_key_string().unwrap();
        let header = TokenHeader::new(TokenVersion::V3, SupportedAlgorithm::Rs256, "d-1");
        let token =
            encode(&header, br#"{"sub":"u1"}"#, &keypair::encoding_key(&key_string).unwrap()).unwrap();
        assert_eq!(header_of(&token)["kid"], "d-1");

        let parsed = pre_parse(&token).unwrap();
        assert_eq!(parsed.version, TokenVersion::V3);
        assert_eq!(parsed.kid.as_deref(), Some("d-1"));
        assert_eq!(parsed.payload().unwrap(), br#"{"sub":"u1"}"#);
        assert!(parsed.verify(&keypair::decoding_key(&key_string).unwrap()).unwrap());
        assert!(!parsed.verify(&keypair::decoding_key(&other).unwrap()).unwrap());
    }

    #[test]
    fn test_missing_version_is_v1() {
        let token = craft_raw_jwt(&json!({"alg": "RS256", "typ": "JWT"}), &json!({}));
        assert_eq!(pre_parse(&token).unwrap().version, TokenVersion::V1);
    }

    #[rstest]
    #[case::two_parts("a.b")]
    #[case::four_parts("a.b.c.d")]
    #[case::not_base64("!!!.b.c")]
    #[case::empty("")]
    fn test_malformed_structure(#[case] token: &str) {
        assert!(matches!(pre_parse(token), Err(AuthError::InvalidTokenFormat(_))));
    }

    #[rstest]
    #[case::v3_without_kid(json!({"alg": "RS256", "typ": "JWT", "version": "3"}))]
    #[case::unknown_version(json!({"alg": "RS256", "typ": "JWT", "version": "9"}))]
    #[case::wrong_typ(json!({"alg": "RS256", "typ": "JWE", "version": "2"}))]
    fn test_bad_header(#[case] header: serde_json::Value) {
        let token = craft_raw_jwt(&header, &json!({}));
        assert!(matches!(pre_parse(&token), Err(AuthError::InvalidTokenFormat(_))));
    }

    #[rstest]
    #[case::none("none")]
    #[case::hs256("HS256")]
    #[case::es256("ES256")]
    #[case::lowercase_rs256("rs256")]
    fn test_rejected_algorithms(#[case] alg: &str) {
        let token = craft_raw_jwt(&json!({"alg": alg, "typ": "JWT", "version": "2"}), &json!({}));
        assert!(matches!(pre_parse(&token), Err(AuthError::UnsupportedAlgorithm(_))));
    }

    #[test]
    fn test_pre_v3_kid_is_ignored() {
        let token = craft_raw_jwt(
            &json!({"alg": "RS256", "typ": "JWT", "version": "2", "kid": "d-1"}),
            &json!({}),
        );
        assert_eq!(pre_parse(&token).unwrap().kid, None);
    }

    mod proptests {
        use proptest::prelude::*;

        use super::*;

        proptest! {
            #[test]
            fn pre_parse_never_panics(token in ".{0,256}") {
                let _ = pre_parse(&token);
            }
        }
    }
}
