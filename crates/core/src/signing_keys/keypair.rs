//! RSA key material.
//!
//! A key pair is persisted as one opaque string:
//! `base64(SubjectPublicKeyInfo DER)|base64(PKCS#8 DER)`. The public half is
//! parsed on its own for verification and JWKS export, so verifiers never
//! touch the private key.

use base64::{
    Engine,
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
};
use jsonwebtoken::{DecodingKey, EncodingKey};
use rand_core::OsRng;
use rsa::{
    RsaPrivateKey, RsaPublicKey,
    pkcs1::EncodeRsaPrivateKey,
    pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey},
    traits::PublicKeyParts,
};
use zeroize::Zeroizing;

use crate::error::{AuthError, Result};

/// Modulus size of generated keys.
pub const RSA_KEY_BITS: usize = 2048;

const SEPARATOR: char = '|';

/// Generates a fresh 2048-bit RSA key pair and returns its key string.
///
/// # Errors
///
/// Returns [`AuthError::KeyGeneration`] if generation or DER encoding fails.
pub fn generate_key_string() -> Result<String> {
    let private = RsaPrivateKey::new(&mut OsRng, RSA_KEY_BITS)
        .map_err(|e| AuthError::key_generation(e.to_string()))?;
    let public_der = private
        .to_public_key()
        .to_public_key_der()
        .map_err(|e| AuthError::key_generation(e.to_string()))?;
    let private_der =
        private.to_pkcs8_der().map_err(|e| AuthError::key_generation(e.to_string()))?;

    let private_b64 = Zeroizing::new(STANDARD.encode(private_der.as_bytes()));
    Ok(format!("{}{SEPARATOR}{}", STANDARD.encode(public_der.as_bytes()), private_b64.as_str()))
}

fn split(key_string: &str) -> Result<(&str, &str)> {
    key_string
        .split_once(SEPARATOR)
        .ok_or_else(|| AuthError::invalid_key_material("key string has no separator"))
}

/// The public half of a key string.
///
/// # Errors
///
/// Returns [`AuthError::InvalidKeyMaterial`] if the string is malformed.
pub fn public_key(key_string: &str) -> Result<RsaPublicKey> {
    let (public_b64, _) = split(key_string)?;
    let der = STANDARD
        .decode(public_b64)
        .map_err(|e| AuthError::invalid_key_material(format!("public key is not base64: {e}")))?;
    RsaPublicKey::from_public_key_der(&der)
        .map_err(|e| AuthError::invalid_key_material(format!("public key is not SPKI DER: {e}")))
}

/// Unsigned big-endian base64url modulus and exponent of a public key, as
/// used by JWKS and [`DecodingKey::from_rsa_components`].
#[must_use]
pub fn public_components(key: &RsaPublicKey) -> (String, String) {
    (URL_SAFE_NO_PAD.encode(key.n().to_bytes_be()), URL_SAFE_NO_PAD.encode(key.e().to_bytes_be()))
}

/// Verification key for a key string.
///
/// # Errors
///
/// Returns [`AuthError::InvalidKeyMaterial`] if the public half is malformed.
pub fn decoding_key(key_string: &str) -> Result<DecodingKey> {
    let (n, e) = public_components(&public_key(key_string)?);
    DecodingKey::from_rsa_components(&n, &e)
        .map_err(|err| AuthError::invalid_key_material(format!("unusable public key: {err}")))
}

/// Signing key for a key string.
///
/// # Errors
///
/// Returns [`AuthError::InvalidKeyMaterial`] if the private half is malformed.
pub fn encoding_key(key_string: &str) -> Result<EncodingKey> {
    let (_, private_b64) = split(key_string)?;
    let der = Zeroizing::new(
        STANDARD.decode(private_b64).map_err(|e| {
            AuthError::invalid_key_material(format!("private key is not base64: {e}"))
        })?,
    );
    let private = RsaPrivateKey::from_pkcs8_der(&der).map_err(|e| {
        AuthError::invalid_key_material(format!("private key is not PKCS#8 DER: {e}"))
    })?;
    let pkcs1 = private
        .to_pkcs1_der()
        .map_err(|e| AuthError::invalid_key_material(format!("private key encoding: {e}")))?;
    Ok(EncodingKey::from_rsa_der(pkcs1.as_bytes()))
}
