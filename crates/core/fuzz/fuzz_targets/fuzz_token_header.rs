//! Structured fuzz target for access token headers.
//!
//! Uses the `arbitrary` crate to assemble tokens whose header is valid JSON
//! with plausible fields, so the fuzzer reaches version and `kid` handling
//! instead of stalling on base64 and JSON syntax.

#![no_main]

use arbitrary::Arbitrary;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use libfuzzer_sys::fuzz_target;
use sessionkit_core::{AccessTokenCodec, token::jwt::pre_parse};

#[derive(Debug, Arbitrary)]
struct FuzzedToken {
    alg: FuzzedAlg,
    typ: Option<String>,
    version: Option<String>,
    kid: Option<String>,
    payload: Vec<u8>,
    signature: Vec<u8>,
}

#[derive(Debug, Arbitrary)]
enum FuzzedAlg {
    Rs256,
    Hs256,
    None,
    Custom(String),
}

impl FuzzedAlg {
    fn as_str(&self) -> &str {
        match self {
            Self::Rs256 => "RS256",
            Self::Hs256 => "HS256",
            Self::None => "none",
            Self::Custom(alg) => alg,
        }
    }
}

fuzz_target!(|input: FuzzedToken| {
    let mut header = serde_json::Map::new();
    header.insert("alg".into(), input.alg.as_str().into());
    header.insert("typ".into(), input.typ.unwrap_or_else(|| "JWT".to_owned()).into());
    if let Some(version) = input.version {
        header.insert("version".into(), version.into());
    }
    if let Some(kid) = input.kid {
        header.insert("kid".into(), kid.into());
    }
    let Ok(header) = serde_json::to_vec(&header) else {
        return;
    };

    let token = format!(
        "{}.{}.{}",
        URL_SAFE_NO_PAD.encode(header),
        URL_SAFE_NO_PAD.encode(&input.payload),
        URL_SAFE_NO_PAD.encode(&input.signature),
    );

    if let Ok(parsed) = pre_parse(&token) {
        assert_eq!(parsed.algorithm.as_str(), "RS256");
    }
    let _ = AccessTokenCodec::get_info_from_access_token_without_verifying(&token);
});
