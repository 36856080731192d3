//! Fuzz target for access token parsing.
//!
//! Feeds arbitrary byte strings as tokens to the pre-parser and to the
//! unverified decoder. Every result must be either `Ok(...)` or
//! `Err(AuthError)`, never a panic.

#![no_main]

use libfuzzer_sys::fuzz_target;
use sessionkit_core::{
    AccessTokenCodec, TokenVersion,
    token::{VersionedClaims, jwt::pre_parse},
};

fuzz_target!(|data: &[u8]| {
    // Tokens are always UTF-8 strings
    let Ok(token) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(parsed) = pre_parse(token) {
        if parsed.version == TokenVersion::V3 {
            assert!(parsed.kid.as_deref().is_some_and(|kid| !kid.is_empty()));
        } else {
            assert!(parsed.kid.is_none());
        }
        if let Ok(payload) = parsed.payload() {
            let _ = VersionedClaims::from_json(parsed.version, &payload);
        }
    }

    let _ = AccessTokenCodec::get_info_from_access_token_without_verifying(token);
});
