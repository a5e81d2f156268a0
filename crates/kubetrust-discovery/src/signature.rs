//! Detached token signatures
//!
//! The control plane signs the wire-encoded config with each bootstrap
//! token as a compact JWS with the payload omitted:
//! `base64url(header)..base64url(HMAC-SHA256)`. The header is
//! `{"alg":"HS256","kid":"<token id>"}` and the MAC key is the token secret.

use aws_lc_rs::hmac;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};

use crate::error::{DiscoveryError, Result};
use crate::token::BootstrapToken;

const ALGORITHM: &str = "HS256";

#[derive(Debug, Serialize, Deserialize)]
struct JwsHeader {
    alg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    kid: Option<String>,
}

fn signing_input(encoded_header: &str, payload: &[u8]) -> String {
    format!("{}.{}", encoded_header, URL_SAFE_NO_PAD.encode(payload))
}

fn key_for(token: &BootstrapToken) -> hmac::Key {
    hmac::Key::new(hmac::HMAC_SHA256, token.secret().as_bytes())
}

/// Produce the detached signature of `payload` for `token`
pub fn sign_detached(token: &BootstrapToken, payload: &[u8]) -> Result<String> {
    let header = JwsHeader {
        alg: ALGORITHM.to_string(),
        kid: Some(token.id().to_string()),
    };
    let header_json = serde_json::to_vec(&header)
        .map_err(|e| DiscoveryError::InvalidTrustObject(format!("encode JWS header: {}", e)))?;
    let encoded_header = URL_SAFE_NO_PAD.encode(header_json);

    let tag = hmac::sign(&key_for(token), signing_input(&encoded_header, payload).as_bytes());
    Ok(format!("{}..{}", encoded_header, URL_SAFE_NO_PAD.encode(tag.as_ref())))
}

/// Verify a detached signature of `payload` made with `token`
pub fn verify_detached(token: &BootstrapToken, payload: &[u8], jws: &str) -> Result<()> {
    let invalid = |reason: &str| DiscoveryError::SignatureInvalid {
        token_id: token.id().to_string(),
        reason: reason.to_string(),
    };

    let mut parts = jws.trim().split('.');
    let (Some(encoded_header), Some(""), Some(encoded_mac), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(invalid("not a detached compact JWS"));
    };

    let header_json = URL_SAFE_NO_PAD
        .decode(encoded_header)
        .map_err(|_| invalid("header is not base64url"))?;
    let header: JwsHeader =
        serde_json::from_slice(&header_json).map_err(|_| invalid("header is not valid JSON"))?;
    if header.alg != ALGORITHM {
        return Err(invalid("unsupported algorithm"));
    }
    if header.kid.as_deref().is_some_and(|kid| kid != token.id()) {
        return Err(invalid("key id does not match token"));
    }

    let mac = URL_SAFE_NO_PAD
        .decode(encoded_mac)
        .map_err(|_| invalid("signature is not base64url"))?;
    hmac::verify(
        &key_for(token),
        signing_input(encoded_header, payload).as_bytes(),
        &mac,
    )
    .map_err(|_| invalid("signature does not match"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token() -> BootstrapToken {
        BootstrapToken::parse("abcdef.0123456789abcdef").unwrap()
    }

    #[test]
    fn signature_verifies_with_same_token() {
        let payload = b"apiVersion: v1\nkind: Config\n";
        let jws = sign_detached(&token(), payload).unwrap();
        assert!(jws.contains(".."));
        assert!(verify_detached(&token(), payload, &jws).is_ok());
    }

    #[test]
    fn any_single_byte_change_breaks_signature() {
        let payload = b"apiVersion: v1\nkind: Config\n".to_vec();
        let jws = sign_detached(&token(), &payload).unwrap();

        for i in 0..payload.len() {
            let mut tampered = payload.clone();
            tampered[i] ^= 0x01;
            assert!(
                matches!(
                    verify_detached(&token(), &tampered, &jws),
                    Err(DiscoveryError::SignatureInvalid { .. })
                ),
                "byte {} tampered",
                i
            );
        }
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let payload = b"config";
        let jws = sign_detached(&token(), payload).unwrap();
        let other = BootstrapToken::parse("abcdef.ffffffffffffffff").unwrap();
        assert!(verify_detached(&other, payload, &jws).is_err());
    }

    #[test]
    fn mismatched_key_id_is_rejected() {
        let payload = b"config";
        let jws = sign_detached(&token(), payload).unwrap();
        let other = BootstrapToken::parse("zzzzzz.0123456789abcdef").unwrap();
        match verify_detached(&other, payload, &jws) {
            Err(DiscoveryError::SignatureInvalid { token_id, reason }) => {
                assert_eq!(token_id, "zzzzzz");
                assert!(reason.contains("key id"));
            }
            other => panic!("expected SignatureInvalid, got {:?}", other),
        }
    }

    #[test]
    fn attached_or_garbled_jws_is_rejected() {
        let payload = b"config";
        let jws = sign_detached(&token(), payload).unwrap();
        let attached = jws.replacen("..", ".Y29uZmln.", 1);
        assert!(verify_detached(&token(), payload, &attached).is_err());
        assert!(verify_detached(&token(), payload, "garbage").is_err());
        assert!(verify_detached(&token(), payload, "").is_err());
    }

    #[test]
    fn other_algorithms_are_rejected() {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","kid":"abcdef"}"#);
        let jws = format!("{}..", header);
        assert!(verify_detached(&token(), b"config", &jws).is_err());
    }
}
