//! Bootstrap token model
//!
//! A bootstrap token is `<id>.<secret>`: six and sixteen lowercase
//! alphanumeric characters. The id is public and selects the signature
//! entry in the trust object; the secret is the HMAC key that signature
//! was made with.

use std::fmt;
use std::str::FromStr;

use crate::error::{DiscoveryError, Result};

/// Length of the public token id
pub const TOKEN_ID_LEN: usize = 6;

/// Length of the token secret
pub const TOKEN_SECRET_LEN: usize = 16;

const TOKEN_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// A parsed bootstrap token
#[derive(Clone, PartialEq, Eq)]
pub struct BootstrapToken {
    id: String,
    secret: String,
}

fn is_token_part(s: &str, len: usize) -> bool {
    s.len() == len
        && s
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
}

impl BootstrapToken {
    /// Parse `<id>.<secret>`
    ///
    /// The error never echoes the input, since it may hold a real secret.
    pub fn parse(s: &str) -> Result<Self> {
        let (id, secret) = s.split_once('.').ok_or_else(|| {
            DiscoveryError::MalformedToken("expected <id>.<secret>".to_string())
        })?;
        if !is_token_part(id, TOKEN_ID_LEN) {
            return Err(DiscoveryError::MalformedToken(format!(
                "token id must be {} lowercase alphanumeric characters",
                TOKEN_ID_LEN
            )));
        }
        if !is_token_part(secret, TOKEN_SECRET_LEN) {
            return Err(DiscoveryError::MalformedToken(format!(
                "token secret must be {} lowercase alphanumeric characters",
                TOKEN_SECRET_LEN
            )));
        }
        Ok(Self {
            id: id.to_string(),
            secret: secret.to_string(),
        })
    }

    /// Generate a new random token
    pub fn generate() -> Result<Self> {
        Ok(Self {
            id: random_token_part(TOKEN_ID_LEN)?,
            secret: random_token_part(TOKEN_SECRET_LEN)?,
        })
    }

    /// Public token id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Shared secret
    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Name of the trust object entry holding this token's signature
    pub fn signature_key(&self) -> String {
        format!("{}{}", crate::trust_object::SIGNATURE_KEY_PREFIX, self.id)
    }
}

/// Random string over `[a-z0-9]` from the OS CSPRNG
///
/// Bytes at or above the largest multiple of the alphabet size are
/// rejected so every character is equally likely.
fn random_token_part(len: usize) -> Result<String> {
    let limit = 256 - (256 % TOKEN_ALPHABET.len());
    let mut out = String::with_capacity(len);
    let mut buf = [0u8; 32];
    while out.len() < len {
        aws_lc_rs::rand::fill(&mut buf).map_err(|_| {
            DiscoveryError::TokenGeneration("OS random source unavailable".to_string())
        })?;
        for &b in buf.iter().filter(|&&b| usize::from(b) < limit) {
            if out.len() == len {
                break;
            }
            out.push(char::from(TOKEN_ALPHABET[usize::from(b) % TOKEN_ALPHABET.len()]));
        }
    }
    Ok(out)
}

impl FromStr for BootstrapToken {
    type Err = DiscoveryError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Debug for BootstrapToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Secret stays out of logs
        f.debug_struct("BootstrapToken")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for BootstrapToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.id, self.secret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_token_round_trips() {
        let token: BootstrapToken = "abcdef.0123456789abcdef".parse().unwrap();
        assert_eq!(token.id(), "abcdef");
        assert_eq!(token.secret(), "0123456789abcdef");
        assert_eq!(token.to_string(), "abcdef.0123456789abcdef");
        assert_eq!(token.signature_key(), "signature-abcdef");
    }

    #[test]
    fn malformed_tokens_are_rejected() {
        for bad in [
            "",
            "abcdef",
            "abcdef0123456789abcdef",
            "abcde.0123456789abcdef",
            "abcdefg.0123456789abcdef",
            "abcdef.0123456789abcde",
            "abcdef.0123456789abcdef0",
            "ABCDEF.0123456789abcdef",
            "abcdef.0123456789ABCDEF",
            "abc-ef.0123456789abcdef",
            "abcdef:0123456789abcdef",
            "abcdef.0123456789.abcde",
            " abcdef.0123456789abcdef",
            "abcdéf.0123456789abcdef",
        ] {
            assert!(
                matches!(BootstrapToken::parse(bad), Err(DiscoveryError::MalformedToken(_))),
                "{:?} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn malformed_token_error_hides_input() {
        let err = BootstrapToken::parse("abcdef.SECRETSECRETSECR").unwrap_err();
        assert!(!err.to_string().contains("SECRET"));
    }

    #[test]
    fn generated_tokens_match_grammar() {
        for _ in 0..50 {
            let token = BootstrapToken::generate().unwrap();
            let parsed = BootstrapToken::parse(&token.to_string()).unwrap();
            assert_eq!(parsed, token);
        }
        let a = BootstrapToken::generate().unwrap();
        let b = BootstrapToken::generate().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn debug_shows_only_id() {
        let token = BootstrapToken::parse("abcdef.0123456789abcdef").unwrap();
        let debug = format!("{:?}", token);
        assert!(debug.contains("abcdef"));
        assert!(!debug.contains("0123456789abcdef"));
    }
}
