//! PKCE (Proof Key for Code Exchange), RFC 7636.
//!
//! Both transforms are accepted: `plain` (the default when a challenge is
//! sent without a method) and `S256`.
//!
//! # Example
//!
//! ```
//! use keygate_broker::oauth::pkce::{PkceChallenge, PkceChallengeMethod, PkceVerifier};
//!
//! let verifier = PkceVerifier::generate();
//! let challenge = PkceChallenge::from_verifier(&verifier);
//! assert_eq!(challenge.method, PkceChallengeMethod::S256);
//! assert!(challenge.verify(verifier.as_str()).is_ok());
//! ```

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::secret;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during PKCE operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PkceError {
    /// Verifier length is outside the valid range (43-128 characters).
    #[error("Invalid verifier length: must be 43-128 characters, got {0}")]
    InvalidVerifierLength(usize),

    /// Verifier contains invalid characters.
    #[error("Invalid verifier characters: must be [A-Za-z0-9-._~]")]
    InvalidVerifierCharacters,

    /// Challenge is empty or not base64url.
    #[error("Invalid challenge format")]
    InvalidChallengeFormat,

    /// Unknown transform.
    #[error("Unsupported challenge method: {0}")]
    UnsupportedMethod(String),

    /// The verifier does not match the challenge.
    #[error("PKCE verification failed: verifier does not match challenge")]
    VerificationFailed,
}

impl PkceError {
    /// Returns `true` if this is a verification failure rather than malformed input.
    #[must_use]
    pub fn is_verification_failure(&self) -> bool {
        matches!(self, Self::VerificationFailed)
    }
}

// =============================================================================
// Challenge Method
// =============================================================================

/// PKCE code challenge transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum PkceChallengeMethod {
    /// The challenge is the verifier itself.
    #[default]
    #[serde(rename = "plain")]
    Plain,
    /// The challenge is `BASE64URL(SHA256(verifier))`.
    S256,
}

impl PkceChallengeMethod {
    /// Parses a `code_challenge_method` value. An absent method means `plain`.
    ///
    /// # Errors
    ///
    /// Returns `PkceError::UnsupportedMethod` for anything but `plain` or `S256`.
    pub fn parse(method: Option<&str>) -> Result<Self, PkceError> {
        match method {
            None | Some("") | Some("plain") => Ok(Self::Plain),
            Some("S256") => Ok(Self::S256),
            Some(other) => Err(PkceError::UnsupportedMethod(other.to_string())),
        }
    }

    /// Returns the parameter value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::S256 => "S256",
        }
    }
}

// =============================================================================
// PKCE Verifier
// =============================================================================

/// A validated PKCE code verifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkceVerifier(String);

impl PkceVerifier {
    /// Create a new verifier from a string.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Length is not between 43 and 128 characters
    /// - Contains characters other than `[A-Za-z0-9-._~]`
    pub fn new(verifier: impl Into<String>) -> Result<Self, PkceError> {
        let verifier = verifier.into();
        let len = verifier.len();

        if !(43..=128).contains(&len) {
            return Err(PkceError::InvalidVerifierLength(len));
        }

        if !verifier
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == '_' || c == '~')
        {
            return Err(PkceError::InvalidVerifierCharacters);
        }

        Ok(Self(verifier))
    }

    /// Generate a cryptographically random verifier (32 bytes, 43 characters).
    #[must_use]
    pub fn generate() -> Self {
        Self(secret::random_urlsafe(32))
    }

    /// Get the verifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// =============================================================================
// PKCE Challenge
// =============================================================================

/// A code challenge and the transform that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PkceChallenge {
    /// The challenge value as sent by the client.
    pub challenge: String,
    /// The transform.
    pub method: PkceChallengeMethod,
}

impl PkceChallenge {
    /// Builds a challenge from authorization request parameters.
    ///
    /// # Errors
    ///
    /// Returns an error for an empty challenge, an unknown method, or an
    /// `S256` challenge that is not 43 base64url characters.
    pub fn new(challenge: &str, method: Option<&str>) -> Result<Self, PkceError> {
        let method = PkceChallengeMethod::parse(method)?;
        if challenge.is_empty() {
            return Err(PkceError::InvalidChallengeFormat);
        }
        if method == PkceChallengeMethod::S256 {
            let decoded = URL_SAFE_NO_PAD
                .decode(challenge)
                .map_err(|_| PkceError::InvalidChallengeFormat)?;
            if decoded.len() != 32 {
                return Err(PkceError::InvalidChallengeFormat);
            }
        }
        Ok(Self {
            challenge: challenge.to_string(),
            method,
        })
    }

    /// Computes an `S256` challenge for a verifier.
    #[must_use]
    pub fn from_verifier(verifier: &PkceVerifier) -> Self {
        Self {
            challenge: s256(verifier.as_str()),
            method: PkceChallengeMethod::S256,
        }
    }

    /// Checks a presented verifier against this challenge.
    ///
    /// # Errors
    ///
    /// Returns `PkceError::VerificationFailed` on mismatch, or a format error
    /// if the verifier is malformed.
    pub fn verify(&self, verifier: &str) -> Result<(), PkceError> {
        let verifier = PkceVerifier::new(verifier)?;
        let computed = match self.method {
            PkceChallengeMethod::Plain => verifier.as_str().to_string(),
            PkceChallengeMethod::S256 => s256(verifier.as_str()),
        };
        if secret::constant_time_eq(&computed, &self.challenge) {
            Ok(())
        } else {
            Err(PkceError::VerificationFailed)
        }
    }
}

fn s256(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 7636 Appendix B
    const RFC_VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
    const RFC_CHALLENGE: &str = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";

    #[test]
    fn test_rfc7636_s256_vector() {
        let verifier = PkceVerifier::new(RFC_VERIFIER).unwrap();
        let challenge = PkceChallenge::from_verifier(&verifier);
        assert_eq!(challenge.challenge, RFC_CHALLENGE);

        let stored = PkceChallenge::new(RFC_CHALLENGE, Some("S256")).unwrap();
        assert!(stored.verify(RFC_VERIFIER).is_ok());
    }

    #[test]
    fn test_plain_method() {
        let stored = PkceChallenge::new(RFC_VERIFIER, None).unwrap();
        assert_eq!(stored.method, PkceChallengeMethod::Plain);
        assert!(stored.verify(RFC_VERIFIER).is_ok());
        assert_eq!(
            stored.verify(RFC_CHALLENGE),
            Err(PkceError::VerificationFailed)
        );
    }

    #[test]
    fn test_wrong_verifier_fails() {
        let stored = PkceChallenge::new(RFC_CHALLENGE, Some("S256")).unwrap();
        let other = PkceVerifier::generate();
        let err = stored.verify(other.as_str()).unwrap_err();
        assert!(err.is_verification_failure());
    }

    #[test]
    fn test_verifier_validation() {
        assert_eq!(
            PkceVerifier::new("short"),
            Err(PkceError::InvalidVerifierLength(5))
        );
        let bad_chars = format!("{}!", "a".repeat(43));
        assert_eq!(
            PkceVerifier::new(bad_chars),
            Err(PkceError::InvalidVerifierCharacters)
        );
        assert!(PkceVerifier::new("a".repeat(128)).is_ok());
        assert!(PkceVerifier::new("a".repeat(129)).is_err());
    }

    #[test]
    fn test_challenge_validation() {
        assert_eq!(
            PkceChallenge::new("", Some("S256")),
            Err(PkceError::InvalidChallengeFormat)
        );
        assert_eq!(
            PkceChallenge::new("not-a-hash", Some("S256")),
            Err(PkceError::InvalidChallengeFormat)
        );
        assert_eq!(
            PkceChallenge::new(RFC_CHALLENGE, Some("S512")),
            Err(PkceError::UnsupportedMethod("S512".to_string()))
        );
    }
}
