//! Token signing and issuance.
//!
//! This module provides:
//!
//! - Signing keys, rotation and the published JWKS
//! - Access and ID token minting
//! - Authorization code and refresh token redemption

pub mod jwt;
pub mod service;

pub use jwt::{
    AccessTokenClaims, FederatedClaims, IdTokenClaims, Jwk, Jwks, JwtError, KeyStore,
    SigningAlgorithm, SigningKeyPair,
};
pub use service::{TokenService, encode_subject};
