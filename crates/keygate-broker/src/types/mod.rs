//! Broker domain types.

pub mod auth_code;
pub mod auth_request;
pub mod client;
pub mod identity;
pub mod refresh_token;

pub use auth_code::AuthCode;
pub use auth_request::{AuthRequest, AuthRequestStatus};
pub use client::{Client, ClientValidationError};
pub use identity::{Claims, Identity};
pub use refresh_token::RefreshToken;
