//! Credential issuance for the QWeather API.
//!
//! [`JwtSigner`] mints short-lived EdDSA tokens from the project's Ed25519
//! key; [`TokenCache`] keeps one of them alive and refreshes it shortly before
//! it expires.

mod cache;
mod signer;

pub use cache::{DEFAULT_REFRESH_MARGIN, TokenCache};
pub use signer::{Credentials, DEFAULT_TOKEN_TTL, IssuedToken, JwtSigner, TokenSigner};
