use std::{
    fmt,
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// Lifetime of a minted token. The provider rejects tokens valid for more than 24h.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(82_800);

/// Backdating applied to `iat` to absorb clock skew against the provider.
const ISSUED_AT_SKEW_SECS: u64 = 30;

/// Project credentials used to sign API tokens.
#[derive(Clone)]
pub struct Credentials {
    pub project_id: String,
    pub key_id: String,
    pub private_key_pem: String,
}

impl Credentials {
    pub fn new(
        project_id: impl Into<String>,
        key_id: impl Into<String>,
        private_key_pem: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            key_id: key_id.into(),
            private_key_pem: private_key_pem.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("project_id", &self.project_id)
            .field("key_id", &self.key_id)
            .field("private_key_pem", &"<redacted>")
            .finish()
    }
}

/// A signed bearer token together with the instant it stops being valid.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: Instant,
}

impl IssuedToken {
    /// Time left before expiry, zero if already expired.
    pub fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }
}

/// Something that can mint fresh tokens.
pub trait TokenSigner: Send + Sync {
    fn sign(&self) -> Result<IssuedToken>;
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Claims {
    pub sub: String,
    pub iat: u64,
    pub exp: u64,
}

/// Signs EdDSA JWTs with the project's Ed25519 private key.
#[derive(Debug, Clone)]
pub struct JwtSigner {
    credentials: Credentials,
    ttl: Duration,
}

impl JwtSigner {
    pub fn new(credentials: Credentials) -> Result<Self> {
        if credentials.project_id.trim().is_empty() {
            return Err(Error::Config("project id must not be empty".into()));
        }
        if credentials.key_id.trim().is_empty() {
            return Err(Error::Config("key id must not be empty".into()));
        }
        Ok(Self {
            credentials,
            ttl: DEFAULT_TOKEN_TTL,
        })
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Parse the configured key without signing anything.
    pub fn check_key(&self) -> Result<()> {
        EncodingKey::from_ed_pem(self.credentials.private_key_pem.as_bytes())?;
        Ok(())
    }
}

impl TokenSigner for JwtSigner {
    fn sign(&self) -> Result<IssuedToken> {
        let key = EncodingKey::from_ed_pem(self.credentials.private_key_pem.as_bytes())?;

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| Error::Credential(format!("system clock before unix epoch: {e}")))?
            .as_secs();

        let mut header = Header::new(Algorithm::EdDSA);
        header.kid = Some(self.credentials.key_id.clone());

        let claims = Claims {
            sub: self.credentials.project_id.clone(),
            iat: now.saturating_sub(ISSUED_AT_SKEW_SECS),
            exp: now + self.ttl.as_secs(),
        };

        let token = jsonwebtoken::encode(&header, &claims, &key)?;
        debug!(kid = %self.credentials.key_id, "Signed new API token");

        Ok(IssuedToken {
            token,
            expires_at: Instant::now() + self.ttl,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::{TEST_PRIVATE_KEY_PEM, TEST_PUBLIC_KEY_PEM};
    use jsonwebtoken::{DecodingKey, Validation};

    fn credentials() -> Credentials {
        Credentials::new("proj-123", "key-abc", TEST_PRIVATE_KEY_PEM)
    }

    #[test]
    fn test_token_header_and_claims() {
        let signer = JwtSigner::new(credentials()).unwrap();
        let issued = signer.sign().unwrap();

        let header = jsonwebtoken::decode_header(&issued.token).unwrap();
        assert_eq!(header.alg, Algorithm::EdDSA);
        assert_eq!(header.kid.as_deref(), Some("key-abc"));

        let key = DecodingKey::from_ed_pem(TEST_PUBLIC_KEY_PEM.as_bytes()).unwrap();
        let data =
            jsonwebtoken::decode::<Claims>(&issued.token, &key, &Validation::new(Algorithm::EdDSA))
                .unwrap();
        assert_eq!(data.claims.sub, "proj-123");
        assert_eq!(data.claims.exp - data.claims.iat, 82_800 + 30);

        let remaining = issued.remaining();
        assert!(remaining > Duration::from_secs(82_700));
        assert!(remaining <= DEFAULT_TOKEN_TTL);
    }

    #[test]
    fn test_custom_ttl() {
        let signer = JwtSigner::new(credentials())
            .unwrap()
            .with_ttl(Duration::from_secs(600));
        let issued = signer.sign().unwrap();

        let key = DecodingKey::from_ed_pem(TEST_PUBLIC_KEY_PEM.as_bytes()).unwrap();
        let data =
            jsonwebtoken::decode::<Claims>(&issued.token, &key, &Validation::new(Algorithm::EdDSA))
                .unwrap();
        assert_eq!(data.claims.exp - data.claims.iat, 600 + 30);
        assert!(issued.remaining() <= Duration::from_secs(600));
    }

    #[test]
    fn test_empty_ids_are_config_errors() {
        let err = JwtSigner::new(Credentials::new("", "key", TEST_PRIVATE_KEY_PEM)).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        let err = JwtSigner::new(Credentials::new("proj", " ", TEST_PRIVATE_KEY_PEM)).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_malformed_key_is_credential_error() {
        let signer = JwtSigner::new(Credentials::new("proj", "key", "not a pem")).unwrap();
        assert!(matches!(signer.sign(), Err(Error::Credential(_))));
        assert!(matches!(signer.check_key(), Err(Error::Credential(_))));
    }

    #[test]
    fn test_debug_redacts_private_key() {
        let debug = format!("{:?}", credentials());
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains("PRIVATE KEY"));
    }
}
