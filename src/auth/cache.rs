use std::{sync::Arc, time::Duration};

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use super::signer::{IssuedToken, TokenSigner};
use crate::error::Result;

/// A token is refreshed once it has this much validity or less left.
pub const DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(300);

/// Holds at most one live token and refreshes it before it expires.
///
/// Reads are lock-shared. Refreshes are serialized on `refresh_lock` and
/// re-check the slot once acquired, so callers racing on an empty or stale
/// cache trigger a single signing call.
pub struct TokenCache {
    signer: Arc<dyn TokenSigner>,
    margin: Duration,
    token: RwLock<Option<IssuedToken>>,
    refresh_lock: Mutex<()>,
}

impl TokenCache {
    pub fn new(signer: Arc<dyn TokenSigner>) -> Self {
        Self {
            signer,
            margin: DEFAULT_REFRESH_MARGIN,
            token: RwLock::new(None),
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn with_margin(mut self, margin: Duration) -> Self {
        self.margin = margin;
        self
    }

    /// Return a token that is valid for longer than the refresh margin,
    /// minting a new one if needed.
    pub async fn get_token(&self) -> Result<String> {
        if let Some(token) = self.current().await {
            return Ok(token);
        }

        let _refresh_guard = self.refresh_lock.lock().await;

        // Another task may have refreshed while we waited
        if let Some(token) = self.current().await {
            return Ok(token);
        }

        let issued = self.signer.sign()?;
        info!(
            valid_for_secs = issued.remaining().as_secs(),
            "Refreshed API token"
        );
        let token = issued.token.clone();
        *self.token.write().await = Some(issued);
        Ok(token)
    }

    /// Drop the cached token so the next `get_token` mints a new one.
    pub async fn invalidate(&self) {
        let _refresh_guard = self.refresh_lock.lock().await;
        if self.token.write().await.take().is_some() {
            debug!("Invalidated cached API token");
        }
    }

    async fn current(&self) -> Option<String> {
        let guard = self.token.read().await;
        guard
            .as_ref()
            .filter(|t| t.remaining() > self.margin)
            .map(|t| t.token.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Instant,
    };

    /// Signer that counts calls and issues tokens with a fixed lifetime.
    struct CountingSigner {
        calls: AtomicUsize,
        ttl: Duration,
    }

    impl CountingSigner {
        fn new(ttl: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                ttl,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl TokenSigner for CountingSigner {
        fn sign(&self) -> Result<IssuedToken> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            // Give racing callers time to pile up on the refresh lock
            std::thread::sleep(Duration::from_millis(20));
            Ok(IssuedToken {
                token: format!("token-{n}"),
                expires_at: Instant::now() + self.ttl,
            })
        }
    }

    struct FailingSigner;

    impl TokenSigner for FailingSigner {
        fn sign(&self) -> Result<IssuedToken> {
            Err(Error::Credential("bad key".into()))
        }
    }

    #[tokio::test]
    async fn test_reuses_valid_token() {
        let signer = CountingSigner::new(Duration::from_secs(3600));
        let cache = TokenCache::new(signer.clone());

        assert_eq!(cache.get_token().await.unwrap(), "token-1");
        assert_eq!(cache.get_token().await.unwrap(), "token-1");
        assert_eq!(signer.calls(), 1);
    }

    #[tokio::test]
    async fn test_refreshes_inside_margin() {
        // Every token is born inside the margin, so each call re-signs
        let signer = CountingSigner::new(Duration::from_secs(200));
        let cache = TokenCache::new(signer.clone());

        assert_eq!(cache.get_token().await.unwrap(), "token-1");
        assert_eq!(cache.get_token().await.unwrap(), "token-2");
        assert_eq!(signer.calls(), 2);
    }

    #[tokio::test]
    async fn test_custom_margin() {
        let signer = CountingSigner::new(Duration::from_secs(200));
        let cache = TokenCache::new(signer.clone()).with_margin(Duration::from_secs(60));

        cache.get_token().await.unwrap();
        cache.get_token().await.unwrap();
        assert_eq!(signer.calls(), 1);
    }

    #[tokio::test]
    async fn test_invalidate_forces_new_token() {
        let signer = CountingSigner::new(Duration::from_secs(3600));
        let cache = TokenCache::new(signer.clone());

        cache.get_token().await.unwrap();
        cache.invalidate().await;
        assert_eq!(cache.get_token().await.unwrap(), "token-2");
        assert_eq!(signer.calls(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_share_one_refresh() {
        let signer = CountingSigner::new(Duration::from_secs(3600));
        let cache = Arc::new(TokenCache::new(signer.clone()));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.get_token().await.unwrap() })
            })
            .collect();

        for task in tasks {
            assert_eq!(task.await.unwrap(), "token-1");
        }
        assert_eq!(signer.calls(), 1);
    }

    #[tokio::test]
    async fn test_signing_failure_leaves_cache_empty() {
        let cache = TokenCache::new(Arc::new(FailingSigner));
        assert!(matches!(cache.get_token().await, Err(Error::Credential(_))));
        assert!(cache.current().await.is_none());
    }
}
