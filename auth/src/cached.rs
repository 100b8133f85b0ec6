//! Credential caching

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use soak_bench_core::{AuthError, Credential, TokenProvider};
use tokio::sync::Mutex;

/// Refresh this long before the issuer's expiry
pub const DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// How long a credential without an expiry is reused
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(300);

/// Reuses the inner provider's credential until it nears expiry
///
/// Refreshes are single-flight: concurrent callers wait on the same fetch
/// instead of each hitting the issuer. Failed fetches are not cached.
pub struct CachedTokenProvider {
    inner: Arc<dyn TokenProvider>,
    current: Mutex<Option<Credential>>,
    refresh_margin: Duration,
    max_age: Duration,
}

impl CachedTokenProvider {
    /// Wrap a provider with the default margins
    pub fn new(inner: Arc<dyn TokenProvider>) -> Self {
        Self {
            inner,
            current: Mutex::new(None),
            refresh_margin: DEFAULT_REFRESH_MARGIN,
            max_age: DEFAULT_MAX_AGE,
        }
    }

    /// Override the refresh margin
    pub fn with_refresh_margin(mut self, margin: Duration) -> Self {
        self.refresh_margin = margin;
        self
    }

    /// Override the reuse window for credentials without an expiry
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    fn is_fresh(&self, credential: &Credential) -> bool {
        if credential.expires_at.is_some() {
            return !credential.expires_within(self.refresh_margin);
        }
        let age = (Utc::now() - credential.acquired_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        age < self.max_age
    }
}

#[async_trait]
impl TokenProvider for CachedTokenProvider {
    fn name(&self) -> &str {
        "cached"
    }

    async fn acquire(&self) -> Result<Credential, AuthError> {
        let mut current = self.current.lock().await;
        if let Some(credential) = current.as_ref() {
            if self.is_fresh(credential) {
                return Ok(credential.clone());
            }
        }

        tracing::debug!(provider = self.inner.name(), "Refreshing cached credential");
        let credential = self.inner.acquire().await?;
        *current = Some(credential.clone());
        Ok(credential)
    }
}

impl std::fmt::Debug for CachedTokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedTokenProvider")
            .field("inner", &self.inner.name())
            .field("refresh_margin", &self.refresh_margin)
            .field("max_age", &self.max_age)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        calls: AtomicUsize,
        lifetime: Option<chrono::Duration>,
        fail: bool,
    }

    impl Counting {
        fn new(lifetime: Option<chrono::Duration>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                lifetime,
                fail: false,
            }
        }
    }

    #[async_trait]
    impl TokenProvider for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        async fn acquire(&self) -> Result<Credential, AuthError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(AuthError::Status(500));
            }
            let credential = Credential::new(format!("token-{n}"));
            Ok(match self.lifetime {
                Some(lifetime) => credential.with_expiry(Utc::now() + lifetime),
                None => credential,
            })
        }
    }

    #[tokio::test]
    async fn test_reuses_fresh_credential() {
        let inner = Arc::new(Counting::new(Some(chrono::Duration::hours(1))));
        let cached = CachedTokenProvider::new(inner.clone());

        for _ in 0..5 {
            assert_eq!(cached.acquire().await.unwrap().token(), "token-0");
        }
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_refreshes_inside_margin() {
        let inner = Arc::new(Counting::new(Some(chrono::Duration::seconds(30))));
        let cached = CachedTokenProvider::new(inner.clone());

        assert_eq!(cached.acquire().await.unwrap().token(), "token-0");
        assert_eq!(cached.acquire().await.unwrap().token(), "token-1");
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_no_expiry_uses_max_age() {
        let inner = Arc::new(Counting::new(None));
        let cached = CachedTokenProvider::new(inner.clone());
        cached.acquire().await.unwrap();
        cached.acquire().await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);

        let inner = Arc::new(Counting::new(None));
        let uncached = CachedTokenProvider::new(inner.clone()).with_max_age(Duration::ZERO);
        uncached.acquire().await.unwrap();
        uncached.acquire().await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_fetch() {
        let inner = Arc::new(Counting::new(Some(chrono::Duration::hours(1))));
        let cached = Arc::new(CachedTokenProvider::new(inner.clone()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cached = Arc::clone(&cached);
                tokio::spawn(async move { cached.acquire().await.unwrap() })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.await.unwrap().token(), "token-0");
        }
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let mut counting = Counting::new(None);
        counting.fail = true;
        let inner = Arc::new(counting);
        let cached = CachedTokenProvider::new(inner.clone());

        assert!(matches!(cached.acquire().await, Err(AuthError::Status(500))));
        assert!(cached.acquire().await.is_err());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }
}
