//! Fixed bearer token

use async_trait::async_trait;
use soak_bench_core::{AuthError, Credential, TokenProvider};

/// Returns the same credential on every call
pub struct StaticTokenProvider {
    credential: Credential,
}

impl StaticTokenProvider {
    /// Wrap a token
    ///
    /// # Errors
    /// Returns `AuthError::Config` for an empty token.
    pub fn new(token: impl Into<String>) -> Result<Self, AuthError> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(AuthError::Config("static token is empty".into()));
        }
        Ok(Self {
            credential: Credential::new(token),
        })
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    fn name(&self) -> &str {
        "static"
    }

    async fn acquire(&self) -> Result<Credential, AuthError> {
        Ok(self.credential.clone())
    }
}

impl std::fmt::Debug for StaticTokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticTokenProvider")
            .field("credential", &self.credential)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_returns_same_credential() {
        let provider = StaticTokenProvider::new("tok").unwrap();
        let a = provider.acquire().await.unwrap();
        let b = provider.acquire().await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.bearer(), "Bearer tok");
    }

    #[test]
    fn test_debug_hides_token() {
        let provider = StaticTokenProvider::new("hunter2").unwrap();
        assert!(!format!("{provider:?}").contains("hunter2"));
    }
}
