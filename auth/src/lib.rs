//! Credential providers for soak-bench
//!
//! This crate provides implementations of the `TokenProvider` trait for:
//!
//! - Static bearer tokens supplied once
//! - Tokens fetched from an instance metadata endpoint (with an override
//!   token that bypasses the fetch)
//! - An opt-in caching wrapper around either of them

#![warn(missing_docs)]
#![warn(clippy::all)]

mod cached;
mod metadata;
mod static_token;

pub use cached::{CachedTokenProvider, DEFAULT_MAX_AGE, DEFAULT_REFRESH_MARGIN};
pub use metadata::{
    MetadataTokenProvider, DEFAULT_METADATA_ENDPOINT, DEFAULT_METADATA_TIMEOUT, METADATA_FLAVOR,
};
pub use static_token::StaticTokenProvider;

use std::sync::Arc;

use soak_bench_core::{AuthError, CredentialSource, TokenProvider};

/// Build the provider a configuration asks for
pub fn from_source(source: &CredentialSource) -> Result<Arc<dyn TokenProvider>, AuthError> {
    match source {
        CredentialSource::Static { token } => Ok(Arc::new(StaticTokenProvider::new(token.clone())?)),
        CredentialSource::Metadata {
            endpoint,
            override_token,
            cache,
        } => {
            let provider = match override_token {
                Some(token) if endpoint.trim().is_empty() => {
                    MetadataTokenProvider::from_override(token.clone())?
                }
                Some(token) => MetadataTokenProvider::new(endpoint.clone())?.with_override(token.clone()),
                None => MetadataTokenProvider::new(endpoint.clone())?,
            };

            if *cache {
                tracing::debug!(endpoint = %endpoint, "Caching metadata credentials");
                Ok(Arc::new(CachedTokenProvider::new(Arc::new(provider))))
            } else {
                Ok(Arc::new(provider))
            }
        }
    }
}
