//! Builder pattern for SoakTest construction

use std::sync::Arc;

use crate::config::TestConfig;
use crate::error::{BenchError, BenchResult};
use crate::metrics::MetricsAggregator;
use crate::traits::{StreamConnector, TokenProvider, Transport};
use crate::worker::ExecutorBuilder;

use super::executor::SoakTest;

/// Builder for creating a SoakTest with proper configuration
///
/// # Example
///
/// ```ignore
/// let test = SoakTestBuilder::new()
///     .config(config)
///     .transport(transport)
///     .token_provider(auth)
///     .build()?;
///
/// let report = test.run_with_signal_handling().await;
/// ```
#[derive(Default)]
pub struct SoakTestBuilder {
    config: Option<TestConfig>,
    transport: Option<Arc<dyn Transport>>,
    connector: Option<Arc<dyn StreamConnector>>,
    token_provider: Option<Arc<dyn TokenProvider>>,
    metrics: Option<Arc<MetricsAggregator>>,
}

impl SoakTestBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the test configuration
    pub fn config(mut self, config: TestConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the publish transport (publish mode)
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Set the stream connector (stream mode)
    pub fn connector(mut self, connector: Arc<dyn StreamConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Set the credential provider
    pub fn token_provider(mut self, provider: Arc<dyn TokenProvider>) -> Self {
        self.token_provider = Some(provider);
        self
    }

    /// Record into an existing aggregator instead of a fresh one
    pub fn metrics(mut self, metrics: Arc<MetricsAggregator>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Validate the configuration and build the test
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or a collaborator the
    /// load mode needs is missing.
    pub fn build(self) -> BenchResult<SoakTest> {
        let config = self
            .config
            .ok_or_else(|| BenchError::missing_config("config"))?;

        config
            .validate()
            .map_err(|e| BenchError::config(e.to_string()))?;

        let mut executor = ExecutorBuilder::new().config(&config);
        if let Some(transport) = self.transport {
            executor = executor.transport(transport);
        }
        if let Some(connector) = self.connector {
            executor = executor.connector(connector);
        }
        if let Some(provider) = self.token_provider {
            executor = executor.token_provider(provider);
        }
        let executor = executor.build()?;

        let metrics = match self.metrics {
            Some(metrics) => metrics,
            None => Arc::new(MetricsAggregator::new()?),
        };

        Ok(SoakTest::new(config, Arc::new(executor), metrics))
    }
}
