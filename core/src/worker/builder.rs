//! Builder pattern for OperationExecutor construction

use crate::config::{LoadMode, TestConfig};
use crate::error::{BenchError, BenchResult};
use crate::request::BatchEncoder;
use crate::traits::{StreamConnector, TokenProvider, Transport};

use super::executor::{OperationExecutor, Workload};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Builder for [`OperationExecutor`]
///
/// # Example
/// ```ignore
/// let executor = ExecutorBuilder::new()
///     .config(&config)
///     .transport(transport)
///     .token_provider(auth)
///     .build()?;
/// ```
#[derive(Default)]
pub struct ExecutorBuilder {
    mode: Option<LoadMode>,
    batch_size: Option<usize>,
    request_timeout: Option<Duration>,
    attributes: Option<BTreeMap<String, String>>,
    transport: Option<Arc<dyn Transport>>,
    connector: Option<Arc<dyn StreamConnector>>,
    token_provider: Option<Arc<dyn TokenProvider>>,
}

impl ExecutorBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Take mode, batch size and request timeout from a configuration
    pub fn config(mut self, config: &TestConfig) -> Self {
        self.mode = Some(config.mode.clone());
        self.batch_size = Some(config.batch_size);
        self.request_timeout = Some(config.request_timeout);
        self
    }

    /// Set the load mode
    pub fn mode(mut self, mode: LoadMode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Set the batch size
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    /// Set the per-operation timeout
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Override the message attribute map
    pub fn attributes(mut self, attributes: BTreeMap<String, String>) -> Self {
        self.attributes = Some(attributes);
        self
    }

    /// Set the publish transport
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Set the stream connector
    pub fn connector(mut self, connector: Arc<dyn StreamConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Set the credential provider
    pub fn token_provider(mut self, provider: Arc<dyn TokenProvider>) -> Self {
        self.token_provider = Some(provider);
        self
    }

    /// Build the executor
    ///
    /// # Errors
    /// Returns an error if a field the chosen mode needs is missing.
    pub fn build(self) -> BenchResult<OperationExecutor> {
        let mode = self.mode.ok_or(BenchError::missing_config("mode"))?;
        let auth = self
            .token_provider
            .ok_or(BenchError::missing_config("token_provider"))?;
        let request_timeout = self
            .request_timeout
            .ok_or(BenchError::missing_config("request_timeout"))?;

        let workload = match mode {
            LoadMode::Publish => {
                let transport = self
                    .transport
                    .ok_or(BenchError::missing_config("transport"))?;
                let batch_size = self
                    .batch_size
                    .ok_or(BenchError::missing_config("batch_size"))?;
                let mut encoder = BatchEncoder::new(batch_size);
                if let Some(attributes) = self.attributes {
                    encoder = encoder.with_attributes(attributes);
                }
                Workload::Publish { transport, encoder }
            }
            LoadMode::Stream { hold } => {
                let connector = self
                    .connector
                    .ok_or(BenchError::missing_config("connector"))?;
                Workload::Stream { connector, hold }
            }
        };

        Ok(OperationExecutor::new(workload, auth, request_timeout))
    }
}
