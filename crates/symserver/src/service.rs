//! The state shared by all request handlers.

use std::sync::Arc;

use anyhow::{Context, Result};

use symserver_service::config::Config;
use symserver_service::symbolication::SymbolicationService;

#[derive(Debug)]
struct ServiceInner {
    config: Config,
    symbolication: SymbolicationService,
}

/// The shared request service handed to every endpoint.
#[derive(Debug, Clone)]
pub struct RequestService(Arc<ServiceInner>);

impl RequestService {
    pub fn create(config: Config) -> Result<Self> {
        let symbolication =
            SymbolicationService::create(&config).context("failed to create the symbolication service")?;

        Ok(RequestService(Arc::new(ServiceInner {
            config,
            symbolication,
        })))
    }

    pub fn config(&self) -> &Config {
        &self.0.config
    }

    pub fn symbolication(&self) -> &SymbolicationService {
        &self.0.symbolication
    }
}
