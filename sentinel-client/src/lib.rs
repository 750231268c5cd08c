//! Sentinel Client - session handling and REST access for the security backend
//!
//! The pieces stack as follows: a [`TokenStore`] holds the credentials, the
//! [`RequestExecutor`] sends requests with them, the [`SessionManager`] keeps
//! them valid, and the [`ResourceClient`] exposes the backend collections.
//! [`SentinelClient`] wires all four around one shared store.

pub mod executor;
pub mod resources;
pub mod session;
pub mod token_store;

pub use executor::RequestExecutor;
pub use resources::{Collection, ResourceClient};
pub use session::{SessionManager, SessionState};
pub use token_store::{FileTokenStore, MemoryTokenStore, TokenStore};

use sentinel_core::{ApiConfig, SentinelConfig, SentinelResult};
use std::sync::Arc;
use tracing::debug;

/// Entry point bundling the session manager and resource client
#[derive(Debug)]
pub struct SentinelClient {
    session: SessionManager,
    resources: ResourceClient,
}

impl SentinelClient {
    /// Build a client whose session persists in the configured session file
    pub fn from_config(config: &SentinelConfig) -> SentinelResult<Self> {
        let path = config.storage.session_path()?;
        debug!(path = %path.display(), "Using session file");
        let store = FileTokenStore::open(path)?;
        Self::with_store(&config.api, Arc::new(store))
    }

    /// Build a client around an explicit token store
    pub fn with_store(api: &ApiConfig, tokens: Arc<dyn TokenStore>) -> SentinelResult<Self> {
        let executor = Arc::new(RequestExecutor::new(api, tokens)?);
        Ok(Self {
            session: SessionManager::new(executor.clone()),
            resources: ResourceClient::new(executor),
        })
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn resources(&self) -> &ResourceClient {
        &self.resources
    }
}
