//! # Configuration
//!
//! Controller and server configuration, loaded once from the environment and
//! shared behind async locks.

pub mod controller;
pub mod server;

pub use controller::ControllerConfig;
pub use server::ServerConfig;

use std::sync::Arc;
use tokio::sync::RwLock;

/// Controller configuration shared between the watch loop and reconcilers
pub type SharedControllerConfig = Arc<RwLock<ControllerConfig>>;

/// Server configuration shared with the HTTP server task
pub type SharedServerConfig = Arc<RwLock<ServerConfig>>;

/// Load both configurations from the environment
#[must_use]
pub fn create_shared_config() -> (SharedControllerConfig, SharedServerConfig) {
    (
        Arc::new(RwLock::new(ControllerConfig::from_env())),
        Arc::new(RwLock::new(ServerConfig::from_env())),
    )
}
