//! Error types for the node runtime.

use lowmesh_nwk::NwkError;

/// Errors that can occur while configuring or running nodes.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("network layer error: {0}")]
    Nwk(#[from] NwkError),
    #[error("radio medium is gone")]
    MediumClosed,
    #[error("node {0} is not running")]
    NodeStopped(String),
}
