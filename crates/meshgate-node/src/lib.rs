//! Node orchestration for the meshgate stack.
//!
//! Ties the framing, wire, routing, and link layers together with
//! configuration, persistent identity, logging, and the cooperative
//! main loop that drives transport drivers.

pub mod config;
pub mod identity;
pub mod logging;
pub mod node;
pub mod packet_id;
pub mod storage;

pub use config::NodeConfig;
pub use node::{AnyDriver, AppEvent, Node};

/// Errors surfaced by node orchestration.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("interface error: {0}")]
    Interface(#[from] meshgate_interfaces::InterfaceError),
}
