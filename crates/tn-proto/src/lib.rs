//! Protocol Buffer definitions for the nanfengpo wire model.
//!
//! This crate owns `model.proto`, the client-side subset of the `pbx` schema,
//! and the tonic/prost code generated from it.

// Generated protobuf module via `tonic_build` in build.rs
pub mod pbx {
    tonic::include_proto!("pbx");
}

// Re-export message types for convenience
pub use pbx::*;

// Re-export client and server types for the Node service
pub use pbx::node_client::NodeClient;
pub use pbx::node_server::{Node, NodeServer};
