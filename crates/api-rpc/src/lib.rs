//! JSON-RPC API Layer
//!
//! Exposes the Gearflow job, queue, batch, rule, gear and event operations
//! as versioned JSON-RPC 2.0 methods.

pub mod error;
pub mod handler;
pub mod server;
pub mod types;

pub use handler::{RpcHandler, Services};
pub use server::{RpcServer, RpcServerConfig};
