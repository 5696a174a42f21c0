//! Portside Protocol
//!
//! Shared types for communication between Portside clients and the
//! workspace server. Traffic is JSON-RPC 2.0 over a single WebSocket;
//! these types are serialized as JSON text frames.

pub mod methods;
pub mod notify;
pub mod rpc;
pub mod types;

pub use rpc::{ErrorObject, Inbound, Notification, Request, Response};
pub use types::*;

/// Server-assigned token identifying an active subscription.
pub type SubscriptionId = String;
