//! Portside Client
//!
//! Connection and subscription manager for a Portside workspace
//! server: one shared WebSocket carrying JSON-RPC 2.0 requests plus
//! server-initiated push notifications tied to explicit subscriptions.
//!
//! The layers, bottom up:
//!
//! - [`connection`]: state machine owning the socket, reconnecting
//!   with backoff, broadcasting status transitions.
//! - [`correlator`]: pending-request table; every request resolves by
//!   matching response, cancellation, or connection loss.
//! - [`router`]: token → handler table for push notifications.
//! - [`subscription`]: generic subscribe/unsubscribe lifecycle driver,
//!   reused for every subscribable resource kind.
//! - [`resources`]: the resource adapters (sessions, settings, file
//!   watch) and plain unary wrappers (files, git, worktrees).

mod client;
mod config;
mod connection;
mod correlator;
mod error;
mod reconciler;
mod router;
mod subscription;

pub mod resources;

pub use client::Client;
pub use config::Config;
pub use connection::{ConnectionState, ConnectionStatus};
pub use error::ClientError;
pub use subscription::{ResourceKind, Subscription, SubscriptionEvent};
