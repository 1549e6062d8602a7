//! Webhook delivery dispatcher.
//!
//! [`Dispatcher::dispatch_pending_deliveries`] is the single entry point used by
//! the scheduled and on-demand triggers.

pub mod client;
pub mod dispatch;
pub mod policy;

pub use client::{ClientError, DeliveryClient, DeliveryOutcome, OutboundRequest};
pub use dispatch::{DispatchError, Dispatcher, DispatcherConfig};
pub use policy::RetryPolicy;
