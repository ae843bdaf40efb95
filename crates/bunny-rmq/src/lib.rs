//! # bunny-rmq
//!
//! Typed client for the RabbitMQ management HTTP API.
//!
//! - [`ManagementClient`] speaks HTTP(S) with basic auth and maps error
//!   statuses onto [`RmqError`].
//! - [`ManagementApi`] is the object-safe subset the cluster model polls.
//! - [`types`] holds the JSON shapes exchanged with the broker.

pub mod api;
pub mod client;
pub mod error;
pub mod types;

pub use api::{ApiFuture, ManagementApi};
pub use client::{DEFAULT_REQUEST_TIMEOUT, ManagementClient, is_tls_endpoint};
pub use error::{Result, RmqError};
pub use types::*;
