//! # gameq-net
//!
//! Socket layer for gameq.
//!
//! This crate provides:
//! - Lazily opened UDP/TCP connections that can be kept across query phases
//! - A single-task readiness poller that collects responses from every
//!   connection of a batch under one deadline

pub mod connection;
pub mod error;
pub mod poller;
pub mod stream;

pub use connection::{Connection, ConnectionConfig, DEFAULT_CONNECT_TIMEOUT};
pub use error::NetError;
pub use poller::{Poller, DEFAULT_MAX_DATAGRAM_SIZE};
pub use stream::QueryStream;
