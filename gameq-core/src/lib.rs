//! # gameq-core
//!
//! Query engine for gameq.
//!
//! This crate provides:
//! - Server descriptors and address resolution
//! - The protocol registry
//! - The batch engine: challenge round, query round, decoding
//! - Engine configuration

pub mod config;
pub mod engine;
pub mod error;
pub mod registry;
pub mod server;

pub use config::{CaptureConfig, Config, ConfigError, QueryConfig};
pub use engine::Engine;
pub use error::EngineError;
pub use registry::{ProtocolFactory, ProtocolRegistry};
pub use server::{Server, ServerSpec};
