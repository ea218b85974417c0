//! # bread-auth-core
//!
//! Shared infrastructure for the bread-auth workspace: the service-level
//! error type, the structured logger, and unique-id generation. Protocol
//! semantics live in `bread-auth-provider`; this crate only carries the
//! concerns every member needs.

pub mod error;
pub mod id;
pub mod logger;

pub use error::{CoreError, Result};
pub use logger::{AuthLogger, LogLevel, LoggerConfig};
