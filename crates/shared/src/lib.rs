//! Shared types for the pizarra push channel and notification HTTP API.

pub mod error;
pub mod models;
pub mod protocol;

pub use error::*;
pub use models::*;
pub use protocol::*;
