//! cnav-core: Shared types, interning tables, and errors for the cnav indexing engine.

pub mod config;
pub mod error;
pub mod metrics;
pub mod tables;
pub mod types;
pub mod unit;

pub use config::*;
pub use error::*;
pub use metrics::*;
pub use tables::*;
pub use types::*;
pub use unit::*;
