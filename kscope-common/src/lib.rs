//! # Kaleidoscope Common Library
//!
//! Shared code for the Kaleidoscope AI ingestion services:
//! - Database initialization, write-model and read-model rows
//! - Typed stream events and the flat field codec
//! - Correlation context propagated across streams
//! - Configuration loading

pub mod config;
pub mod correlation;
pub mod db;
pub mod error;
pub mod events;

pub use correlation::CorrelationId;
pub use error::{Error, Result};
