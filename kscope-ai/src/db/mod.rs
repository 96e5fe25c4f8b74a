//! Database access for the ingestion pipeline
//!
//! Every function takes the connection of the caller's unit of work, so the
//! caller decides which transaction a statement belongs to.

pub mod aggregation;
pub mod content;
pub mod faces;
pub mod hashtags;
pub mod insights;
pub mod read_models;
