//! Unified product.raw_event.v1 schema
//!
//! This module defines the input rows of the pipeline: the essential columns of
//! an analytics export, each nullable, read from a JSON array or NDJSON.

mod raw_event;
mod adapter;

pub use raw_event::*;
pub use adapter::*;
