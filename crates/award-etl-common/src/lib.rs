//! Award ETL Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Leaf utilities shared by the award ETL workspace members.
//!
//! - **Coercion**: lenient conversion of untyped JSON values into typed,
//!   nullable fields (used by every transformer)
//! - **Logging**: process-wide `tracing` subscriber setup
//!
//! # Example
//!
//! ```
//! use award_etl_common::coerce;
//! use serde_json::json;
//!
//! assert_eq!(coerce::to_int(&json!("42")), Some(42));
//! assert_eq!(coerce::clean_string(&json!("  "), None), None);
//! ```

pub mod coerce;
pub mod error;
pub mod logging;

pub use error::{CoerceError, Result};
