//! Result and error types for script execution
//!
//! Every fallible engine operation returns [`Result`], an alias over
//! [`EngineError`]. Adapter code (data links, resource factories) reports
//! failures as [`LinkError`], which the engine wraps while keeping the
//! original reachable through the error's `source` chain.
//!
//! # Examples
//!
//! ```
//! use dray::result::{EngineError, Result};
//!
//! fn parse_count(text: &str) -> Result<i64> {
//!     text.trim()
//!         .parse()
//!         .map_err(|_| EngineError::Format(format!("Bad count '{}'", text)))
//! }
//!
//! assert!(parse_count("12").is_ok());
//! assert!(parse_count("twelve").is_err());
//! ```

mod error;

pub use error::{EngineError, LinkError};

/// Specialized result type used throughout the engine.
pub type Result<T> = std::result::Result<T, EngineError>;
