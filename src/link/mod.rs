//! Integration contracts for data links
//!
//! The engine never talks to a database directly. Scripts run against
//! implementations of the traits in this module: a [`DataSource`] answers
//! queries with a [`Cursor`], a [`DataReceiver`] accepts operation batches,
//! and both share the [`DataLink`] lifecycle. Pooling and lazy acquisition
//! live in [`PooledSlot`] and [`ResourceBroker`].
//!
//! Adapters report failures as [`LinkError`](crate::result::LinkError); the
//! engine wraps them with script-level detail.
//!
//! # Examples
//!
//! ```
//! use dray::link::{ColumnInfo, ColumnKind};
//!
//! let col = ColumnInfo::new("price", ColumnKind::Text);
//! assert_eq!(col.name, "price");
//! ```

mod pool;

pub use pool::{NoResources, PooledHandle, PooledResourceFactory, PooledSlot, ResourceBroker, SharedFactory};

use crate::result::{LinkError, Result};
use chrono::NaiveDateTime;
use std::time::Duration;

/// Kind of a result-set column, as reported by cursor metadata.
///
/// Row binding treats the kinds differently: timestamps and dates become
/// date variables, blobs become base64 text, everything else binds as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    /// Character data, numbers, and anything else read as text
    Text,
    /// Date and time of day
    Timestamp,
    /// Calendar date
    Date,
    /// Binary data
    Blob,
}

/// Descriptor of one result-set column.
#[derive(Debug, Clone)]
pub struct ColumnInfo {
    /// Column name, used for cursor getters and variable names
    pub name: String,
    /// Column kind, used to pick the binding rule
    pub kind: ColumnKind,
}

impl ColumnInfo {
    /// Creates a column descriptor.
    pub fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        ColumnInfo {
            name: name.into(),
            kind,
        }
    }
}

/// Warning reported by a receiver for one result in an operation batch.
pub struct LinkWarning {
    /// Position of the failed result within the batch
    pub result_number: i64,
    /// What went wrong with that result
    pub error: LinkError,
}

impl LinkWarning {
    /// Creates a warning for the given batch position.
    pub fn new(result_number: i64, error: impl Into<LinkError>) -> Self {
        LinkWarning {
            result_number,
            error: error.into(),
        }
    }
}

impl std::fmt::Debug for LinkWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkWarning")
            .field("result_number", &self.result_number)
            .field("error", &self.error.to_string())
            .finish()
    }
}

/// Lifecycle shared by sources and receivers.
pub trait DataLink {
    /// Best-effort request to abort whatever the link is doing.
    ///
    /// Called when a context is stopped while this link executes a request.
    /// Implementations may be called from another thread than the one
    /// running the script.
    fn cancel(&mut self) -> Result<()>;

    /// Sets the per-request timeout.
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;
}

/// A link that answers queries.
pub trait DataSource: DataLink {
    /// Runs a query and returns a cursor over its result set.
    fn request(&mut self, query: &str) -> Result<Box<dyn Cursor>>;
}

/// A link that accepts operations.
pub trait DataReceiver: DataLink {
    /// Sends one operation (possibly a batch) and returns per-result
    /// warnings. An empty vector means everything succeeded.
    fn process(&mut self, operation: &str) -> Result<Vec<LinkWarning>>;

    /// Flushes buffered operations.
    fn flush(&mut self) -> Result<()>;

    /// Closes the link; further operations are invalid.
    fn close(&mut self) -> Result<()>;
}

/// Forward-only view over a result set.
///
/// Freshly opened cursors are positioned before the first row; the first
/// `next` call moves onto it. Getters address columns by name and return
/// `None` for SQL null.
pub trait Cursor {
    /// Advances to the next row; false when the result set is exhausted.
    fn next(&mut self) -> Result<bool>;

    /// Result-set metadata.
    fn columns(&self) -> Result<Vec<ColumnInfo>>;

    /// Text value of a column in the current row.
    fn get_string(&mut self, column: &str) -> Result<Option<String>>;

    /// Datetime value of a column in the current row.
    fn get_datetime(&mut self, column: &str) -> Result<Option<NaiveDateTime>>;

    /// Binary value of a column in the current row.
    fn get_bytes(&mut self, column: &str) -> Result<Option<Vec<u8>>>;

    /// Releases the cursor and whatever statement backs it.
    fn close(&mut self) -> Result<()>;
}

/// A pooled link: either side of the transfer.
pub enum LinkObject {
    /// Query side
    Source(Box<dyn DataSource>),
    /// Operation side
    Receiver(Box<dyn DataReceiver>),
}

impl LinkObject {
    /// Cancels the underlying link.
    pub fn cancel(&mut self) -> Result<()> {
        match self {
            LinkObject::Source(s) => s.cancel(),
            LinkObject::Receiver(r) => r.cancel(),
        }
    }

    /// Sets the underlying link's timeout.
    pub fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        match self {
            LinkObject::Source(s) => s.set_timeout(timeout),
            LinkObject::Receiver(r) => r.set_timeout(timeout),
        }
    }

    /// Short kind name for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            LinkObject::Source(_) => "data source",
            LinkObject::Receiver(_) => "data receiver",
        }
    }
}
