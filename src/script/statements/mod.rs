//! Statement objects
//!
//! Composite statements ([`Block`], [`If`], [`While`], [`Case`],
//! [`Catch`]) recurse through the context's dispatch so every child runs
//! under the cancellation gate and the liveness counter. Data statements
//! talk to pooled links; variable statements only touch the context.

pub mod control;
pub mod data;
pub mod vars;

pub use control::{Block, Break, Case, Catch, ExecNamed, If, While};
pub use data::{Operation, QueryLoop, QueryXml, RowBinding, VarQuery, XmlMode};
pub use vars::{Inc, LogMessage, SetVar, Sum};
