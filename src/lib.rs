//! Dray: an embeddable ETL scripting engine
//!
//! Dray executes transfer scripts: small statement trees that pump rows
//! between data sources and receivers, template SQL text on the way, and
//! keep their working state in a hierarchical execution context. The
//! engine is storage-agnostic; databases, files, and queues plug in behind
//! a small set of link traits.
//!
//! # Features
//!
//! - **Declarative scripts**: statement trees built from tagged config
//!   nodes through an explicit tag registry, no reflection
//! - **Template micro-language**: `[%...%]` placeholders with typed
//!   formatters and null-aware SQL generation
//! - **Hierarchical contexts**: child runs see parent variables, mutate
//!   locally, and cancel independently
//! - **Pooled resources**: sources and receivers arrive lazily through a
//!   broker and are released, or marked stale, on cleanup
//! - **Structured control flow**: labeled breaks, catch/rethrow, named
//!   statement providers, cancellation-aware loops
//!
//! # Quick Start
//!
//! ```rust
//! use dray::builder::{ConfigNode, StatementBuilder};
//! use dray::{ExecContext, ScriptRunner};
//!
//! fn main() -> Result<(), dray::EngineError> {
//!     let script = ConfigNode::new("block")
//!         .with_child(
//!             ConfigNode::new("set-var")
//!                 .with_attr("name", "region")
//!                 .with_child(ConfigNode::new("template").with_text("emea")),
//!         )
//!         .with_child(
//!             ConfigNode::new("log")
//!                 .with_child(ConfigNode::new("template").with_text("loading [%region%]")),
//!         );
//!     let stmt = StatementBuilder::standard().build_statement(&script)?;
//!
//!     let mut runner = ScriptRunner::new(ExecContext::new("quickstart"));
//!     let report = runner.run(stmt.as_ref())?;
//!     assert!(report.success);
//!     Ok(())
//! }
//! ```
//!
//! # Templates
//!
//! Templates render against the context. Placeholders carry an optional
//! formatter type; a null value stays a bare `NULL` so generated SQL keeps
//! its null literals unquoted:
//!
//! ```rust
//! use dray::context::Context;
//! use dray::script::ScriptExpression;
//! use dray::{ExecContext, PreparedTemplate};
//!
//! let mut ctx = ExecContext::new("docs");
//! ctx.set_var("id", "7");
//! ctx.set_var_opt("note", None);
//!
//! let t = PreparedTemplate::parse(
//!     "update t set note = [%(string) note%] where id = [%id%]",
//! )?;
//! assert_eq!(
//!     t.calculate(&mut ctx)?.as_deref(),
//!     Some("update t set note = NULL where id = 7"),
//! );
//! # Ok::<(), dray::EngineError>(())
//! ```
//!
//! # Contexts
//!
//! Contexts chain: lookups that miss locally continue in the parent, while
//! every mutation stays local to the context that made it:
//!
//! ```rust
//! use dray::context::Context;
//! use dray::ExecContext;
//!
//! let mut parent = ExecContext::new("transfer");
//! parent.set_var("shared", "visible");
//!
//! let mut child = ExecContext::new("step");
//! child.set_parent(parent);
//! assert_eq!(child.get_var("shared")?.as_deref(), Some("visible"));
//!
//! child.set_var("shared", "shadowed");
//! assert_eq!(child.get_var("shared")?.as_deref(), Some("shadowed"));
//! # Ok::<(), dray::EngineError>(())
//! ```
//!
//! # Data links
//!
//! The [`link`] module defines the integration contracts: `DataSource`
//! turns SQL into cursors, `DataReceiver` consumes operations,
//! `ResourceBroker` hands pooled slots to a context on first use. The
//! engine never opens connections itself; adapters implement these traits
//! and tests run against in-memory stubs.

#![warn(missing_docs)]

pub mod builder;
pub mod context;
pub mod link;
pub mod result;
pub mod script;
pub mod template;
mod text;

#[cfg(test)]
pub(crate) mod testsupport;

pub use builder::{ConfigNode, StatementBuilder};
pub use context::ExecContext;
pub use result::{EngineError, LinkError};
pub use script::{Flow, RunReport, ScriptRunner};
pub use template::PreparedTemplate;
