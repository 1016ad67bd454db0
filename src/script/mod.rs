//! Script model: statements, expressions, and control flow
//!
//! A script is a tree of [`ScriptStatement`]s evaluated against a
//! [`Context`](crate::context::Context). Statements carry a three-phase
//! lifecycle: `start` prepares the tree before a run, `exec` does the work,
//! `finish` tears down afterwards. `exec` reports where control goes next
//! through [`Flow`]; errors propagate as
//! [`EngineError`](crate::result::EngineError).
//!
//! Values come from [`ScriptExpression`]s (text, where `None` represents
//! SQL null) and [`BoolExpression`]s (conditions).
//!
//! # Example
//!
//! ```rust
//! use dray::context::Context;
//! use dray::script::statements::{Block, SetVar};
//! use dray::script::expr::Const;
//! use dray::ExecContext;
//! use std::rc::Rc;
//!
//! let script = Block::new(vec![
//!     Rc::new(SetVar::new("greeting", Rc::new(Const::text("hello")))) as _,
//! ]);
//!
//! let mut ctx = ExecContext::new("example");
//! ctx.exec(&script)?;
//! assert_eq!(ctx.get_var("greeting")?.as_deref(), Some("hello"));
//! # Ok::<(), dray::EngineError>(())
//! ```

pub mod expr;
pub mod provider;
pub mod runtime;
pub mod statements;

pub use provider::MapStatementsProvider;
pub use runtime::{RunReport, ScriptRunner};

use crate::context::Context;
use crate::result::Result;
use std::rc::Rc;

/// Shared statement handle; trees and providers hand out clones.
pub type SharedStatement = Rc<dyn ScriptStatement>;

/// Shared text-expression handle.
pub type SharedExpr = Rc<dyn ScriptExpression>;

/// Shared boolean-expression handle.
pub type SharedBool = Rc<dyn BoolExpression>;

/// Where control goes after a statement executes.
///
/// Loops and blocks translate `Break` into early termination: a composite
/// carrying the matching label consumes the break, everything else stops
/// and passes it further up. A break that reaches the top of a run is
/// discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flow {
    /// Proceed with the next statement.
    Continue,
    /// Unwind enclosing composites until one carries this label.
    Break(String),
}

impl Flow {
    /// True for [`Flow::Break`].
    pub fn is_break(&self) -> bool {
        matches!(self, Flow::Break(_))
    }
}

/// One node of a script tree.
///
/// `start` and `finish` recurse structurally over child statements and run
/// once per context execution, outside the dispatch bookkeeping. `exec` is
/// entered through [`Context::exec_inner`] so that cancellation and
/// liveness accounting stay uniform.
pub trait ScriptStatement {
    /// Prepares the statement for a run.
    fn start(&self, ctx: &mut dyn Context) -> Result<()>;

    /// Executes the statement.
    fn exec(&self, ctx: &mut dyn Context) -> Result<Flow>;

    /// Tears the statement down after a run.
    fn finish(&self, ctx: &mut dyn Context) -> Result<()>;

    /// Short name used in diagnostics.
    fn kind(&self) -> &'static str {
        "statement"
    }

    /// Description pushed into the context's current-statement diagnostic
    /// for the duration of a dispatch. Statements carrying a label or a
    /// target name include it; everything else reports the kind.
    fn describe(&self) -> String {
        self.kind().to_string()
    }
}

/// A text-producing expression; `None` is SQL null.
pub trait ScriptExpression {
    /// Evaluates against the context.
    fn calculate(&self, ctx: &mut dyn Context) -> Result<Option<String>>;
}

/// A boolean-producing expression.
pub trait BoolExpression {
    /// Evaluates against the context.
    fn calculate(&self, ctx: &mut dyn Context) -> Result<bool>;
}

/// Named registry of reusable statements.
///
/// Providers registered on a context are started right after the top
/// statement's `start` and finished right before its `finish`, so the
/// statements they hand out live through the whole run.
pub trait StatementProvider {
    /// Prepares the provider's statements for a run.
    fn start(&self, ctx: &mut dyn Context) -> Result<()>;

    /// Tears the provider's statements down after a run.
    fn finish(&self, ctx: &mut dyn Context) -> Result<()>;

    /// Fetches a statement by name.
    fn statement(&self, name: &str) -> Result<SharedStatement>;
}
