//! Execution contexts: state, namespaces, and dispatch
//!
//! A [`Context`] is everything a running script can see: variables
//! (lazily-evaluated expressions), shared objects, named cursors, pooled
//! data links, statement providers, error and timing accounting, and the
//! lifecycle state that drives cooperative cancellation.
//!
//! [`ExecContext`] is the working implementation. Contexts form chains:
//! variable, object, and cursor lookups that miss locally continue in the
//! parent, while mutations always stay local, so a child can shadow
//! without disturbing what it inherited. Pooled resources never delegate.
//!
//! # Lifecycle
//!
//! A context starts `STOPPED`. [`Context::exec`] moves it to `ACTIVE`,
//! runs the statement tree, and always leaves it `NOT_CLEANED`;
//! [`Context::clean_up`] then closes cursors, returns pooled links to
//! their factories, and moves back to `STOPPED`, ready for the next run.
//! [`Context::stop`] flips an `ACTIVE` context straight to `NOT_CLEANED`,
//! which every dispatch observes as cancellation.
//!
//! # Example
//!
//! ```rust
//! use dray::context::Context;
//! use dray::script::statements::{Block, SetVar};
//! use dray::script::expr::Var;
//! use dray::ExecContext;
//! use std::rc::Rc;
//!
//! let mut base = ExecContext::new("base");
//! base.set_var("source", "orders");
//!
//! let mut ctx = ExecContext::new("run");
//! ctx.set_parent(base);
//! ctx.set_var("source", "invoices"); // shadows, parent untouched
//!
//! let script = Block::new(vec![
//!     Rc::new(SetVar::new("copy", Rc::new(Var::new("source")))) as _,
//! ]);
//! ctx.exec(&script)?;
//! assert_eq!(ctx.get_var("copy")?.as_deref(), Some("invoices"));
//!
//! let base = ctx.take_parent().unwrap();
//! assert_eq!(base.var_names().contains(&"copy".to_string()), false);
//! # Ok::<(), dray::EngineError>(())
//! ```

mod child;
mod exec;

pub use child::{ChildContext, ChildStatement};
pub use exec::ExecContext;

use crate::link::{LinkWarning, PooledHandle};
use crate::result::{EngineError, Result};
use crate::script::{Flow, ScriptStatement, SharedExpr, StatementProvider};
use crate::text::truncate_request;
use chrono::NaiveDateTime;
use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Shared opaque object stored in a context's object namespace.
pub type SharedObject = Rc<dyn Any>;

/// Shared open cursor; a loop and its body may hold the same one.
pub type SharedCursor = Rc<RefCell<Box<dyn crate::link::Cursor>>>;

/// Lifecycle state of a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CtxState {
    /// Fresh context, ready for `exec`.
    Stopped,
    /// A statement tree is running.
    Active,
    /// The run ended or was stopped; resources await `clean_up`.
    NotCleaned,
}

impl std::fmt::Display for CtxState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            CtxState::Stopped => "STOPPED",
            CtxState::Active => "ACTIVE",
            CtxState::NotCleaned => "NOT_CLEANED",
        })
    }
}

/// Everything a running script can see and touch.
///
/// The trait is object-safe; statements receive `&mut dyn Context` so the
/// same tree can run against an [`ExecContext`] or a grafting
/// [`ChildContext`]. Methods documented as plumbing
/// ([`bump_alive`](Context::bump_alive),
/// [`swap_current_statement`](Context::swap_current_statement)) exist for
/// the dispatch helper and are rarely called directly.
pub trait Context {
    // --- diagnostics -----------------------------------------------------

    /// Logs at debug level with the context identity attached.
    fn debug(&self, msg: &str);
    /// Logs at info level.
    fn info(&self, msg: &str);
    /// Logs at warning level.
    fn warning(&self, msg: &str);
    /// Logs at error level.
    fn error(&self, msg: &str);

    // --- error accounting ------------------------------------------------

    /// Counts an error and remembers its text.
    fn add_error(&mut self, msg: &str);
    /// Number of errors recorded during the current run.
    fn error_count(&self) -> u32;
    /// Text of the most recent recorded error.
    fn error_text(&self) -> Option<&str>;
    /// Captured stack/trace text, when a runner stored one.
    fn error_stack(&self) -> Option<&str>;
    /// Stores stack/trace text for later reporting.
    fn set_error_stack(&mut self, stack: String);
    /// Accounts a batch of receiver warnings: one recorded error
    /// summarizing the batch, each warning logged (the first ten at error
    /// level, the rest at warning level). Empty input is a no-op.
    fn add_db_warnings(&mut self, warnings: Vec<LinkWarning>);

    // --- timing ----------------------------------------------------------

    /// Adds time spent on the source side (requests, row fetches, closes).
    fn add_source_time(&mut self, elapsed: Duration);
    /// Accumulated source-side time for the current run.
    fn source_time(&self) -> Duration;
    /// Adds time spent on custom or receiver-side work.
    fn add_custom_time(&mut self, elapsed: Duration);
    /// Accumulated custom time for the current run.
    fn custom_time(&self) -> Duration;

    // --- liveness and cancellation ---------------------------------------

    /// True when statements were dispatched since the previous call;
    /// resets the watermark. Supervisors poll this as a liveness probe.
    fn moved_since_last_call(&mut self) -> bool;
    /// Dispatch plumbing: advances the liveness counter.
    fn bump_alive(&mut self);
    /// True whenever the context is not `ACTIVE`. Parent state is not
    /// consulted; each context cancels independently.
    fn is_canceled(&self) -> bool;
    /// Cancels an active run: the state moves to `NOT_CLEANED` and the
    /// link currently executing a request (if any) gets a best-effort
    /// `cancel`. Safe to call repeatedly and in any state.
    fn stop(&mut self);

    // --- variables -------------------------------------------------------

    /// Whether the variable exists here or in an ancestor.
    fn has_var(&self, name: &str) -> bool;
    /// The stored expression behind a variable.
    fn var_expression(&self, name: &str) -> Result<SharedExpr>;
    /// Evaluates the variable's expression now; `None` is SQL null.
    fn get_var(&mut self, name: &str) -> Result<Option<String>>;
    /// Stores a constant text variable (always local).
    fn set_var(&mut self, name: &str, value: &str);
    /// Stores a constant, possibly null, variable (always local).
    fn set_var_opt(&mut self, name: &str, value: Option<String>);
    /// Stores an expression-backed variable (always local).
    fn set_var_expr(&mut self, name: &str, expr: SharedExpr);
    /// Removes a local variable; inherited ones are untouched.
    fn remove_var(&mut self, name: &str);
    /// Parses the variable's text with the context date format.
    fn get_date_var(&mut self, name: &str) -> Result<NaiveDateTime>;
    /// Formats and stores a datetime; `None` stores a null variable.
    fn set_date_var(&mut self, name: &str, value: Option<NaiveDateTime>) -> Result<()>;
    /// The context's date format (strftime dialect).
    fn date_format(&self) -> &str;
    /// Names of all visible variables, local and inherited.
    fn var_names(&self) -> Vec<String>;

    // --- objects and statement providers ---------------------------------

    /// Whether the object exists here or in an ancestor.
    fn has_object(&self, name: &str) -> bool;
    /// Fetches a shared object.
    fn get_object(&self, name: &str) -> Result<SharedObject>;
    /// Stores a shared object (always local).
    fn set_object(&mut self, name: &str, value: SharedObject);
    /// Removes a local object.
    fn remove_object(&mut self, name: &str);
    /// Registers a statement provider under a name. Providers registered
    /// here are started and finished around every `exec`.
    fn add_statement_provider(&mut self, name: &str, provider: Rc<dyn StatementProvider>);
    /// Fetches a statement provider by name.
    fn statement_provider(&self, name: &str) -> Result<Rc<dyn StatementProvider>>;

    // --- cursors ---------------------------------------------------------

    /// Registers an open cursor under a name (always local).
    fn add_cursor(&mut self, name: &str, cursor: SharedCursor);
    /// Fetches a registered cursor.
    fn get_cursor(&self, name: &str) -> Result<SharedCursor>;
    /// Removes and closes a local cursor; close failures are logged,
    /// absent names are a no-op.
    fn remove_cursor(&mut self, name: &str);

    // --- pooled resources ------------------------------------------------

    /// Fetches a pooled slot, asking the broker on first use. Pooled
    /// lookups never delegate to the parent.
    fn pooled_object(&mut self, name: &str) -> Result<PooledHandle>;
    /// Like [`pooled_object`](Context::pooled_object), but initializes
    /// through the receiver-side broker hook.
    fn receiver_pooled_object(&mut self, name: &str) -> Result<PooledHandle>;
    /// Registers a pooled slot under a (resolved) name.
    fn set_pooled_object(&mut self, name: &str, handle: PooledHandle);
    /// Removes a pooled slot and releases it to its factory.
    fn remove_pooled_object(&mut self, name: &str);
    /// Fetches a slot that must hold a data source.
    fn get_source(&mut self, name: &str) -> Result<PooledHandle>;
    /// Fetches a slot that must hold a data receiver.
    fn get_receiver(&mut self, name: &str) -> Result<PooledHandle>;
    /// Maps configured aliases to canonical pool names.
    fn resolve_alias(&self, name: &str) -> String;

    // --- used link -------------------------------------------------------

    /// Records the link about to execute a request, for `stop` and
    /// staleness marking. Single slot; pairs with
    /// [`remove_used_link`](Context::remove_used_link).
    fn add_used_link(&mut self, name: &str);
    /// Clears the used-link slot.
    fn remove_used_link(&mut self);
    /// Name of the link currently executing a request.
    fn used_link(&self) -> Option<&str>;

    // --- lifecycle -------------------------------------------------------

    /// Runs a statement tree: requires `STOPPED`, resets the run counters,
    /// starts the statement and the registered providers, dispatches the
    /// tree, and finishes providers and statement even when the dispatch
    /// failed (the dispatch error wins). Always leaves `NOT_CLEANED`.
    fn exec(&mut self, stmt: &dyn ScriptStatement) -> Result<()>;
    /// Dispatches one nested statement: a no-op unless `ACTIVE`, with
    /// liveness and current-statement bookkeeping around the call.
    fn exec_inner(&mut self, stmt: &dyn ScriptStatement) -> Result<Flow>;
    /// Releases run resources: requires `NOT_CLEANED`; closes every
    /// cursor and releases every pooled slot exactly once (aliased names
    /// share slots), marking the used link's slot stale first. Failures
    /// on the way are logged, not raised. Leaves the context `STOPPED`,
    /// ready for another run.
    fn clean_up(&mut self) -> Result<()>;
    /// Dispatch plumbing: swaps the current-statement diagnostic,
    /// returning the previous one.
    fn swap_current_statement(&mut self, stmt: Option<String>) -> Option<String>;
    /// Human-readable dispatch position for supervision logs.
    fn current_state_desc(&self) -> String;
}

/// Dispatch bookkeeping shared by every context implementation.
///
/// Implementations call this from `exec_inner`; the statement sees the
/// context it was dispatched on, while a delegating wrapper routes the
/// bookkeeping to whoever owns the counters.
pub fn run_inner(ctx: &mut dyn Context, stmt: &dyn ScriptStatement) -> Result<Flow> {
    if ctx.is_canceled() {
        return Ok(Flow::Continue);
    }
    ctx.bump_alive();
    let prev = ctx.swap_current_statement(Some(stmt.describe()));
    let flow = stmt.exec(ctx);
    ctx.swap_current_statement(prev);
    flow
}

/// Opens a cursor on a named data source.
///
/// The source is tracked as the used link for the duration of the request,
/// request time lands in source time, and failures wrap the (possibly
/// truncated) query text.
pub fn create_cursor(ctx: &mut dyn Context, source_name: &str, sql: &str) -> Result<SharedCursor> {
    let handle = ctx.get_source(source_name)?;
    ctx.add_used_link(source_name);
    let started = Instant::now();
    let outcome = {
        let mut slot = handle.borrow_mut();
        match slot.source() {
            Ok(source) => source.request(sql),
            Err(e) => Err(e),
        }
    };
    let elapsed = started.elapsed();
    ctx.remove_used_link();
    ctx.add_source_time(elapsed);
    match outcome {
        Ok(cursor) => Ok(Rc::new(RefCell::new(cursor))),
        Err(e) => Err(EngineError::Request {
            name: source_name.to_string(),
            request: truncate_request(sql),
            source: Box::new(e),
        }),
    }
}

/// Opens a cursor and registers it under `cursor_name`, replacing (and
/// closing) any previous cursor of that name.
pub fn create_named_cursor(
    ctx: &mut dyn Context,
    source_name: &str,
    cursor_name: &str,
    sql: &str,
) -> Result<SharedCursor> {
    if ctx.get_cursor(cursor_name).is_ok() {
        ctx.warning(&format!("Cursor '{}' already exists and will be replaced", cursor_name));
        ctx.remove_cursor(cursor_name);
    }
    let cursor = create_cursor(ctx, source_name, sql)?;
    ctx.add_cursor(cursor_name, cursor.clone());
    Ok(cursor)
}

/// Closes a cursor, logging failures and accounting the time as source
/// time.
pub fn close_cursor(ctx: &mut dyn Context, cursor: &SharedCursor) {
    let started = Instant::now();
    if let Err(e) = cursor.borrow_mut().close() {
        ctx.warning(&format!("Context could not close cursor: {}", e));
    }
    ctx.add_source_time(started.elapsed());
}

/// Formats a datetime with a strftime-style pattern, turning invalid
/// patterns into format errors instead of panics.
pub(crate) fn format_datetime(dt: &NaiveDateTime, fmt: &str) -> Result<String> {
    use std::fmt::Write;
    let mut out = String::new();
    match write!(out, "{}", dt.format(fmt)) {
        Ok(()) => Ok(out),
        Err(_) => Err(EngineError::Format(format!("Invalid date format '{}'", fmt))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_format_datetime_default_pattern() {
        let dt = NaiveDate::from_ymd_opt(2006, 1, 2)
            .unwrap()
            .and_hms_milli_opt(15, 4, 5, 120)
            .unwrap();
        let text = format_datetime(&dt, "%Y%m%d %H:%M:%S.%3f").unwrap();
        assert_eq!(text, "20060102 15:04:05.120");
    }

    #[test]
    fn test_format_datetime_rejects_bad_pattern() {
        let dt = NaiveDate::from_ymd_opt(2006, 1, 2)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert!(format_datetime(&dt, "%Q bogus").is_err());
    }

    #[test]
    fn test_state_names() {
        assert_eq!(CtxState::Stopped.to_string(), "STOPPED");
        assert_eq!(CtxState::Active.to_string(), "ACTIVE");
        assert_eq!(CtxState::NotCleaned.to_string(), "NOT_CLEANED");
    }
}
