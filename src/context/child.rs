//! Pass-through context for statements that run inside a borrowed parent

use crate::context::{Context, SharedCursor, SharedObject};
use crate::link::{LinkWarning, PooledHandle};
use crate::result::Result;
use crate::script::{Flow, ScriptStatement, SharedExpr, SharedStatement, StatementProvider};
use chrono::NaiveDateTime;
use std::rc::Rc;
use std::time::Duration;

/// Context view that forwards every operation to a borrowed parent.
///
/// The view itself owns nothing, so several of them can be created and
/// dropped over the lifetime of one run without disturbing the parent's
/// namespaces or counters. Subclass-style contexts layer extra behavior
/// by wrapping one of these and overriding the methods they care about.
pub struct ChildContext<'a> {
    parent: &'a mut dyn Context,
}

impl<'a> ChildContext<'a> {
    /// Wraps `parent` for the duration of the borrow.
    pub fn new(parent: &'a mut dyn Context) -> Self {
        ChildContext { parent }
    }
}

impl Context for ChildContext<'_> {
    fn debug(&self, msg: &str) {
        self.parent.debug(msg)
    }

    fn info(&self, msg: &str) {
        self.parent.info(msg)
    }

    fn warning(&self, msg: &str) {
        self.parent.warning(msg)
    }

    fn error(&self, msg: &str) {
        self.parent.error(msg)
    }

    fn add_error(&mut self, msg: &str) {
        self.parent.add_error(msg)
    }

    fn error_count(&self) -> u32 {
        self.parent.error_count()
    }

    fn error_text(&self) -> Option<&str> {
        self.parent.error_text()
    }

    fn error_stack(&self) -> Option<&str> {
        self.parent.error_stack()
    }

    fn set_error_stack(&mut self, stack: String) {
        self.parent.set_error_stack(stack)
    }

    fn add_db_warnings(&mut self, warnings: Vec<LinkWarning>) {
        self.parent.add_db_warnings(warnings)
    }

    fn add_source_time(&mut self, elapsed: Duration) {
        self.parent.add_source_time(elapsed)
    }

    fn source_time(&self) -> Duration {
        self.parent.source_time()
    }

    fn add_custom_time(&mut self, elapsed: Duration) {
        self.parent.add_custom_time(elapsed)
    }

    fn custom_time(&self) -> Duration {
        self.parent.custom_time()
    }

    fn moved_since_last_call(&mut self) -> bool {
        self.parent.moved_since_last_call()
    }

    fn bump_alive(&mut self) {
        self.parent.bump_alive()
    }

    fn is_canceled(&self) -> bool {
        self.parent.is_canceled()
    }

    fn stop(&mut self) {
        self.parent.stop()
    }

    fn has_var(&self, name: &str) -> bool {
        self.parent.has_var(name)
    }

    fn var_expression(&self, name: &str) -> Result<SharedExpr> {
        self.parent.var_expression(name)
    }

    fn get_var(&mut self, name: &str) -> Result<Option<String>> {
        self.parent.get_var(name)
    }

    fn set_var(&mut self, name: &str, value: &str) {
        self.parent.set_var(name, value)
    }

    fn set_var_opt(&mut self, name: &str, value: Option<String>) {
        self.parent.set_var_opt(name, value)
    }

    fn set_var_expr(&mut self, name: &str, expr: SharedExpr) {
        self.parent.set_var_expr(name, expr)
    }

    fn remove_var(&mut self, name: &str) {
        self.parent.remove_var(name)
    }

    fn get_date_var(&mut self, name: &str) -> Result<NaiveDateTime> {
        self.parent.get_date_var(name)
    }

    fn set_date_var(&mut self, name: &str, value: Option<NaiveDateTime>) -> Result<()> {
        self.parent.set_date_var(name, value)
    }

    fn date_format(&self) -> &str {
        self.parent.date_format()
    }

    fn var_names(&self) -> Vec<String> {
        self.parent.var_names()
    }

    fn has_object(&self, name: &str) -> bool {
        self.parent.has_object(name)
    }

    fn get_object(&self, name: &str) -> Result<SharedObject> {
        self.parent.get_object(name)
    }

    fn set_object(&mut self, name: &str, value: SharedObject) {
        self.parent.set_object(name, value)
    }

    fn remove_object(&mut self, name: &str) {
        self.parent.remove_object(name)
    }

    fn add_statement_provider(&mut self, name: &str, provider: Rc<dyn StatementProvider>) {
        self.parent.add_statement_provider(name, provider)
    }

    fn statement_provider(&self, name: &str) -> Result<Rc<dyn StatementProvider>> {
        self.parent.statement_provider(name)
    }

    fn add_cursor(&mut self, name: &str, cursor: SharedCursor) {
        self.parent.add_cursor(name, cursor)
    }

    fn get_cursor(&self, name: &str) -> Result<SharedCursor> {
        self.parent.get_cursor(name)
    }

    fn remove_cursor(&mut self, name: &str) {
        self.parent.remove_cursor(name)
    }

    fn pooled_object(&mut self, name: &str) -> Result<PooledHandle> {
        self.parent.pooled_object(name)
    }

    fn receiver_pooled_object(&mut self, name: &str) -> Result<PooledHandle> {
        self.parent.receiver_pooled_object(name)
    }

    fn set_pooled_object(&mut self, name: &str, handle: PooledHandle) {
        self.parent.set_pooled_object(name, handle)
    }

    fn remove_pooled_object(&mut self, name: &str) {
        self.parent.remove_pooled_object(name)
    }

    fn get_source(&mut self, name: &str) -> Result<PooledHandle> {
        self.parent.get_source(name)
    }

    fn get_receiver(&mut self, name: &str) -> Result<PooledHandle> {
        self.parent.get_receiver(name)
    }

    fn resolve_alias(&self, name: &str) -> String {
        self.parent.resolve_alias(name)
    }

    fn add_used_link(&mut self, name: &str) {
        self.parent.add_used_link(name)
    }

    fn remove_used_link(&mut self) {
        self.parent.remove_used_link()
    }

    fn used_link(&self) -> Option<&str> {
        self.parent.used_link()
    }

    fn exec(&mut self, stmt: &dyn ScriptStatement) -> Result<()> {
        self.parent.exec(stmt)
    }

    fn exec_inner(&mut self, stmt: &dyn ScriptStatement) -> Result<Flow> {
        self.parent.exec_inner(stmt)
    }

    fn clean_up(&mut self) -> Result<()> {
        self.parent.clean_up()
    }

    fn swap_current_statement(&mut self, stmt: Option<String>) -> Option<String> {
        self.parent.swap_current_statement(stmt)
    }

    fn current_state_desc(&self) -> String {
        self.parent.current_state_desc()
    }
}

/// Runs the wrapped statement against a fresh [`ChildContext`] view on
/// every lifecycle call.
pub struct ChildStatement {
    inner: SharedStatement,
}

impl ChildStatement {
    /// Wraps `inner`.
    pub fn new(inner: SharedStatement) -> Self {
        ChildStatement { inner }
    }
}

impl ScriptStatement for ChildStatement {
    fn start(&self, ctx: &mut dyn Context) -> Result<()> {
        let mut view = ChildContext::new(ctx);
        self.inner.start(&mut view)
    }

    fn exec(&self, ctx: &mut dyn Context) -> Result<Flow> {
        let mut view = ChildContext::new(ctx);
        self.inner.exec(&mut view)
    }

    fn finish(&self, ctx: &mut dyn Context) -> Result<()> {
        let mut view = ChildContext::new(ctx);
        self.inner.finish(&mut view)
    }

    fn kind(&self) -> &'static str {
        "child"
    }
}
