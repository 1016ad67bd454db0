//! Expression objects
//!
//! String expressions yield `Option<String>` where `None` carries a SQL
//! null through the script. Boolean expressions feed the `if`/`while`
//! conditions and never produce null.

use crate::context::{close_cursor, create_cursor, Context};
use crate::link::Cursor;
use crate::result::{EngineError, Result};
use crate::script::{BoolExpression, ScriptExpression, SharedBool, SharedExpr};
use crate::template::PreparedTemplate;
use regex::Regex;

/// Evaluates `expr` and insists on a non-null result.
pub(crate) fn required(
    ctx: &mut dyn Context,
    expr: &dyn ScriptExpression,
    what: &str,
) -> Result<String> {
    expr.calculate(ctx)?
        .ok_or_else(|| EngineError::NullValue(what.to_string()))
}

/// Constant value, including the null constant.
pub struct Const {
    value: Option<String>,
}

impl Const {
    pub fn new(value: Option<String>) -> Self {
        Const { value }
    }

    /// Non-null text constant.
    pub fn text(value: impl Into<String>) -> Self {
        Const {
            value: Some(value.into()),
        }
    }
}

impl ScriptExpression for Const {
    fn calculate(&self, _ctx: &mut dyn Context) -> Result<Option<String>> {
        Ok(self.value.clone())
    }
}

/// Reads a context variable at evaluation time.
pub struct Var {
    name: String,
}

impl Var {
    pub fn new(name: impl Into<String>) -> Self {
        Var { name: name.into() }
    }
}

impl ScriptExpression for Var {
    fn calculate(&self, ctx: &mut dyn Context) -> Result<Option<String>> {
        ctx.get_var(&self.name)
    }
}

/// Parses the inner expression's text as a template on every evaluation.
///
/// The extra parse makes templating dynamic: the template text itself can
/// come out of a variable or a query.
pub struct DynTemplate {
    text: SharedExpr,
}

impl DynTemplate {
    pub fn new(text: SharedExpr) -> Self {
        DynTemplate { text }
    }
}

impl ScriptExpression for DynTemplate {
    fn calculate(&self, ctx: &mut dyn Context) -> Result<Option<String>> {
        let text = required(ctx, self.text.as_ref(), "dynamic template text")?;
        PreparedTemplate::parse(&text)?.calculate(ctx)
    }
}

fn first_value(cursor: &mut dyn Cursor) -> Result<Option<String>> {
    if !cursor.next()? {
        return Ok(None);
    }
    let columns = cursor.columns()?;
    let first = match columns.first() {
        Some(column) => column.name.clone(),
        None => return Ok(None),
    };
    cursor.get_string(&first)
}

/// Single-value query: first column of the first row, null when empty.
pub struct FromDb {
    source: SharedExpr,
    query: SharedExpr,
}

impl FromDb {
    pub fn new(source: SharedExpr, query: SharedExpr) -> Self {
        FromDb { source, query }
    }
}

impl ScriptExpression for FromDb {
    fn calculate(&self, ctx: &mut dyn Context) -> Result<Option<String>> {
        let source = required(ctx, self.source.as_ref(), "data source name")?;
        let sql = required(ctx, self.query.as_ref(), "query text")?;
        if ctx.is_canceled() {
            return Ok(None);
        }
        let cursor = create_cursor(ctx, &source, &sql)?;
        let value = {
            let mut cur = cursor.borrow_mut();
            first_value(cur.as_mut())
        };
        close_cursor(ctx, &cursor);
        value
    }
}

/// Constant condition.
pub struct BoolConst {
    value: bool,
}

impl BoolConst {
    pub fn new(value: bool) -> Self {
        BoolConst { value }
    }
}

impl BoolExpression for BoolConst {
    fn calculate(&self, _ctx: &mut dyn Context) -> Result<bool> {
        Ok(self.value)
    }
}

/// Negation.
pub struct Not {
    inner: SharedBool,
}

impl Not {
    pub fn new(inner: SharedBool) -> Self {
        Not { inner }
    }
}

impl BoolExpression for Not {
    fn calculate(&self, ctx: &mut dyn Context) -> Result<bool> {
        Ok(!self.inner.calculate(ctx)?)
    }
}

/// True when the variable's current value equals the given text.
pub struct TestVar {
    name: String,
    text: String,
}

impl TestVar {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        TestVar {
            name: name.into(),
            text: text.into(),
        }
    }
}

impl BoolExpression for TestVar {
    fn calculate(&self, ctx: &mut dyn Context) -> Result<bool> {
        Ok(ctx.get_var(&self.name)?.as_deref() == Some(self.text.as_str()))
    }
}

fn compile_anchored(pattern: &str) -> Result<Regex> {
    // Whole-string match; the wrapper group keeps user group numbering.
    Regex::new(&format!("^(?:{})$", pattern))
        .map_err(|e| EngineError::Format(format!("Invalid pattern '{}': {}", pattern, e)))
}

fn match_groups(
    ctx: &mut dyn Context,
    pattern: &Regex,
    group_prefix: Option<&str>,
    value: &str,
) -> bool {
    let caps = match pattern.captures(value) {
        Some(caps) => caps,
        None => return false,
    };
    if let Some(prefix) = group_prefix {
        for i in 0..caps.len() {
            let group = caps.get(i).map(|m| m.as_str().to_string());
            ctx.set_var_opt(&format!("{}{}", prefix, i), group);
        }
    }
    true
}

/// Whole-string regular-expression match with a pattern fixed at build
/// time. With a group prefix, capture groups land in `<prefix><i>`
/// variables on a successful match (group 0 is the whole value).
pub struct RegExpMatch {
    expr: SharedExpr,
    pattern: Regex,
    group_prefix: Option<String>,
}

impl std::fmt::Debug for RegExpMatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegExpMatch")
            .field("pattern", &self.pattern.as_str())
            .field("group_prefix", &self.group_prefix)
            .finish()
    }
}

impl RegExpMatch {
    pub fn new(expr: SharedExpr, pattern: &str, group_prefix: Option<String>) -> Result<Self> {
        Ok(RegExpMatch {
            expr,
            pattern: compile_anchored(pattern)?,
            group_prefix,
        })
    }
}

impl BoolExpression for RegExpMatch {
    fn calculate(&self, ctx: &mut dyn Context) -> Result<bool> {
        let value = match self.expr.calculate(ctx)? {
            Some(value) => value,
            None => return Ok(false),
        };
        Ok(match_groups(
            ctx,
            &self.pattern,
            self.group_prefix.as_deref(),
            &value,
        ))
    }
}

/// [`RegExpMatch`] with the pattern evaluated and compiled on every call.
pub struct RegExpDynMatch {
    expr: SharedExpr,
    pattern: SharedExpr,
    group_prefix: Option<String>,
}

impl RegExpDynMatch {
    pub fn new(expr: SharedExpr, pattern: SharedExpr, group_prefix: Option<String>) -> Self {
        RegExpDynMatch {
            expr,
            pattern,
            group_prefix,
        }
    }
}

impl BoolExpression for RegExpDynMatch {
    fn calculate(&self, ctx: &mut dyn Context) -> Result<bool> {
        let pattern = required(ctx, self.pattern.as_ref(), "match pattern")?;
        let pattern = compile_anchored(&pattern)?;
        let value = match self.expr.calculate(ctx)? {
            Some(value) => value,
            None => return Ok(false),
        };
        Ok(match_groups(
            ctx,
            &pattern,
            self.group_prefix.as_deref(),
            &value,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ExecContext;
    use crate::script::Flow;
    use crate::testsupport::{MemoryCursor, Probe, StubBroker, StubSource};
    use std::rc::Rc;

    #[test]
    fn test_const_carries_null() {
        let mut ctx = ExecContext::new("t");
        assert_eq!(
            Const::text("x").calculate(&mut ctx).unwrap().as_deref(),
            Some("x")
        );
        assert_eq!(Const::new(None).calculate(&mut ctx).unwrap(), None);
    }

    #[test]
    fn test_var_reads_the_context() {
        let mut ctx = ExecContext::new("t");
        ctx.set_var("region", "emea");
        let expr = Var::new("region");
        assert_eq!(expr.calculate(&mut ctx).unwrap().as_deref(), Some("emea"));
    }

    #[test]
    fn test_dyn_template_parses_at_evaluation() {
        let mut ctx = ExecContext::new("t");
        ctx.set_var("pattern", "id=[%id%]");
        ctx.set_var("id", "7");
        let expr = DynTemplate::new(Rc::new(Var::new("pattern")));
        assert_eq!(expr.calculate(&mut ctx).unwrap().as_deref(), Some("id=7"));

        ctx.set_var("pattern", "[%id%]!");
        assert_eq!(expr.calculate(&mut ctx).unwrap().as_deref(), Some("7!"));
    }

    #[test]
    fn test_dyn_template_rejects_null_text() {
        let mut ctx = ExecContext::new("t");
        ctx.set_var_opt("pattern", None);
        let expr = DynTemplate::new(Rc::new(Var::new("pattern")));
        let err = expr.calculate(&mut ctx).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Expression for dynamic template text evaluated to null"
        );
    }

    #[test]
    fn test_from_db_takes_first_column_of_first_row() {
        let mut source = StubSource::default();
        source.queue(
            MemoryCursor::text_columns(&["total", "ignored"])
                .with_text_row(&["42", "x"])
                .with_text_row(&["43", "y"]),
        );
        let broker = StubBroker::default().with_source("db", source);
        let mut ctx = ExecContext::with_broker("t", Box::new(broker));

        let probe = Probe::with(|ctx| {
            let expr = FromDb::new(
                Rc::new(Const::text("db")),
                Rc::new(Const::text("select total from t")),
            );
            assert_eq!(expr.calculate(ctx).unwrap().as_deref(), Some("42"));
            Ok(Flow::Continue)
        });
        ctx.exec(&probe).unwrap();
    }

    #[test]
    fn test_from_db_empty_result_is_null() {
        let mut source = StubSource::default();
        source.queue(MemoryCursor::text_columns(&["total"]));
        let broker = StubBroker::default().with_source("db", source);
        let mut ctx = ExecContext::with_broker("t", Box::new(broker));

        let probe = Probe::with(|ctx| {
            let expr = FromDb::new(
                Rc::new(Const::text("db")),
                Rc::new(Const::text("select total from t")),
            );
            assert_eq!(expr.calculate(ctx).unwrap(), None);
            Ok(Flow::Continue)
        });
        ctx.exec(&probe).unwrap();
    }

    #[test]
    fn test_from_db_skips_the_query_when_canceled() {
        // A stopped context counts as canceled; no source is consulted.
        let mut ctx = ExecContext::new("t");
        let expr = FromDb::new(Rc::new(Const::text("db")), Rc::new(Const::text("select 1")));
        assert_eq!(expr.calculate(&mut ctx).unwrap(), None);
    }

    #[test]
    fn test_test_var_compares_exact_text() {
        let mut ctx = ExecContext::new("t");
        ctx.set_var("mode", "full");
        assert!(TestVar::new("mode", "full").calculate(&mut ctx).unwrap());
        assert!(!TestVar::new("mode", "delta").calculate(&mut ctx).unwrap());

        ctx.set_var_opt("mode", None);
        assert!(!TestVar::new("mode", "full").calculate(&mut ctx).unwrap());
    }

    #[test]
    fn test_not_inverts() {
        let mut ctx = ExecContext::new("t");
        let expr = Not::new(Rc::new(BoolConst::new(false)));
        assert!(expr.calculate(&mut ctx).unwrap());
    }

    #[test]
    fn test_regexp_match_is_anchored() {
        let mut ctx = ExecContext::new("t");
        ctx.set_var("v", "abb");
        let partial = RegExpMatch::new(Rc::new(Var::new("v")), "b+", None).unwrap();
        assert!(!partial.calculate(&mut ctx).unwrap());
        let full = RegExpMatch::new(Rc::new(Var::new("v")), "ab+", None).unwrap();
        assert!(full.calculate(&mut ctx).unwrap());
    }

    #[test]
    fn test_regexp_match_publishes_groups() {
        let mut ctx = ExecContext::new("t");
        ctx.set_var("file", "orders_2024.csv");
        let expr = RegExpMatch::new(
            Rc::new(Var::new("file")),
            r"(\w+)_(\d+)\.csv",
            Some("g".to_string()),
        )
        .unwrap();
        assert!(expr.calculate(&mut ctx).unwrap());
        assert_eq!(ctx.get_var("g0").unwrap().as_deref(), Some("orders_2024.csv"));
        assert_eq!(ctx.get_var("g1").unwrap().as_deref(), Some("orders"));
        assert_eq!(ctx.get_var("g2").unwrap().as_deref(), Some("2024"));
    }

    #[test]
    fn test_regexp_match_null_value_is_false() {
        let mut ctx = ExecContext::new("t");
        ctx.set_var_opt("v", None);
        let expr = RegExpMatch::new(Rc::new(Var::new("v")), ".*", None).unwrap();
        assert!(!expr.calculate(&mut ctx).unwrap());
    }

    #[test]
    fn test_regexp_dyn_match_compiles_per_call() {
        let mut ctx = ExecContext::new("t");
        ctx.set_var("v", "abc");
        ctx.set_var("p", "a.c");
        let expr = RegExpDynMatch::new(Rc::new(Var::new("v")), Rc::new(Var::new("p")), None);
        assert!(expr.calculate(&mut ctx).unwrap());
        ctx.set_var("p", "x.*");
        assert!(!expr.calculate(&mut ctx).unwrap());
    }

    #[test]
    fn test_bad_pattern_is_reported() {
        let err = RegExpMatch::new(Rc::new(Const::text("x")), "(", None).unwrap_err();
        assert!(err.to_string().starts_with("Invalid pattern '('"));
    }
}
