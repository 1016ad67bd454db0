//! Variable and logging statements

use crate::context::Context;
use crate::result::{EngineError, Result};
use crate::script::{Flow, ScriptStatement, SharedExpr};

fn int_var(ctx: &mut dyn Context, name: &str) -> Result<i64> {
    let text = ctx
        .get_var(name)?
        .ok_or_else(|| EngineError::NullValue(format!("integer variable '{}'", name)))?;
    text.trim().parse().map_err(|e| {
        EngineError::Format(format!(
            "Variable '{}' value '{}' is not an integer: {}",
            name, text, e
        ))
    })
}

/// Evaluates an expression once and stores the result as a constant.
pub struct SetVar {
    name: String,
    value: SharedExpr,
}

impl SetVar {
    pub fn new(name: impl Into<String>, value: SharedExpr) -> Self {
        SetVar {
            name: name.into(),
            value,
        }
    }
}

impl ScriptStatement for SetVar {
    fn start(&self, _ctx: &mut dyn Context) -> Result<()> {
        Ok(())
    }

    fn exec(&self, ctx: &mut dyn Context) -> Result<Flow> {
        let value = self.value.calculate(ctx)?;
        ctx.set_var_opt(&self.name, value);
        Ok(Flow::Continue)
    }

    fn finish(&self, _ctx: &mut dyn Context) -> Result<()> {
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "set-var"
    }

    fn describe(&self) -> String {
        format!("set-var '{}'", self.name)
    }
}

/// Adds a fixed amount to an integer variable.
pub struct Inc {
    name: String,
    amount: i64,
}

impl Inc {
    pub fn new(name: impl Into<String>, amount: i64) -> Self {
        Inc {
            name: name.into(),
            amount,
        }
    }
}

impl ScriptStatement for Inc {
    fn start(&self, _ctx: &mut dyn Context) -> Result<()> {
        Ok(())
    }

    fn exec(&self, ctx: &mut dyn Context) -> Result<Flow> {
        let value = int_var(ctx, &self.name)?;
        ctx.set_var(&self.name, &(value + self.amount).to_string());
        Ok(Flow::Continue)
    }

    fn finish(&self, _ctx: &mut dyn Context) -> Result<()> {
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "inc"
    }

    fn describe(&self) -> String {
        format!("inc '{}'", self.name)
    }
}

/// Stores the sum of two integer variables in a third.
pub struct Sum {
    first: String,
    second: String,
    target: String,
}

impl Sum {
    pub fn new(
        first: impl Into<String>,
        second: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Sum {
            first: first.into(),
            second: second.into(),
            target: target.into(),
        }
    }
}

impl ScriptStatement for Sum {
    fn start(&self, _ctx: &mut dyn Context) -> Result<()> {
        Ok(())
    }

    fn exec(&self, ctx: &mut dyn Context) -> Result<Flow> {
        let total = int_var(ctx, &self.first)? + int_var(ctx, &self.second)?;
        ctx.set_var(&self.target, &total.to_string());
        Ok(Flow::Continue)
    }

    fn finish(&self, _ctx: &mut dyn Context) -> Result<()> {
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "sum"
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Severity {
    Debug,
    Info,
    Warning,
    Severe,
}

impl Severity {
    fn parse(text: &str) -> Result<Self> {
        match text.to_ascii_lowercase().as_str() {
            "debug" => Ok(Severity::Debug),
            "info" => Ok(Severity::Info),
            "warning" => Ok(Severity::Warning),
            "severe" => Ok(Severity::Severe),
            other => Err(EngineError::Format(format!(
                "Unknown log severity '{}'",
                other
            ))),
        }
    }
}

/// Logs an evaluated message through the context.
///
/// The severity name is validated when the statement is built, not when
/// the script runs. A null message logs the literal `NULL`.
pub struct LogMessage {
    severity: Severity,
    message: SharedExpr,
}

impl std::fmt::Debug for LogMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogMessage")
            .field("severity", &self.severity)
            .finish()
    }
}

impl LogMessage {
    pub fn new(severity: &str, message: SharedExpr) -> Result<Self> {
        Ok(LogMessage {
            severity: Severity::parse(severity)?,
            message,
        })
    }
}

impl ScriptStatement for LogMessage {
    fn start(&self, _ctx: &mut dyn Context) -> Result<()> {
        Ok(())
    }

    fn exec(&self, ctx: &mut dyn Context) -> Result<Flow> {
        let text = self
            .message
            .calculate(ctx)?
            .unwrap_or_else(|| "NULL".to_string());
        match self.severity {
            Severity::Debug => ctx.debug(&text),
            Severity::Info => ctx.info(&text),
            Severity::Warning => ctx.warning(&text),
            Severity::Severe => ctx.error(&text),
        }
        Ok(Flow::Continue)
    }

    fn finish(&self, _ctx: &mut dyn Context) -> Result<()> {
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "log"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ExecContext;
    use crate::script::expr::{Const, Var};
    use std::rc::Rc;

    #[test]
    fn test_set_var_stores_evaluated_value() {
        let mut ctx = ExecContext::new("t");
        ctx.set_var("src", "abc");
        ctx.exec(&SetVar::new("copy", Rc::new(Var::new("src"))))
            .unwrap();
        assert_eq!(ctx.get_var("copy").unwrap().as_deref(), Some("abc"));
    }

    #[test]
    fn test_set_var_stores_null() {
        let mut ctx = ExecContext::new("t");
        ctx.exec(&SetVar::new("empty", Rc::new(Const::new(None))))
            .unwrap();
        assert!(ctx.has_var("empty"));
        assert_eq!(ctx.get_var("empty").unwrap(), None);
    }

    #[test]
    fn test_set_var_dispatch_names_the_target() {
        use crate::script::ScriptExpression;
        use std::cell::RefCell;

        struct DescCapture(Rc<RefCell<String>>);
        impl ScriptExpression for DescCapture {
            fn calculate(&self, ctx: &mut dyn Context) -> Result<Option<String>> {
                *self.0.borrow_mut() = ctx.current_state_desc();
                Ok(Some("v".to_string()))
            }
        }

        let seen = Rc::new(RefCell::new(String::new()));
        let mut ctx = ExecContext::new("t");
        ctx.exec(&SetVar::new("city", Rc::new(DescCapture(seen.clone()))))
            .unwrap();
        assert!(
            seen.borrow().contains("set-var 'city'"),
            "got: {}",
            seen.borrow()
        );
    }

    #[test]
    fn test_inc_handles_negative_amounts() {
        let mut ctx = ExecContext::new("t");
        ctx.set_var("n", "10");
        ctx.exec(&Inc::new("n", -3)).unwrap();
        assert_eq!(ctx.get_var("n").unwrap().as_deref(), Some("7"));
    }

    #[test]
    fn test_inc_rejects_non_numeric_values() {
        let mut ctx = ExecContext::new("t");
        ctx.set_var("n", "ten");
        let err = ctx.exec(&Inc::new("n", 1)).unwrap_err();
        assert!(err.to_string().contains("is not an integer"));
    }

    #[test]
    fn test_sum_writes_the_target() {
        let mut ctx = ExecContext::new("t");
        ctx.set_var("a", "2");
        ctx.set_var("b", "40");
        ctx.exec(&Sum::new("a", "b", "total")).unwrap();
        assert_eq!(ctx.get_var("total").unwrap().as_deref(), Some("42"));
    }

    #[test]
    fn test_log_severity_is_validated_up_front() {
        assert!(LogMessage::new("info", Rc::new(Const::text("x"))).is_ok());
        assert!(LogMessage::new("Warning", Rc::new(Const::text("x"))).is_ok());
        let err = LogMessage::new("chatty", Rc::new(Const::text("x"))).unwrap_err();
        assert_eq!(err.to_string(), "Unknown log severity 'chatty'");
    }

    #[test]
    fn test_log_with_null_message_runs() {
        let mut ctx = ExecContext::new("t");
        let stmt = LogMessage::new("severe", Rc::new(Const::new(None))).unwrap();
        ctx.exec(&stmt).unwrap();
    }
}
