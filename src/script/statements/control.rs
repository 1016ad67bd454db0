//! Composite and flow-control statements

use crate::context::Context;
use crate::result::{EngineError, Result};
use crate::script::{Flow, ScriptStatement, SharedBool, SharedExpr, SharedStatement};

fn consume_label(own: Option<&str>, label: String) -> Flow {
    if own == Some(label.as_str()) {
        Flow::Continue
    } else {
        Flow::Break(label)
    }
}

/// Runs children in order.
///
/// A break carrying this block's label ends the block; any other break
/// stops it and keeps propagating. Child failures are wrapped with the
/// 1-based child position.
pub struct Block {
    children: Vec<SharedStatement>,
    label: Option<String>,
}

impl Block {
    pub fn new(children: Vec<SharedStatement>) -> Self {
        Block {
            children,
            label: None,
        }
    }

    pub fn labeled(label: impl Into<String>, children: Vec<SharedStatement>) -> Self {
        Block {
            children,
            label: Some(label.into()),
        }
    }
}

impl ScriptStatement for Block {
    fn start(&self, ctx: &mut dyn Context) -> Result<()> {
        for child in &self.children {
            if ctx.is_canceled() {
                break;
            }
            child.start(ctx)?;
        }
        Ok(())
    }

    fn exec(&self, ctx: &mut dyn Context) -> Result<Flow> {
        for (i, child) in self.children.iter().enumerate() {
            let flow = ctx
                .exec_inner(child.as_ref())
                .map_err(|e| EngineError::BlockMember(i + 1, Box::new(e)))?;
            if let Flow::Break(label) = flow {
                return Ok(consume_label(self.label.as_deref(), label));
            }
        }
        Ok(Flow::Continue)
    }

    fn finish(&self, ctx: &mut dyn Context) -> Result<()> {
        for child in &self.children {
            if ctx.is_canceled() {
                break;
            }
            child.finish(ctx)?;
        }
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "block"
    }

    fn describe(&self) -> String {
        match &self.label {
            Some(label) => format!("block '{}'", label),
            None => "block".to_string(),
        }
    }
}

/// Two-way branch. The taken branch runs directly, outside the dispatch
/// bookkeeping.
pub struct If {
    cond: SharedBool,
    then_branch: SharedStatement,
    else_branch: Option<SharedStatement>,
}

impl If {
    pub fn new(
        cond: SharedBool,
        then_branch: SharedStatement,
        else_branch: Option<SharedStatement>,
    ) -> Self {
        If {
            cond,
            then_branch,
            else_branch,
        }
    }
}

impl ScriptStatement for If {
    fn start(&self, ctx: &mut dyn Context) -> Result<()> {
        if let Some(else_branch) = &self.else_branch {
            else_branch.start(ctx)?;
        }
        self.then_branch.start(ctx)
    }

    fn exec(&self, ctx: &mut dyn Context) -> Result<Flow> {
        if self.cond.calculate(ctx)? {
            self.then_branch.exec(ctx)
        } else if let Some(else_branch) = &self.else_branch {
            else_branch.exec(ctx)
        } else {
            Ok(Flow::Continue)
        }
    }

    fn finish(&self, ctx: &mut dyn Context) -> Result<()> {
        if let Some(else_branch) = &self.else_branch {
            else_branch.finish(ctx)?;
        }
        self.then_branch.finish(ctx)
    }

    fn kind(&self) -> &'static str {
        "if"
    }
}

/// Conditional loop. The condition is evaluated before the cancellation
/// gate, so a condition with side effects runs once even on a canceled
/// context.
pub struct While {
    cond: SharedBool,
    body: SharedStatement,
    label: Option<String>,
}

impl While {
    pub fn new(cond: SharedBool, body: SharedStatement) -> Self {
        While {
            cond,
            body,
            label: None,
        }
    }

    pub fn labeled(label: impl Into<String>, cond: SharedBool, body: SharedStatement) -> Self {
        While {
            cond,
            body,
            label: Some(label.into()),
        }
    }
}

impl ScriptStatement for While {
    fn start(&self, ctx: &mut dyn Context) -> Result<()> {
        self.body.start(ctx)
    }

    fn exec(&self, ctx: &mut dyn Context) -> Result<Flow> {
        loop {
            if !self.cond.calculate(ctx)? {
                return Ok(Flow::Continue);
            }
            if ctx.is_canceled() {
                return Ok(Flow::Continue);
            }
            if let Flow::Break(label) = ctx.exec_inner(self.body.as_ref())? {
                return Ok(consume_label(self.label.as_deref(), label));
            }
        }
    }

    fn finish(&self, ctx: &mut dyn Context) -> Result<()> {
        self.body.finish(ctx)
    }

    fn kind(&self) -> &'static str {
        "while"
    }

    fn describe(&self) -> String {
        match &self.label {
            Some(label) => format!("while '{}'", label),
            None => "while".to_string(),
        }
    }
}

/// Dispatch on a selector's exact text.
///
/// `start` and `finish` visit only the keyed branches; the else branch
/// stays outside the structural recursion.
pub struct Case {
    selector: SharedExpr,
    branches: Vec<(String, SharedStatement)>,
    else_branch: Option<SharedStatement>,
}

impl Case {
    pub fn new(
        selector: SharedExpr,
        branches: Vec<(String, SharedStatement)>,
        else_branch: Option<SharedStatement>,
    ) -> Self {
        Case {
            selector,
            branches,
            else_branch,
        }
    }
}

impl ScriptStatement for Case {
    fn start(&self, ctx: &mut dyn Context) -> Result<()> {
        for (_, stmt) in &self.branches {
            stmt.start(ctx)?;
        }
        Ok(())
    }

    fn exec(&self, ctx: &mut dyn Context) -> Result<Flow> {
        let value = self.selector.calculate(ctx)?;
        let chosen = match &value {
            Some(text) => self
                .branches
                .iter()
                .find(|(key, _)| key == text)
                .map(|(_, stmt)| stmt),
            None => None,
        };
        match chosen.or(self.else_branch.as_ref()) {
            Some(stmt) => ctx.exec_inner(stmt.as_ref()),
            None => Ok(Flow::Continue),
        }
    }

    fn finish(&self, ctx: &mut dyn Context) -> Result<()> {
        for (_, stmt) in &self.branches {
            stmt.finish(ctx)?;
        }
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "case"
    }
}

/// Error barrier around a body statement.
///
/// On a body error the root-cause message lands in the named variable,
/// the rethrow/suppress conditions are evaluated (they may read that
/// variable), the finally statement runs, and the error is swallowed or
/// rethrown as configured. The finally statement does not run on success.
pub struct Catch {
    body: SharedStatement,
    finally: Option<SharedStatement>,
    rethrow: SharedBool,
    suppress: SharedBool,
    var: Option<String>,
}

impl Catch {
    pub fn new(
        body: SharedStatement,
        finally: Option<SharedStatement>,
        rethrow: SharedBool,
        suppress: SharedBool,
        var: Option<String>,
    ) -> Self {
        Catch {
            body,
            finally,
            rethrow,
            suppress,
            var,
        }
    }
}

impl ScriptStatement for Catch {
    fn start(&self, ctx: &mut dyn Context) -> Result<()> {
        self.body.start(ctx)?;
        if let Some(finally) = &self.finally {
            finally.start(ctx)?;
        }
        Ok(())
    }

    fn exec(&self, ctx: &mut dyn Context) -> Result<Flow> {
        let error = match ctx.exec_inner(self.body.as_ref()) {
            Ok(flow) => return Ok(flow),
            Err(e) => e,
        };
        if let Some(var) = &self.var {
            ctx.set_var(var, &error.root_message());
        }
        let rethrow = self.rethrow.calculate(ctx)?;
        let suppress = self.suppress.calculate(ctx)?;
        if !rethrow && !suppress {
            ctx.error(&format!("Script error caught: {}", error));
        }
        if let Some(finally) = &self.finally {
            // A break escaping the finally statement is dropped.
            if let Err(e) = ctx.exec_inner(finally.as_ref()) {
                ctx.error(&format!("Catch finally statement failed: {}", e));
            }
        }
        if rethrow {
            Err(EngineError::Rethrown(Box::new(error)))
        } else {
            Ok(Flow::Continue)
        }
    }

    fn finish(&self, ctx: &mut dyn Context) -> Result<()> {
        self.body.finish(ctx)?;
        if let Some(finally) = &self.finally {
            finally.finish(ctx)?;
        }
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "catch"
    }
}

/// Yields a labeled break for an enclosing block, loop, or query loop.
pub struct Break {
    label: String,
}

impl Break {
    pub fn new(label: impl Into<String>) -> Self {
        Break {
            label: label.into(),
        }
    }
}

impl ScriptStatement for Break {
    fn start(&self, _ctx: &mut dyn Context) -> Result<()> {
        Ok(())
    }

    fn exec(&self, _ctx: &mut dyn Context) -> Result<Flow> {
        Ok(Flow::Break(self.label.clone()))
    }

    fn finish(&self, _ctx: &mut dyn Context) -> Result<()> {
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "break"
    }

    fn describe(&self) -> String {
        format!("break '{}'", self.label)
    }
}

/// Runs a statement registered under a provider.
pub struct ExecNamed {
    provider: String,
    statement: String,
}

impl ExecNamed {
    pub fn new(provider: impl Into<String>, statement: impl Into<String>) -> Self {
        ExecNamed {
            provider: provider.into(),
            statement: statement.into(),
        }
    }
}

impl ScriptStatement for ExecNamed {
    fn start(&self, _ctx: &mut dyn Context) -> Result<()> {
        Ok(())
    }

    fn exec(&self, ctx: &mut dyn Context) -> Result<Flow> {
        let provider = ctx.statement_provider(&self.provider)?;
        let stmt = provider.statement(&self.statement)?;
        ctx.exec_inner(stmt.as_ref())
    }

    fn finish(&self, _ctx: &mut dyn Context) -> Result<()> {
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "exec-named"
    }

    fn describe(&self) -> String {
        format!("exec-named '{}/{}'", self.provider, self.statement)
    }
}
