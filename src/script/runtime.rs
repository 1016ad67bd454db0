//! Top-level script driver
//!
//! [`ScriptRunner`] owns an [`ExecContext`], runs one statement tree
//! through the full lifecycle (`exec` then `clean_up`) and condenses the
//! context's counters into a [`RunReport`]. The context survives between
//! runs, so variables set by one script are visible to the next.

use crate::context::{Context, ExecContext};
use crate::result::Result;
use crate::script::ScriptStatement;
use std::error::Error;
use std::time::Duration;

/// Outcome of one script run.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// True when the run finished without an error escaping the script.
    pub success: bool,
    /// True when the run ended through [`Context::stop`].
    pub canceled: bool,
    /// Errors counted during the run, including a final escaping one.
    pub error_count: u32,
    /// Text of the most recent error, if any.
    pub error_text: Option<String>,
    /// Cause chain of the escaping error, one line per cause.
    pub error_stack: Option<String>,
    /// Statement dispatches performed.
    pub dispatches: u64,
    /// Time spent in data-source calls.
    pub source_time: Duration,
    /// Time accumulated by explicit custom-time accounting.
    pub custom_time: Duration,
}

impl RunReport {
    /// One-line summary for logs.
    pub fn summary(&self) -> String {
        let outcome = if self.canceled {
            "canceled"
        } else if self.success {
            "completed"
        } else {
            "failed"
        };
        format!(
            "{}: {} statements, {} errors, source time {:?}",
            outcome, self.dispatches, self.error_count, self.source_time
        )
    }
}

/// Runs statement trees against an owned context.
pub struct ScriptRunner {
    ctx: ExecContext,
}

impl ScriptRunner {
    /// Wraps a prepared context. The context must be stopped, which is
    /// what [`ExecContext::new`] and a finished run both leave behind.
    pub fn new(ctx: ExecContext) -> Self {
        ScriptRunner { ctx }
    }

    /// The underlying context.
    pub fn context(&self) -> &ExecContext {
        &self.ctx
    }

    /// Mutable access, for seeding variables and objects between runs.
    pub fn context_mut(&mut self) -> &mut ExecContext {
        &mut self.ctx
    }

    /// Releases the context.
    pub fn into_context(self) -> ExecContext {
        self.ctx
    }

    /// Runs `stmt` to completion and cleans the context up afterwards.
    ///
    /// An error escaping the script is folded into the report instead of
    /// being returned: the context's error counter and stack record it,
    /// and `success` turns false. Errors during cleanup are logged by the
    /// context and do not affect the report.
    pub fn run(&mut self, stmt: &dyn ScriptStatement) -> Result<RunReport> {
        let outcome = self.ctx.exec(stmt);
        if let Err(e) = &outcome {
            self.ctx.add_error(&e.to_string());
            self.ctx.set_error_stack(render_stack(e));
        }
        if let Err(e) = self.ctx.clean_up() {
            self.ctx.error(&format!("Cleanup failed: {}", e));
        }
        let report = RunReport {
            success: outcome.is_ok(),
            canceled: self.ctx.was_stopped(),
            error_count: self.ctx.error_count(),
            error_text: self.ctx.error_text().map(String::from),
            error_stack: self.ctx.error_stack().map(String::from),
            dispatches: self.ctx.alive_counter(),
            source_time: self.ctx.source_time(),
            custom_time: self.ctx.custom_time(),
        };
        self.ctx.info(&report.summary());
        Ok(report)
    }
}

fn render_stack(err: &dyn Error) -> String {
    let mut out = err.to_string();
    let mut cause = err.source();
    while let Some(e) = cause {
        out.push_str("\n  caused by: ");
        out.push_str(&e.to_string());
        cause = e.source();
    }
    out
}
