//! Named statement registries

use crate::context::Context;
use crate::result::{EngineError, Result};
use crate::script::{SharedStatement, StatementProvider};
use std::collections::HashMap;

/// Statement provider backed by a plain map.
///
/// Registered on a context, the provider lets scripts invoke reusable
/// statement trees by name; the context starts and finishes the whole
/// registry around each run.
pub struct MapStatementsProvider {
    name: String,
    statements: HashMap<String, SharedStatement>,
}

impl MapStatementsProvider {
    pub fn new(name: impl Into<String>) -> Self {
        MapStatementsProvider {
            name: name.into(),
            statements: HashMap::new(),
        }
    }

    /// Provider name used in lookup errors.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_statement(&mut self, name: impl Into<String>, stmt: SharedStatement) {
        self.statements.insert(name.into(), stmt);
    }

    pub fn with_statement(mut self, name: impl Into<String>, stmt: SharedStatement) -> Self {
        self.add_statement(name, stmt);
        self
    }
}

impl StatementProvider for MapStatementsProvider {
    fn start(&self, ctx: &mut dyn Context) -> Result<()> {
        for stmt in self.statements.values() {
            stmt.start(ctx)?;
        }
        Ok(())
    }

    fn finish(&self, ctx: &mut dyn Context) -> Result<()> {
        for stmt in self.statements.values() {
            stmt.finish(ctx)?;
        }
        Ok(())
    }

    fn statement(&self, name: &str) -> Result<SharedStatement> {
        self.statements.get(name).cloned().ok_or_else(|| {
            EngineError::StatementNotFound {
                provider: self.name.clone(),
                name: name.to_string(),
            }
        })
    }
}
