//! The working context implementation

use crate::context::{
    format_datetime, run_inner, Context, CtxState, SharedCursor, SharedObject,
};
use crate::link::{LinkObject, LinkWarning, PooledHandle, ResourceBroker};
use crate::link::NoResources;
use crate::result::{EngineError, Result};
use crate::script::expr::Const;
use crate::script::{Flow, ScriptStatement, SharedExpr, StatementProvider};
use chrono::NaiveDateTime;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::time::{Duration, Instant};

const DEFAULT_DATE_FORMAT: &str = "%Y%m%d %H:%M:%S.%3f";

/// Concrete [`Context`] holding all namespaces and counters.
///
/// Contexts chain through [`set_parent`](ExecContext::set_parent): lookups
/// that miss locally continue in the parent while every mutation stays
/// local. Each context keeps its own lifecycle state, so a child run is
/// canceled independently of whatever owns the parent.
///
/// Pooled resources arrive lazily through the configured
/// [`ResourceBroker`]; a fresh context uses [`NoResources`], which turns
/// every data-link lookup into a not-found error.
pub struct ExecContext {
    name: String,
    state: CtxState,
    parent: Option<Box<ExecContext>>,
    vars: HashMap<String, SharedExpr>,
    objects: HashMap<String, SharedObject>,
    providers: HashMap<String, Rc<dyn StatementProvider>>,
    cursors: HashMap<String, SharedCursor>,
    pooled: HashMap<String, PooledHandle>,
    aliases: HashMap<String, String>,
    broker: Box<dyn ResourceBroker>,
    date_format: String,
    used_link: Option<String>,
    stopped: bool,
    current_statement: Option<String>,
    alive_counter: u64,
    last_alive_counter: u64,
    error_count: u32,
    last_error: Option<String>,
    error_stack: Option<String>,
    source_time: Duration,
    custom_time: Duration,
}

impl ExecContext {
    /// Creates a stopped context with the default date format and no
    /// resource broker.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_broker(name, Box::new(NoResources))
    }

    /// Creates a stopped context that acquires pooled resources through
    /// `broker`.
    pub fn with_broker(name: impl Into<String>, broker: Box<dyn ResourceBroker>) -> Self {
        ExecContext {
            name: name.into(),
            state: CtxState::Stopped,
            parent: None,
            vars: HashMap::new(),
            objects: HashMap::new(),
            providers: HashMap::new(),
            cursors: HashMap::new(),
            pooled: HashMap::new(),
            aliases: HashMap::new(),
            broker,
            date_format: DEFAULT_DATE_FORMAT.to_string(),
            used_link: None,
            stopped: false,
            current_statement: None,
            alive_counter: 0,
            last_alive_counter: 0,
            error_count: 0,
            last_error: None,
            error_stack: None,
            source_time: Duration::ZERO,
            custom_time: Duration::ZERO,
        }
    }

    /// Context name, attached to every log line.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Replaces the resource broker.
    pub fn set_broker(&mut self, broker: Box<dyn ResourceBroker>) {
        self.broker = broker;
    }

    /// Sets the date format used by date variables and `!now`.
    pub fn set_date_format(&mut self, format: impl Into<String>) {
        self.date_format = format.into();
    }

    /// Attaches a parent for delegated lookups.
    pub fn set_parent(&mut self, parent: ExecContext) {
        self.parent = Some(Box::new(parent));
    }

    /// Detaches and returns the parent, if any.
    pub fn take_parent(&mut self) -> Option<ExecContext> {
        self.parent.take().map(|b| *b)
    }

    /// Maps `alias` to `target` for pooled-resource lookups.
    pub fn set_alias(&mut self, alias: impl Into<String>, target: impl Into<String>) {
        self.aliases.insert(alias.into(), target.into());
    }

    /// Number of statement dispatches in the current run.
    pub fn alive_counter(&self) -> u64 {
        self.alive_counter
    }

    /// Whether the last run ended through [`Context::stop`] rather than by
    /// reaching the end of the script.
    pub fn was_stopped(&self) -> bool {
        self.stopped
    }

    fn ensure_state(&self, expected: CtxState) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(EngineError::IllegalState {
                expected,
                actual: self.state,
            })
        }
    }

    fn run_top(&mut self, stmt: &dyn ScriptStatement) -> Result<()> {
        self.alive_counter = 0;
        self.last_alive_counter = 0;
        self.stopped = false;
        self.error_count = 0;
        self.last_error = None;
        self.error_stack = None;
        self.source_time = Duration::ZERO;
        self.custom_time = Duration::ZERO;

        stmt.start(self)?;
        let providers: Vec<Rc<dyn StatementProvider>> = self.providers.values().cloned().collect();
        for provider in &providers {
            provider.start(self)?;
        }

        let outcome = run_inner(self, stmt);

        let mut wind_down: Result<()> = Ok(());
        for provider in &providers {
            if let Err(e) = provider.finish(self) {
                wind_down = Err(e);
                break;
            }
        }
        if wind_down.is_ok() {
            wind_down = stmt.finish(self);
        }

        // A break escaping the top statement is dropped here.
        outcome.map(|_| ()).and(wind_down)
    }
}

impl Context for ExecContext {
    fn debug(&self, msg: &str) {
        tracing::debug!(ctx = %self.name, "{}", msg);
    }

    fn info(&self, msg: &str) {
        tracing::info!(ctx = %self.name, "{}", msg);
    }

    fn warning(&self, msg: &str) {
        tracing::warn!(ctx = %self.name, "{}", msg);
    }

    fn error(&self, msg: &str) {
        tracing::error!(ctx = %self.name, "{}", msg);
    }

    fn add_error(&mut self, msg: &str) {
        self.error_count += 1;
        self.last_error = Some(msg.to_string());
    }

    fn error_count(&self) -> u32 {
        self.error_count
    }

    fn error_text(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    fn error_stack(&self) -> Option<&str> {
        self.error_stack.as_deref()
    }

    fn set_error_stack(&mut self, stack: String) {
        self.error_stack = Some(stack);
    }

    fn add_db_warnings(&mut self, warnings: Vec<LinkWarning>) {
        if warnings.is_empty() {
            return;
        }
        self.add_error(&format!(
            "Operation batch raised {} errors. The first one: {}",
            warnings.len(),
            warnings[0].error
        ));
        for (i, warning) in warnings.iter().enumerate() {
            let text = format!("{} --> {}", warning.result_number, warning.error);
            if i < 10 {
                self.error(&text);
            } else {
                self.warning(&text);
            }
        }
    }

    fn add_source_time(&mut self, elapsed: Duration) {
        self.source_time += elapsed;
    }

    fn source_time(&self) -> Duration {
        self.source_time
    }

    fn add_custom_time(&mut self, elapsed: Duration) {
        self.custom_time += elapsed;
    }

    fn custom_time(&self) -> Duration {
        self.custom_time
    }

    fn moved_since_last_call(&mut self) -> bool {
        let moved = self.alive_counter != self.last_alive_counter;
        self.last_alive_counter = self.alive_counter;
        moved
    }

    fn bump_alive(&mut self) {
        self.alive_counter += 1;
    }

    fn is_canceled(&self) -> bool {
        self.state != CtxState::Active
    }

    fn stop(&mut self) {
        if self.state != CtxState::Active {
            return;
        }
        self.state = CtxState::NotCleaned;
        self.stopped = true;
        if let Some(name) = self.used_link.clone() {
            let handle = self.pooled.get(&name).cloned();
            if let Some(handle) = handle {
                match handle.try_borrow_mut() {
                    Ok(mut slot) => {
                        if let Err(e) = slot.cancel() {
                            self.warning(&format!("Could not cancel link '{}': {}", name, e));
                        }
                    }
                    Err(_) => {
                        self.warning(&format!("Link '{}' is busy and was not canceled", name));
                    }
                }
            }
        }
    }

    fn has_var(&self, name: &str) -> bool {
        self.vars.contains_key(name)
            || self.parent.as_ref().is_some_and(|p| p.has_var(name))
    }

    fn var_expression(&self, name: &str) -> Result<SharedExpr> {
        match self.vars.get(name) {
            Some(expr) => Ok(expr.clone()),
            None => match &self.parent {
                Some(parent) => parent.var_expression(name),
                None => Err(EngineError::VarNotFound(name.to_string())),
            },
        }
    }

    fn get_var(&mut self, name: &str) -> Result<Option<String>> {
        let expr = self.var_expression(name)?;
        expr.calculate(self)
    }

    fn set_var(&mut self, name: &str, value: &str) {
        self.set_var_opt(name, Some(value.to_string()));
    }

    fn set_var_opt(&mut self, name: &str, value: Option<String>) {
        self.vars.insert(name.to_string(), Rc::new(Const::new(value)));
    }

    fn set_var_expr(&mut self, name: &str, expr: SharedExpr) {
        self.vars.insert(name.to_string(), expr);
    }

    fn remove_var(&mut self, name: &str) {
        self.vars.remove(name);
    }

    fn get_date_var(&mut self, name: &str) -> Result<NaiveDateTime> {
        let text = self.get_var(name)?.ok_or_else(|| {
            EngineError::Format(format!("Date variable '{}' is null", name))
        })?;
        let format = self.date_format.clone();
        NaiveDateTime::parse_from_str(&text, &format).map_err(|e| {
            EngineError::Format(format!(
                "Cannot parse date variable '{}' value '{}': {}",
                name, text, e
            ))
        })
    }

    fn set_date_var(&mut self, name: &str, value: Option<NaiveDateTime>) -> Result<()> {
        match value {
            None => {
                self.set_var_opt(name, None);
                Ok(())
            }
            Some(dt) => {
                let text = format_datetime(&dt, &self.date_format)?;
                self.set_var(name, &text);
                Ok(())
            }
        }
    }

    fn date_format(&self) -> &str {
        &self.date_format
    }

    fn var_names(&self) -> Vec<String> {
        let mut names = match &self.parent {
            Some(parent) => parent.var_names(),
            None => Vec::new(),
        };
        for name in self.vars.keys() {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
        names
    }

    fn has_object(&self, name: &str) -> bool {
        self.objects.contains_key(name)
            || self.parent.as_ref().is_some_and(|p| p.has_object(name))
    }

    fn get_object(&self, name: &str) -> Result<SharedObject> {
        match self.objects.get(name) {
            Some(obj) => Ok(obj.clone()),
            None => match &self.parent {
                Some(parent) => parent.get_object(name),
                None => Err(EngineError::ObjectNotFound(name.to_string())),
            },
        }
    }

    fn set_object(&mut self, name: &str, value: SharedObject) {
        self.objects.insert(name.to_string(), value);
    }

    fn remove_object(&mut self, name: &str) {
        self.objects.remove(name);
    }

    fn add_statement_provider(&mut self, name: &str, provider: Rc<dyn StatementProvider>) {
        self.providers.insert(name.to_string(), provider);
    }

    fn statement_provider(&self, name: &str) -> Result<Rc<dyn StatementProvider>> {
        match self.providers.get(name) {
            Some(provider) => Ok(provider.clone()),
            None => match &self.parent {
                Some(parent) => parent.statement_provider(name),
                None => Err(EngineError::ProviderNotFound(name.to_string())),
            },
        }
    }

    fn add_cursor(&mut self, name: &str, cursor: SharedCursor) {
        self.cursors.insert(name.to_string(), cursor);
    }

    fn get_cursor(&self, name: &str) -> Result<SharedCursor> {
        match self.cursors.get(name) {
            Some(cursor) => Ok(cursor.clone()),
            None => match &self.parent {
                Some(parent) => parent.get_cursor(name),
                None => Err(EngineError::CursorNotFound(name.to_string())),
            },
        }
    }

    fn remove_cursor(&mut self, name: &str) {
        if let Some(cursor) = self.cursors.remove(name) {
            let started = Instant::now();
            if let Err(e) = cursor.borrow_mut().close() {
                self.warning(&format!("Context could not close cursor '{}': {}", name, e));
            }
            self.source_time += started.elapsed();
        }
    }

    fn pooled_object(&mut self, name: &str) -> Result<PooledHandle> {
        let key = self.resolve_alias(name);
        if let Some(handle) = self.pooled.get(&key) {
            return Ok(handle.clone());
        }
        match self.broker.init_pooled_object(&key) {
            Ok(Some(handle)) => {
                self.pooled.insert(key, handle.clone());
                Ok(handle)
            }
            Ok(None) => Err(EngineError::PooledNotFound(name.to_string())),
            Err(e) => Err(EngineError::ResourceUnavailable {
                name: name.to_string(),
                source: e,
            }),
        }
    }

    fn receiver_pooled_object(&mut self, name: &str) -> Result<PooledHandle> {
        let key = self.resolve_alias(name);
        if let Some(handle) = self.pooled.get(&key) {
            return Ok(handle.clone());
        }
        match self.broker.init_data_receiver(&key) {
            Ok(Some(handle)) => {
                self.pooled.insert(key, handle.clone());
                Ok(handle)
            }
            Ok(None) => Err(EngineError::ReceiverNotFound(name.to_string())),
            Err(e) => Err(EngineError::ResourceUnavailable {
                name: name.to_string(),
                source: e,
            }),
        }
    }

    fn set_pooled_object(&mut self, name: &str, handle: PooledHandle) {
        let key = self.resolve_alias(name);
        self.pooled.insert(key, handle);
    }

    fn remove_pooled_object(&mut self, name: &str) {
        let key = self.resolve_alias(name);
        if let Some(handle) = self.pooled.remove(&key) {
            handle.borrow_mut().release();
        }
    }

    fn get_source(&mut self, name: &str) -> Result<PooledHandle> {
        let key = self.resolve_alias(name);
        let handle = if let Some(handle) = self.pooled.get(&key) {
            handle.clone()
        } else {
            match self.broker.init_data_source(&key) {
                Ok(Some(handle)) => {
                    self.pooled.insert(key, handle.clone());
                    handle
                }
                Ok(None) => return Err(EngineError::SourceNotFound(name.to_string())),
                Err(e) => {
                    return Err(EngineError::ResourceUnavailable {
                        name: name.to_string(),
                        source: e,
                    })
                }
            }
        };
        {
            let mut slot = handle.borrow_mut();
            slot.source()?;
        }
        Ok(handle)
    }

    fn get_receiver(&mut self, name: &str) -> Result<PooledHandle> {
        let key = self.resolve_alias(name);
        let handle = if let Some(handle) = self.pooled.get(&key) {
            handle.clone()
        } else {
            match self.broker.init_data_receiver(&key) {
                Ok(Some(handle)) => {
                    self.pooled.insert(key, handle.clone());
                    handle
                }
                Ok(None) => return Err(EngineError::ReceiverNotFound(name.to_string())),
                Err(e) => {
                    return Err(EngineError::ResourceUnavailable {
                        name: name.to_string(),
                        source: e,
                    })
                }
            }
        };
        {
            let mut slot = handle.borrow_mut();
            slot.receiver()?;
        }
        Ok(handle)
    }

    fn resolve_alias(&self, name: &str) -> String {
        match self.aliases.get(name) {
            Some(target) => target.clone(),
            None => name.to_string(),
        }
    }

    fn add_used_link(&mut self, name: &str) {
        self.used_link = Some(self.resolve_alias(name));
    }

    fn remove_used_link(&mut self) {
        self.used_link = None;
    }

    fn used_link(&self) -> Option<&str> {
        self.used_link.as_deref()
    }

    fn exec(&mut self, stmt: &dyn ScriptStatement) -> Result<()> {
        self.ensure_state(CtxState::Stopped)?;
        self.state = CtxState::Active;
        let result = self.run_top(stmt);
        self.state = CtxState::NotCleaned;
        result
    }

    fn exec_inner(&mut self, stmt: &dyn ScriptStatement) -> Result<Flow> {
        run_inner(self, stmt)
    }

    fn clean_up(&mut self) -> Result<()> {
        self.ensure_state(CtxState::NotCleaned)?;

        let cursors: Vec<(String, SharedCursor)> = self.cursors.drain().collect();
        for (name, cursor) in cursors {
            let started = Instant::now();
            if let Err(e) = cursor.borrow_mut().close() {
                self.warning(&format!("Context could not close cursor '{}': {}", name, e));
            }
            self.source_time += started.elapsed();
        }

        let stale_ptr = self
            .used_link
            .as_ref()
            .and_then(|name| self.pooled.get(name))
            .map(Rc::as_ptr);
        let pooled: Vec<(String, PooledHandle)> = self.pooled.drain().collect();
        let mut released = HashSet::new();
        for (name, handle) in pooled {
            if !released.insert(Rc::as_ptr(&handle)) {
                continue;
            }
            let mut slot = handle.borrow_mut();
            if let Ok(LinkObject::Receiver(receiver)) = slot.link() {
                if let Err(e) = receiver.flush() {
                    self.warning(&format!("Context could not flush data receiver '{}': {}", name, e));
                }
            }
            if Some(Rc::as_ptr(&handle)) == stale_ptr {
                slot.mark_stale();
            }
            slot.release();
        }
        self.used_link = None;
        self.state = CtxState::Stopped;
        Ok(())
    }

    fn swap_current_statement(&mut self, stmt: Option<String>) -> Option<String> {
        std::mem::replace(&mut self.current_statement, stmt)
    }

    fn current_state_desc(&self) -> String {
        format!(
            "current statement: {}; used link: {}",
            self.current_statement.as_deref().unwrap_or("none"),
            self.used_link.as_deref().unwrap_or("none")
        )
    }
}
