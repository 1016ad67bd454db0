//! In-memory links and probe statements shared by the unit tests.

use crate::context::Context;
use crate::link::{
    ColumnInfo, ColumnKind, Cursor, DataLink, DataReceiver, DataSource, LinkObject, LinkWarning,
    PooledHandle, PooledResourceFactory, PooledSlot, ResourceBroker,
};
use crate::result::{EngineError, LinkError, Result};
use crate::script::{Flow, ScriptStatement};
use chrono::NaiveDateTime;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::time::Duration;

/// One cell of a stub result set.
#[derive(Clone, Debug)]
pub(crate) enum Datum {
    Null,
    Text(String),
    Time(NaiveDateTime),
    Bytes(Vec<u8>),
}

/// Scrollable in-memory result set.
pub(crate) struct MemoryCursor {
    columns: Vec<ColumnInfo>,
    rows: VecDeque<Vec<Datum>>,
    current: Option<Vec<Datum>>,
    pub closed: Rc<Cell<bool>>,
}

impl MemoryCursor {
    pub fn new(columns: Vec<ColumnInfo>) -> Self {
        MemoryCursor {
            columns,
            rows: VecDeque::new(),
            current: None,
            closed: Rc::new(Cell::new(false)),
        }
    }

    /// Cursor over text columns only.
    pub fn text_columns(names: &[&str]) -> Self {
        Self::new(
            names
                .iter()
                .map(|n| ColumnInfo::new(*n, ColumnKind::Text))
                .collect(),
        )
    }

    pub fn with_row(mut self, row: Vec<Datum>) -> Self {
        self.rows.push_back(row);
        self
    }

    pub fn with_text_row(self, cells: &[&str]) -> Self {
        self.with_row(cells.iter().map(|c| Datum::Text(c.to_string())).collect())
    }

    fn cell(&self, column: &str) -> Result<&Datum> {
        let ix = self
            .columns
            .iter()
            .position(|c| c.name == column)
            .ok_or_else(|| EngineError::Format(format!("Stub cursor has no column '{}'", column)))?;
        let row = self
            .current
            .as_ref()
            .ok_or_else(|| EngineError::Format("Stub cursor is not on a row".to_string()))?;
        Ok(&row[ix])
    }
}

impl Cursor for MemoryCursor {
    fn next(&mut self) -> Result<bool> {
        self.current = self.rows.pop_front();
        Ok(self.current.is_some())
    }

    fn columns(&self) -> Result<Vec<ColumnInfo>> {
        Ok(self.columns.clone())
    }

    fn get_string(&mut self, column: &str) -> Result<Option<String>> {
        match self.cell(column)? {
            Datum::Null => Ok(None),
            Datum::Text(s) => Ok(Some(s.clone())),
            Datum::Time(t) => Ok(Some(t.to_string())),
            Datum::Bytes(b) => Ok(Some(String::from_utf8_lossy(b).into_owned())),
        }
    }

    fn get_datetime(&mut self, column: &str) -> Result<Option<NaiveDateTime>> {
        match self.cell(column)? {
            Datum::Null => Ok(None),
            Datum::Time(t) => Ok(Some(*t)),
            other => Err(EngineError::Format(format!(
                "Stub column '{}' holds {:?}, not a timestamp",
                column, other
            ))),
        }
    }

    fn get_bytes(&mut self, column: &str) -> Result<Option<Vec<u8>>> {
        match self.cell(column)? {
            Datum::Null => Ok(None),
            Datum::Bytes(b) => Ok(Some(b.clone())),
            Datum::Text(s) => Ok(Some(s.as_bytes().to_vec())),
            other => Err(EngineError::Format(format!(
                "Stub column '{}' holds {:?}, not bytes",
                column, other
            ))),
        }
    }

    fn close(&mut self) -> Result<()> {
        self.closed.set(true);
        Ok(())
    }
}

/// Data source that answers requests from a queue of prepared cursors.
#[derive(Default)]
pub(crate) struct StubSource {
    pub requests: Rc<RefCell<Vec<String>>>,
    pub results: VecDeque<MemoryCursor>,
    pub canceled: Rc<Cell<bool>>,
}

impl StubSource {
    pub fn queue(&mut self, cursor: MemoryCursor) {
        self.results.push_back(cursor);
    }
}

impl DataLink for StubSource {
    fn cancel(&mut self) -> Result<()> {
        self.canceled.set(true);
        Ok(())
    }

    fn set_timeout(&mut self, _timeout: Duration) -> Result<()> {
        Ok(())
    }
}

impl DataSource for StubSource {
    fn request(&mut self, query: &str) -> Result<Box<dyn Cursor>> {
        self.requests.borrow_mut().push(query.to_string());
        match self.results.pop_front() {
            Some(cursor) => Ok(Box::new(cursor)),
            None => Err(EngineError::Format(format!(
                "Stub source has no result queued for: {}",
                query
            ))),
        }
    }
}

/// Data receiver that records operations and replays queued warnings.
#[derive(Default)]
pub(crate) struct StubReceiver {
    pub ops: Rc<RefCell<Vec<String>>>,
    pub warnings: VecDeque<Vec<LinkWarning>>,
    pub flushes: Rc<Cell<u32>>,
    pub closed: Rc<Cell<bool>>,
    pub canceled: Rc<Cell<bool>>,
}

impl DataLink for StubReceiver {
    fn cancel(&mut self) -> Result<()> {
        self.canceled.set(true);
        Ok(())
    }

    fn set_timeout(&mut self, _timeout: Duration) -> Result<()> {
        Ok(())
    }
}

impl DataReceiver for StubReceiver {
    fn process(&mut self, operation: &str) -> Result<Vec<LinkWarning>> {
        self.ops.borrow_mut().push(operation.to_string());
        Ok(self.warnings.pop_front().unwrap_or_default())
    }

    fn flush(&mut self) -> Result<()> {
        self.flushes.set(self.flushes.get() + 1);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.closed.set(true);
        Ok(())
    }
}

/// Factory that hands out one prepared link and records every release.
pub(crate) struct OneShotFactory {
    link: Option<LinkObject>,
    pub released: Rc<RefCell<Vec<bool>>>,
}

impl OneShotFactory {
    pub fn new(link: LinkObject) -> Self {
        OneShotFactory {
            link: Some(link),
            released: Rc::new(RefCell::new(Vec::new())),
        }
    }
}

impl PooledResourceFactory for OneShotFactory {
    fn acquire(&mut self) -> std::result::Result<LinkObject, LinkError> {
        self.link.take().ok_or_else(|| "stub factory is exhausted".into())
    }

    fn release(&mut self, _link: LinkObject, stale: bool) {
        self.released.borrow_mut().push(stale);
    }

    fn check(&self, _link: &LinkObject) -> bool {
        true
    }
}

pub(crate) fn link_handle(name: &str, link: LinkObject) -> (PooledHandle, Rc<RefCell<Vec<bool>>>) {
    let factory = OneShotFactory::new(link);
    let released = factory.released.clone();
    let handle = PooledSlot::acquire(name, Rc::new(RefCell::new(factory)))
        .expect("stub factory cannot fail on first acquire");
    (handle, released)
}

pub(crate) fn source_handle(source: StubSource) -> (PooledHandle, Rc<RefCell<Vec<bool>>>) {
    link_handle("stub-source", LinkObject::Source(Box::new(source)))
}

pub(crate) fn receiver_handle(receiver: StubReceiver) -> (PooledHandle, Rc<RefCell<Vec<bool>>>) {
    link_handle("stub-receiver", LinkObject::Receiver(Box::new(receiver)))
}

/// Broker over fixed maps of prepared handles.
#[derive(Default)]
pub(crate) struct StubBroker {
    sources: HashMap<String, PooledHandle>,
    receivers: HashMap<String, PooledHandle>,
}

impl StubBroker {
    pub fn with_source(mut self, name: &str, source: StubSource) -> Self {
        let (handle, _) = source_handle(source);
        self.sources.insert(name.to_string(), handle);
        self
    }

    pub fn with_receiver(mut self, name: &str, receiver: StubReceiver) -> Self {
        let (handle, _) = receiver_handle(receiver);
        self.receivers.insert(name.to_string(), handle);
        self
    }
}

impl ResourceBroker for StubBroker {
    fn init_data_source(
        &mut self,
        name: &str,
    ) -> std::result::Result<Option<PooledHandle>, LinkError> {
        Ok(self.sources.get(name).cloned())
    }

    fn init_data_receiver(
        &mut self,
        name: &str,
    ) -> std::result::Result<Option<PooledHandle>, LinkError> {
        Ok(self.receivers.get(name).cloned())
    }
}

type Action = Box<dyn Fn(&mut dyn Context) -> Result<Flow>>;

/// Statement that counts lifecycle calls and optionally runs a closure.
pub(crate) struct Probe {
    pub starts: Rc<Cell<u32>>,
    pub execs: Rc<Cell<u32>>,
    pub finishes: Rc<Cell<u32>>,
    action: Option<Action>,
}

impl Probe {
    pub fn new() -> Self {
        Probe {
            starts: Rc::new(Cell::new(0)),
            execs: Rc::new(Cell::new(0)),
            finishes: Rc::new(Cell::new(0)),
            action: None,
        }
    }

    pub fn with(action: impl Fn(&mut dyn Context) -> Result<Flow> + 'static) -> Self {
        let mut probe = Self::new();
        probe.action = Some(Box::new(action));
        probe
    }
}

impl ScriptStatement for Probe {
    fn start(&self, _ctx: &mut dyn Context) -> Result<()> {
        self.starts.set(self.starts.get() + 1);
        Ok(())
    }

    fn exec(&self, ctx: &mut dyn Context) -> Result<Flow> {
        self.execs.set(self.execs.get() + 1);
        match &self.action {
            Some(action) => action(ctx),
            None => Ok(Flow::Continue),
        }
    }

    fn finish(&self, _ctx: &mut dyn Context) -> Result<()> {
        self.finishes.set(self.finishes.get() + 1);
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "probe"
    }
}
