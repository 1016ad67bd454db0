//! Statements that move data through sources and receivers

use crate::context::{
    close_cursor, create_cursor, create_named_cursor, format_datetime, Context, SharedCursor,
};
use crate::link::{ColumnInfo, ColumnKind, Cursor, PooledHandle};
use crate::result::{EngineError, Result};
use crate::script::expr::required;
use crate::script::{Flow, ScriptStatement, SharedExpr, SharedStatement};
use crate::text::{replace_chars, truncate_request};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use std::time::Instant;

fn xml_escape(value: &str) -> String {
    replace_chars(value, &[('<', "&lt;"), ('"', "&quot;")])
}

/// Shape of the one-variable XML rendition of a bound row.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum XmlMode {
    /// `<record a="1" b="2"/>`
    Attributes,
    /// `<record><a>1</a><b>2</b></record>`
    Elements,
}

struct XmlTarget {
    var: String,
    mode: XmlMode,
}

/// How a result-set row lands in context variables.
///
/// Column values become variables named after the column (optionally
/// prefixed). Timestamp and date columns pass through the context date
/// format, blobs become base64 text, nulls stay null.
pub struct RowBinding {
    prefix: Option<String>,
    error_as_null: bool,
    xml: Option<XmlTarget>,
}

impl RowBinding {
    pub fn new() -> Self {
        RowBinding {
            prefix: None,
            error_as_null: false,
            xml: None,
        }
    }

    /// Prepends `prefix` to every bound variable name.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Column read failures store a null variable and an error record
    /// instead of stopping the statement.
    pub fn error_as_null(mut self) -> Self {
        self.error_as_null = true;
        self
    }

    /// Additionally serializes each row into `var` as XML.
    pub fn with_xml(mut self, var: impl Into<String>, mode: XmlMode) -> Self {
        self.xml = Some(XmlTarget {
            var: var.into(),
            mode,
        });
        self
    }

    pub(crate) fn var_name(&self, column: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}{}", prefix, column),
            None => column.to_string(),
        }
    }

    pub(crate) fn bind(
        &self,
        ctx: &mut dyn Context,
        cursor: &mut dyn Cursor,
        columns: &[ColumnInfo],
    ) -> Result<()> {
        let mut xml = self.xml.as_ref().map(|target| match target.mode {
            XmlMode::Attributes => String::from("<record"),
            XmlMode::Elements => String::from("<record>"),
        });
        for column in columns {
            let var_name = self.var_name(&column.name);
            let text = match bind_column(ctx, cursor, column, &var_name) {
                Ok(text) => text,
                Err(e) => {
                    let wrapped = EngineError::Column(column.name.clone(), Box::new(e));
                    if !self.error_as_null {
                        return Err(wrapped);
                    }
                    ctx.set_var_opt(&var_name, None);
                    ctx.add_error(&wrapped.to_string());
                    None
                }
            };
            if let (Some(xml), Some(target)) = (xml.as_mut(), self.xml.as_ref()) {
                let value = xml_escape(text.as_deref().unwrap_or(""));
                match target.mode {
                    XmlMode::Attributes => {
                        xml.push_str(&format!(" {}=\"{}\"", column.name, value));
                    }
                    XmlMode::Elements => {
                        xml.push_str(&format!("<{0}>{1}</{0}>", column.name, value));
                    }
                }
            }
        }
        if let (Some(mut xml), Some(target)) = (xml, self.xml.as_ref()) {
            match target.mode {
                XmlMode::Attributes => xml.push_str("/>"),
                XmlMode::Elements => xml.push_str("</record>"),
            }
            ctx.set_var(&target.var, &xml);
        }
        Ok(())
    }
}

impl Default for RowBinding {
    fn default() -> Self {
        Self::new()
    }
}

fn bind_column(
    ctx: &mut dyn Context,
    cursor: &mut dyn Cursor,
    column: &ColumnInfo,
    var_name: &str,
) -> Result<Option<String>> {
    let text = match column.kind {
        ColumnKind::Timestamp | ColumnKind::Date => match cursor.get_datetime(&column.name)? {
            Some(dt) => Some(format_datetime(&dt, ctx.date_format())?),
            None => None,
        },
        ColumnKind::Blob => cursor
            .get_bytes(&column.name)?
            .map(|bytes| BASE64.encode(bytes)),
        ColumnKind::Text => cursor.get_string(&column.name)?,
    };
    ctx.set_var_opt(var_name, text.clone());
    Ok(text)
}

/// Sends an evaluated operation to a data receiver.
///
/// The receiver stays registered as the used link while the operation is
/// in flight, so `stop` can cancel it and cleanup can retire it.
pub struct Operation {
    receiver: SharedExpr,
    operation: SharedExpr,
}

impl Operation {
    pub fn new(receiver: SharedExpr, operation: SharedExpr) -> Self {
        Operation {
            receiver,
            operation,
        }
    }

    fn send(&self, ctx: &mut dyn Context, name: &str, handle: &PooledHandle) -> Result<()> {
        let op = required(ctx, self.operation.as_ref(), "operation text")?;
        if ctx.is_canceled() {
            return Ok(());
        }
        let started = Instant::now();
        let result = {
            let mut slot = handle.borrow_mut();
            let receiver = slot.receiver()?;
            receiver.process(&op)
        };
        ctx.add_custom_time(started.elapsed());
        match result {
            Ok(warnings) => {
                ctx.add_db_warnings(warnings);
                Ok(())
            }
            Err(e) => Err(EngineError::Receiver {
                name: name.to_string(),
                operation: truncate_request(&op),
                source: Box::new(e),
            }),
        }
    }
}

impl ScriptStatement for Operation {
    fn start(&self, _ctx: &mut dyn Context) -> Result<()> {
        Ok(())
    }

    fn exec(&self, ctx: &mut dyn Context) -> Result<Flow> {
        let name = required(ctx, self.receiver.as_ref(), "data receiver name")?;
        let handle = ctx.get_receiver(&name)?;
        ctx.add_used_link(&name);
        let outcome = self.send(ctx, &name, &handle);
        ctx.remove_used_link();
        outcome?;
        Ok(Flow::Continue)
    }

    fn finish(&self, _ctx: &mut dyn Context) -> Result<()> {
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "operation"
    }
}

/// Runs a query and binds its first row to variables.
///
/// An empty result still defines every column variable, as null, so
/// templates downstream never trip over missing names.
pub struct VarQuery {
    source: SharedExpr,
    query: SharedExpr,
    binding: RowBinding,
}

impl VarQuery {
    pub fn new(source: SharedExpr, query: SharedExpr) -> Self {
        VarQuery {
            source,
            query,
            binding: RowBinding::new(),
        }
    }

    pub fn with_binding(mut self, binding: RowBinding) -> Self {
        self.binding = binding;
        self
    }

    fn bind_first(&self, ctx: &mut dyn Context, cursor: &SharedCursor) -> Result<()> {
        let mut cur = cursor.borrow_mut();
        let columns = cur.columns()?;
        if cur.next()? {
            self.binding.bind(ctx, cur.as_mut(), &columns)
        } else {
            for column in &columns {
                ctx.set_var_opt(&self.binding.var_name(&column.name), None);
            }
            Ok(())
        }
    }
}

impl ScriptStatement for VarQuery {
    fn start(&self, _ctx: &mut dyn Context) -> Result<()> {
        Ok(())
    }

    fn exec(&self, ctx: &mut dyn Context) -> Result<Flow> {
        let source = required(ctx, self.source.as_ref(), "data source name")?;
        let sql = required(ctx, self.query.as_ref(), "query text")?;
        let cursor = create_cursor(ctx, &source, &sql)?;
        let outcome = self.bind_first(ctx, &cursor);
        close_cursor(ctx, &cursor);
        outcome?;
        Ok(Flow::Continue)
    }

    fn finish(&self, _ctx: &mut dyn Context) -> Result<()> {
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "var-query"
    }
}

fn collect_xml(ctx: &mut dyn Context, cursor: &SharedCursor, tag: &str) -> Result<Option<String>> {
    let mut cur = cursor.borrow_mut();
    let columns = cur.columns()?;
    let mut records = Vec::new();
    loop {
        if ctx.is_canceled() {
            return Ok(None);
        }
        let started = Instant::now();
        let advanced = cur.next()?;
        ctx.add_source_time(started.elapsed());
        if !advanced {
            break;
        }
        let mut record = format!("<{}>", tag);
        for column in &columns {
            let value = match column.kind {
                ColumnKind::Timestamp | ColumnKind::Date => cur
                    .get_datetime(&column.name)?
                    .map(|dt| dt.format("%Y-%m-%dT%H:%M:%S").to_string()),
                ColumnKind::Blob => cur.get_bytes(&column.name)?.map(|b| BASE64.encode(b)),
                ColumnKind::Text => cur.get_string(&column.name)?,
            };
            let value = xml_escape(&value.unwrap_or_default());
            record.push_str(&format!("<{0}>{1}</{0}>", column.name, value));
        }
        record.push_str(&format!("</{}>", tag));
        records.push(record);
    }
    Ok(Some(records.join("\n")))
}

/// Stores an XML rendition of a whole result set into one variable.
pub struct QueryXml {
    source: SharedExpr,
    query: SharedExpr,
    var: SharedExpr,
    record_tag: SharedExpr,
}

impl QueryXml {
    pub fn new(
        source: SharedExpr,
        query: SharedExpr,
        var: SharedExpr,
        record_tag: SharedExpr,
    ) -> Self {
        QueryXml {
            source,
            query,
            var,
            record_tag,
        }
    }
}

impl ScriptStatement for QueryXml {
    fn start(&self, _ctx: &mut dyn Context) -> Result<()> {
        Ok(())
    }

    fn exec(&self, ctx: &mut dyn Context) -> Result<Flow> {
        let source = required(ctx, self.source.as_ref(), "data source name")?;
        let sql = required(ctx, self.query.as_ref(), "query text")?;
        let var = required(ctx, self.var.as_ref(), "target variable name")?;
        let tag = required(ctx, self.record_tag.as_ref(), "record tag name")?;
        let cursor = create_cursor(ctx, &source, &sql)?;
        let outcome = collect_xml(ctx, &cursor, &tag);
        close_cursor(ctx, &cursor);
        if let Some(xml) = outcome? {
            ctx.set_var(&var, &xml);
        }
        Ok(Flow::Continue)
    }

    fn finish(&self, _ctx: &mut dyn Context) -> Result<()> {
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "query-xml"
    }
}

/// Runs the body statement once per result row.
///
/// The cursor reads one row ahead so the body always knows whether it is
/// on the last record. With a cursor name the open cursor is registered
/// in the context for the body to scroll further on its own.
pub struct QueryLoop {
    source: SharedExpr,
    query: SharedExpr,
    body: SharedStatement,
    cursor_name: Option<String>,
    label: Option<String>,
    rec_count_var: Option<String>,
    last_record_var: Option<String>,
    binding: RowBinding,
}

impl QueryLoop {
    pub fn new(source: SharedExpr, query: SharedExpr, body: SharedStatement) -> Self {
        QueryLoop {
            source,
            query,
            body,
            cursor_name: None,
            label: None,
            rec_count_var: None,
            last_record_var: None,
            binding: RowBinding::new(),
        }
    }

    /// Registers the open cursor in the context under `name`.
    pub fn with_cursor_name(mut self, name: impl Into<String>) -> Self {
        self.cursor_name = Some(name.into());
        self
    }

    /// Break label this loop consumes.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Publishes the 1-based record number under `name` before each body
    /// run (and `0` before the first row).
    pub fn with_rec_count_var(mut self, name: impl Into<String>) -> Self {
        self.rec_count_var = Some(name.into());
        self
    }

    /// Publishes `"1"`/`"0"` under `name` telling the body whether it is
    /// on the last record.
    pub fn with_last_record_var(mut self, name: impl Into<String>) -> Self {
        self.last_record_var = Some(name.into());
        self
    }

    pub fn with_binding(mut self, binding: RowBinding) -> Self {
        self.binding = binding;
        self
    }

    fn iterate(&self, ctx: &mut dyn Context, cursor: &SharedCursor) -> Result<Flow> {
        if ctx.is_canceled() {
            return Ok(Flow::Continue);
        }
        if let Some(var) = &self.rec_count_var {
            ctx.set_var(var, "0");
        }
        let columns = cursor.borrow_mut().columns()?;
        let mut is_last = {
            let started = Instant::now();
            let advanced = cursor.borrow_mut().next()?;
            ctx.add_source_time(started.elapsed());
            !advanced
        };
        let mut count: u64 = 0;
        while !ctx.is_canceled() {
            if is_last {
                break;
            }
            {
                let mut cur = cursor.borrow_mut();
                self.binding.bind(ctx, cur.as_mut(), &columns)?;
                let started = Instant::now();
                let advanced = cur.next()?;
                ctx.add_source_time(started.elapsed());
                is_last = !advanced;
            }
            if let Some(var) = &self.last_record_var {
                ctx.set_var(var, if is_last { "1" } else { "0" });
            }
            count += 1;
            if let Some(var) = &self.rec_count_var {
                ctx.set_var(var, &count.to_string());
            }
            if let Flow::Break(label) = ctx.exec_inner(self.body.as_ref())? {
                if self.label.as_deref() == Some(label.as_str()) {
                    return Ok(Flow::Continue);
                }
                return Ok(Flow::Break(label));
            }
        }
        Ok(Flow::Continue)
    }
}

impl ScriptStatement for QueryLoop {
    fn start(&self, ctx: &mut dyn Context) -> Result<()> {
        self.body.start(ctx)
    }

    fn exec(&self, ctx: &mut dyn Context) -> Result<Flow> {
        let source = required(ctx, self.source.as_ref(), "data source name")?;
        let sql = required(ctx, self.query.as_ref(), "query text")?;
        let cursor = match &self.cursor_name {
            Some(name) => create_named_cursor(ctx, &source, name, &sql)?,
            None => create_cursor(ctx, &source, &sql)?,
        };
        let flow = self.iterate(ctx, &cursor);
        match &self.cursor_name {
            Some(name) => ctx.remove_cursor(name),
            None => close_cursor(ctx, &cursor),
        }
        flow
    }

    fn finish(&self, ctx: &mut dyn Context) -> Result<()> {
        self.body.finish(ctx)
    }

    fn kind(&self) -> &'static str {
        "query-loop"
    }

    fn describe(&self) -> String {
        match &self.label {
            Some(label) => format!("query-loop '{}'", label),
            None => "query-loop".to_string(),
        }
    }
}
