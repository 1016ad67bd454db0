//! The standard tag dialect
//!
//! One registry entry per statement and expression of the script model.
//! Attribute-shaped parameters (names, labels, severities) come from the
//! node; object-shaped parameters come from the resolved children, in
//! document order.

use crate::builder::{req_attr, Args, BuiltValue, ConfigNode, TagRegistry};
use crate::context::ChildStatement;
use crate::result::{EngineError, Result};
use crate::script::expr::{
    BoolConst, Const, DynTemplate, FromDb, Not, RegExpDynMatch, RegExpMatch, TestVar, Var,
};
use crate::script::statements::{
    Block, Break, Case, Catch, ExecNamed, If, Inc, LogMessage, Operation, QueryLoop, QueryXml,
    RowBinding, SetVar, Sum, VarQuery, While, XmlMode,
};
use crate::template::PreparedTemplate;
use std::rc::Rc;

fn stmt(value: impl crate::script::ScriptStatement + 'static) -> Result<BuiltValue> {
    Ok(BuiltValue::Statement(Rc::new(value)))
}

fn expr(value: impl crate::script::ScriptExpression + 'static) -> Result<BuiltValue> {
    Ok(BuiltValue::Expr(Rc::new(value)))
}

fn cond(value: impl crate::script::BoolExpression + 'static) -> Result<BuiltValue> {
    Ok(BuiltValue::Bool(Rc::new(value)))
}

/// Row-binding options shared by the query statements.
fn binding_from(node: &ConfigNode) -> Result<RowBinding> {
    let mut binding = RowBinding::new();
    if let Some(prefix) = node.attr("prefix") {
        binding = binding.with_prefix(prefix);
    }
    if node.attr("error-as-null") == Some("yes") {
        binding = binding.error_as_null();
    }
    if let Some(var) = node.attr("xml-var") {
        let mode = match node.attr("xml-mode") {
            None | Some("attributes") => XmlMode::Attributes,
            Some("elements") => XmlMode::Elements,
            Some(other) => {
                return Err(EngineError::Format(format!("Unknown XML mode '{}'", other)))
            }
        };
        binding = binding.with_xml(var, mode);
    }
    Ok(binding)
}

pub(crate) fn standard() -> TagRegistry {
    let mut reg = TagRegistry::new();

    reg.primitive("text");
    reg.list("list");
    reg.map("map");
    reg.node("config");
    reg.stock("stock");

    reg.constructor("block", |node, mut args| {
        let children = args.statements()?;
        match node.attr("label") {
            Some(label) => stmt(Block::labeled(label, children)),
            None => stmt(Block::new(children)),
        }
    });

    reg.constructor("if", |_, mut args| {
        let cond = args.bool_expr("condition")?;
        let then_branch = args.statement("then branch")?;
        let else_branch = args.opt_statement()?;
        stmt(If::new(cond, then_branch, else_branch))
    });

    reg.constructor("while", |node, mut args| {
        let cond = args.bool_expr("condition")?;
        let body = args.statement("loop body")?;
        match node.attr("label") {
            Some(label) => stmt(While::labeled(label, cond, body)),
            None => stmt(While::new(cond, body)),
        }
    });

    // Branch children after the selector carry a `value` attribute; the
    // one child without it is the default branch.
    reg.constructor("case", |node, mut args| {
        let selector = args.expr("selector")?;
        let mut branches = Vec::new();
        let mut else_branch = None;
        for (child, value) in node.children().iter().skip(1).zip(args.take_all()) {
            let branch = value.into_statement()?;
            match child.attr("value") {
                Some(key) => branches.push((key.to_string(), branch)),
                None => else_branch = Some(branch),
            }
        }
        stmt(Case::new(selector, branches, else_branch))
    });

    reg.constructor("catch", |node, mut args| {
        let body = args.statement("body")?;
        let rethrow = args.bool_expr("rethrow condition")?;
        let suppress = args.bool_expr("suppress condition")?;
        let finally = args.opt_statement()?;
        let var = node.attr("var").map(String::from);
        stmt(Catch::new(body, finally, rethrow, suppress, var))
    });

    reg.constructor("break", |node, _| stmt(Break::new(req_attr(node, "label")?)));

    reg.constructor("exec-named", |node, _| {
        stmt(ExecNamed::new(
            req_attr(node, "provider")?,
            req_attr(node, "statement")?,
        ))
    });

    reg.constructor("child", |_, mut args| {
        stmt(ChildStatement::new(args.statement("inner statement")?))
    });

    reg.constructor("set-var", |node, mut args| {
        stmt(SetVar::new(req_attr(node, "name")?, args.expr("value")?))
    });

    reg.constructor("inc", |node, _| {
        let amount = match node.attr("amount") {
            None => 1,
            Some(text) => text.parse().map_err(|_| {
                EngineError::Format(format!("Invalid increment amount '{}'", text))
            })?,
        };
        stmt(Inc::new(req_attr(node, "name")?, amount))
    });

    reg.constructor("sum", |node, _| {
        stmt(Sum::new(
            req_attr(node, "first")?,
            req_attr(node, "second")?,
            req_attr(node, "target")?,
        ))
    });

    reg.constructor("log", |node, mut args| {
        let severity = node.attr("severity").unwrap_or("info");
        stmt(LogMessage::new(severity, args.expr("message")?)?)
    });

    reg.constructor("operation", |_, mut args| {
        stmt(Operation::new(
            args.expr("receiver name")?,
            args.expr("operation text")?,
        ))
    });

    reg.constructor("var-query", |node, mut args| {
        let source = args.expr("data source")?;
        let query = args.expr("query text")?;
        stmt(VarQuery::new(source, query).with_binding(binding_from(node)?))
    });

    reg.constructor("query-xml", |_, mut args| {
        stmt(QueryXml::new(
            args.expr("data source")?,
            args.expr("query text")?,
            args.expr("target variable")?,
            args.expr("record tag")?,
        ))
    });

    reg.constructor("query-loop", |node, mut args| {
        let source = args.expr("data source")?;
        let query = args.expr("query text")?;
        let body = args.statement("loop body")?;
        let mut lp = QueryLoop::new(source, query, body).with_binding(binding_from(node)?);
        if let Some(name) = node.attr("cursor") {
            lp = lp.with_cursor_name(name);
        }
        if let Some(label) = node.attr("label") {
            lp = lp.with_label(label);
        }
        if let Some(name) = node.attr("rec-count-var") {
            lp = lp.with_rec_count_var(name);
        }
        if let Some(name) = node.attr("last-record-var") {
            lp = lp.with_last_record_var(name);
        }
        stmt(lp)
    });

    reg.constructor("const", |node, _| {
        if node.attr("null") == Some("yes") {
            expr(Const::new(None))
        } else {
            expr(Const::text(node.text().unwrap_or("")))
        }
    });

    reg.constructor("var", |node, _| expr(Var::new(req_attr(node, "name")?)));

    reg.constructor("template", |node, _| {
        expr(PreparedTemplate::parse(node.text().unwrap_or(""))?)
    });

    reg.constructor("dyn-template", |_, mut args| {
        expr(DynTemplate::new(args.expr("template text")?))
    });

    reg.constructor("from-db", |_, mut args| {
        expr(FromDb::new(
            args.expr("data source")?,
            args.expr("query text")?,
        ))
    });

    reg.constructor("true", |_, _| cond(BoolConst::new(true)));
    reg.constructor("false", |_, _| cond(BoolConst::new(false)));

    reg.constructor("not", |_, mut args| {
        cond(Not::new(args.bool_expr("inner condition")?))
    });

    reg.constructor("test-var", |node, _| {
        cond(TestVar::new(
            req_attr(node, "name")?,
            req_attr(node, "value")?,
        ))
    });

    reg.constructor("match", |node, mut args| {
        cond(RegExpMatch::new(
            args.expr("value")?,
            req_attr(node, "pattern")?,
            node.attr("group-prefix").map(String::from),
        )?)
    });

    reg.constructor("dyn-match", |node, mut args| {
        cond(RegExpDynMatch::new(
            args.expr("value")?,
            args.expr("pattern")?,
            node.attr("group-prefix").map(String::from),
        ))
    });

    reg
}
