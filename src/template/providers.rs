//! Placeholder providers behind the `!func` marker

use crate::context::{format_datetime, Context};
use crate::result::{EngineError, Result};
use crate::script::expr::Var;
use crate::script::{ScriptExpression, SharedExpr};
use crate::template::scan::{err_at, Scanner};
use crate::template::PreparedTemplate;
use regex::Regex;
use std::rc::Rc;

/// One provider argument: a bare word is a variable reference, a quoted
/// span is a sub-template.
fn value_arg(s: &mut Scanner) -> Result<SharedExpr> {
    if s.peek() == Some('\'') {
        Ok(Rc::new(PreparedTemplate::parse_quoted(s)?))
    } else {
        Ok(Rc::new(Var::new(s.word())))
    }
}

fn at_close(s: &Scanner) -> bool {
    s.at_end() || s.rest().starts_with("%]")
}

fn name_to_close(s: &mut Scanner) -> Result<String> {
    let pos = s.pos();
    let name = s
        .take_until_token("%]")
        .ok_or_else(|| err_at(pos, "No closing brackets for variable"))?
        .trim()
        .to_string();
    s.eat("%]");
    Ok(name)
}

fn expect_close(s: &mut Scanner) -> Result<()> {
    s.skip_ws();
    if s.eat("%]") {
        Ok(())
    } else {
        Err(err_at(s.pos(), "End of var expected"))
    }
}

pub(crate) fn parse_var(s: &mut Scanner) -> Result<SharedExpr> {
    Ok(Rc::new(Var::new(name_to_close(s)?)))
}

/// `sys-var` and `env-var` both resolve against the process environment;
/// a missing entry is null, never an error.
pub(crate) fn parse_env(s: &mut Scanner) -> Result<SharedExpr> {
    Ok(Rc::new(EnvValue {
        name: name_to_close(s)?,
    }))
}

struct EnvValue {
    name: String,
}

impl ScriptExpression for EnvValue {
    fn calculate(&self, _ctx: &mut dyn Context) -> Result<Option<String>> {
        Ok(std::env::var(&self.name).ok())
    }
}

pub(crate) fn parse_map(s: &mut Scanner) -> Result<SharedExpr> {
    s.skip_ws();
    let name = if s.peek() == Some('\'') {
        s.quoted_raw()?.to_string()
    } else {
        s.word().to_string()
    };
    let mut map = MapExpr {
        name,
        branches: Vec::new(),
        else_branch: None,
        null_branch: None,
        undef_branch: None,
    };
    loop {
        s.skip_ws();
        if s.eat("%]") {
            break;
        }
        if s.at_end() {
            return Err(err_at(s.pos(), "Unexpected end of string"));
        }
        let key_pos = s.pos();
        // Quoted keys stay raw, doubled quotes included.
        let (key, is_literal) = if s.peek() == Some('\'') {
            (s.quoted_raw()?.to_string(), true)
        } else {
            (s.word().to_uppercase(), false)
        };
        s.skip_ws();
        if at_close(s) {
            return Err(err_at(
                s.pos(),
                format!("No expression for '{}' in the map", key),
            ));
        }
        let value = value_arg(s)?;
        if is_literal {
            map.branches.push((key, value));
        } else {
            match key.as_str() {
                "ELSE" => map.else_branch = Some(value),
                "NULL" => map.null_branch = Some(value),
                "UNDEFINED" => map.undef_branch = Some(value),
                other => {
                    return Err(err_at(key_pos, format!("Unknown map keyword '{}'", other)))
                }
            }
        }
    }
    Ok(Rc::new(map))
}

/// Maps a variable's value through literal branches with `NULL`,
/// `UNDEFINED` and `ELSE` fallbacks.
struct MapExpr {
    name: String,
    branches: Vec<(String, SharedExpr)>,
    else_branch: Option<SharedExpr>,
    null_branch: Option<SharedExpr>,
    undef_branch: Option<SharedExpr>,
}

impl ScriptExpression for MapExpr {
    fn calculate(&self, ctx: &mut dyn Context) -> Result<Option<String>> {
        if !ctx.has_var(&self.name) {
            if let Some(undef) = &self.undef_branch {
                return undef.calculate(ctx);
            }
        }
        let value = ctx.get_var(&self.name)?;
        match &value {
            None => {
                if let Some(null) = &self.null_branch {
                    return null.calculate(ctx);
                }
            }
            Some(v) => {
                for (key, branch) in &self.branches {
                    if key == v {
                        return branch.calculate(ctx);
                    }
                }
            }
        }
        match &self.else_branch {
            Some(branch) => branch.calculate(ctx),
            None => Err(EngineError::Format(format!(
                "Expression for value '{}' of var '{}' not specified",
                value.as_deref().unwrap_or("null"),
                self.name
            ))),
        }
    }
}

pub(crate) fn parse_if(s: &mut Scanner, by_value: bool) -> Result<SharedExpr> {
    s.skip_ws();
    let name = s.word().to_string();
    s.skip_ws();
    if at_close(s) {
        return Err(err_at(s.pos(), "Unexpected end of string"));
    }
    let then_branch = value_arg(s)?;
    s.skip_ws();
    let else_branch = if at_close(s) {
        None
    } else {
        let kw_pos = s.pos();
        let word = s.word();
        if !word.eq_ignore_ascii_case("else") {
            return Err(err_at(kw_pos, format!("'Else' expected but '{}' found", word)));
        }
        s.skip_ws();
        if at_close(s) {
            return Err(err_at(s.pos(), "No expression for 'ELSE'"));
        }
        Some(value_arg(s)?)
    };
    expect_close(s)?;
    Ok(Rc::new(IfExpr {
        name,
        by_value,
        then_branch,
        else_branch,
    }))
}

/// `if-var` tests existence; `if-value` additionally requires a non-null,
/// non-empty value. A missing else branch yields an empty string.
struct IfExpr {
    name: String,
    by_value: bool,
    then_branch: SharedExpr,
    else_branch: Option<SharedExpr>,
}

impl ScriptExpression for IfExpr {
    fn calculate(&self, ctx: &mut dyn Context) -> Result<Option<String>> {
        let hit = if self.by_value {
            ctx.has_var(&self.name)
                && ctx.get_var(&self.name)?.map_or(false, |v| !v.is_empty())
        } else {
            ctx.has_var(&self.name)
        };
        if hit {
            self.then_branch.calculate(ctx)
        } else {
            match &self.else_branch {
                Some(branch) => branch.calculate(ctx),
                None => Ok(Some(String::new())),
            }
        }
    }
}

pub(crate) fn parse_now(s: &mut Scanner) -> Result<SharedExpr> {
    let format = name_to_close(s)?;
    Ok(Rc::new(NowExpr {
        format: if format.is_empty() { None } else { Some(format) },
    }))
}

/// Current local time, with the context's date format by default.
struct NowExpr {
    format: Option<String>,
}

impl ScriptExpression for NowExpr {
    fn calculate(&self, ctx: &mut dyn Context) -> Result<Option<String>> {
        let now = chrono::Local::now().naive_local();
        let format = match &self.format {
            Some(f) => f.clone(),
            None => ctx.date_format().to_string(),
        };
        Ok(Some(format_datetime(&now, &format)?))
    }
}

pub(crate) fn parse_var_by_name(s: &mut Scanner) -> Result<SharedExpr> {
    let pos = s.pos();
    let name = name_to_close(s)?;
    if name.is_empty() {
        return Err(err_at(pos, "There is no variable name"));
    }
    Ok(Rc::new(VarByName { name }))
}

/// Double indirection: the named variable holds the name of the variable
/// to read. A null name propagates as null.
struct VarByName {
    name: String,
}

impl ScriptExpression for VarByName {
    fn calculate(&self, ctx: &mut dyn Context) -> Result<Option<String>> {
        match ctx.get_var(&self.name)? {
            None => Ok(None),
            Some(target) => ctx.get_var(&target),
        }
    }
}

fn parse_index(s: &mut Scanner) -> Result<i64> {
    s.skip_ws();
    if at_close(s) {
        return Err(err_at(s.pos(), "Unexpected end of substr"));
    }
    let pos = s.pos();
    let word = s.word();
    word.parse()
        .map_err(|_| err_at(pos, format!("Invalid substr index '{}'", word)))
}

pub(crate) fn parse_substr(s: &mut Scanner) -> Result<SharedExpr> {
    let from = parse_index(s)?;
    let to = parse_index(s)?;
    s.skip_ws();
    if at_close(s) {
        return Err(err_at(s.pos(), "Unexpected end of substr"));
    }
    let value = value_arg(s)?;
    expect_close(s)?;
    Ok(Rc::new(SubstrExpr {
        from: from.max(0) as usize,
        to: if to < 0 { None } else { Some(to as usize) },
        value,
    }))
}

/// Character-based substring; an end of `-1` means "to the end" and
/// out-of-range bounds clamp to the value's length.
struct SubstrExpr {
    from: usize,
    to: Option<usize>,
    value: SharedExpr,
}

impl ScriptExpression for SubstrExpr {
    fn calculate(&self, ctx: &mut dyn Context) -> Result<Option<String>> {
        let Some(value) = self.value.calculate(ctx)? else {
            return Ok(None);
        };
        let chars: Vec<char> = value.chars().collect();
        let from = self.from.min(chars.len());
        let to = self.to.unwrap_or(chars.len()).min(chars.len()).max(from);
        Ok(Some(chars[from..to].iter().collect()))
    }
}

fn replace_arg(s: &mut Scanner) -> Result<SharedExpr> {
    s.skip_ws();
    if at_close(s) {
        return Err(err_at(s.pos(), "Unexpected end of string"));
    }
    value_arg(s)
}

pub(crate) fn parse_replace(s: &mut Scanner) -> Result<SharedExpr> {
    let pattern = replace_arg(s)?;
    let replacement = replace_arg(s)?;
    let value = replace_arg(s)?;
    expect_close(s)?;
    Ok(Rc::new(ReplaceExpr {
        pattern,
        replacement,
        value,
    }))
}

/// Regex replace-all. All three operands are expressions; the pattern is
/// compiled on every evaluation, and a null operand makes the result null.
struct ReplaceExpr {
    pattern: SharedExpr,
    replacement: SharedExpr,
    value: SharedExpr,
}

impl ScriptExpression for ReplaceExpr {
    fn calculate(&self, ctx: &mut dyn Context) -> Result<Option<String>> {
        let (Some(pattern), Some(replacement), Some(value)) = (
            self.pattern.calculate(ctx)?,
            self.replacement.calculate(ctx)?,
            self.value.calculate(ctx)?,
        ) else {
            return Ok(None);
        };
        let re = Regex::new(&pattern)
            .map_err(|e| EngineError::Format(format!("Bad replace pattern: {}", e)))?;
        Ok(Some(re.replace_all(&value, replacement.as_str()).into_owned()))
    }
}

/// Placeholder for a function name the parser does not know. Parsing
/// succeeds so a template can be validated structurally; evaluation fails.
pub(crate) struct DeferredFn {
    name: String,
}

impl DeferredFn {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        DeferredFn { name: name.into() }
    }
}

impl ScriptExpression for DeferredFn {
    fn calculate(&self, _ctx: &mut dyn Context) -> Result<Option<String>> {
        Err(EngineError::Format(format!(
            "Function '{}' for template not found",
            self.name
        )))
    }
}
